//! Error types for aegis-signal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Feed error: {0}")]
    Feed(#[from] aegis_feed::FeedError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] aegis_core::CoreError),

    #[error("Cycle stage timed out: {0}")]
    StageTimeout(&'static str),
}

pub type SignalResult<T> = std::result::Result<T, SignalError>;
