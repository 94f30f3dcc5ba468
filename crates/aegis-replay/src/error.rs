//! Error types for aegis-replay.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
