//! Error types for aegis-gatekeeper.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("Validator stage {stage} failed: {reason}")]
    StageFailure { stage: &'static str, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] aegis_persistence::PersistenceError),

    #[error("Sink error: {0}")]
    Sink(#[from] crate::sink::SinkError),
}

pub type GatekeeperResult<T> = std::result::Result<T, GatekeeperError>;
