//! Error types for aegis-runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Notify socket error: {0}")]
    Notify(#[from] std::io::Error),

    #[error("Event pump already running")]
    PumpAlreadyRunning,
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
