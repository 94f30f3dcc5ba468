//! Error types for aegis-telemetry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Logging initialization error: {0}")]
    Logging(String),
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;
