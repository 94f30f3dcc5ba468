//! Error types for aegis-risk.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Malformed risk input: {0}")]
    MalformedInput(String),
}

pub type RiskResult<T> = std::result::Result<T, RiskError>;
