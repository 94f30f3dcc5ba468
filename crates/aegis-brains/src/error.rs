//! Error types for aegis-brains.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("Invalid position snapshot: {0}")]
    InvalidPosition(String),

    #[error("Invalid portfolio state: {0}")]
    InvalidPortfolio(String),

    #[error("Invalid meta decision: {0}")]
    InvalidMetaDecision(String),
}

pub type BrainResult<T> = std::result::Result<T, BrainError>;
