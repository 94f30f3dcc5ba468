//! Error types for aegis-persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Injected storage fault")]
    InjectedFault,

    #[error("Record not found: {0}")]
    NotFound(String),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;
