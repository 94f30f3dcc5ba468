//! Error types for aegis-registry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Module not registered: {0}")]
    ModuleNotRegistered(String),

    #[error("Health check timed out for module {0}")]
    HealthCheckTimeout(String),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
