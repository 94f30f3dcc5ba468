//! Error types for aegis-bot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] aegis_persistence::PersistenceError),

    #[error("Feed error: {0}")]
    Feed(#[from] aegis_feed::FeedError),

    #[error("Telegram error: {0}")]
    Telegram(#[from] aegis_telegram::TelegramError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] aegis_telemetry::TelemetryError),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
