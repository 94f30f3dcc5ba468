//! Error types for aegis-telegram.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API rejected the request: {0}")]
    Api(String),

    #[error("Send failed after retries: {0}")]
    RetriesExhausted(String),
}

pub type TelegramResult<T> = std::result::Result<T, TelegramError>;
