//! Error types for aegis-feed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kline parse error: {0}")]
    Parse(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
