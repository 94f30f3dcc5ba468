//! Outbound message sink.
//!
//! The gatekeeper talks to the chat transport through this seam; the
//! Telegram implementation lives in its own crate and tests use the
//! recording null sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("sink send failed: {0}")]
pub struct SinkError(pub String);

/// Outbound delivery of signal messages and chart links.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), SinkError>;
    async fn send_chart(&self, symbol: &str) -> Result<(), SinkError>;
}

/// Records messages instead of sending them. Used in tests and dry runs.
#[derive(Debug, Default)]
pub struct NullSink {
    messages: Mutex<Vec<String>>,
    charts: Mutex<Vec<String>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn charts(&self) -> Vec<String> {
        self.charts.lock().clone()
    }
}

#[async_trait]
impl SignalSink for NullSink {
    async fn send_message(&self, text: &str) -> Result<(), SinkError> {
        self.messages.lock().push(text.to_string());
        Ok(())
    }

    async fn send_chart(&self, symbol: &str) -> Result<(), SinkError> {
        self.charts.lock().push(symbol.to_string());
        Ok(())
    }
}
