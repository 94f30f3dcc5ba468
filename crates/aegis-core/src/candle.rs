//! OHLCV candle type.
//!
//! Candle lists are chronological (oldest first) everywhere past the feed
//! boundary; the feed client is responsible for reversing exchange order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Price;

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, Unix milliseconds.
    pub start_ms: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
}

impl Candle {
    /// Absolute body size.
    pub fn body(&self) -> Decimal {
        (self.close.inner() - self.open.inner()).abs()
    }

    /// High-to-low range.
    pub fn range(&self) -> Decimal {
        self.high.inner() - self.low.inner()
    }

    /// Wick above the body.
    pub fn upper_wick(&self) -> Decimal {
        self.high.inner() - self.open.inner().max(self.close.inner())
    }

    /// Wick below the body.
    pub fn lower_wick(&self) -> Decimal {
        self.open.inner().min(self.close.inner()) - self.low.inner()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}
