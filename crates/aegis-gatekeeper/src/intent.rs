//! The mutable trade intent accompanying an immutable snapshot.
//!
//! The snapshot never changes; the intent's size is what the chain scales
//! (RiskCore ALLOW_LIMITED, PortfolioBrain multiplier) before the sizer
//! writes the final value.

use rust_decimal::Decimal;

use aegis_core::{MarketMode, Price, Size};
use aegis_state::PositionSide;

/// What the generator wants to do for one symbol this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalIntent {
    pub symbol: String,
    pub side: PositionSide,
    pub entry: Price,
    pub stop: Price,
    pub target: Price,
    /// Intended notional, scaled by the chain.
    pub position_size_usd: Size,
    pub leverage: Option<Decimal>,
    pub rr_ratio: f64,
    pub volatility_pct: f64,
    pub score: u32,
    pub mode: MarketMode,
    pub risk_label: String,
    pub reasons: Vec<String>,
}

impl SignalIntent {
    /// Apply a multiplicative size factor.
    pub fn scale_size(&mut self, factor: Decimal) {
        self.position_size_usd = self.position_size_usd * factor;
    }
}
