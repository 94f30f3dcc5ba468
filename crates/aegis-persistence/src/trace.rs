//! Decision trace records.
//!
//! The trace never influences trading logic. It only records verdicts for
//! analysis, replay, drift detection, and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Block strength recorded with a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockLevel {
    Hard,
    Soft,
    None,
}

impl BlockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "HARD",
            Self::Soft => "SOFT",
            Self::None => "NONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HARD" => Some(Self::Hard),
            "SOFT" => Some(Self::Soft),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    /// Trading pair, or "SYSTEM" for system-level decisions.
    pub symbol: String,
    /// "RiskCore", "META", "DecisionCore", "PortfolioBrain",
    /// "PositionSizer", "Gatekeeper", ...
    pub decision_source: String,
    pub allow_trading: bool,
    pub block_level: BlockLevel,
    pub reason: String,
    pub context_snapshot: Value,
}

impl DecisionRecord {
    pub fn new(
        symbol: impl Into<String>,
        decision_source: impl Into<String>,
        allow_trading: bool,
        block_level: BlockLevel,
        reason: impl Into<String>,
        context_snapshot: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.into(),
            decision_source: decision_source.into(),
            allow_trading,
            block_level,
            reason: reason.into(),
            context_snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_level_round_trip() {
        for level in [BlockLevel::Hard, BlockLevel::Soft, BlockLevel::None] {
            assert_eq!(BlockLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(BlockLevel::parse("MEDIUM"), None);
    }

    #[test]
    fn test_record_construction() {
        let record = DecisionRecord::new(
            "BTCUSDT",
            "RiskCore",
            false,
            BlockLevel::Hard,
            "veto",
            json!({"confidence": 0.7}),
        );
        assert_eq!(record.symbol, "BTCUSDT");
        assert!(!record.allow_trading);
    }
}
