//! Aggregated regime picture and the other brain-output records.
//!
//! These are the slices the analysis brains write into the shared system
//! state. They carry no behavior beyond rendering helpers; the brains own
//! the update logic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trend vs range classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrendType {
    Trend,
    Range,
    #[default]
    Unknown,
}

impl TrendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "TREND",
            Self::Range => "RANGE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TrendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volatility tier derived from ATR as a percentage of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
    #[default]
    Unknown,
}

impl VolatilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Extreme => "EXTREME",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market-wide risk appetite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RiskSentiment {
    RiskOn,
    RiskOff,
    Neutral,
    #[default]
    Unknown,
}

impl RiskSentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskOn => "RISK_ON",
            Self::RiskOff => "RISK_OFF",
            Self::Neutral => "NEUTRAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RiskSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signal risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session phase context, derived from the trading window and carried on
/// every snapshot for the session-aware validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeContext {
    SessionStart,
    SessionMid,
    SessionEnd,
    AfterHours,
    #[default]
    Unknown,
}

/// Aggregated market regime produced by the MarketRegimeBrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub trend_type: TrendType,
    pub volatility_level: VolatilityLevel,
    pub risk_sentiment: RiskSentiment,
    /// Placeholder scalar for macro pressure, [-1, 1].
    pub macro_pressure: f64,
    /// Brain confidence in the classification, [0, 1].
    pub confidence: f64,
}

impl Default for MarketRegime {
    fn default() -> Self {
        Self {
            trend_type: TrendType::Unknown,
            volatility_level: VolatilityLevel::Unknown,
            risk_sentiment: RiskSentiment::Unknown,
            macro_pressure: 0.0,
            confidence: 0.0,
        }
    }
}

/// Aggregated exposure picture produced by the RiskExposureBrain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskExposure {
    /// Total open risk as a percentage of balance.
    pub total_risk_pct: f64,
    pub active_positions: usize,
    pub is_overloaded: bool,
}

/// Output of the CognitiveFilter: is the system over-trading itself?
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CognitiveState {
    /// Over-trading pressure, [0, 1].
    pub overtrading_score: f64,
    pub should_pause: bool,
}

/// Per-symbol opportunity note from OpportunityAwareness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub score: u32,
    pub note: String,
}
