//! Core domain types for the Aegis signal engine.
//!
//! This crate provides fundamental types used throughout the system:
//! - `MarketState`: four-valued per-timeframe regime tag (enum-only at runtime)
//! - `SignalSnapshot`: the immutable atom flowing through the decision pipeline
//! - `Price`, `Size`: precision-safe numeric types
//! - `MarketRegime` and the other brain-output records
//! - Cognitive metrics (confidence / entropy) computed from a snapshot

pub mod candle;
pub mod cognition;
pub mod decimal;
pub mod error;
pub mod market;
pub mod regime;
pub mod snapshot;

pub use candle::Candle;
pub use cognition::{calculate_confidence, calculate_entropy};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{
    normalize_states, state_to_string, Direction, MarketState, StatesByTimeframe, Timeframe,
};
pub use regime::{
    CognitiveState, MarketRegime, Opportunity, RiskExposure, RiskLevel, RiskSentiment,
    TimeContext, TrendType, VolatilityLevel,
};
pub use snapshot::{
    mode_to_decision, MarketMode, SignalDecision, SignalSnapshot, SnapshotBuilder, StatesMap,
};
