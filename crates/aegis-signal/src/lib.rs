//! Signal generation: scoring, entry logic, and the per-cycle
//! orchestrator that feeds the gatekeeper.

pub mod correlation;
pub mod error;
pub mod generator;
pub mod leverage;
pub mod risk;
pub mod rr;
pub mod scoring;
pub mod timefilter;

pub use correlation::{analyze_market_correlations, correlation_score};
pub use error::{SignalError, SignalResult};
pub use generator::{CycleStats, GeneratorConfig, SignalGenerator};
pub use leverage::recommended_leverage;
pub use risk::{calculate_stop_distance, enhanced_risk_level, risk_level, StopInfo};
pub use rr::{calculate_adaptive_rr, RrPlan};
pub use scoring::{
    calculate_score, entry_conditions, market_mode, EntryCondition, MomentumData, ScoreBreakdown,
};
pub use timefilter::{is_good_time, session_context, TradingWindow};
