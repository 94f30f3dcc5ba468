//! Decision brains.
//!
//! The ordered validator chain lives here (`MetaDecisionBrain`,
//! `DecisionCore`, `PortfolioBrain`, `PositionSizer`) together with the
//! per-cycle analysis brains that feed the shared system state
//! (`MarketRegimeBrain`, `RiskExposureBrain`, `CognitiveFilter`,
//! `OpportunityAwareness`).

pub mod cognitive_filter;
pub mod decision;
pub mod error;
pub mod exposure_brain;
pub mod meta;
pub mod opportunity;
pub mod portfolio;
pub mod regime_brain;
pub mod sizer;

pub use cognitive_filter::CognitiveFilter;
pub use decision::{DecisionCore, DecisionCoreConfig, TradingDecision};
pub use error::{BrainError, BrainResult};
pub use exposure_brain::RiskExposureBrain;
pub use meta::{
    BlockLevel, HealthStatus, MetaDecisionBrain, MetaDecisionResult, MetaInputs, TimeContext,
};
pub use opportunity::OpportunityAwareness;
pub use portfolio::{
    build_portfolio_state, PortfolioAnalysis, PortfolioBrain, PortfolioDecision, PortfolioState,
    PositionDirection, PositionSnapshot,
};
pub use regime_brain::MarketRegimeBrain;
pub use sizer::{PositionSizer, SizerConfig, SizingResult};
