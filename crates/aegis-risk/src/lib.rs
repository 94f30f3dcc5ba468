//! Trading risk core: a pure policy-enforcement layer with veto power.
//!
//! Core principles (non-negotiable):
//! - RiskCore is NOT a strategy
//! - RiskCore does NOT optimize
//! - RiskCore does NOT explain itself to strategy
//! - RiskCore always fails closed
//! - RiskCore has veto power
//!
//! If uncertain, trading is denied.

pub mod core;
pub mod counters;
pub mod error;
pub mod types;

pub use core::{RiskCore, RiskLimits};
pub use counters::RollingActionCounters;
pub use error::{RiskError, RiskResult};
pub use types::{
    BehavioralCounters, CapitalSnapshot, ExposureSnapshot, PositionExposure, RiskState,
    RiskVerdict, SystemHealthFlags, TradingIntent, TradingPermission, Violation, ViolationReport,
};
