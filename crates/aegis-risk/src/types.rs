//! Input snapshots and output types for the risk core.
//!
//! Every input is an explicit snapshot assembled by the caller; the risk
//! core holds no hidden state, so equal inputs always produce equal
//! verdicts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use aegis_core::{Price, Size};

/// What the strategy wants to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingIntent {
    pub symbol: String,
    /// "LONG" or "SHORT"; opaque to the risk core beyond being non-empty.
    pub side: String,
    pub position_size_usd: Size,
    pub entry_price: Price,
    pub stop_price: Price,
    pub leverage: Option<Decimal>,
}

/// Capital picture at evaluation time. Losses are cumulative magnitudes
/// and can only grow within a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalSnapshot {
    pub current_balance_usd: Decimal,
    pub initial_balance_usd: Decimal,
    pub total_loss_usd: Decimal,
    pub loss_24h_usd: Decimal,
    pub loss_7d_usd: Decimal,
}

/// One open position as the risk core sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionExposure {
    pub symbol: String,
    pub side: String,
    pub position_size_usd: Size,
}

/// Exposure picture. Correlation groups are supplied externally and
/// opaque to the strategy layer: group name -> member symbols.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub open_positions: Vec<PositionExposure>,
    pub total_exposure_usd: Size,
    pub max_single_position_usd: Size,
    pub correlation_groups: BTreeMap<String, Vec<String>>,
}

/// Behavioral counters maintained by the caller's rolling windows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BehavioralCounters {
    pub actions_last_hour: u32,
    pub actions_last_24h: u32,
    pub consecutive_losses: u32,
    pub last_loss_at: Option<DateTime<Utc>>,
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Runtime health flags relevant to risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthFlags {
    pub runtime_healthy: bool,
    pub critical_modules_available: bool,
    pub consecutive_errors: u32,
    pub is_safe_mode: bool,
}

impl Default for SystemHealthFlags {
    fn default() -> Self {
        Self {
            runtime_healthy: true,
            critical_modules_available: true,
            consecutive_errors: 0,
            is_safe_mode: false,
        }
    }
}

/// Risk state, ordered by severity ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskState {
    Safe,
    Limited,
    Locked,
    Halted,
}

impl RiskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Limited => "LIMITED",
            Self::Locked => "LOCKED",
            Self::Halted => "HALTED",
        }
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingPermission {
    Allow,
    /// Allowed, but the caller must scale the intended size down by the
    /// published factor.
    AllowLimited,
    /// Absolute veto.
    Deny,
}

impl TradingPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::AllowLimited => "ALLOW_LIMITED",
            Self::Deny => "DENY",
        }
    }
}

/// One violated invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable code such as "CAP-24H" or "EXP-SINGLE".
    pub code: String,
    pub severity: RiskState,
    pub message: String,
}

/// All violations found during one evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViolationReport {
    pub violations: Vec<Violation>,
}

impl ViolationReport {
    pub fn worst_severity(&self) -> RiskState {
        self.violations
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(RiskState::Safe)
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Full output of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub permission: TradingPermission,
    pub state: RiskState,
    pub report: ViolationReport,
    /// Size scale factor the caller must apply under ALLOW_LIMITED.
    pub limited_scale_factor: Decimal,
}
