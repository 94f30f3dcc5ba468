//! Health and performance slices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process health flags.
///
/// `safe_mode` and `trading_paused` are derived from the state machine;
/// the only writer is `SystemStateMachine::sync_to_system_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub is_running: bool,
    pub safe_mode: bool,
    pub trading_paused: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            is_running: true,
            safe_mode: false,
            trading_paused: false,
            last_heartbeat: None,
            consecutive_errors: 0,
        }
    }
}

/// Per-cycle performance counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
