//! Persistable checkpoint of the durable state subset.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_core::MarketState;

use crate::health::{PerformanceMetrics, SystemHealth};
use crate::state::{OpenPosition, RecentSignal};

/// Snapshot of the durable state, serialized to JSON in the
/// `system_state_snapshots` table every N cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCheckpoint {
    pub timestamp: DateTime<Utc>,
    pub open_positions: Vec<OpenPosition>,
    pub performance_metrics: PerformanceMetrics,
    pub system_health: SystemHealth,
    /// Last 20 recent signals.
    pub recent_signals: Vec<RecentSignal>,
    /// Per-symbol last-emitted anchor state, for dedup continuity.
    pub signal_cache: BTreeMap<String, MarketState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_json_round_trip() {
        let checkpoint = StateCheckpoint {
            timestamp: Utc::now(),
            open_positions: vec![],
            performance_metrics: PerformanceMetrics::default(),
            system_health: SystemHealth::default(),
            recent_signals: vec![],
            signal_cache: BTreeMap::from([("BTCUSDT".to_string(), MarketState::D)]),
        };

        let json = serde_json::to_string(&checkpoint).unwrap();
        let parsed: StateCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.signal_cache["BTCUSDT"], MarketState::D);
    }
}
