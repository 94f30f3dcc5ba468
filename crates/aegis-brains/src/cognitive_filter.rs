//! Cognitive filter: is the system over-trading itself?

use chrono::{Duration as ChronoDuration, Utc};

use aegis_core::CognitiveState;
use aegis_state::SystemStateHandle;

/// Signals within this window count toward the over-trading score.
const CADENCE_WINDOW_HOURS: i64 = 2;

/// Signal count per window that maps to an over-trading score of 1.0.
const CADENCE_SATURATION: usize = 12;

#[derive(Debug, Clone, Default)]
pub struct CognitiveFilter;

impl CognitiveFilter {
    pub fn new() -> Self {
        Self
    }

    /// Score recent signal cadence and the loss pattern; recommend a pause
    /// when both point to over-trading.
    pub fn analyze(&self, state: &SystemStateHandle) -> CognitiveState {
        let cutoff = Utc::now() - ChronoDuration::hours(CADENCE_WINDOW_HOURS);
        let recent = state.recent_signals();

        let recent_count = recent.iter().filter(|s| s.timestamp >= cutoff).count();
        let cadence_score = (recent_count as f64 / CADENCE_SATURATION as f64).min(1.0);

        let outcomes: Vec<f64> = recent.iter().filter_map(|s| s.outcome).collect();
        let loss_ratio = if outcomes.len() >= 3 {
            outcomes.iter().filter(|o| **o < 0.0).count() as f64 / outcomes.len() as f64
        } else {
            0.0
        };

        let overtrading_score = (cadence_score * 0.7 + loss_ratio * 0.3).clamp(0.0, 1.0);
        let cognitive = CognitiveState {
            overtrading_score,
            should_pause: overtrading_score > 0.75,
        };

        state.update_cognitive_state(cognitive.clone());
        cognitive
    }
}
