//! Replay report aggregation and rendering.

use std::collections::BTreeMap;

use serde::Serialize;

/// Aggregated replay outcome, used to compare validator behavior between
/// released versions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub total_snapshots: usize,
    pub meta_blocked: usize,
    pub decision_blocked: usize,
    pub portfolio_blocked: usize,
    pub sizer_blocked: usize,
    pub allowed_trades: usize,
    pub size_reduced_count: usize,
    pub avg_size_multiplier: f64,
    pub avg_final_risk_pct: f64,
    pub meta_block_reasons: BTreeMap<String, usize>,
    pub decision_block_reasons: BTreeMap<String, usize>,
    pub portfolio_block_reasons: BTreeMap<String, usize>,

    #[serde(skip)]
    pub(crate) size_multiplier_sum: f64,
    #[serde(skip)]
    pub(crate) final_risk_sum: f64,
}

impl ReplayReport {
    /// Compute the averages once all snapshots have been replayed.
    pub(crate) fn finalize(&mut self) {
        if self.size_reduced_count > 0 {
            self.avg_size_multiplier = self.size_multiplier_sum / self.size_reduced_count as f64;
        }
        if self.allowed_trades > 0 {
            self.avg_final_risk_pct = self.final_risk_sum / self.allowed_trades as f64;
        }
    }

    pub fn blocked_total(&self) -> usize {
        self.meta_blocked + self.decision_blocked + self.portfolio_blocked + self.sizer_blocked
    }

    /// Markdown rendering for audit output.
    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# Replay Report\n\n");
        out += &format!("- Snapshots replayed: {}\n", self.total_snapshots);
        out += &format!("- Allowed: {}\n", self.allowed_trades);
        out += &format!("- Blocked: {}\n", self.blocked_total());
        out += &format!("  - Meta: {}\n", self.meta_blocked);
        out += &format!("  - DecisionCore: {}\n", self.decision_blocked);
        out += &format!("  - Portfolio: {}\n", self.portfolio_blocked);
        out += &format!("  - Sizer: {}\n", self.sizer_blocked);
        out += &format!("- Size reduced: {}\n", self.size_reduced_count);
        if self.size_reduced_count > 0 {
            out += &format!("- Avg size multiplier: {:.2}\n", self.avg_size_multiplier);
        }
        if self.allowed_trades > 0 {
            out += &format!("- Avg final risk: {:.2}%\n", self.avg_final_risk_pct);
        }

        for (title, reasons) in [
            ("Meta block reasons", &self.meta_block_reasons),
            ("Decision block reasons", &self.decision_block_reasons),
            ("Portfolio block reasons", &self.portfolio_block_reasons),
        ] {
            if reasons.is_empty() {
                continue;
            }
            out += &format!("\n## {title}\n");
            for (reason, count) in reasons {
                out += &format!("- {count}x {reason}\n");
            }
        }

        out
    }
}
