//! Meta decision brain: the WHEN-NOT-TO-TRADE filter.
//!
//! Works only on aggregated system metrics, never on the market directly.
//! Deterministic and stateless.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use aegis_core::MarketRegime;
pub use aegis_core::TimeContext;

use crate::error::{BrainError, BrainResult};

/// Coarse system health as the meta brain sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Ok,
    Degraded,
}

/// Block strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockLevel {
    /// Trading fully forbidden.
    Hard,
    /// Trading discouraged; possible with caution.
    Soft,
}

impl BlockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "HARD",
            Self::Soft => "SOFT",
        }
    }
}

/// Aggregated inputs for one meta evaluation.
#[derive(Debug, Clone, Default)]
pub struct MetaInputs {
    pub market_regime: Option<MarketRegime>,
    /// System-level confidence, [0, 1].
    pub confidence: f64,
    /// System-level entropy, [0, 1].
    pub entropy: f64,
    /// Portfolio exposure as a fraction of balance, [0, 1].
    pub portfolio_exposure: f64,
    /// Recent trade outcomes (PnL), newest last.
    pub recent_outcomes: Vec<f64>,
    pub signals_count_recent: usize,
    pub system_health: HealthStatus,
    pub time_context: TimeContext,
}

/// Result of a meta evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDecisionResult {
    pub allow_trading: bool,
    pub reason: String,
    pub block_level: Option<BlockLevel>,
    pub cooldown: Duration,
}

impl MetaDecisionResult {
    fn allow() -> Self {
        Self {
            allow_trading: true,
            reason: "No blocking conditions detected. System is ready for trading.".to_string(),
            block_level: None,
            cooldown: Duration::ZERO,
        }
    }

    fn block(level: BlockLevel, reason: String, cooldown_minutes: u64) -> BrainResult<Self> {
        let result = Self {
            allow_trading: false,
            reason,
            block_level: Some(level),
            cooldown: Duration::from_secs(cooldown_minutes * 60),
        };
        result.validate()
    }

    fn validate(self) -> BrainResult<Self> {
        if !self.allow_trading && self.block_level.is_none() {
            return Err(BrainError::InvalidMetaDecision(
                "block_level must be set when trading is blocked".to_string(),
            ));
        }
        Ok(self)
    }
}

/// The meta decision brain.
#[derive(Debug, Clone, Default)]
pub struct MetaDecisionBrain;

impl MetaDecisionBrain {
    pub fn new() -> Self {
        Self
    }

    /// HARD block on any critical condition, SOFT block on warning
    /// conditions, otherwise allow.
    pub fn evaluate(&self, inputs: &MetaInputs) -> MetaDecisionResult {
        let confidence = inputs.confidence.clamp(0.0, 1.0);
        let entropy = inputs.entropy.clamp(0.0, 1.0);
        let exposure = inputs.portfolio_exposure.clamp(0.0, 1.0);

        if let Some(result) = self.hard_block(confidence, entropy, exposure, inputs.system_health) {
            return result;
        }

        if let Some(result) = self.soft_block(confidence, entropy, exposure, inputs) {
            return result;
        }

        MetaDecisionResult::allow()
    }

    fn hard_block(
        &self,
        confidence: f64,
        entropy: f64,
        exposure: f64,
        health: HealthStatus,
    ) -> Option<MetaDecisionResult> {
        if entropy > 0.7 && confidence < 0.4 {
            return MetaDecisionResult::block(
                BlockLevel::Hard,
                format!(
                    "HARD BLOCK: High entropy ({entropy:.2}) combined with low confidence \
                     ({confidence:.2}) indicates system uncertainty. Trading is too risky."
                ),
                30,
            )
            .ok();
        }

        if exposure > 0.8 {
            return MetaDecisionResult::block(
                BlockLevel::Hard,
                format!(
                    "HARD BLOCK: Portfolio exposure ({:.1}%) exceeds safe limit (80%). \
                     Risk of overexposure.",
                    exposure * 100.0
                ),
                30,
            )
            .ok();
        }

        if health == HealthStatus::Degraded {
            return MetaDecisionResult::block(
                BlockLevel::Hard,
                "HARD BLOCK: System health is DEGRADED. Trading is disabled until the system \
                 recovers."
                    .to_string(),
                30,
            )
            .ok();
        }

        None
    }

    fn soft_block(
        &self,
        confidence: f64,
        entropy: f64,
        exposure: f64,
        inputs: &MetaInputs,
    ) -> Option<MetaDecisionResult> {
        // Over-trading cadence.
        if inputs.signals_count_recent > 10 {
            return MetaDecisionResult::block(
                BlockLevel::Soft,
                format!(
                    "SOFT BLOCK: Too many signals in recent period ({}). Risk of overtrading.",
                    inputs.signals_count_recent
                ),
                15,
            )
            .ok();
        }

        // Mid-range confidence and entropy with real exposure on the book.
        if (0.4..=0.6).contains(&confidence) && (0.4..=0.6).contains(&entropy) && exposure > 0.5 {
            return MetaDecisionResult::block(
                BlockLevel::Soft,
                format!(
                    "SOFT BLOCK: Medium confidence ({confidence:.2}) and entropy ({entropy:.2}) \
                     with high exposure ({:.1}%) indicate uncertainty.",
                    exposure * 100.0
                ),
                10,
            )
            .ok();
        }

        // Losing streak in recent outcomes.
        if inputs.recent_outcomes.len() >= 3 {
            let negative = inputs
                .recent_outcomes
                .iter()
                .filter(|o| **o < 0.0)
                .count();
            if (negative as f64) > inputs.recent_outcomes.len() as f64 * 0.6 {
                let avg: f64 = inputs.recent_outcomes.iter().sum::<f64>()
                    / inputs.recent_outcomes.len() as f64;
                return MetaDecisionResult::block(
                    BlockLevel::Soft,
                    format!(
                        "SOFT BLOCK: Recent outcomes show {negative}/{} negative results \
                         (avg: {avg:.2}). System may need recalibration.",
                        inputs.recent_outcomes.len()
                    ),
                    20,
                )
                .ok();
            }
        }

        // High exposure with low confidence.
        if exposure > 0.6 && confidence < 0.5 {
            return MetaDecisionResult::block(
                BlockLevel::Soft,
                format!(
                    "SOFT BLOCK: High exposure ({:.1}%) with low confidence ({confidence:.2}).",
                    exposure * 100.0
                ),
                15,
            )
            .ok();
        }

        // Session end with an unstable market.
        if inputs.time_context == TimeContext::SessionEnd && entropy > 0.6 {
            return MetaDecisionResult::block(
                BlockLevel::Soft,
                format!(
                    "SOFT BLOCK: End of trading session with high entropy ({entropy:.2})."
                ),
                5,
            )
            .ok();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> MetaInputs {
        MetaInputs {
            confidence: 0.7,
            entropy: 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_allow_by_default() {
        let result = MetaDecisionBrain::new().evaluate(&inputs());
        assert!(result.allow_trading);
        assert!(result.block_level.is_none());
        assert_eq!(result.cooldown, Duration::ZERO);
    }

    #[test]
    fn test_hard_block_entropy_confidence() {
        let mut i = inputs();
        i.entropy = 0.8;
        i.confidence = 0.3;

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert!(!result.allow_trading);
        assert_eq!(result.block_level, Some(BlockLevel::Hard));
        assert_eq!(result.cooldown, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_hard_block_overexposure() {
        let mut i = inputs();
        i.portfolio_exposure = 0.85;

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Hard));
        assert!(result.reason.contains("exposure"));
    }

    #[test]
    fn test_hard_block_degraded_health() {
        let mut i = inputs();
        i.system_health = HealthStatus::Degraded;

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Hard));
    }

    #[test]
    fn test_soft_block_overtrading() {
        let mut i = inputs();
        i.signals_count_recent = 11;

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Soft));
        assert_eq!(result.cooldown, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_soft_block_losing_streak() {
        let mut i = inputs();
        i.recent_outcomes = vec![-10.0, -5.0, -8.0, 2.0];

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Soft));
        assert_eq!(result.cooldown, Duration::from_secs(20 * 60));
    }

    #[test]
    fn test_soft_block_session_end_entropy() {
        let mut i = inputs();
        i.time_context = TimeContext::SessionEnd;
        i.entropy = 0.65;

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Soft));
        assert_eq!(result.cooldown, Duration::from_secs(5 * 60));
    }

    #[test]
    fn test_inputs_are_clamped() {
        let mut i = inputs();
        i.entropy = 3.0; // clamps to 1.0
        i.confidence = -1.0; // clamps to 0.0

        let result = MetaDecisionBrain::new().evaluate(&i);
        assert_eq!(result.block_level, Some(BlockLevel::Hard));
    }

    #[test]
    fn test_deterministic() {
        let brain = MetaDecisionBrain::new();
        let i = inputs();
        assert_eq!(brain.evaluate(&i), brain.evaluate(&i));
    }
}
