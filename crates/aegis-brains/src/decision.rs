//! Decision core: the single point that says "can we trade at all".
//!
//! Decision first: "may we" before "what exactly". The core owns no state
//! of its own; it reads the shared system state and writes back exactly
//! one field, `can_trade`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aegis_core::{RiskLevel, Size, VolatilityLevel};
use aegis_state::SystemStateHandle;

fn default_max_position_size_usd() -> Decimal {
    Decimal::from(1000)
}

fn default_max_leverage() -> Decimal {
    Decimal::from(10)
}

/// Static caps applied to every verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCoreConfig {
    #[serde(default = "default_max_position_size_usd")]
    pub max_position_size_usd: Decimal,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
}

impl Default for DecisionCoreConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: default_max_position_size_usd(),
            max_leverage: default_max_leverage(),
        }
    }
}

/// Per-symbol (or global) trading verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingDecision {
    pub can_trade: bool,
    pub risk_level: RiskLevel,
    pub max_position_size: Option<Size>,
    pub max_leverage: Option<Decimal>,
    pub reason: String,
    pub recommendations: Vec<String>,
}

impl TradingDecision {
    fn denied(reason: impl Into<String>) -> Self {
        Self {
            can_trade: false,
            risk_level: RiskLevel::High,
            max_position_size: None,
            max_leverage: None,
            reason: reason.into(),
            recommendations: Vec::new(),
        }
    }
}

/// The decision core.
#[derive(Debug, Clone, Default)]
pub struct DecisionCore {
    config: DecisionCoreConfig,
}

impl DecisionCore {
    pub fn new(config: DecisionCoreConfig) -> Self {
        Self { config }
    }

    /// Synthesize the verdict from the shared state. Writes only
    /// `SystemState.can_trade`.
    pub fn should_i_trade(
        &self,
        state: &SystemStateHandle,
        symbol: Option<&str>,
    ) -> TradingDecision {
        let decision = self.synthesize(state, symbol);
        state.set_can_trade(decision.can_trade);
        decision
    }

    fn synthesize(&self, state: &SystemStateHandle, symbol: Option<&str>) -> TradingDecision {
        let health = state.system_health();

        if health.trading_paused {
            return TradingDecision::denied("Trading is paused by the state machine");
        }
        if health.safe_mode {
            return TradingDecision::denied("System is in safe mode");
        }
        if health.consecutive_errors >= 3 {
            return TradingDecision::denied(format!(
                "Too many consecutive errors ({})",
                health.consecutive_errors
            ));
        }

        if let Some(cognitive) = state.cognitive_state() {
            if cognitive.should_pause {
                return TradingDecision::denied(format!(
                    "Cognitive filter recommends a pause (overtrading score {:.2})",
                    cognitive.overtrading_score
                ));
            }
        }

        let exposure = state.risk_exposure();
        if let Some(ref exp) = exposure {
            if exp.is_overloaded {
                return TradingDecision::denied(format!(
                    "Risk exposure overloaded ({:.2}% across {} positions)",
                    exp.total_risk_pct, exp.active_positions
                ));
            }
        }

        let regime = state.market_regime();
        if let Some(ref r) = regime {
            if r.volatility_level == VolatilityLevel::Extreme {
                return TradingDecision::denied("Market volatility is EXTREME");
            }
        }

        // Allowed: derive the risk tier and caps.
        let mut risk_level = RiskLevel::Low;
        let mut recommendations = Vec::new();

        if let Some(ref r) = regime {
            match r.volatility_level {
                VolatilityLevel::High => {
                    risk_level = RiskLevel::Medium;
                    recommendations.push("High volatility: prefer reduced size".to_string());
                }
                VolatilityLevel::Unknown => {
                    risk_level = RiskLevel::Medium;
                    recommendations.push("Volatility unknown: treat sizing as uncertain".to_string());
                }
                _ => {}
            }
            if r.confidence < 0.4 {
                risk_level = risk_level.max(RiskLevel::Medium);
                recommendations.push("Low regime confidence: wait for confirmation".to_string());
            }
        } else {
            risk_level = RiskLevel::Medium;
            recommendations.push("No regime analysis yet this cycle".to_string());
        }

        if let Some(ref exp) = exposure {
            if exp.total_risk_pct > 5.0 {
                risk_level = risk_level.max(RiskLevel::Medium);
                recommendations.push(format!(
                    "Open risk already at {:.1}%: add exposure carefully",
                    exp.total_risk_pct
                ));
            }
        }

        // Caps shrink with the risk tier.
        let size_cap = match risk_level {
            RiskLevel::Low => self.config.max_position_size_usd,
            RiskLevel::Medium => self.config.max_position_size_usd / Decimal::from(2),
            RiskLevel::High => self.config.max_position_size_usd / Decimal::from(4),
        };
        let leverage_cap = match risk_level {
            RiskLevel::Low => self.config.max_leverage,
            RiskLevel::Medium => (self.config.max_leverage / Decimal::from(2)).max(Decimal::ONE),
            RiskLevel::High => Decimal::ONE,
        };

        let reason = match symbol {
            Some(s) => format!("Conditions acceptable for {s} (risk {})", risk_level),
            None => format!("Conditions acceptable (risk {})", risk_level),
        };

        TradingDecision {
            can_trade: true,
            risk_level,
            max_position_size: Some(Size::new(size_cap)),
            max_leverage: Some(leverage_cap),
            reason,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{CognitiveState, MarketRegime, RiskExposure};
    use rust_decimal_macros::dec;

    fn core() -> DecisionCore {
        DecisionCore::default()
    }

    #[test]
    fn test_allows_on_clean_state() {
        let state = SystemStateHandle::new();
        let decision = core().should_i_trade(&state, Some("BTCUSDT"));
        assert!(decision.can_trade);
        // Writes the flag back into shared state.
        assert!(state.can_trade());
    }

    #[test]
    fn test_denies_when_paused() {
        let state = SystemStateHandle::new();
        state.sync_flags_from_state_machine(true, true);

        let decision = core().should_i_trade(&state, None);
        assert!(!decision.can_trade);
        assert!(!state.can_trade());
        assert!(decision.reason.contains("paused"));
    }

    #[test]
    fn test_denies_on_consecutive_errors() {
        let state = SystemStateHandle::new();
        for _ in 0..3 {
            state.record_error("boom");
        }
        let decision = core().should_i_trade(&state, None);
        assert!(!decision.can_trade);
    }

    #[test]
    fn test_denies_on_cognitive_pause() {
        let state = SystemStateHandle::new();
        state.update_cognitive_state(CognitiveState {
            overtrading_score: 0.9,
            should_pause: true,
        });
        let decision = core().should_i_trade(&state, None);
        assert!(!decision.can_trade);
    }

    #[test]
    fn test_denies_on_overloaded_exposure() {
        let state = SystemStateHandle::new();
        state.update_risk_exposure(RiskExposure {
            total_risk_pct: 12.0,
            active_positions: 6,
            is_overloaded: true,
        });
        let decision = core().should_i_trade(&state, None);
        assert!(!decision.can_trade);
    }

    #[test]
    fn test_extreme_volatility_denies() {
        let state = SystemStateHandle::new();
        state.update_market_regime(MarketRegime {
            volatility_level: aegis_core::VolatilityLevel::Extreme,
            confidence: 0.9,
            ..Default::default()
        });
        let decision = core().should_i_trade(&state, None);
        assert!(!decision.can_trade);
    }

    #[test]
    fn test_high_volatility_halves_caps() {
        let state = SystemStateHandle::new();
        state.update_market_regime(MarketRegime {
            volatility_level: aegis_core::VolatilityLevel::High,
            confidence: 0.8,
            ..Default::default()
        });
        let decision = core().should_i_trade(&state, None);
        assert!(decision.can_trade);
        assert_eq!(decision.risk_level, RiskLevel::Medium);
        assert_eq!(decision.max_position_size.unwrap().inner(), dec!(500));
        assert_eq!(decision.max_leverage.unwrap(), dec!(5));
    }
}
