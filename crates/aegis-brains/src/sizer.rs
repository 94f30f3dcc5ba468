//! Position sizer.
//!
//! The sizer never decides whether to enter, only how big. Pure and
//! deterministic; extensible with further factors (regime, volatility).

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aegis_core::Size;

use crate::portfolio::PortfolioState;

fn default_base_risk_pct() -> f64 {
    2.0
}

fn default_min_risk_pct() -> f64 {
    0.5
}

/// Sizer parameters as percentages of balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Base risk per trade.
    #[serde(default = "default_base_risk_pct")]
    pub base_risk_pct: f64,
    /// Below this final risk the trade is not worth taking.
    #[serde(default = "default_min_risk_pct")]
    pub min_risk_pct: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            base_risk_pct: default_base_risk_pct(),
            min_risk_pct: default_min_risk_pct(),
        }
    }
}

/// Result of one sizing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingResult {
    pub position_allowed: bool,
    /// Final risk as % of balance.
    pub final_risk_pct: f64,
    pub position_size_usd: Option<Size>,
    pub reason: String,
}

/// The position sizer.
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// final_risk = base_risk x clamp(confidence, 0.2, 1.0)
    ///            x clamp(1 - entropy, 0.1, 1.0)
    ///            x portfolio available-risk ratio
    ///
    /// Monotone: higher confidence never shrinks the risk, higher entropy
    /// never grows it.
    pub fn calculate(
        &self,
        confidence: f64,
        entropy: f64,
        portfolio: &PortfolioState,
        balance_usd: Decimal,
    ) -> SizingResult {
        let confidence_factor = confidence.clamp(0.2, 1.0);
        let entropy_factor = (1.0 - entropy).clamp(0.1, 1.0);
        let available = portfolio.available_risk_ratio();

        let final_risk = self.config.base_risk_pct * confidence_factor * entropy_factor * available;

        if final_risk < self.config.min_risk_pct {
            return SizingResult {
                position_allowed: false,
                final_risk_pct: final_risk,
                position_size_usd: None,
                reason: format!(
                    "Final risk {final_risk:.2}% below minimum threshold {:.2}%",
                    self.config.min_risk_pct
                ),
            };
        }

        let risk_decimal = Decimal::from_f64(final_risk).unwrap_or(Decimal::ZERO);
        let size = balance_usd * risk_decimal / Decimal::from(100);

        SizingResult {
            position_allowed: true,
            final_risk_pct: final_risk,
            position_size_usd: Some(Size::new(size.round_dp(2))),
            reason: format!(
                "Risk {final_risk:.2}% (confidence {confidence_factor:.2}, \
                 entropy factor {entropy_factor:.2}, available risk {available:.2})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn empty_portfolio() -> PortfolioState {
        PortfolioState::empty(Size::new(dec!(1000)))
    }

    #[test]
    fn test_happy_path_sizing() {
        let sizer = PositionSizer::default();
        let result = sizer.calculate(0.7, 0.3, &empty_portfolio(), dec!(10000));

        assert!(result.position_allowed);
        // 2.0 * 0.7 * 0.7 * 1.0 = 0.98% -> 98 USD on 10k.
        assert!((result.final_risk_pct - 0.98).abs() < 1e-9);
        assert_eq!(result.position_size_usd.unwrap().inner(), dec!(98));
    }

    #[test]
    fn test_below_threshold_blocks() {
        let sizer = PositionSizer::default();
        // 2.0 * 0.2 * 0.1 = 0.04% << 0.5%.
        let result = sizer.calculate(0.1, 0.95, &empty_portfolio(), dec!(10000));

        assert!(!result.position_allowed);
        assert!(result.position_size_usd.is_none());
    }

    #[test]
    fn test_monotone_in_confidence() {
        let sizer = PositionSizer::default();
        let portfolio = empty_portfolio();
        let mut last = 0.0;
        for confidence in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let result = sizer.calculate(confidence, 0.3, &portfolio, dec!(10000));
            assert!(
                result.final_risk_pct >= last,
                "risk decreased as confidence rose"
            );
            last = result.final_risk_pct;
        }
    }

    #[test]
    fn test_monotone_in_entropy() {
        let sizer = PositionSizer::default();
        let portfolio = empty_portfolio();
        let mut last = f64::MAX;
        for entropy in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let result = sizer.calculate(0.7, entropy, &portfolio, dec!(10000));
            assert!(
                result.final_risk_pct <= last,
                "risk increased as entropy rose"
            );
            last = result.final_risk_pct;
        }
    }

    #[test]
    fn test_portfolio_utilization_shrinks_size() {
        let sizer = PositionSizer::default();
        let mut used = empty_portfolio();
        used.used_risk = Size::new(dec!(500));

        let free = sizer.calculate(0.9, 0.1, &empty_portfolio(), dec!(10000));
        let busy = sizer.calculate(0.9, 0.1, &used, dec!(10000));
        assert!(busy.final_risk_pct < free.final_risk_pct);
    }
}
