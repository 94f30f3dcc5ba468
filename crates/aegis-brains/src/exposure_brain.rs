//! Risk exposure brain: aggregates open-position risk.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use aegis_core::RiskExposure;
use aegis_state::SystemStateHandle;

fn default_overload_threshold_pct() -> f64 {
    10.0
}

#[derive(Debug, Clone)]
pub struct RiskExposureBrain {
    /// Total open risk above this % of balance flags the book overloaded.
    overload_threshold_pct: f64,
}

impl Default for RiskExposureBrain {
    fn default() -> Self {
        Self {
            overload_threshold_pct: default_overload_threshold_pct(),
        }
    }
}

impl RiskExposureBrain {
    pub fn new(overload_threshold_pct: f64) -> Self {
        Self {
            overload_threshold_pct,
        }
    }

    /// Aggregate the open-position cache into the exposure slice.
    pub fn analyze(&self, state: &SystemStateHandle, balance_usd: Decimal) -> RiskExposure {
        let positions = state.open_positions();

        let total_usd: Decimal = positions.iter().map(|p| p.size_usd.inner()).sum();
        let total_risk_pct = if balance_usd > Decimal::ZERO {
            (total_usd / balance_usd * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let exposure = RiskExposure {
            total_risk_pct,
            active_positions: positions.len(),
            is_overloaded: total_risk_pct > self.overload_threshold_pct,
        };

        state.update_risk_exposure(exposure.clone());
        exposure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_state::{OpenPosition, PositionSide};
    use aegis_core::{MarketState, Price, Size};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(size: Decimal) -> OpenPosition {
        OpenPosition {
            trade_id: 1,
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size_usd: Size::new(size),
            entry: Price::new(dec!(50000)),
            stop: Price::new(dec!(49500)),
            target: Price::new(dec!(51000)),
            state_at_entry: Some(MarketState::D),
            confidence_at_entry: 0.7,
            entropy_at_entry: 0.3,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_book_is_zero_risk() {
        let state = SystemStateHandle::new();
        let exposure = RiskExposureBrain::default().analyze(&state, dec!(10000));
        assert_eq!(exposure.active_positions, 0);
        assert!(!exposure.is_overloaded);
        assert_eq!(state.risk_exposure().unwrap(), exposure);
    }

    #[test]
    fn test_overload_detection() {
        let state = SystemStateHandle::new();
        state.update_open_positions(vec![position(dec!(800)), position(dec!(400))]);

        let exposure = RiskExposureBrain::default().analyze(&state, dec!(10000));
        assert_eq!(exposure.active_positions, 2);
        assert!((exposure.total_risk_pct - 12.0).abs() < 1e-9);
        assert!(exposure.is_overloaded);
    }
}
