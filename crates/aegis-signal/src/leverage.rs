//! Leverage recommendation, 1x-10x.

use std::collections::BTreeMap;

use aegis_core::{Direction, RiskLevel, StatesByTimeframe, Timeframe};

use crate::risk::risk_level;

/// Recommend a leverage from the risk tier, stop distance, and ATR.
///
/// Lower risk and a tighter (but valid) stop support more leverage; high
/// volatility pulls it back down.
pub fn recommended_leverage(
    states: &StatesByTimeframe,
    directions: Option<&BTreeMap<Timeframe, Direction>>,
    atr_15m: f64,
    entry: f64,
    stop: f64,
) -> u32 {
    let base: f64 = match risk_level(states, directions) {
        RiskLevel::High => 1.0,
        RiskLevel::Medium => 2.0,
        RiskLevel::Low => 3.0,
    };

    let stop_distance_pct = if entry > 0.0 {
        (entry - stop).abs() / entry * 100.0
    } else {
        0.0
    };
    let stop_mult = if stop_distance_pct < 0.5 {
        2.0
    } else if stop_distance_pct < 1.0 {
        1.5
    } else if stop_distance_pct < 2.0 {
        1.0
    } else {
        0.7
    };

    let atr_pct = if entry > 0.0 { atr_15m / entry * 100.0 } else { 0.0 };
    let volatility_mult = if atr_pct > 3.0 {
        0.7
    } else if atr_pct > 2.0 {
        0.85
    } else if atr_pct > 1.0 {
        1.0
    } else {
        1.1
    };

    let leverage = (base * stop_mult * volatility_mult) as u32;
    leverage.clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::MarketState;

    fn low_risk_states() -> StatesByTimeframe {
        let mut map = StatesByTimeframe::new();
        map.insert(Timeframe::H1, Some(MarketState::A));
        map.insert(Timeframe::M30, Some(MarketState::D));
        map.insert(Timeframe::M15, Some(MarketState::D));
        map
    }

    #[test]
    fn test_low_risk_tight_stop_high_leverage() {
        // 0.4% stop, low ATR: 3 * 2 * 1.1 = 6.
        let lev = recommended_leverage(&low_risk_states(), None, 0.5, 100.0, 99.6);
        assert_eq!(lev, 6);
    }

    #[test]
    fn test_high_volatility_reduces_leverage() {
        let calm = recommended_leverage(&low_risk_states(), None, 0.5, 100.0, 99.0);
        let wild = recommended_leverage(&low_risk_states(), None, 4.0, 100.0, 99.0);
        assert!(wild < calm);
    }

    #[test]
    fn test_leverage_bounds() {
        let mut no_h1 = low_risk_states();
        no_h1.insert(Timeframe::H1, None);
        // High risk with a wide stop still never drops below 1x.
        let lev = recommended_leverage(&no_h1, None, 5.0, 100.0, 95.0);
        assert_eq!(lev, 1);
    }
}
