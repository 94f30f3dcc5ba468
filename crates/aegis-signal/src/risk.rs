//! Risk heuristics for one signal: base level from state structure,
//! stop-distance validation, and the enhanced level combining momentum
//! and volume context.

use std::collections::BTreeMap;

use aegis_core::{Direction, MarketState, RiskLevel, StatesByTimeframe, Timeframe};
use aegis_feed::{AdxStrength, BandPosition, VolumeTrend};

use crate::scoring::MomentumData;

/// Stop-distance validation output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopInfo {
    pub stop_distance_pct: f64,
    pub stop_distance_atr: f64,
    pub is_valid: bool,
    pub risk_level: RiskLevel,
}

/// Base risk from the state structure alone.
///
/// An unclassified 1h is an absolute veto (HIGH). Conflicting 15m/30m
/// states, rejection against an impulse, and a 4h-vs-30m direction clash
/// each add risk.
pub fn risk_level(
    states: &StatesByTimeframe,
    directions: Option<&BTreeMap<Timeframe, Direction>>,
) -> RiskLevel {
    if states.get(&Timeframe::H1).copied().flatten().is_none() {
        return RiskLevel::High;
    }

    let mut risk = 0u32;
    let state_15m = states.get(&Timeframe::M15).copied().flatten();
    let state_30m = states.get(&Timeframe::M30).copied().flatten();

    if state_30m != state_15m {
        risk += 1;
    }

    if state_15m == Some(MarketState::D) && state_30m == Some(MarketState::A) {
        risk += 1;
    }

    if let Some(directions) = directions {
        let d4h = directions
            .get(&Timeframe::H4)
            .copied()
            .unwrap_or(Direction::Flat);
        let d30m = directions
            .get(&Timeframe::M30)
            .copied()
            .unwrap_or(Direction::Flat);
        if d4h.is_directional() && d30m.is_directional() && d4h != d30m {
            risk += 2;
        }
    }

    match risk {
        0 => RiskLevel::Low,
        1..=2 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

/// Validate the stop distance against price and ATR.
pub fn calculate_stop_distance(entry: f64, stop: f64, atr_15m: f64) -> StopInfo {
    if entry <= 0.0 || stop <= 0.0 {
        return StopInfo {
            stop_distance_pct: 0.0,
            stop_distance_atr: 0.0,
            is_valid: false,
            risk_level: RiskLevel::High,
        };
    }

    let distance = (entry - stop).abs();
    let distance_pct = distance / entry * 100.0;
    let distance_atr = if atr_15m > 0.0 { distance / atr_15m } else { 0.0 };

    // Too tight a stop is noise-stopped immediately.
    let (is_valid, level) = if distance_pct < 0.3 || distance_atr < 0.5 {
        (false, RiskLevel::High)
    } else if distance_pct < 0.5 || distance_atr < 1.0 {
        (true, RiskLevel::Medium)
    } else if distance_pct <= 2.0 && distance_atr <= 3.0 {
        (true, RiskLevel::Low)
    } else {
        (true, RiskLevel::Medium)
    };

    StopInfo {
        stop_distance_pct: distance_pct,
        stop_distance_atr: distance_atr,
        is_valid,
        risk_level: level,
    }
}

/// Risk level with the stop, volume, and momentum context folded in.
pub fn enhanced_risk_level(
    states: &StatesByTimeframe,
    directions: Option<&BTreeMap<Timeframe, Direction>>,
    stop_info: Option<&StopInfo>,
    momentum: Option<&MomentumData>,
    atr_pct_15m: Option<f64>,
) -> RiskLevel {
    let base = risk_level(states, directions);
    if base == RiskLevel::High {
        return RiskLevel::High;
    }

    let mut risk_score = 0u32;

    if let Some(stop) = stop_info {
        if !stop.is_valid {
            return RiskLevel::High;
        }
        match stop.risk_level {
            RiskLevel::High => risk_score += 2,
            RiskLevel::Medium => risk_score += 1,
            RiskLevel::Low => {}
        }
    }

    if let Some(m) = momentum {
        if let Some(volume) = m.volume_15m {
            if volume.volume_trend == VolumeTrend::Low {
                risk_score += if volume.volume_ratio < 0.5 { 2 } else { 1 };
            }
        }

        if let Some(adx) = m.adx_15m {
            if adx.strength == AdxStrength::Weak {
                risk_score += 1;
            }
        }

        if let Some(rsi) = m.rsi_15m {
            if !(20.0..=80.0).contains(&rsi) {
                risk_score += 1;
            }
        }

        if let Some(bb) = m.bb_15m {
            if matches!(bb.position, BandPosition::AboveUpper | BandPosition::BelowLower) {
                risk_score += 1;
            }
        }
    }

    if let Some(atr_pct) = atr_pct_15m {
        if atr_pct > 5.0 {
            risk_score += 2;
        } else if atr_pct > 3.0 {
            risk_score += 1;
        }
    }

    match (base, risk_score) {
        (RiskLevel::Low, 0) => RiskLevel::Low,
        (RiskLevel::Low, 1) => RiskLevel::Medium,
        (_, s) if s >= 4 => RiskLevel::High,
        _ => RiskLevel::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states_with(
        h1: Option<MarketState>,
        m30: Option<MarketState>,
        m15: Option<MarketState>,
    ) -> StatesByTimeframe {
        let mut map = StatesByTimeframe::new();
        map.insert(Timeframe::H1, h1);
        map.insert(Timeframe::M30, m30);
        map.insert(Timeframe::M15, m15);
        map
    }

    #[test]
    fn test_missing_1h_is_high() {
        let states = states_with(None, Some(MarketState::A), Some(MarketState::A));
        assert_eq!(risk_level(&states, None), RiskLevel::High);
    }

    #[test]
    fn test_aligned_states_are_low() {
        let states = states_with(
            Some(MarketState::A),
            Some(MarketState::D),
            Some(MarketState::D),
        );
        assert_eq!(risk_level(&states, None), RiskLevel::Low);
    }

    #[test]
    fn test_rejection_against_impulse_adds_risk() {
        let states = states_with(
            Some(MarketState::A),
            Some(MarketState::A),
            Some(MarketState::D),
        );
        // Conflict (1) + rejection-vs-impulse (1) = medium.
        assert_eq!(risk_level(&states, None), RiskLevel::Medium);
    }

    #[test]
    fn test_4h_conflict_is_high() {
        let states = states_with(
            Some(MarketState::A),
            Some(MarketState::A),
            Some(MarketState::D),
        );
        let directions = BTreeMap::from([
            (Timeframe::H4, Direction::Down),
            (Timeframe::M30, Direction::Up),
        ]);
        // 2 structural + 2 directional = high.
        assert_eq!(risk_level(&states, Some(&directions)), RiskLevel::High);
    }

    #[test]
    fn test_stop_too_tight_invalid() {
        let info = calculate_stop_distance(100.0, 99.9, 1.0);
        assert!(!info.is_valid);
        assert_eq!(info.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_stop_normal_range_low_risk() {
        // 1% distance, 1 ATR.
        let info = calculate_stop_distance(100.0, 99.0, 1.0);
        assert!(info.is_valid);
        assert_eq!(info.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_zero_prices_invalid() {
        assert!(!calculate_stop_distance(0.0, 99.0, 1.0).is_valid);
    }

    #[test]
    fn test_enhanced_respects_invalid_stop() {
        let states = states_with(
            Some(MarketState::A),
            Some(MarketState::D),
            Some(MarketState::D),
        );
        let stop = calculate_stop_distance(100.0, 99.95, 1.0);
        assert_eq!(
            enhanced_risk_level(&states, None, Some(&stop), None, None),
            RiskLevel::High
        );
    }

    #[test]
    fn test_enhanced_extreme_volatility_raises() {
        let states = states_with(
            Some(MarketState::A),
            Some(MarketState::D),
            Some(MarketState::D),
        );
        let level = enhanced_risk_level(&states, None, None, None, Some(6.0));
        assert_eq!(level, RiskLevel::Medium);
    }
}
