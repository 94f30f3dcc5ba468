//! Per-timeframe market state classification from candle structure.
//!
//! Four patterns over the most recent bars:
//! - A impulse: repeated strong directional bodies
//! - B acceptance: narrow consolidation range
//! - C loss of control: dominant wicks
//! - D rejection: one strong counter body
//!
//! `None` is a valid classification result, not an error.

use aegis_core::{Candle, Direction, MarketState};
use rust_decimal::prelude::ToPrimitive;

fn dec_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}


/// Entry trigger read from the latest 5m bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTrigger {
    Long,
    Short,
}

/// Impulse: at least 2 of the last 4 bodies exceed 1.3x ATR.
fn impulse(candles: &[Candle], atr_val: f64) -> bool {
    if atr_val <= 0.0 {
        return false;
    }
    let strong = candles
        .iter()
        .rev()
        .take(4)
        .filter(|c| dec_f64(c.body()) > 1.3 * atr_val)
        .count();
    strong >= 2
}

/// Acceptance: every range of the last 7 bars stays under 0.55x ATR.
fn acceptance(candles: &[Candle], atr_val: f64) -> bool {
    if atr_val <= 0.0 || candles.len() < 7 {
        return false;
    }
    candles
        .iter()
        .rev()
        .take(7)
        .all(|c| dec_f64(c.range()) < 0.55 * atr_val)
}

/// Loss of control: the dominant upper wick of the last 5 bars towers over
/// both the average wick and the largest body.
fn loss_of_control(candles: &[Candle]) -> bool {
    if candles.len() < 5 {
        return false;
    }

    let tail: Vec<&Candle> = candles.iter().rev().take(5).collect();
    let wicks: Vec<f64> = tail
        .iter()
        .map(|c| dec_f64(c.upper_wick()))
        .collect();
    let bodies: Vec<f64> = tail
        .iter()
        .map(|c| dec_f64(c.body()))
        .collect();

    let max_wick = wicks.iter().copied().fold(0.0, f64::max);
    let avg_wick = wicks.iter().sum::<f64>() / wicks.len() as f64;
    let max_body = bodies.iter().copied().fold(0.0, f64::max);

    max_wick > 1.5 * avg_wick && max_wick > max_body
}

/// Rejection: the last body exceeds 1.1x ATR.
fn rejection(candles: &[Candle], atr_val: f64) -> bool {
    if atr_val <= 0.0 {
        return false;
    }
    let Some(last) = candles.last() else {
        return false;
    };
    dec_f64(last.body()) > 1.1 * atr_val
}

/// Classify the current state. Pattern priority: rejection, impulse,
/// loss-of-control, acceptance; nothing matched is `None`.
pub fn determine_state(candles: &[Candle], atr_val: f64) -> Option<MarketState> {
    if candles.len() < 7 {
        return None;
    }

    if rejection(candles, atr_val) {
        return Some(MarketState::D);
    }
    if impulse(candles, atr_val) {
        return Some(MarketState::A);
    }
    if loss_of_control(candles) {
        return Some(MarketState::C);
    }
    if acceptance(candles, atr_val) {
        return Some(MarketState::B);
    }
    None
}

/// Swing direction over the last 10 bars: both highs and lows must agree.
pub fn market_direction(candles: &[Candle]) -> Direction {
    if candles.len() < 10 {
        return Direction::Flat;
    }

    let tail = &candles[candles.len() - 10..];
    let first = &tail[0];
    let last = &tail[tail.len() - 1];

    if last.high > first.high && last.low > first.low {
        Direction::Up
    } else if last.high < first.high && last.low < first.low {
        Direction::Down
    } else {
        Direction::Flat
    }
}

/// Flat market: no range of the last 10 bars reaches 0.6x ATR.
pub fn is_flat(candles: &[Candle], atr_val: f64) -> bool {
    if atr_val <= 0.0 || candles.len() < 10 {
        return false;
    }
    candles
        .iter()
        .rev()
        .take(10)
        .all(|c| dec_f64(c.range()) < 0.6 * atr_val)
}

/// Wick-dominance trigger on the latest bar: a wick longer than the body
/// with the close on the far side of the body midpoint.
pub fn entry_trigger_5m(candles: &[Candle]) -> Option<EntryTrigger> {
    let last = candles.last()?;

    let open = last.open.to_f64();
    let close = last.close.to_f64();
    let body = (close - open).abs();
    let body_mid = (open + close) / 2.0;

    let upper_wick = dec_f64(last.upper_wick());
    let lower_wick = dec_f64(last.lower_wick());

    if upper_wick > body && close < body_mid {
        return Some(EntryTrigger::Short);
    }
    if lower_wick > body && close > body_mid {
        return Some(EntryTrigger::Long);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::Price;
    use rust_decimal::Decimal;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        let d = |v: f64| Decimal::try_from(v).unwrap();
        Candle {
            start_ms: 0,
            open: Price::new(d(open)),
            high: Price::new(d(high)),
            low: Price::new(d(low)),
            close: Price::new(d(close)),
            volume: Decimal::ONE,
        }
    }

    fn quiet(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| candle(100.0, 100.2, 99.9, 100.1))
            .collect()
    }

    #[test]
    fn test_too_few_candles_is_none() {
        assert_eq!(determine_state(&quiet(3), 1.0), None);
    }

    #[test]
    fn test_rejection_wins() {
        let mut candles = quiet(10);
        // One huge body at the end with ATR around 1.0.
        candles.push(candle(100.0, 103.5, 99.9, 103.3));
        assert_eq!(determine_state(&candles, 1.0), Some(MarketState::D));
    }

    #[test]
    fn test_acceptance_on_narrow_range() {
        // Ranges ~0.3, ATR 1.0: under the 0.55 threshold, no big bodies.
        let candles = quiet(12);
        assert_eq!(determine_state(&candles, 1.0), Some(MarketState::B));
    }

    #[test]
    fn test_impulse_on_strong_bodies() {
        let mut candles = quiet(8);
        // Bodies of 1.5 with ATR 1.0 and ranges above acceptance level.
        candles.push(candle(100.0, 101.8, 99.9, 101.5));
        candles.push(candle(101.5, 101.6, 99.8, 100.0));
        candles.push(candle(100.0, 101.0, 99.5, 100.4));
        // Last body 0.4 < 1.1 ATR: not a rejection; two strong bodies in
        // the last four bars: impulse.
        assert_eq!(determine_state(&candles, 1.0), Some(MarketState::A));
    }

    #[test]
    fn test_loss_of_control_on_wicks() {
        let mut candles = quiet(8);
        // Large upper wick, small body, range too wide for acceptance.
        candles.push(candle(100.0, 102.0, 99.9, 100.1));
        candles.push(candle(100.1, 100.3, 99.9, 100.0));
        assert_eq!(determine_state(&candles, 1.0), Some(MarketState::C));
    }

    #[test]
    fn test_market_direction_up() {
        let candles: Vec<Candle> = (0..12)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        assert_eq!(market_direction(&candles), Direction::Up);
    }

    #[test]
    fn test_market_direction_down() {
        let candles: Vec<Candle> = (0..12)
            .map(|i| {
                let base = 120.0 - i as f64;
                candle(base, base + 1.0, base - 1.0, base - 0.5)
            })
            .collect();
        assert_eq!(market_direction(&candles), Direction::Down);
    }

    #[test]
    fn test_market_direction_flat_on_short_input() {
        assert_eq!(market_direction(&quiet(5)), Direction::Flat);
    }

    #[test]
    fn test_is_flat() {
        assert!(is_flat(&quiet(15), 1.0));
        assert!(!is_flat(&quiet(15), 0.0));
    }

    #[test]
    fn test_entry_trigger_long() {
        // Long lower wick, close above midpoint.
        let candles = vec![candle(100.0, 100.3, 98.0, 100.2)];
        assert_eq!(entry_trigger_5m(&candles), Some(EntryTrigger::Long));
    }

    #[test]
    fn test_entry_trigger_short() {
        // Long upper wick, close below midpoint.
        let candles = vec![candle(100.2, 102.5, 99.9, 100.0)];
        assert_eq!(entry_trigger_5m(&candles), Some(EntryTrigger::Short));
    }

    #[test]
    fn test_entry_trigger_none() {
        let candles = vec![candle(100.0, 100.1, 99.9, 100.05)];
        assert_eq!(entry_trigger_5m(&candles), None);
    }
}
