//! Technical indicators over chronological candle slices.
//!
//! Indicator math runs in f64: these values feed scoring heuristics and
//! meta-metrics, not order placement. Empty or short inputs degrade to
//! neutral values (RSI 50, ATR 0) instead of erroring; a missing indicator
//! must never kill a cycle.

use aegis_core::Candle;
use serde::{Deserialize, Serialize};

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.to_f64()).collect()
}

/// Average true range over the trailing `period` bars. Empty input -> 0.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 || period == 0 {
        return 0.0;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    for window in candles.windows(2) {
        let prev_close = window[0].close.to_f64();
        let high = window[1].high.to_f64();
        let low = window[1].low.to_f64();

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        trs.push(tr);
    }

    let tail: Vec<f64> = trs.iter().rev().take(period).copied().collect();
    tail.iter().sum::<f64>() / period as f64
}

/// Relative strength index, 0-100. Insufficient data -> neutral 50.
pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 || period == 0 {
        return 50.0;
    }

    let closes = closes(candles);
    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for window in closes.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let avg = |xs: &[f64]| xs.iter().rev().take(period).sum::<f64>() / period as f64;
    let avg_gain = avg(&gains);
    let avg_loss = avg(&losses);

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for v in &values[1..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Exponential moving average of closes. Empty input -> 0.
pub fn ema(candles: &[Candle], period: usize) -> f64 {
    ema_series(&closes(candles), period)
        .last()
        .copied()
        .unwrap_or(0.0)
}

/// MACD trend label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdTrend {
    Bullish,
    Bearish,
    Neutral,
}

/// MACD output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub trend: MacdTrend,
}

impl Default for MacdOutput {
    fn default() -> Self {
        Self {
            macd: 0.0,
            signal: 0.0,
            histogram: 0.0,
            trend: MacdTrend::Neutral,
        }
    }
}

/// MACD (12/26/9 by default).
pub fn macd(candles: &[Candle], fast: usize, slow: usize, signal_period: usize) -> MacdOutput {
    if candles.len() < slow + signal_period {
        return MacdOutput::default();
    }

    let closes = closes(candles);
    let fast_ema = ema_series(&closes, fast);
    let slow_ema = ema_series(&closes, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal_period);

    let macd_val = macd_line.last().copied().unwrap_or(0.0);
    let signal_val = signal_line.last().copied().unwrap_or(0.0);
    let histogram = macd_val - signal_val;

    let trend = if histogram > 0.0 && macd_val > 0.0 {
        MacdTrend::Bullish
    } else if histogram < 0.0 && macd_val < 0.0 {
        MacdTrend::Bearish
    } else {
        MacdTrend::Neutral
    };

    MacdOutput {
        macd: macd_val,
        signal: signal_val,
        histogram,
        trend,
    }
}

/// Rate of change over `period` bars, percent.
pub fn momentum(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 || period == 0 {
        return 0.0;
    }
    let closes = closes(candles);
    let current = closes[closes.len() - 1];
    let past = closes[closes.len() - 1 - period];
    if past == 0.0 {
        return 0.0;
    }
    (current - past) / past * 100.0
}

/// Directional persistence of closes over `period`, 0-100.
pub fn trend_strength(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 || period == 0 {
        return 50.0;
    }
    let closes = closes(candles);
    let tail = &closes[closes.len() - period - 1..];

    let mut up = 0usize;
    let mut down = 0usize;
    for window in tail.windows(2) {
        if window[1] > window[0] {
            up += 1;
        } else if window[1] < window[0] {
            down += 1;
        }
    }

    let total = (up + down).max(1);
    let dominant = up.max(down);
    dominant as f64 / total as f64 * 100.0
}

/// Price position relative to the Bollinger bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandPosition {
    AboveUpper,
    Upper,
    Middle,
    Lower,
    BelowLower,
}

/// Bollinger bands output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub position: BandPosition,
}

/// Bollinger bands (20, 2.0 by default).
pub fn bollinger_bands(candles: &[Candle], period: usize, std_dev: f64) -> Option<BollingerOutput> {
    if candles.len() < period || period == 0 {
        return None;
    }

    let closes = closes(candles);
    let tail = &closes[closes.len() - period..];
    let mean = tail.iter().sum::<f64>() / period as f64;
    let variance = tail.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();

    let upper = mean + std_dev * sd;
    let lower = mean - std_dev * sd;
    let price = closes[closes.len() - 1];

    let band_width = (upper - lower).max(f64::EPSILON);
    let position = if price > upper {
        BandPosition::AboveUpper
    } else if price < lower {
        BandPosition::BelowLower
    } else if price > upper - band_width * 0.2 {
        BandPosition::Upper
    } else if price < lower + band_width * 0.2 {
        BandPosition::Lower
    } else {
        BandPosition::Middle
    };

    Some(BollingerOutput {
        upper,
        middle: mean,
        lower,
        position,
    })
}

/// Stochastic oscillator signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StochSignal {
    Overbought,
    Oversold,
    Neutral,
}

/// Stochastic output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochOutput {
    pub k: f64,
    pub d: f64,
    pub signal: StochSignal,
}

/// Stochastic oscillator (%K period, %D = 3-bar mean of %K).
pub fn stochastic(candles: &[Candle], k_period: usize) -> Option<StochOutput> {
    if candles.len() < k_period + 3 || k_period == 0 {
        return None;
    }

    let k_at = |end: usize| -> f64 {
        let window = &candles[end + 1 - k_period..=end];
        let high = window
            .iter()
            .map(|c| c.high.to_f64())
            .fold(f64::MIN, f64::max);
        let low = window
            .iter()
            .map(|c| c.low.to_f64())
            .fold(f64::MAX, f64::min);
        let close = candles[end].close.to_f64();
        if (high - low).abs() < f64::EPSILON {
            50.0
        } else {
            (close - low) / (high - low) * 100.0
        }
    };

    let last = candles.len() - 1;
    let k = k_at(last);
    let d = (k_at(last) + k_at(last - 1) + k_at(last - 2)) / 3.0;

    let signal = if k > 80.0 {
        StochSignal::Overbought
    } else if k < 20.0 {
        StochSignal::Oversold
    } else {
        StochSignal::Neutral
    };

    Some(StochOutput { k, d, signal })
}

/// ADX trend strength label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdxStrength {
    Strong,
    Moderate,
    Weak,
}

/// ADX output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxOutput {
    pub adx: f64,
    pub strength: AdxStrength,
}

impl Default for AdxOutput {
    fn default() -> Self {
        Self {
            adx: 0.0,
            strength: AdxStrength::Weak,
        }
    }
}

/// Average directional index.
pub fn adx(candles: &[Candle], period: usize) -> AdxOutput {
    if candles.len() < period * 2 + 1 || period == 0 {
        return AdxOutput::default();
    }

    let mut plus_dm = Vec::new();
    let mut minus_dm = Vec::new();
    let mut trs = Vec::new();

    for window in candles.windows(2) {
        let (prev, cur) = (&window[0], &window[1]);
        let up_move = cur.high.to_f64() - prev.high.to_f64();
        let down_move = prev.low.to_f64() - cur.low.to_f64();

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let prev_close = prev.close.to_f64();
        let tr = (cur.high.to_f64() - cur.low.to_f64())
            .max((cur.high.to_f64() - prev_close).abs())
            .max((cur.low.to_f64() - prev_close).abs());
        trs.push(tr);
    }

    let smooth = |xs: &[f64]| ema_series(xs, period);
    let tr_s = smooth(&trs);
    let plus_s = smooth(&plus_dm);
    let minus_s = smooth(&minus_dm);

    let mut dx = Vec::with_capacity(tr_s.len());
    for i in 0..tr_s.len() {
        if tr_s[i].abs() < f64::EPSILON {
            dx.push(0.0);
            continue;
        }
        let plus_di = plus_s[i] / tr_s[i] * 100.0;
        let minus_di = minus_s[i] / tr_s[i] * 100.0;
        let sum = plus_di + minus_di;
        dx.push(if sum.abs() < f64::EPSILON {
            0.0
        } else {
            (plus_di - minus_di).abs() / sum * 100.0
        });
    }

    let adx_val = ema_series(&dx, period).last().copied().unwrap_or(0.0);
    let strength = if adx_val >= 25.0 {
        AdxStrength::Strong
    } else if adx_val >= 20.0 {
        AdxStrength::Moderate
    } else {
        AdxStrength::Weak
    };

    AdxOutput {
        adx: adx_val,
        strength,
    }
}

/// EMA crossover signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossSignal {
    Bullish,
    Bearish,
    None,
}

/// Fast/slow EMA crossover on closes.
pub fn ema_crossover(candles: &[Candle], fast: usize, slow: usize) -> CrossSignal {
    if candles.len() < slow + 2 {
        return CrossSignal::None;
    }

    let closes = closes(candles);
    let fast_series = ema_series(&closes, fast);
    let slow_series = ema_series(&closes, slow);

    let n = closes.len();
    let now = fast_series[n - 1] - slow_series[n - 1];
    let prev = fast_series[n - 2] - slow_series[n - 2];

    if prev <= 0.0 && now > 0.0 {
        CrossSignal::Bullish
    } else if prev >= 0.0 && now < 0.0 {
        CrossSignal::Bearish
    } else {
        CrossSignal::None
    }
}

/// Volume tier relative to the trailing average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeTrend {
    High,
    Normal,
    Low,
}

/// Volume profile output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    /// Last-bar volume over the trailing average.
    pub volume_ratio: f64,
    pub volume_trend: VolumeTrend,
}

impl Default for VolumeProfile {
    fn default() -> Self {
        Self {
            volume_ratio: 1.0,
            volume_trend: VolumeTrend::Normal,
        }
    }
}

/// Last-bar volume vs the trailing `period` average.
pub fn volume_analysis(candles: &[Candle], period: usize) -> VolumeProfile {
    if candles.len() < period + 1 || period == 0 {
        return VolumeProfile::default();
    }

    use rust_decimal::prelude::ToPrimitive;
    let volumes: Vec<f64> = candles
        .iter()
        .map(|c| c.volume.to_f64().unwrap_or(0.0))
        .collect();

    let last = volumes[volumes.len() - 1];
    let avg: f64 =
        volumes[volumes.len() - 1 - period..volumes.len() - 1].iter().sum::<f64>() / period as f64;

    if avg == 0.0 {
        return VolumeProfile::default();
    }

    let ratio = last / avg;
    let trend = if ratio > 1.3 {
        VolumeTrend::High
    } else if ratio < 0.6 {
        VolumeTrend::Low
    } else {
        VolumeTrend::Normal
    };

    VolumeProfile {
        volume_ratio: ratio,
        volume_trend: trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::Price;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let d = |v: f64| Decimal::try_from(v).unwrap();
        Candle {
            start_ms: 0,
            open: Price::new(d(open)),
            high: Price::new(d(high)),
            low: Price::new(d(low)),
            close: Price::new(d(close)),
            volume: d(volume),
        }
    }

    fn flat_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| candle(100.0, 100.5, 99.5, 100.0, 10.0))
            .collect()
    }

    fn rising_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.0, base - 0.5, base + 0.8, 10.0)
            })
            .collect()
    }

    #[test]
    fn test_atr_empty_is_zero() {
        assert_eq!(atr(&[], 14), 0.0);
        assert_eq!(atr(&flat_series(1), 14), 0.0);
    }

    #[test]
    fn test_atr_positive_on_data() {
        assert!(atr(&flat_series(20), 14) > 0.0);
    }

    #[test]
    fn test_rsi_empty_is_neutral() {
        assert_eq!(rsi(&[], 14), 50.0);
        assert_eq!(rsi(&flat_series(5), 14), 50.0);
    }

    #[test]
    fn test_rsi_rising_series_is_high() {
        let value = rsi(&rising_series(40), 14);
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_macd_insufficient_is_neutral() {
        assert_eq!(macd(&flat_series(10), 12, 26, 9).trend, MacdTrend::Neutral);
    }

    #[test]
    fn test_macd_rising_is_bullish() {
        let out = macd(&rising_series(60), 12, 26, 9);
        assert_eq!(out.trend, MacdTrend::Bullish);
        assert!(out.macd > 0.0);
    }

    #[test]
    fn test_trend_strength_rising() {
        let value = trend_strength(&rising_series(40), 20);
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_trend_strength_insufficient_is_neutral() {
        assert_eq!(trend_strength(&flat_series(5), 20), 50.0);
    }

    #[test]
    fn test_bollinger_position() {
        let out = bollinger_bands(&flat_series(25), 20, 2.0).unwrap();
        assert!(out.upper >= out.middle && out.middle >= out.lower);
        assert!(bollinger_bands(&flat_series(5), 20, 2.0).is_none());
    }

    #[test]
    fn test_stochastic_range() {
        let out = stochastic(&rising_series(30), 14).unwrap();
        assert!((0.0..=100.0).contains(&out.k));
        // A steadily rising close sits near the top of its range.
        assert_eq!(out.signal, StochSignal::Overbought);
    }

    #[test]
    fn test_adx_insufficient_is_weak() {
        assert_eq!(adx(&flat_series(10), 14).strength, AdxStrength::Weak);
    }

    #[test]
    fn test_adx_trending_is_strong() {
        let out = adx(&rising_series(80), 14);
        assert!(out.adx > 25.0, "adx = {}", out.adx);
        assert_eq!(out.strength, AdxStrength::Strong);
    }

    #[test]
    fn test_volume_analysis_spike() {
        let mut candles = flat_series(30);
        let mut last = candle(100.0, 100.5, 99.5, 100.0, 50.0);
        last.volume = dec!(50);
        candles.push(last);

        let profile = volume_analysis(&candles, 20);
        assert_eq!(profile.volume_trend, VolumeTrend::High);
        assert!(profile.volume_ratio > 1.3);
    }

    #[test]
    fn test_ema_crossover_detects_cross() {
        // Falling then sharply rising series produces a bullish cross.
        let mut candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 140.0 - i as f64;
                candle(base, base + 0.5, base - 0.5, base, 10.0)
            })
            .collect();
        for i in 0..30 {
            let base = 100.0 + (i as f64) * 3.0;
            candles.push(candle(base, base + 3.0, base - 0.5, base + 2.8, 10.0));
        }
        // Somewhere in the rise the fast EMA crosses the slow one; the
        // final bars should not be bearish.
        assert_ne!(ema_crossover(&candles, 12, 26), CrossSignal::Bearish);
    }
}
