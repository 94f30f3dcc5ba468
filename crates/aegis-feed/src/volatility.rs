//! Volatility metrics, tradeability filter, and spike detection.

use aegis_core::{Candle, VolatilityLevel};
use serde::{Deserialize, Serialize};

use crate::indicators::atr;

/// Direction of the volatility drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Volatility metrics for one candle series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub atr: f64,
    /// ATR as a percentage of the last close.
    pub atr_pct: f64,
    pub level: VolatilityLevel,
    pub trend: VolatilityTrend,
    pub is_tradeable: bool,
}

impl VolatilityMetrics {
    fn unknown() -> Self {
        Self {
            atr: 0.0,
            atr_pct: 0.0,
            level: VolatilityLevel::Unknown,
            trend: VolatilityTrend::Stable,
            is_tradeable: false,
        }
    }
}

/// ATR-based volatility classification.
///
/// Tiers by ATR%: <0.5 LOW, <1.5 NORMAL, <3.0 HIGH (tradeable),
/// <5.0 HIGH (not tradeable), else EXTREME. Insufficient data is UNKNOWN
/// and never tradeable.
pub fn calculate_volatility_metrics(candles: &[Candle], period: usize) -> VolatilityMetrics {
    if candles.len() < period {
        return VolatilityMetrics::unknown();
    }

    let Some(last) = candles.last() else {
        return VolatilityMetrics::unknown();
    };
    let price = last.close.to_f64();
    if price <= 0.0 {
        return VolatilityMetrics::unknown();
    }

    let atr_value = atr(candles, period);
    let atr_pct = atr_value / price * 100.0;

    let (level, is_tradeable) = if atr_pct < 0.5 {
        (VolatilityLevel::Low, true)
    } else if atr_pct < 1.5 {
        (VolatilityLevel::Normal, true)
    } else if atr_pct < 3.0 {
        (VolatilityLevel::High, true)
    } else if atr_pct < 5.0 {
        (VolatilityLevel::High, false)
    } else {
        (VolatilityLevel::Extreme, false)
    };

    let trend = if candles.len() >= period * 2 {
        let prev_atr = atr(&candles[..candles.len() - period], period);
        if atr_value > prev_atr * 1.2 {
            VolatilityTrend::Increasing
        } else if atr_value < prev_atr * 0.8 {
            VolatilityTrend::Decreasing
        } else {
            VolatilityTrend::Stable
        }
    } else {
        VolatilityTrend::Stable
    };

    VolatilityMetrics {
        atr: atr_value,
        atr_pct,
        level,
        trend,
        is_tradeable,
    }
}

/// ATR as a percentage of price; neutral 1.0 without enough data.
pub fn calculate_volatility_pct(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period {
        return 1.0;
    }
    let Some(last) = candles.last() else {
        return 1.0;
    };
    let price = last.close.to_f64();
    if price <= 0.0 {
        return 1.0;
    }
    atr(candles, period) / price * 100.0
}

/// Volatility contribution to the score, 0-15 points.
pub fn volatility_score(metrics: &VolatilityMetrics) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    match metrics.level {
        VolatilityLevel::Normal => {
            score += 10;
            reasons.push(format!("Optimal volatility ({:.2}%)", metrics.atr_pct));
        }
        VolatilityLevel::Low => {
            score += 5;
            reasons.push(format!(
                "Low volatility ({:.2}%), fewer opportunities",
                metrics.atr_pct
            ));
        }
        VolatilityLevel::High if metrics.is_tradeable => {
            score += 7;
            reasons.push(format!(
                "High volatility ({:.2}%), more opportunity and more risk",
                metrics.atr_pct
            ));
        }
        _ => {
            reasons.push(format!(
                "Volatility out of tradeable range ({:.2}%)",
                metrics.atr_pct
            ));
        }
    }

    match metrics.trend {
        VolatilityTrend::Decreasing => {
            score += 3;
            reasons.push("Volatility decreasing, stabilizing".to_string());
        }
        VolatilityTrend::Increasing => {
            score += 2;
            reasons.push("Volatility increasing, caution".to_string());
        }
        VolatilityTrend::Stable => {}
    }

    (score.min(15), reasons)
}

/// Direction of a detected spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeDirection {
    Up,
    Down,
}

/// Result of a spike check over the last three closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeCheck {
    pub has_spike: bool,
    pub direction: Option<SpikeDirection>,
    pub spike_pct: f64,
    pub cause: Option<String>,
}

impl SpikeCheck {
    fn none() -> Self {
        Self {
            has_spike: false,
            direction: None,
            spike_pct: 0.0,
            cause: None,
        }
    }
}

/// Sharp single-bar move beyond `threshold_pct`.
pub fn check_price_spike(candles: &[Candle], threshold_pct: f64) -> SpikeCheck {
    if candles.len() < 3 {
        return SpikeCheck::none();
    }

    let n = candles.len();
    let current = candles[n - 1].close.to_f64();
    let prev = candles[n - 2].close.to_f64();
    let prev_prev = candles[n - 3].close.to_f64();

    if prev <= 0.0 || prev_prev <= 0.0 {
        return SpikeCheck::none();
    }

    let change_pct = ((current - prev) / prev * 100.0).abs();
    if change_pct < threshold_pct {
        return SpikeCheck::none();
    }

    let direction = if current > prev {
        SpikeDirection::Up
    } else {
        SpikeDirection::Down
    };

    let prev_change_pct = ((prev - prev_prev) / prev_prev * 100.0).abs();
    let cause = if prev_change_pct > threshold_pct * 0.5 {
        let same_way = (direction == SpikeDirection::Up && prev > prev_prev)
            || (direction == SpikeDirection::Down && prev < prev_prev);
        if same_way {
            "TREND_CONTINUATION"
        } else {
            "REVERSAL"
        }
    } else {
        "UNEXPECTED_MOVE"
    };

    SpikeCheck {
        has_spike: true,
        direction: Some(direction),
        spike_pct: change_pct,
        cause: Some(cause.to_string()),
    }
}
