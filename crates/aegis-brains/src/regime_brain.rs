//! Market regime brain.
//!
//! Answers "what market are we living in right now": trend vs range,
//! volatility tier, risk sentiment. Produces context only, never signals.

use aegis_core::{Direction, MarketRegime, RiskSentiment, Timeframe, TrendType, VolatilityLevel};
use aegis_feed::{
    adx, atr, calculate_volatility_metrics, is_flat, market_direction, AdxStrength, CandleSet,
};
use aegis_state::SystemStateHandle;

/// Symbols sampled for the market-wide picture.
const BREADTH_SAMPLE: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct MarketRegimeBrain;

impl MarketRegimeBrain {
    pub fn new() -> Self {
        Self
    }

    /// Analyze all symbols and write the aggregated regime into the shared
    /// state.
    pub fn analyze(
        &self,
        symbols: &[String],
        candles: &CandleSet,
        state: &SystemStateHandle,
    ) -> MarketRegime {
        let trend_type = self.determine_trend_type(symbols, candles);
        let volatility_level = self.determine_volatility(symbols, candles);
        let risk_sentiment = self.determine_risk_sentiment(symbols, candles);
        let confidence = self.classification_confidence(trend_type, volatility_level, risk_sentiment);

        let regime = MarketRegime {
            trend_type,
            volatility_level,
            risk_sentiment,
            macro_pressure: 0.0,
            confidence,
        };

        state.update_market_regime(regime.clone());
        regime
    }

    fn determine_trend_type(&self, symbols: &[String], candles: &CandleSet) -> TrendType {
        let mut trend_score = 0u32;
        let mut range_score = 0u32;

        for symbol in symbols.iter().take(BREADTH_SAMPLE) {
            let Some(per_tf) = candles.get(symbol) else {
                continue;
            };
            let (Some(m15), Some(m30)) = (per_tf.get(&Timeframe::M15), per_tf.get(&Timeframe::M30))
            else {
                continue;
            };

            let atr_15m = atr(m15, 14);
            if is_flat(m15, atr_15m) {
                range_score += 1;
                continue;
            }

            match adx(m30, 14).strength {
                AdxStrength::Strong => trend_score += 2,
                AdxStrength::Moderate => trend_score += 1,
                AdxStrength::Weak => range_score += 1,
            }
        }

        if trend_score == 0 && range_score == 0 {
            TrendType::Unknown
        } else if trend_score > range_score {
            TrendType::Trend
        } else {
            TrendType::Range
        }
    }

    fn determine_volatility(&self, symbols: &[String], candles: &CandleSet) -> VolatilityLevel {
        let mut levels = Vec::new();
        for symbol in symbols.iter().take(BREADTH_SAMPLE) {
            if let Some(m15) = candles.get(symbol).and_then(|tf| tf.get(&Timeframe::M15)) {
                let metrics = calculate_volatility_metrics(m15, 20);
                if metrics.level != VolatilityLevel::Unknown {
                    levels.push(metrics.level);
                }
            }
        }

        if levels.is_empty() {
            return VolatilityLevel::Unknown;
        }

        // The market-wide tier is the worst observed tier.
        levels
            .into_iter()
            .max_by_key(|l| match l {
                VolatilityLevel::Low => 0,
                VolatilityLevel::Normal => 1,
                VolatilityLevel::High => 2,
                VolatilityLevel::Extreme => 3,
                VolatilityLevel::Unknown => 0,
            })
            .unwrap_or(VolatilityLevel::Unknown)
    }

    fn determine_risk_sentiment(&self, symbols: &[String], candles: &CandleSet) -> RiskSentiment {
        let mut up = 0u32;
        let mut down = 0u32;

        for symbol in symbols.iter().take(BREADTH_SAMPLE) {
            if let Some(h1) = candles.get(symbol).and_then(|tf| tf.get(&Timeframe::H1)) {
                match market_direction(h1) {
                    Direction::Up => up += 1,
                    Direction::Down => down += 1,
                    Direction::Flat => {}
                }
            }
        }

        let total = up + down;
        if total == 0 {
            RiskSentiment::Unknown
        } else if up * 3 >= total * 2 {
            RiskSentiment::RiskOn
        } else if down * 3 >= total * 2 {
            RiskSentiment::RiskOff
        } else {
            RiskSentiment::Neutral
        }
    }

    fn classification_confidence(
        &self,
        trend: TrendType,
        volatility: VolatilityLevel,
        sentiment: RiskSentiment,
    ) -> f64 {
        let mut known = 0;
        if trend != TrendType::Unknown {
            known += 1;
        }
        if volatility != VolatilityLevel::Unknown {
            known += 1;
        }
        if sentiment != RiskSentiment::Unknown {
            known += 1;
        }
        known as f64 / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{Candle, Price};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn candle(base: f64, range: f64) -> Candle {
        let d = |v: f64| Decimal::try_from(v).unwrap();
        Candle {
            start_ms: 0,
            open: Price::new(d(base)),
            high: Price::new(d(base + range)),
            low: Price::new(d(base - range)),
            close: Price::new(d(base + range * 0.5)),
            volume: Decimal::ONE,
        }
    }

    fn rising(n: usize) -> Vec<Candle> {
        (0..n).map(|i| candle(100.0 + i as f64, 1.0)).collect()
    }

    fn sample_set(symbol: &str) -> CandleSet {
        let mut per_tf = BTreeMap::new();
        per_tf.insert(Timeframe::M15, rising(60));
        per_tf.insert(Timeframe::M30, rising(60));
        per_tf.insert(Timeframe::H1, rising(60));
        BTreeMap::from([(symbol.to_string(), per_tf)])
    }

    #[test]
    fn test_analyze_writes_state() {
        let brain = MarketRegimeBrain::new();
        let state = SystemStateHandle::new();
        let symbols = vec!["BTCUSDT".to_string()];

        let regime = brain.analyze(&symbols, &sample_set("BTCUSDT"), &state);
        assert_eq!(state.market_regime().unwrap(), regime);
        assert!(regime.confidence > 0.0);
    }

    #[test]
    fn test_rising_market_is_risk_on() {
        let brain = MarketRegimeBrain::new();
        let state = SystemStateHandle::new();
        let symbols = vec!["BTCUSDT".to_string()];

        let regime = brain.analyze(&symbols, &sample_set("BTCUSDT"), &state);
        assert_eq!(regime.risk_sentiment, RiskSentiment::RiskOn);
    }

    #[test]
    fn test_no_data_is_unknown() {
        let brain = MarketRegimeBrain::new();
        let state = SystemStateHandle::new();
        let regime = brain.analyze(&["BTCUSDT".to_string()], &CandleSet::new(), &state);
        assert_eq!(regime.trend_type, TrendType::Unknown);
        assert_eq!(regime.volatility_level, VolatilityLevel::Unknown);
        assert_eq!(regime.confidence, 0.0);
    }
}
