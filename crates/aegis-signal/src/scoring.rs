//! Signal scoring.
//!
//! Base criteria (timeframe alignment, anchor state, flat filter), then
//! momentum and trend-strength blocks, then volume, then bonuses. The
//! volatility and correlation bonuses are added by the generator on top,
//! giving the 125-point maximum.

use std::collections::BTreeMap;

use aegis_core::{Direction, MarketMode, MarketState, StatesByTimeframe, Timeframe};
use aegis_feed::{
    AdxOutput, AdxStrength, BandPosition, BollingerOutput, CrossSignal, MacdOutput, MacdTrend,
    StochOutput, StochSignal, VolumeProfile, VolumeTrend,
};

/// Momentum indicators computed once per symbol.
#[derive(Debug, Clone, Default)]
pub struct MomentumData {
    pub rsi_15m: Option<f64>,
    pub macd_15m: Option<MacdOutput>,
    pub bb_15m: Option<BollingerOutput>,
    pub stoch_15m: Option<StochOutput>,
    pub adx_15m: Option<AdxOutput>,
    pub ema_cross_15m: Option<CrossSignal>,
    pub trend_strength_30m: Option<f64>,
    pub volume_15m: Option<VolumeProfile>,
}

/// Scoring output.
#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub score: u32,
    pub reasons: Vec<String>,
    pub state_alignment: bool,
    pub trend_strength_30m: f64,
}

/// Conditions that justify an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCondition {
    Rejection,
    StrongImpulse,
    ControlLoss,
}

/// Score one symbol's cycle view. Returns at most 110 points here; the
/// generator adds volatility (15) and correlation (10) bonuses and the
/// whole is clamped to the snapshot maximum.
pub fn calculate_score(
    states: &StatesByTimeframe,
    directions: &BTreeMap<Timeframe, Direction>,
    is_flat: bool,
    good_time: bool,
    momentum: Option<&MomentumData>,
) -> ScoreBreakdown {
    let mut score: i64 = 0;
    let mut reasons = Vec::new();

    let dir = |tf: Timeframe| directions.get(&tf).copied().unwrap_or(Direction::Flat);
    let direction_4h = dir(Timeframe::H4);
    let direction_1h = dir(Timeframe::H1);
    let direction_30m = dir(Timeframe::M30);

    // 1. Timeframe alignment (max 20).
    let mut alignment: i64 = 0;
    if direction_1h == direction_30m && direction_30m.is_directional() {
        alignment += 10;
        reasons.push("1h and 30m aligned".to_string());
    }
    if direction_4h.is_directional() {
        if direction_4h == direction_30m {
            alignment += 10;
            reasons.push("4h confirms the trend".to_string());
        } else {
            alignment -= 5;
            reasons.push("conflict with the 4h trend".to_string());
        }
    }
    score += alignment.max(0);

    // 2. Anchor state (max 15).
    let state_15m = states.get(&Timeframe::M15).copied().flatten();
    match state_15m {
        Some(MarketState::D) => {
            score += 15;
            reasons.push("clear rejection on 15m".to_string());
        }
        Some(MarketState::A) => {
            score += 10;
            reasons.push("impulse on 15m".to_string());
        }
        Some(MarketState::C) => {
            score += 8;
            reasons.push("loss of control on 15m".to_string());
        }
        _ => {}
    }

    // 3. Not flat (10).
    if !is_flat {
        score += 10;
        reasons.push("market not in a flat".to_string());
    }

    let mut trend_strength_30m = 50.0;

    // Momentum block (max 53).
    if let Some(m) = momentum {
        if let Some(rsi) = m.rsi_15m {
            if (40.0..60.0).contains(&rsi) && direction_30m.is_directional() {
                score += 10;
                reasons.push(format!("RSI optimal for entry ({rsi:.1})"));
            } else if (30.0..70.0).contains(&rsi) {
                score += 5;
                reasons.push(format!("RSI in normal zone ({rsi:.1})"));
            }
        }

        if let Some(macd) = m.macd_15m {
            let confirms = (macd.trend == MacdTrend::Bullish && direction_30m == Direction::Up)
                || (macd.trend == MacdTrend::Bearish && direction_30m == Direction::Down);
            if confirms {
                score += 10;
                reasons.push("MACD confirms the trend".to_string());
            } else if macd.trend != MacdTrend::Neutral {
                score += 5;
                reasons.push("MACD directional".to_string());
            }
        }

        if let Some(strength) = m.trend_strength_30m {
            trend_strength_30m = strength;
            if strength >= 70.0 {
                score += 10;
                reasons.push(format!("strong trend ({strength:.1}%)"));
            } else if strength >= 60.0 {
                score += 7;
                reasons.push(format!("moderate trend ({strength:.1}%)"));
            } else if strength >= 50.0 {
                score += 4;
                reasons.push(format!("weak trend ({strength:.1}%)"));
            }
        }

        if let Some(bb) = m.bb_15m {
            let extreme_entry = (bb.position == BandPosition::BelowLower
                && direction_30m == Direction::Up)
                || (bb.position == BandPosition::AboveUpper && direction_30m == Direction::Down);
            if extreme_entry {
                score += 8;
                reasons.push("price in the extreme band zone".to_string());
            } else if matches!(bb.position, BandPosition::Lower | BandPosition::Upper) {
                score += 4;
                reasons.push("price at a band edge".to_string());
            }
        }

        if let Some(stoch) = m.stoch_15m {
            let aligned = (stoch.signal == StochSignal::Oversold
                && direction_30m == Direction::Up)
                || (stoch.signal == StochSignal::Overbought && direction_30m == Direction::Down);
            if aligned {
                score += 7;
                reasons.push(format!("stochastic setup (K={:.1})", stoch.k));
            } else if stoch.signal == StochSignal::Neutral && (30.0..70.0).contains(&stoch.k) {
                score += 3;
            }
        }

        if let Some(adx) = m.adx_15m {
            match adx.strength {
                AdxStrength::Strong => {
                    score += 10;
                    reasons.push(format!("ADX strong trend ({:.1})", adx.adx));
                }
                AdxStrength::Moderate => {
                    score += 6;
                    reasons.push(format!("ADX moderate trend ({:.1})", adx.adx));
                }
                AdxStrength::Weak => {
                    reasons.push(format!("ADX weak trend ({:.1})", adx.adx));
                }
            }
        }

        if let Some(cross) = m.ema_cross_15m {
            let aligned = (cross == CrossSignal::Bullish && direction_30m == Direction::Up)
                || (cross == CrossSignal::Bearish && direction_30m == Direction::Down);
            if aligned {
                score += 8;
                reasons.push("EMA crossover with the trend".to_string());
            } else if cross != CrossSignal::None {
                score += 4;
                reasons.push("EMA crossover".to_string());
            }
        }

        // Volume block (max 12).
        if let Some(volume) = m.volume_15m {
            match volume.volume_trend {
                VolumeTrend::High if volume.volume_ratio > 1.3 => {
                    score += 12;
                    reasons.push(format!("high activity ({:.2}x volume)", volume.volume_ratio));
                }
                VolumeTrend::Normal if (0.8..=1.2).contains(&volume.volume_ratio) => {
                    score += 8;
                    reasons.push(format!(
                        "normal activity ({:.2}x volume)",
                        volume.volume_ratio
                    ));
                }
                VolumeTrend::Low => {
                    reasons.push(format!("low activity ({:.2}x volume)", volume.volume_ratio));
                }
                _ => {}
            }
        }
    }

    // Bonuses (max 10).
    let state_alignment = state_15m.is_some()
        && states.get(&Timeframe::M30).copied().flatten() == state_15m;
    if state_alignment {
        score += 5;
        reasons.push("15m and 30m states aligned".to_string());
    }
    if good_time {
        score += 5;
        reasons.push("trading hours".to_string());
    }

    ScoreBreakdown {
        score: score.max(0) as u32,
        reasons,
        state_alignment,
        trend_strength_30m,
    }
}

/// Map a total score into a market mode. Thresholds against the 125-point
/// maximum: TRADE ~72%, OBSERVE ~56%, CAUTION ~40%.
pub fn market_mode(score: u32) -> MarketMode {
    if score >= 90 {
        MarketMode::Trade
    } else if score >= 70 {
        MarketMode::Observe
    } else if score >= 50 {
        MarketMode::Caution
    } else {
        MarketMode::Stop
    }
}

/// Entry conditions satisfied by the current view. A conflict with a
/// directional 4h trend disqualifies everything.
pub fn entry_conditions(
    states: &StatesByTimeframe,
    directions: &BTreeMap<Timeframe, Direction>,
    total_score: u32,
    trend_strength_30m: f64,
) -> Vec<EntryCondition> {
    let dir = |tf: Timeframe| directions.get(&tf).copied().unwrap_or(Direction::Flat);
    let direction_4h = dir(Timeframe::H4);
    let direction_30m = dir(Timeframe::M30);

    if direction_4h.is_directional()
        && direction_30m.is_directional()
        && direction_4h != direction_30m
    {
        return Vec::new();
    }

    let mut conditions = Vec::new();
    let state_15m = states.get(&Timeframe::M15).copied().flatten();

    if state_15m == Some(MarketState::D) {
        conditions.push(EntryCondition::Rejection);
    }

    if total_score >= 70 {
        if state_15m == Some(MarketState::A) && trend_strength_30m >= 70.0 {
            conditions.push(EntryCondition::StrongImpulse);
        }
        if state_15m == Some(MarketState::C) && trend_strength_30m >= 65.0 {
            conditions.push(EntryCondition::ControlLoss);
        }
    }

    conditions
}
