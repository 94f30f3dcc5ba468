//! The immutable signal snapshot flowing through the decision pipeline.
//!
//! A `SignalSnapshot` is the atomic unit of the system's thinking. It is
//! constructed once per candidate signal, validated at construction, and
//! never mutated afterwards: fields are private, access is read-only, and
//! the only way in is through `SnapshotBuilder::build`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use crate::market::{Direction, MarketState, StatesByTimeframe, Timeframe};
use crate::regime::{MarketRegime, RiskLevel, TimeContext, VolatilityLevel};

/// Per-signal verdict carried by the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalDecision {
    /// Entry allowed.
    Enter,
    /// Insufficient quality.
    #[default]
    Skip,
    /// Medium quality, watch only.
    Observe,
    /// High risk or conflict.
    Block,
}

impl SignalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "ENTER",
            Self::Skip => "SKIP",
            Self::Observe => "OBSERVE",
            Self::Block => "BLOCK",
        }
    }
}

/// Market mode derived from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketMode {
    Trade,
    Observe,
    Caution,
    Stop,
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "TRADE",
            Self::Observe => "OBSERVE",
            Self::Caution => "CAUTION",
            Self::Stop => "STOP",
        }
    }
}

/// Map a market mode into the per-signal decision.
pub fn mode_to_decision(mode: MarketMode) -> SignalDecision {
    match mode {
        MarketMode::Trade => SignalDecision::Enter,
        MarketMode::Observe => SignalDecision::Observe,
        MarketMode::Caution => SignalDecision::Skip,
        MarketMode::Stop => SignalDecision::Block,
    }
}

/// Alias used across the pipeline for the per-timeframe states map.
pub type StatesMap = StatesByTimeframe;

/// Immutable snapshot of one trading signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    timestamp: DateTime<Utc>,
    symbol: String,
    timeframe_anchor: Timeframe,
    states: StatesMap,
    market_regime: Option<MarketRegime>,
    volatility_level: Option<VolatilityLevel>,
    correlation_level: Option<f64>,
    score: u32,
    score_max: u32,
    confidence: f64,
    entropy: f64,
    risk_level: RiskLevel,
    recommended_leverage: Option<Decimal>,
    entry: Option<Price>,
    tp: Option<Price>,
    sl: Option<Price>,
    decision: SignalDecision,
    decision_reason: String,
    time_context: TimeContext,
    directions: BTreeMap<Timeframe, Direction>,
    score_details: Vec<String>,
    reasons: Vec<String>,
}

impl SignalSnapshot {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe_anchor(&self) -> Timeframe {
        self.timeframe_anchor
    }

    pub fn states(&self) -> &StatesMap {
        &self.states
    }

    /// State on the anchor timeframe, if classified.
    pub fn anchor_state(&self) -> Option<MarketState> {
        self.states.get(&self.timeframe_anchor).copied().flatten()
    }

    pub fn market_regime(&self) -> Option<&MarketRegime> {
        self.market_regime.as_ref()
    }

    pub fn volatility_level(&self) -> Option<VolatilityLevel> {
        self.volatility_level
    }

    pub fn correlation_level(&self) -> Option<f64> {
        self.correlation_level
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn score_max(&self) -> u32 {
        self.score_max
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn recommended_leverage(&self) -> Option<Decimal> {
        self.recommended_leverage
    }

    pub fn entry(&self) -> Option<Price> {
        self.entry
    }

    pub fn tp(&self) -> Option<Price> {
        self.tp
    }

    pub fn sl(&self) -> Option<Price> {
        self.sl
    }

    pub fn decision(&self) -> SignalDecision {
        self.decision
    }

    pub fn decision_reason(&self) -> &str {
        &self.decision_reason
    }

    /// Session phase at generation time.
    pub fn time_context(&self) -> TimeContext {
        self.time_context
    }

    pub fn directions(&self) -> &BTreeMap<Timeframe, Direction> {
        &self.directions
    }

    pub fn score_details(&self) -> &[String] {
        &self.score_details
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Score as a percentage of the maximum. Zero max yields zero.
    pub fn score_pct(&self) -> f64 {
        if self.score_max == 0 {
            return 0.0;
        }
        (self.score as f64 / self.score_max as f64) * 100.0
    }

    pub fn has_entry_zone(&self) -> bool {
        self.entry.is_some() && self.tp.is_some() && self.sl.is_some()
    }

    /// Risk/reward ratio. Direction is chosen by `tp > entry` (long),
    /// otherwise short. `None` without a full entry zone or with zero risk.
    pub fn rr_ratio(&self) -> Option<Decimal> {
        let (entry, tp, sl) = match (self.entry, self.tp, self.sl) {
            (Some(e), Some(t), Some(s)) => (e.inner(), t.inner(), s.inner()),
            _ => return None,
        };

        let (risk, reward) = if tp > entry {
            ((entry - sl).abs(), (tp - entry).abs())
        } else {
            ((sl - entry).abs(), (entry - tp).abs())
        };

        if risk.is_zero() {
            return None;
        }
        Some(reward / risk)
    }

    pub fn is_tradeable(&self) -> bool {
        self.decision == SignalDecision::Enter
            && self.risk_level != RiskLevel::High
            && self.has_entry_zone()
    }

    /// Copy of this snapshot with recomputed cognitive metrics.
    ///
    /// Confidence and entropy are derived from the snapshot itself, so the
    /// builder first produces a snapshot with placeholders and the generator
    /// then stamps the computed values. Values are clamped to [0, 1].
    pub fn with_cognition(mut self, confidence: f64, entropy: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self.entropy = entropy.clamp(0.0, 1.0);
        self
    }
}

/// Builder enforcing snapshot invariants at construction.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    timestamp: Option<DateTime<Utc>>,
    symbol: String,
    timeframe_anchor: Option<Timeframe>,
    states: StatesMap,
    market_regime: Option<MarketRegime>,
    volatility_level: Option<VolatilityLevel>,
    correlation_level: Option<f64>,
    score: u32,
    score_max: u32,
    confidence: f64,
    entropy: f64,
    risk_level: RiskLevel,
    recommended_leverage: Option<Decimal>,
    entry: Option<Price>,
    tp: Option<Price>,
    sl: Option<Price>,
    decision: SignalDecision,
    decision_reason: String,
    time_context: TimeContext,
    directions: BTreeMap<Timeframe, Direction>,
    score_details: Vec<String>,
    reasons: Vec<String>,
}

impl SnapshotBuilder {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            score_max: 125,
            ..Default::default()
        }
    }

    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn anchor(mut self, tf: Timeframe) -> Self {
        self.timeframe_anchor = Some(tf);
        self
    }

    pub fn states(mut self, states: StatesMap) -> Self {
        self.states = states;
        self
    }

    pub fn state(mut self, tf: Timeframe, state: Option<MarketState>) -> Self {
        self.states.insert(tf, state);
        self
    }

    pub fn market_regime(mut self, regime: Option<MarketRegime>) -> Self {
        self.market_regime = regime;
        self
    }

    pub fn volatility_level(mut self, level: Option<VolatilityLevel>) -> Self {
        self.volatility_level = level;
        self
    }

    pub fn correlation_level(mut self, level: Option<f64>) -> Self {
        self.correlation_level = level;
        self
    }

    pub fn score(mut self, score: u32, score_max: u32) -> Self {
        self.score = score;
        self.score_max = score_max;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn entropy(mut self, entropy: f64) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn risk_level(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    pub fn recommended_leverage(mut self, leverage: Option<Decimal>) -> Self {
        self.recommended_leverage = leverage;
        self
    }

    pub fn entry_zone(mut self, entry: Option<Price>, tp: Option<Price>, sl: Option<Price>) -> Self {
        self.entry = entry;
        self.tp = tp;
        self.sl = sl;
        self
    }

    pub fn decision(mut self, decision: SignalDecision, reason: impl Into<String>) -> Self {
        self.decision = decision;
        self.decision_reason = reason.into();
        self
    }

    pub fn time_context(mut self, context: TimeContext) -> Self {
        self.time_context = context;
        self
    }

    pub fn direction(mut self, tf: Timeframe, direction: Direction) -> Self {
        self.directions.insert(tf, direction);
        self
    }

    pub fn directions(mut self, directions: BTreeMap<Timeframe, Direction>) -> Self {
        self.directions = directions;
        self
    }

    pub fn score_details(mut self, details: Vec<String>) -> Self {
        self.score_details = details;
        self
    }

    pub fn reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    /// Validate invariants and produce the immutable snapshot.
    pub fn build(self) -> Result<SignalSnapshot> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidSnapshot("symbol is empty".into()));
        }

        let anchor = self
            .timeframe_anchor
            .ok_or_else(|| CoreError::InvalidSnapshot("anchor timeframe not set".into()))?;

        if self.score > self.score_max {
            return Err(CoreError::InvalidSnapshot(format!(
                "score {} exceeds maximum {}",
                self.score, self.score_max
            )));
        }

        check_unit_interval("confidence", self.confidence)?;
        check_unit_interval("entropy", self.entropy)?;
        if let Some(corr) = self.correlation_level {
            check_unit_interval("correlation_level", corr)?;
        }

        check_positive_price("entry", self.entry)?;
        check_positive_price("tp", self.tp)?;
        check_positive_price("sl", self.sl)?;

        if let Some(lev) = self.recommended_leverage {
            if lev <= Decimal::ZERO {
                return Err(CoreError::InvalidSnapshot(format!(
                    "recommended_leverage {lev} must be > 0"
                )));
            }
        }

        Ok(SignalSnapshot {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            symbol: self.symbol,
            timeframe_anchor: anchor,
            states: self.states,
            market_regime: self.market_regime,
            volatility_level: self.volatility_level,
            correlation_level: self.correlation_level,
            score: self.score,
            score_max: self.score_max,
            confidence: self.confidence,
            entropy: self.entropy,
            risk_level: self.risk_level,
            recommended_leverage: self.recommended_leverage,
            entry: self.entry,
            tp: self.tp,
            sl: self.sl,
            decision: self.decision,
            decision_reason: self.decision_reason,
            time_context: self.time_context,
            directions: self.directions,
            score_details: self.score_details,
            reasons: self.reasons,
        })
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(CoreError::InvalidSnapshot(format!(
            "{field} {value} must be in range [0, 1]"
        )));
    }
    Ok(())
}

fn check_positive_price(field: &str, value: Option<Price>) -> Result<()> {
    if let Some(p) = value {
        if !p.is_positive() {
            return Err(CoreError::InvalidSnapshot(format!(
                "{field} {p} must be > 0"
            )));
        }
    }
    Ok(())
}
