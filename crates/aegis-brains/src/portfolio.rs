//! Portfolio-level signal analysis.
//!
//! PortfolioBrain does not analyze the market. It analyzes the system as a
//! whole and answers one question: does THIS signal improve the PORTFOLIO?

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aegis_core::{MarketState, Price, SignalDecision, SignalSnapshot, Size};

use crate::error::{BrainError, BrainResult};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionDirection {
    Long,
    Short,
}

impl PositionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

/// Immutable snapshot of one open position, validated at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub direction: PositionDirection,
    /// Notional size in USD.
    pub size: Size,
    pub entry_price: Price,
    pub unrealized_pnl: f64,
    /// MarketState at entry time.
    pub market_state: Option<MarketState>,
    /// Confidence of the signal that opened the position.
    pub confidence: f64,
    /// Entropy of the signal that opened the position.
    pub entropy: f64,
}

impl PositionSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        direction: PositionDirection,
        size: Size,
        entry_price: Price,
        unrealized_pnl: f64,
        market_state: Option<MarketState>,
        confidence: f64,
        entropy: f64,
    ) -> BrainResult<Self> {
        if !size.is_positive() {
            return Err(BrainError::InvalidPosition(format!(
                "position size {size} must be > 0"
            )));
        }
        if !entry_price.is_positive() {
            return Err(BrainError::InvalidPosition(format!(
                "entry price {entry_price} must be > 0"
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(BrainError::InvalidPosition(format!(
                "confidence {confidence} must be in [0, 1]"
            )));
        }
        if !(0.0..=1.0).contains(&entropy) {
            return Err(BrainError::InvalidPosition(format!(
                "entropy {entropy} must be in [0, 1]"
            )));
        }

        Ok(Self {
            symbol: symbol.into(),
            direction,
            size,
            entry_price,
            unrealized_pnl,
            market_state,
            confidence,
            entropy,
        })
    }
}

/// Aggregated portfolio state, validated at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub total_exposure: Size,
    pub long_exposure: Size,
    pub short_exposure: Size,
    /// long - short; may be negative.
    pub net_exposure: Decimal,
    pub risk_budget: Size,
    pub used_risk: Size,
    pub regime_exposure: BTreeMap<MarketState, Decimal>,
    pub symbol_exposure: BTreeMap<String, Decimal>,
}

impl PortfolioState {
    pub fn validate(self) -> BrainResult<Self> {
        for (name, value) in [
            ("total_exposure", self.total_exposure.inner()),
            ("long_exposure", self.long_exposure.inner()),
            ("short_exposure", self.short_exposure.inner()),
            ("risk_budget", self.risk_budget.inner()),
            ("used_risk", self.used_risk.inner()),
        ] {
            if value < Decimal::ZERO {
                return Err(BrainError::InvalidPortfolio(format!(
                    "{name} {value} must be >= 0"
                )));
            }
        }
        Ok(self)
    }

    pub fn empty(risk_budget: Size) -> Self {
        Self {
            total_exposure: Size::ZERO,
            long_exposure: Size::ZERO,
            short_exposure: Size::ZERO,
            net_exposure: Decimal::ZERO,
            risk_budget,
            used_risk: Size::ZERO,
            regime_exposure: BTreeMap::new(),
            symbol_exposure: BTreeMap::new(),
        }
    }

    /// used_risk / risk_budget, or 0 without a budget.
    pub fn risk_utilization_ratio(&self) -> f64 {
        if !self.risk_budget.is_positive() {
            return 0.0;
        }
        (self.used_risk.inner() / self.risk_budget.inner())
            .to_f64()
            .unwrap_or(0.0)
    }

    /// 1 - used/budget, clamped to [0, 1]. The sizer's last input factor.
    pub fn available_risk_ratio(&self) -> f64 {
        (1.0 - self.risk_utilization_ratio()).clamp(0.0, 1.0)
    }
}

/// Aggregate open positions into a portfolio state.
pub fn build_portfolio_state(
    open_positions: &[PositionSnapshot],
    risk_budget: Size,
) -> BrainResult<PortfolioState> {
    let mut long = Decimal::ZERO;
    let mut short = Decimal::ZERO;
    let mut regime_exposure: BTreeMap<MarketState, Decimal> = BTreeMap::new();
    let mut symbol_exposure: BTreeMap<String, Decimal> = BTreeMap::new();

    for pos in open_positions {
        match pos.direction {
            PositionDirection::Long => long += pos.size.inner(),
            PositionDirection::Short => short += pos.size.inner(),
        }
        if let Some(state) = pos.market_state {
            *regime_exposure.entry(state).or_default() += pos.size.inner();
        }
        *symbol_exposure.entry(pos.symbol.clone()).or_default() += pos.size.inner();
    }

    let total = long + short;
    PortfolioState {
        total_exposure: Size::new(total),
        long_exposure: Size::new(long),
        short_exposure: Size::new(short),
        net_exposure: long - short,
        risk_budget,
        used_risk: Size::new(total),
        regime_exposure,
        symbol_exposure,
    }
    .validate()
}

/// Verdict of the portfolio analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortfolioDecision {
    Allow,
    /// Allowed at minimal size: strategically useful but the portfolio is
    /// near budget.
    Reduce,
    Block,
    /// Allowed with a reduced size because of overload or correlation.
    ScaleDown,
}

impl PortfolioDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Reduce => "REDUCE",
            Self::Block => "BLOCK",
            Self::ScaleDown => "SCALE_DOWN",
        }
    }
}

/// Full result of one portfolio evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioAnalysis {
    pub decision: PortfolioDecision,
    pub reason: String,
    /// Multiplier the gatekeeper applies to the intended size, [0, 1].
    pub recommended_size_multiplier: f64,
    pub portfolio_entropy: f64,
    pub dominant_market_state: Option<MarketState>,
    pub exposure_by_state: BTreeMap<MarketState, Decimal>,
    pub average_confidence: f64,
    pub risk_utilization_ratio: f64,
}

/// The portfolio brain. Stateless: every call works from the inputs alone.
#[derive(Debug, Clone, Default)]
pub struct PortfolioBrain;

impl PortfolioBrain {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        snapshot: &SignalSnapshot,
        open_positions: &[PositionSnapshot],
        portfolio: &PortfolioState,
    ) -> PortfolioAnalysis {
        let portfolio_entropy = weighted_entropy(open_positions);
        let dominant = dominant_market_state(open_positions);
        let exposure_by_state = exposure_by_state(open_positions);
        let average_confidence = weighted_confidence(open_positions);
        let risk_utilization = portfolio.risk_utilization_ratio();

        let mut analysis = PortfolioAnalysis {
            decision: PortfolioDecision::Allow,
            reason: String::new(),
            recommended_size_multiplier: 1.0,
            portfolio_entropy,
            dominant_market_state: dominant,
            exposure_by_state: exposure_by_state.clone(),
            average_confidence,
            risk_utilization_ratio: risk_utilization,
        };

        if let Some(reason) = self.blocking_reason(
            snapshot,
            portfolio,
            portfolio_entropy,
            dominant,
            &exposure_by_state,
        ) {
            analysis.decision = PortfolioDecision::Block;
            analysis.reason = reason;
            analysis.recommended_size_multiplier = 0.0;
            return analysis;
        }

        if let Some((reason, multiplier)) = self.scale_down_reason(
            snapshot,
            portfolio,
            open_positions,
            average_confidence,
        ) {
            analysis.decision = PortfolioDecision::ScaleDown;
            analysis.reason = reason;
            analysis.recommended_size_multiplier = multiplier;
            return analysis;
        }

        if let Some(reason) = self.allow_reason(
            snapshot,
            portfolio,
            portfolio_entropy,
            average_confidence,
            &exposure_by_state,
        ) {
            analysis.decision = PortfolioDecision::Allow;
            analysis.reason = reason;
            return analysis;
        }

        if let Some(reason) = self.reduce_reason(snapshot, portfolio) {
            analysis.decision = PortfolioDecision::Reduce;
            analysis.reason = reason;
            analysis.recommended_size_multiplier = 0.3;
            return analysis;
        }

        analysis.reason = "No portfolio constraints".to_string();
        analysis
    }

    fn blocking_reason(
        &self,
        snapshot: &SignalSnapshot,
        portfolio: &PortfolioState,
        portfolio_entropy: f64,
        dominant: Option<MarketState>,
        exposure_by_state: &BTreeMap<MarketState, Decimal>,
    ) -> Option<String> {
        if portfolio.total_exposure.inner() > portfolio.risk_budget.inner() {
            return Some(format!(
                "Total exposure ({}) exceeds risk budget ({})",
                portfolio.total_exposure, portfolio.risk_budget
            ));
        }

        if portfolio_entropy > 0.75 {
            return Some(format!(
                "Portfolio entropy ({portfolio_entropy:.2}) too high (>0.75)"
            ));
        }

        let total = portfolio.total_exposure.inner();
        if let Some(state) = dominant {
            if total > Decimal::ZERO {
                let dominant_pct = (exposure_by_state.get(&state).copied().unwrap_or_default()
                    / total)
                    .to_f64()
                    .unwrap_or(0.0)
                    * 100.0;
                let reinforces = snapshot.anchor_state() == Some(state);

                if dominant_pct > 60.0 && reinforces {
                    return Some(format!(
                        "Portfolio overexposed to {state} ({dominant_pct:.1}%), signal would reinforce"
                    ));
                }
                if reinforces && dominant_pct > 50.0 {
                    return Some(format!(
                        "Signal reinforces dominant state {state} ({dominant_pct:.1}% exposure)"
                    ));
                }
            }
        }

        if snapshot.confidence() < 0.4 {
            return Some(format!(
                "Signal confidence ({:.2}) too low (<0.4)",
                snapshot.confidence()
            ));
        }

        None
    }

    fn scale_down_reason(
        &self,
        snapshot: &SignalSnapshot,
        portfolio: &PortfolioState,
        open_positions: &[PositionSnapshot],
        average_confidence: f64,
    ) -> Option<(String, f64)> {
        let correlation = portfolio_correlation(snapshot, open_positions);
        if correlation > 0.7 {
            return Some((
                format!("High correlation with portfolio ({correlation:.2})"),
                0.5,
            ));
        }

        let total = portfolio.total_exposure.inner();
        if total > Decimal::ZERO {
            if let Some(state) = snapshot.anchor_state() {
                let state_exposure: Decimal = open_positions
                    .iter()
                    .filter(|p| p.market_state == Some(state))
                    .map(|p| p.size.inner())
                    .sum();
                let pct = (state_exposure / total).to_f64().unwrap_or(0.0) * 100.0;
                if pct > 40.0 {
                    return Some((
                        format!("Reinforces overloaded state {state} ({pct:.1}%)"),
                        0.6,
                    ));
                }
            }
        }

        if average_confidence > 0.0 && snapshot.confidence() < average_confidence * 0.8 {
            return Some((
                format!(
                    "Signal confidence ({:.2}) below portfolio average ({average_confidence:.2})",
                    snapshot.confidence()
                ),
                0.7,
            ));
        }

        None
    }

    fn allow_reason(
        &self,
        snapshot: &SignalSnapshot,
        portfolio: &PortfolioState,
        portfolio_entropy: f64,
        average_confidence: f64,
        exposure_by_state: &BTreeMap<MarketState, Decimal>,
    ) -> Option<String> {
        let total = portfolio.total_exposure.inner();

        if let Some(state) = snapshot.anchor_state() {
            if total > Decimal::ZERO {
                let pct = (exposure_by_state.get(&state).copied().unwrap_or_default() / total)
                    .to_f64()
                    .unwrap_or(0.0)
                    * 100.0;
                if pct < 20.0 {
                    return Some(format!(
                        "Diversifies portfolio (only {pct:.1}% in {state})"
                    ));
                }
            }
        }

        if snapshot.decision() == SignalDecision::Enter {
            let net_abs = portfolio.net_exposure.abs();
            if total > Decimal::ZERO && net_abs > total * Decimal::new(3, 1) {
                return Some("Signal may reduce net exposure".to_string());
            }
        }

        if average_confidence > 0.0 && snapshot.confidence() > average_confidence * 1.2 {
            return Some(format!(
                "Signal confidence ({:.2}) above portfolio average ({average_confidence:.2})",
                snapshot.confidence()
            ));
        }

        if portfolio_entropy > 0.0 && snapshot.entropy() < portfolio_entropy * 0.8 {
            return Some(format!(
                "Signal entropy ({:.2}) lower than portfolio ({portfolio_entropy:.2})",
                snapshot.entropy()
            ));
        }

        None
    }

    fn reduce_reason(&self, snapshot: &SignalSnapshot, portfolio: &PortfolioState) -> Option<String> {
        let near_budget = portfolio.total_exposure.inner()
            > portfolio.risk_budget.inner() * Decimal::new(8, 1);
        if near_budget && (snapshot.confidence() > 0.7 || snapshot.entropy() < 0.3) {
            return Some("Portfolio overloaded but signal strategically valuable".to_string());
        }
        None
    }
}

fn weighted_entropy(positions: &[PositionSnapshot]) -> f64 {
    weighted_metric(positions, |p| p.entropy)
}

fn weighted_confidence(positions: &[PositionSnapshot]) -> f64 {
    weighted_metric(positions, |p| p.confidence)
}

fn weighted_metric(positions: &[PositionSnapshot], metric: impl Fn(&PositionSnapshot) -> f64) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    let total: f64 = positions.iter().map(|p| p.size.to_f64()).sum();
    if total == 0.0 {
        return 0.0;
    }
    positions
        .iter()
        .map(|p| metric(p) * p.size.to_f64())
        .sum::<f64>()
        / total
}

fn dominant_market_state(positions: &[PositionSnapshot]) -> Option<MarketState> {
    let exposure = exposure_by_state(positions);
    exposure
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(state, _)| state)
}

fn exposure_by_state(positions: &[PositionSnapshot]) -> BTreeMap<MarketState, Decimal> {
    let mut exposure: BTreeMap<MarketState, Decimal> = BTreeMap::new();
    for pos in positions {
        if let Some(state) = pos.market_state {
            *exposure.entry(state).or_default() += pos.size.inner();
        }
    }
    exposure
}

/// Similarity of the incoming signal to the existing book. Same symbol is
/// near-certain correlation; a majority of positions in the same state is
/// moderate; otherwise low.
fn portfolio_correlation(snapshot: &SignalSnapshot, positions: &[PositionSnapshot]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }

    if positions.iter().any(|p| p.symbol == snapshot.symbol()) {
        return 0.9;
    }

    if let Some(state) = snapshot.anchor_state() {
        let same_state = positions
            .iter()
            .filter(|p| p.market_state == Some(state))
            .count();
        if same_state * 2 > positions.len() {
            return 0.7;
        }
    }

    0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{SnapshotBuilder, Timeframe};
    use rust_decimal_macros::dec;

    fn position(
        symbol: &str,
        state: MarketState,
        size: Decimal,
        confidence: f64,
        entropy: f64,
    ) -> PositionSnapshot {
        PositionSnapshot::new(
            symbol,
            PositionDirection::Long,
            Size::new(size),
            Price::new(dec!(50000)),
            0.0,
            Some(state),
            confidence,
            entropy,
        )
        .unwrap()
    }

    fn snapshot(state: MarketState, confidence: f64, entropy: f64) -> SignalSnapshot {
        SnapshotBuilder::new("SOLUSDT")
            .anchor(Timeframe::M15)
            .state(Timeframe::M15, Some(state))
            .score(90, 125)
            .confidence(confidence)
            .entropy(entropy)
            .decision(SignalDecision::Enter, "test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_position_snapshot_validation() {
        assert!(PositionSnapshot::new(
            "BTCUSDT",
            PositionDirection::Long,
            Size::ZERO,
            Price::new(dec!(100)),
            0.0,
            None,
            0.5,
            0.5,
        )
        .is_err());

        assert!(PositionSnapshot::new(
            "BTCUSDT",
            PositionDirection::Long,
            Size::new(dec!(100)),
            Price::new(dec!(100)),
            0.0,
            None,
            1.5,
            0.5,
        )
        .is_err());
    }

    #[test]
    fn test_build_portfolio_state() {
        let positions = vec![
            position("BTCUSDT", MarketState::A, dec!(300), 0.8, 0.2),
            position("ETHUSDT", MarketState::D, dec!(200), 0.6, 0.4),
        ];
        let state = build_portfolio_state(&positions, Size::new(dec!(1000))).unwrap();
        assert_eq!(state.total_exposure.inner(), dec!(500));
        assert_eq!(state.long_exposure.inner(), dec!(500));
        assert_eq!(state.regime_exposure[&MarketState::A], dec!(300));
        assert!((state.risk_utilization_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_portfolio_allows() {
        let brain = PortfolioBrain::new();
        let portfolio = PortfolioState::empty(Size::new(dec!(1000)));
        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.7, 0.3), &[], &portfolio);
        assert_ne!(analysis.decision, PortfolioDecision::Block);
    }

    #[test]
    fn test_reinforcement_block() {
        // Three positions all in state A; incoming signal also A.
        let positions = vec![
            position("BTCUSDT", MarketState::A, dec!(300), 0.7, 0.3),
            position("ETHUSDT", MarketState::A, dec!(250), 0.7, 0.3),
            position("BNBUSDT", MarketState::A, dec!(150), 0.7, 0.3),
        ];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(1000))).unwrap();
        let brain = PortfolioBrain::new();

        let analysis = brain.evaluate(&snapshot(MarketState::A, 0.7, 0.3), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::Block);
        assert!(analysis.reason.contains("reinforce"));
        assert_eq!(analysis.dominant_market_state, Some(MarketState::A));
    }

    #[test]
    fn test_low_confidence_block() {
        let positions = vec![position("BTCUSDT", MarketState::A, dec!(100), 0.7, 0.3)];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(1000))).unwrap();
        let brain = PortfolioBrain::new();

        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.3, 0.3), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::Block);
        assert!(analysis.reason.contains("confidence"));
    }

    #[test]
    fn test_budget_exceeded_block() {
        let positions = vec![position("BTCUSDT", MarketState::A, dec!(1200), 0.7, 0.3)];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(1000))).unwrap();
        let brain = PortfolioBrain::new();

        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.7, 0.3), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::Block);
        assert!(analysis.reason.contains("risk budget"));
    }

    #[test]
    fn test_scale_down_on_below_average_confidence() {
        // Book averages 0.8 confidence; incoming is 0.5 with 0.6-share of
        // positions in a different state (no same-symbol overlap).
        let positions = vec![
            position("BTCUSDT", MarketState::A, dec!(200), 0.8, 0.3),
            position("ETHUSDT", MarketState::B, dec!(200), 0.8, 0.3),
            position("XRPUSDT", MarketState::C, dec!(200), 0.8, 0.3),
        ];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(2000))).unwrap();
        let brain = PortfolioBrain::new();

        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.5, 0.3), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::ScaleDown);
        assert!((analysis.recommended_size_multiplier - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_scale_down_on_same_symbol_correlation() {
        let positions = vec![position("SOLUSDT", MarketState::B, dec!(200), 0.6, 0.3)];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(2000))).unwrap();
        let brain = PortfolioBrain::new();

        // Same symbol as an open position: correlation 0.9 -> x0.5.
        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.7, 0.3), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::ScaleDown);
        assert!((analysis.recommended_size_multiplier - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_diversifying_signal_allowed() {
        let positions = vec![
            position("BTCUSDT", MarketState::A, dec!(400), 0.6, 0.3),
            position("ETHUSDT", MarketState::B, dec!(400), 0.6, 0.3),
        ];
        let portfolio = build_portfolio_state(&positions, Size::new(dec!(2000))).unwrap();
        let brain = PortfolioBrain::new();

        let analysis = brain.evaluate(&snapshot(MarketState::D, 0.65, 0.35), &positions, &portfolio);
        assert_eq!(analysis.decision, PortfolioDecision::Allow);
        assert!(analysis.reason.contains("Diversifies"));
    }
}
