//! Cognitive metrics: the system's meta-estimates of its own conviction.
//!
//! Confidence is not a probability and entropy is not volatility. Both are
//! computed from an already-built snapshot and describe how coherent the
//! system's own reasoning is, not the market.

use crate::market::MarketState;
use crate::regime::{RiskLevel, VolatilityLevel};
use crate::snapshot::{SignalDecision, SignalSnapshot};

/// How confident the system is in a signal, in [0, 1].
///
/// Weighted factors:
/// 1. State consistency across timeframes (30%)
/// 2. Score ratio (25%)
/// 3. Decision/risk alignment (20%)
/// 4. Absence of conflicts (15%)
/// 5. Regime and volatility bonus (10%)
pub fn calculate_confidence(snapshot: &SignalSnapshot) -> f64 {
    let mut confidence = 0.0;

    confidence += state_consistency(snapshot) * 0.30;
    confidence += (snapshot.score_pct() / 100.0) * 0.25;
    confidence += decision_risk_alignment(snapshot) * 0.20;
    confidence += (1.0 - conflict_penalty(snapshot)) * 0.15;
    confidence += regime_volatility_bonus(snapshot) * 0.10;

    confidence.clamp(0.0, 1.0)
}

/// Cognitive uncertainty of the market picture, in [0, 1].
///
/// Weighted factors:
/// 1. State dispersion across timeframes (40%)
/// 2. Score vs decision conflict (30%)
/// 3. Volatility term (20%)
/// 4. Regime uncertainty (10%)
pub fn calculate_entropy(snapshot: &SignalSnapshot) -> f64 {
    let mut entropy = 0.0;

    entropy += state_dispersion(snapshot) * 0.40;
    entropy += score_decision_conflict(snapshot) * 0.30;
    entropy += volatility_term(snapshot) * 0.20;
    entropy += regime_uncertainty(snapshot) * 0.10;

    entropy.clamp(0.0, 1.0)
}

fn classified_states(snapshot: &SignalSnapshot) -> Vec<MarketState> {
    snapshot.states().values().copied().flatten().collect()
}

/// 1 - (unique_states - 1) / 3: a single shared state is full consistency.
fn state_consistency(snapshot: &SignalSnapshot) -> f64 {
    let states = classified_states(snapshot);
    if states.is_empty() {
        return 0.0;
    }
    let mut unique: Vec<MarketState> = states.clone();
    unique.sort();
    unique.dedup();
    1.0 - ((unique.len() as f64 - 1.0) / 3.0)
}

fn state_dispersion(snapshot: &SignalSnapshot) -> f64 {
    let states = classified_states(snapshot);
    if states.is_empty() {
        // Nothing classified at all is maximal uncertainty.
        return 1.0;
    }
    1.0 - state_consistency(snapshot)
}

fn decision_risk_alignment(snapshot: &SignalSnapshot) -> f64 {
    match (snapshot.decision(), snapshot.risk_level()) {
        (SignalDecision::Enter, RiskLevel::Low) => 1.0,
        (SignalDecision::Enter, RiskLevel::Medium) => 0.7,
        (SignalDecision::Enter, RiskLevel::High) => 0.0,
        (SignalDecision::Observe, RiskLevel::Medium) => 0.8,
        (SignalDecision::Observe, _) => 0.6,
        (SignalDecision::Skip, RiskLevel::High) => 0.8,
        (SignalDecision::Skip, _) => 0.5,
        (SignalDecision::Block, RiskLevel::High) => 1.0,
        (SignalDecision::Block, _) => 0.4,
    }
}

/// Fixed conflict rules, each contributing to a [0, 1] penalty.
fn conflict_penalty(snapshot: &SignalSnapshot) -> f64 {
    let mut penalty: f64 = 0.0;

    // Strong conflict: a high score with HIGH risk.
    if snapshot.score() >= 70 && snapshot.risk_level() == RiskLevel::High {
        penalty += 0.6;
    }

    // Entering against HIGH risk.
    if snapshot.decision() == SignalDecision::Enter && snapshot.risk_level() == RiskLevel::High {
        penalty += 0.4;
    }

    // Blocking despite a near-maximal score.
    if snapshot.decision() == SignalDecision::Block && snapshot.score() >= 90 {
        penalty += 0.4;
    }

    penalty.min(1.0)
}

fn regime_volatility_bonus(snapshot: &SignalSnapshot) -> f64 {
    match snapshot.volatility_level() {
        Some(VolatilityLevel::Normal) => 1.0,
        Some(VolatilityLevel::Low) => 0.7,
        Some(VolatilityLevel::High) => 0.4,
        Some(VolatilityLevel::Extreme) => 0.0,
        Some(VolatilityLevel::Unknown) | None => 0.3,
    }
}

fn score_decision_conflict(snapshot: &SignalSnapshot) -> f64 {
    let pct = snapshot.score_pct();
    match snapshot.decision() {
        // High score that still did not produce an entry.
        SignalDecision::Skip | SignalDecision::Block if pct >= 70.0 => 1.0,
        // Entry on a weak score.
        SignalDecision::Enter if pct < 50.0 => 0.8,
        SignalDecision::Observe if pct >= 85.0 => 0.5,
        _ => 0.0,
    }
}

fn volatility_term(snapshot: &SignalSnapshot) -> f64 {
    match snapshot.volatility_level() {
        Some(VolatilityLevel::Extreme) => 1.0,
        Some(VolatilityLevel::High) => 0.7,
        Some(VolatilityLevel::Unknown) | None => 0.5,
        Some(VolatilityLevel::Low) => 0.2,
        Some(VolatilityLevel::Normal) => 0.0,
    }
}

fn regime_uncertainty(snapshot: &SignalSnapshot) -> f64 {
    match snapshot.market_regime() {
        Some(regime) => 1.0 - regime.confidence.clamp(0.0, 1.0),
        None => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Timeframe;
    use crate::snapshot::SnapshotBuilder;

    fn snapshot_with(
        states: &[(Timeframe, Option<MarketState>)],
        score: u32,
        decision: SignalDecision,
        risk: RiskLevel,
    ) -> SignalSnapshot {
        let mut builder = SnapshotBuilder::new("BTCUSDT")
            .anchor(Timeframe::M15)
            .score(score, 125)
            .decision(decision, "test")
            .risk_level(risk)
            .volatility_level(Some(VolatilityLevel::Normal));
        for (tf, state) in states {
            builder = builder.state(*tf, *state);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_confidence_in_unit_interval() {
        let snapshot = snapshot_with(
            &[
                (Timeframe::M15, Some(MarketState::D)),
                (Timeframe::M30, Some(MarketState::D)),
            ],
            90,
            SignalDecision::Enter,
            RiskLevel::Low,
        );
        let c = calculate_confidence(&snapshot);
        assert!((0.0..=1.0).contains(&c));
        // Consistent states, strong score, aligned decision: high confidence.
        assert!(c > 0.6, "expected high confidence, got {c}");
    }

    #[test]
    fn test_entropy_low_when_consistent() {
        let snapshot = snapshot_with(
            &[
                (Timeframe::M15, Some(MarketState::D)),
                (Timeframe::M30, Some(MarketState::D)),
                (Timeframe::H1, Some(MarketState::D)),
            ],
            90,
            SignalDecision::Enter,
            RiskLevel::Low,
        );
        assert!(calculate_entropy(&snapshot) < 0.3);
    }

    #[test]
    fn test_entropy_high_when_dispersed() {
        let snapshot = snapshot_with(
            &[
                (Timeframe::M15, Some(MarketState::A)),
                (Timeframe::M30, Some(MarketState::B)),
                (Timeframe::H1, Some(MarketState::C)),
                (Timeframe::H4, Some(MarketState::D)),
            ],
            90,
            SignalDecision::Skip,
            RiskLevel::Medium,
        );
        // All four states present plus a score/decision conflict.
        assert!(calculate_entropy(&snapshot) > 0.6);
    }

    #[test]
    fn test_high_score_high_risk_is_conflict() {
        let conflicted = snapshot_with(
            &[(Timeframe::M15, Some(MarketState::D))],
            90,
            SignalDecision::Enter,
            RiskLevel::High,
        );
        let aligned = snapshot_with(
            &[(Timeframe::M15, Some(MarketState::D))],
            90,
            SignalDecision::Enter,
            RiskLevel::Low,
        );
        assert!(calculate_confidence(&conflicted) < calculate_confidence(&aligned));
    }

    #[test]
    fn test_no_states_is_maximal_dispersion() {
        let snapshot = snapshot_with(&[], 0, SignalDecision::Skip, RiskLevel::Medium);
        assert!(calculate_entropy(&snapshot) >= 0.4);
    }
}
