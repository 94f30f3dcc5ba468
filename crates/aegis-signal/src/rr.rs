//! Adaptive risk:reward planning.
//!
//! The base 1:2 target stretches or shrinks with volatility, trend
//! strength, and the risk tier, clamped to [1.0, 3.5].

use aegis_core::RiskLevel;

/// One R:R plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RrPlan {
    pub target: f64,
    pub rr_ratio: f64,
    pub risk_pct: f64,
    pub reward_pct: f64,
    pub reason: String,
}

/// Compute the adaptive target from entry/stop and context.
pub fn calculate_adaptive_rr(
    entry: f64,
    stop: f64,
    volatility_pct: f64,
    trend_strength: f64,
    risk: RiskLevel,
) -> RrPlan {
    if entry <= 0.0 || stop <= 0.0 {
        return RrPlan {
            target: entry,
            rr_ratio: 1.0,
            risk_pct: 0.0,
            reward_pct: 0.0,
            reason: "invalid entry/stop".to_string(),
        };
    }

    let risk_distance = (entry - stop).abs();
    let risk_pct = risk_distance / entry * 100.0;

    let base_rr: f64 = 2.0;

    let (volatility_mult, vol_note) = if volatility_pct > 3.0 {
        (1.5, "high volatility")
    } else if volatility_pct > 2.0 {
        (1.2, "elevated volatility")
    } else if volatility_pct < 1.0 {
        (0.8, "low volatility")
    } else {
        (1.0, "normal volatility")
    };

    let (trend_mult, trend_note) = if trend_strength >= 70.0 {
        (1.3, "strong trend")
    } else if trend_strength >= 60.0 {
        (1.1, "moderate trend")
    } else if trend_strength < 50.0 {
        (0.9, "weak trend")
    } else {
        (1.0, "normal trend")
    };

    let (risk_mult, risk_note) = match risk {
        RiskLevel::Low => (1.2, "low risk"),
        RiskLevel::Medium => (1.0, "medium risk"),
        RiskLevel::High => (0.8, "high risk"),
    };

    let rr = (base_rr * volatility_mult * trend_mult * risk_mult).clamp(1.0, 3.5);

    let target = if entry > stop {
        entry + risk_distance * rr
    } else {
        entry - risk_distance * rr
    };
    let reward_pct = (target - entry).abs() / entry * 100.0;

    RrPlan {
        target,
        rr_ratio: rr,
        risk_pct,
        reward_pct,
        reason: format!("R:R {rr:.2} ({vol_note}, {trend_note}, {risk_note})"),
    }
}
