//! Outbound signal message rendering.

use aegis_brains::{PortfolioAnalysis, TradingDecision};
use aegis_core::{SignalSnapshot, Timeframe};

use crate::intent::SignalIntent;

/// Render the full signal message: zone, size, cognition, portfolio
/// summary, and the validator reasons.
pub fn build_signal_message(
    snapshot: &SignalSnapshot,
    intent: &SignalIntent,
    decision: &TradingDecision,
    portfolio: Option<&PortfolioAnalysis>,
    sizer_reason: &str,
) -> String {
    let mut msg = String::new();

    msg.push_str(&format!(
        "Signal: {} {}\n",
        intent.symbol,
        intent.side.as_str()
    ));

    let state_line: Vec<String> = [Timeframe::H1, Timeframe::M30, Timeframe::M15]
        .iter()
        .map(|tf| {
            let state = snapshot
                .states()
                .get(tf)
                .copied()
                .flatten()
                .map(|s| s.as_str())
                .unwrap_or("-");
            format!("{tf}: {state}")
        })
        .collect();
    msg.push_str(&format!("States: {}\n", state_line.join(" | ")));

    msg.push_str(&format!(
        "Entry: {} | SL: {} | TP: {}\n",
        intent.entry, intent.stop, intent.target
    ));
    msg.push_str(&format!(
        "Size: {} USDT{}\n",
        intent.position_size_usd,
        intent
            .leverage
            .map(|l| format!(" @ {l}x"))
            .unwrap_or_default()
    ));

    msg.push_str(&format!(
        "\nScore: {}/{}\nMode: {}\nR:R: {:.2}\nRisk: {}\nVolatility: {:.2}%\n",
        intent.score,
        snapshot.score_max(),
        intent.mode.as_str(),
        intent.rr_ratio,
        intent.risk_label,
        intent.volatility_pct,
    ));

    msg.push_str(&format!(
        "Confidence: {:.2}\nEntropy: {:.2}\n",
        snapshot.confidence(),
        snapshot.entropy()
    ));

    if let Some(analysis) = portfolio {
        msg.push_str(&format!(
            "\nPortfolio:\n- Decision: {}\n- Reason: {}\n",
            analysis.decision.as_str(),
            analysis.reason
        ));
        if analysis.risk_utilization_ratio > 0.0 {
            msg.push_str(&format!(
                "- Utilization: {:.1}%\n",
                analysis.risk_utilization_ratio * 100.0
            ));
        }
    }

    msg.push_str(&format!("\nDecision Core: {}\n", decision.reason));
    if !decision.recommendations.is_empty() {
        msg.push_str("Recommendations:\n");
        for rec in &decision.recommendations {
            msg.push_str(&format!("- {rec}\n"));
        }
    }

    msg.push_str(&format!("Sizer: {sizer_reason}\n"));

    if !intent.reasons.is_empty() {
        msg.push_str("\nReasons:\n");
        for reason in &intent.reasons {
            msg.push_str(&format!("- {reason}\n"));
        }
    }

    msg
}
