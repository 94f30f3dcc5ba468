//! Offline replay of recorded decisions through the current validator
//! logic.
//!
//! Rebuilds minimal snapshots from the persisted decision-trace context
//! (symbol, confidence, entropy, score, risk level) and runs them through
//! the current chain. The output highlights logic drift between the
//! version that recorded the decisions and the version running now. No
//! live state is read or written.

use std::collections::BTreeSet;

use clap::Parser;
use rust_decimal::Decimal;

use aegis_core::{RiskLevel, SignalDecision, SignalSnapshot, SnapshotBuilder, Timeframe};
use aegis_persistence::SqliteStore;
use aegis_replay::ReplayEngine;

/// Replay recorded gatekeeper decisions through the current logic.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the engine database.
    #[arg(long, default_value = "aegis.db")]
    db: String,

    /// How many trace rows to read.
    #[arg(long, default_value_t = 500)]
    limit: usize,

    /// Balance the replay sizes against.
    #[arg(long, default_value = "10000")]
    balance: Decimal,

    /// Risk budget for the replayed portfolio context.
    #[arg(long, default_value = "600")]
    risk_budget: Decimal,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = SqliteStore::open_read_only(&args.db)?;
    let decisions = store.recent_decisions(args.limit, None)?;

    // One snapshot per final gatekeeper verdict; the per-stage rows of
    // the same signal share the identical context.
    let mut snapshots: Vec<SignalSnapshot> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for record in decisions
        .iter()
        .filter(|d| d.decision_source == "Gatekeeper" && d.symbol != "SYSTEM")
    {
        let key = format!("{}-{}", record.symbol, record.timestamp.timestamp());
        if !seen.insert(key) {
            continue;
        }
        if let Some(snapshot) = rebuild_snapshot(record) {
            snapshots.push(snapshot);
        }
    }

    if snapshots.is_empty() {
        println!("No replayable decisions found in {}", args.db);
        return Ok(());
    }

    let engine = ReplayEngine::new(args.balance, aegis_core::Size::new(args.risk_budget));
    let report = engine.replay_snapshots(&snapshots);

    println!("{}", report.render_markdown());
    Ok(())
}

/// Rebuild the minimal snapshot the chain needs from a trace row.
fn rebuild_snapshot(record: &aegis_persistence::DecisionRecord) -> Option<SignalSnapshot> {
    let ctx = &record.context_snapshot;
    let confidence = ctx.get("confidence")?.as_f64()?;
    let entropy = ctx.get("entropy")?.as_f64()?;
    let score = ctx.get("score").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let risk_level = ctx
        .get("risk_level")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "LOW" => RiskLevel::Low,
            "HIGH" => RiskLevel::High,
            _ => RiskLevel::Medium,
        })
        .unwrap_or_default();

    SnapshotBuilder::new(record.symbol.clone())
        .timestamp(record.timestamp)
        .anchor(Timeframe::M15)
        .score(score.min(125), 125)
        .confidence(confidence.clamp(0.0, 1.0))
        .entropy(entropy.clamp(0.0, 1.0))
        .risk_level(risk_level)
        .decision(SignalDecision::Enter, record.reason.clone())
        .build()
        .ok()
}
