//! Read-only runtime observer.
//!
//! Out-of-process tool that reads the engine's database and produces JSON
//! and Markdown reports: last persisted checkpoint (system health,
//! performance counters), persisted FSM transitions, and recent decision
//! traces. Strictly read-only against the observed system: the database
//! is opened with read-only flags, and no verdicts are computed.

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use serde_json::json;

use aegis_persistence::{DecisionRecord, SqliteStore};
use aegis_replay::{DriftDetector, DriftState, SnapshotStat};
use aegis_state::StateCheckpoint;

/// Read-only observer of a running (or stopped) aegis instance.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the engine database.
    #[arg(long, default_value = "aegis.db")]
    db: String,

    /// Directory for report files.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Emit only the JSON report.
    #[arg(long)]
    json_only: bool,

    /// Emit only the Markdown report.
    #[arg(long)]
    md_only: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = SqliteStore::open_read_only(&args.db)?;
    let checkpoint = store.latest_checkpoint().ok().flatten();
    let transitions = store.recent_decisions(50, Some("SYSTEM"))?;
    let decisions = store.recent_decisions(50, None)?;

    // Advisory drift over the recorded cognition values; needs a wider
    // read than the report tables.
    let drift = detect_drift(&store);

    let json_report = build_json_report(&checkpoint, &transitions, &decisions, &drift);
    let md_report = build_markdown_report(&checkpoint, &transitions, &decisions, &drift);

    std::fs::create_dir_all(&args.output_dir)?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");

    if !args.md_only {
        let path = args.output_dir.join(format!("observer_report_{stamp}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&json_report)?)?;
        println!("JSON report written to {}", path.display());
    }
    if !args.json_only {
        let path = args.output_dir.join(format!("observer_report_{stamp}.md"));
        std::fs::write(&path, &md_report)?;
        println!("Markdown report written to {}", path.display());
    }

    println!("\n=== Observation summary ===");
    match &checkpoint {
        Some(cp) => println!(
            "Checkpoint: {} (safe_mode={}, trading_paused={})",
            cp.timestamp, cp.system_health.safe_mode, cp.system_health.trading_paused
        ),
        None => println!("Checkpoint: none"),
    }
    println!("Transitions read: {}", transitions.len());
    println!("Decisions read: {}", decisions.len());
    println!("\nNote: read-only observation, no verdicts computed.");

    Ok(())
}

/// Feed the recorded confidence/entropy pairs into the drift detector.
fn detect_drift(store: &SqliteStore) -> Option<DriftState> {
    let decisions = store.recent_decisions(5000, None).ok()?;
    let stats: Vec<SnapshotStat> = decisions
        .iter()
        .filter(|d| d.decision_source == "Gatekeeper" && d.symbol != "SYSTEM")
        .filter_map(|d| {
            let ctx = &d.context_snapshot;
            Some(SnapshotStat {
                timestamp: d.timestamp,
                confidence: ctx.get("confidence")?.as_f64()?,
                entropy: ctx.get("entropy")?.as_f64()?,
            })
        })
        .collect();
    DriftDetector::default().detect(&stats, Utc::now())
}

fn build_json_report(
    checkpoint: &Option<StateCheckpoint>,
    transitions: &[DecisionRecord],
    decisions: &[DecisionRecord],
    drift: &Option<DriftState>,
) -> serde_json::Value {
    json!({
        "observer_version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "observation_type": "read_only",
        "checkpoint": checkpoint,
        "fsm_transitions": transitions,
        "recent_decisions": decisions,
        "drift": drift,
        "metadata": {
            "observer_mode": "external",
            "read_only": true,
            "no_verdict": true,
        }
    })
}

fn build_markdown_report(
    checkpoint: &Option<StateCheckpoint>,
    transitions: &[DecisionRecord],
    decisions: &[DecisionRecord],
    drift: &Option<DriftState>,
) -> String {
    let mut md = String::from("# Aegis Observer Report\n\n");
    md += &format!("**Observation time:** {}\n", Utc::now().to_rfc3339());
    md += "**Observer mode:** external (read-only)\n\n";

    md += "## Last checkpoint\n";
    match checkpoint {
        Some(cp) => {
            md += &format!("- Timestamp: `{}`\n", cp.timestamp);
            md += &format!("- Running: `{}`\n", cp.system_health.is_running);
            md += &format!("- Safe mode: `{}`\n", cp.system_health.safe_mode);
            md += &format!("- Trading paused: `{}`\n", cp.system_health.trading_paused);
            md += &format!(
                "- Consecutive errors: `{}`\n",
                cp.system_health.consecutive_errors
            );
            md += &format!(
                "- Cycles: `{}` total, `{}` ok, `{}` errors\n",
                cp.performance_metrics.total_cycles,
                cp.performance_metrics.successful_cycles,
                cp.performance_metrics.errors
            );
            md += &format!("- Open positions: `{}`\n", cp.open_positions.len());
            md += &format!("- Recent signals: `{}`\n", cp.recent_signals.len());
        }
        None => md += "- No checkpoint available\n",
    }

    md += "\n## FSM transitions\n";
    if transitions.is_empty() {
        md += "- None persisted\n";
    } else {
        md += "| Timestamp | Transition | Reason |\n|---|---|---|\n";
        for t in transitions.iter().take(20) {
            md += &format!(
                "| `{}` | `{}` | {} |\n",
                t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                t.context_snapshot
                    .get("from")
                    .and_then(|v| v.as_str())
                    .map(|from| format!(
                        "{} -> {}",
                        from,
                        t.context_snapshot
                            .get("to")
                            .and_then(|v| v.as_str())
                            .unwrap_or("?")
                    ))
                    .unwrap_or_else(|| "?".to_string()),
                t.reason
            );
        }
    }

    md += "\n## Recent decisions\n";
    if decisions.is_empty() {
        md += "- None recorded\n";
    } else {
        md += "| Timestamp | Symbol | Source | Allowed | Reason |\n|---|---|---|---|---|\n";
        for d in decisions.iter().take(20) {
            md += &format!(
                "| `{}` | {} | {} | {} | {} |\n",
                d.timestamp.format("%H:%M:%S"),
                d.symbol,
                d.decision_source,
                d.allow_trading,
                d.reason
            );
        }
    }

    md += "\n## Drift (advisory)\n";
    match drift {
        Some(state) => {
            md += &format!("- Detected: `{}`\n", state.overall_detected);
            if let Some(severity) = state.overall_severity {
                md += &format!("- Severity: `{severity:?}`\n");
            }
            md += &format!("- Confidence: {}\n", state.confidence.reason);
            md += &format!("- Entropy: {}\n", state.entropy.reason);
            md += &format!("- Decoupling: `{}`\n", state.decoupling_detected);
        }
        None => md += "- Insufficient data\n",
    }

    md += "\n---\n**Note:** read-only observation, no verdicts computed.\n";
    md
}
