//! Validator-chain scenarios run end-to-end against an in-memory store
//! and a recording sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use aegis_brains::{DecisionCore, PositionSizer};
use aegis_core::{
    MarketMode, MarketState, Price, RiskLevel, SignalDecision, Size, SnapshotBuilder, TimeContext,
    Timeframe,
};
use aegis_gatekeeper::{Gatekeeper, GatekeeperConfig, NullSink, SendOutcome, SignalIntent};
use aegis_persistence::{SignalLogWriter, SqliteStore};
use aegis_registry::{Module, ModuleCriticality, ModuleRegistry, SystemGuardian};
use aegis_risk::RiskCore;
use aegis_runtime::{RunState, SystemStateMachine};
use aegis_state::{PositionSide, SystemStateHandle};

struct PassiveModule;

#[async_trait]
impl Module for PassiveModule {}

struct Harness {
    gatekeeper: Gatekeeper,
    store: Arc<SqliteStore>,
    state: SystemStateHandle,
    machine: Arc<SystemStateMachine>,
    sink: Arc<NullSink>,
}

fn harness() -> Harness {
    let registry = Arc::new(ModuleRegistry::new());
    for name in ["DecisionCore", "SystemStateMachine", "RiskExposureBrain", "Gatekeeper"] {
        registry.register(
            name,
            ModuleCriticality::Critical,
            Arc::new(PassiveModule),
            Duration::from_secs(1),
            "",
        );
    }

    let machine = Arc::new(SystemStateMachine::default());
    let state = SystemStateHandle::new();
    let guardian = Arc::new(SystemGuardian::new(
        registry,
        machine.clone(),
        state.clone(),
    ));

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let sink = Arc::new(NullSink::new());
    let log_path = std::env::temp_dir().join(format!(
        "aegis-chain-test-{}-{:p}.csv",
        std::process::id(),
        Arc::as_ptr(&store)
    ));

    let gatekeeper = Gatekeeper::new(
        guardian,
        RiskCore::default(),
        Arc::new(DecisionCore::default()),
        PositionSizer::default(),
        store.clone(),
        SignalLogWriter::new(log_path),
        sink.clone(),
        state.clone(),
        GatekeeperConfig::default(),
    );

    Harness {
        gatekeeper,
        store,
        state,
        machine,
        sink,
    }
}

fn happy_snapshot() -> aegis_core::SignalSnapshot {
    SnapshotBuilder::new("BTCUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::D))
        .state(Timeframe::M30, Some(MarketState::D))
        .score(90, 125)
        .confidence(0.7)
        .entropy(0.3)
        .risk_level(RiskLevel::Low)
        .decision(SignalDecision::Enter, "rejection entry")
        .entry_zone(
            Some(Price::new(dec!(50000))),
            Some(Price::new(dec!(51000))),
            Some(Price::new(dec!(49500))),
        )
        .build()
        .unwrap()
}

fn happy_intent() -> SignalIntent {
    SignalIntent {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Long,
        entry: Price::new(dec!(50000)),
        stop: Price::new(dec!(49500)),
        target: Price::new(dec!(51000)),
        position_size_usd: Size::new(dec!(200)),
        leverage: Some(dec!(2)),
        rr_ratio: 2.0,
        volatility_pct: 1.2,
        score: 90,
        mode: MarketMode::Trade,
        risk_label: "LOW".to_string(),
        reasons: vec!["Clear rejection on 15m".to_string()],
    }
}

/// Scenario: happy path. Clean state, empty book, RUNNING machine.
#[tokio::test]
async fn test_happy_path_sends_signal() {
    let h = harness();

    let outcome = h.gatekeeper.send_signal(&happy_snapshot(), happy_intent()).await;

    let SendOutcome::Sent { final_size_usd } = outcome else {
        panic!("expected Sent, got {outcome:?}");
    };
    // balance 10000, base 2%: 2.0 * 0.7 * 0.7 * 1.0 = 0.98% -> 98 USD.
    assert_eq!(final_size_usd.inner(), dec!(98));

    // Exactly one outbound message.
    assert_eq!(h.sink.messages().len(), 1);
    assert_eq!(h.sink.charts().len(), 1);

    // Paper trade opened after the send.
    assert_eq!(h.store.open_trades().unwrap().len(), 1);

    // Trace contains allow entries for each stage plus the final SEND.
    let decisions = h.store.recent_decisions(20, Some("BTCUSDT")).unwrap();
    let sources: Vec<&str> = decisions
        .iter()
        .map(|d| d.decision_source.as_str())
        .collect();
    for source in [
        "RiskCore",
        "META",
        "DecisionCore",
        "PortfolioBrain",
        "PositionSizer",
        "Gatekeeper",
    ] {
        assert!(sources.contains(&source), "missing {source} in {sources:?}");
    }
    let final_entry = decisions
        .iter()
        .find(|d| d.decision_source == "Gatekeeper")
        .unwrap();
    assert!(final_entry.allow_trading);
    assert!(final_entry.reason.contains("SEND"));

    assert_eq!(h.gatekeeper.stats().approved, 1);
}

/// Scenario: RiskCore veto on a 6% 24h loss (cap 5%).
#[tokio::test]
async fn test_risk_core_veto_blocks() {
    let h = harness();

    // Record a closed losing trade: -600 on a 10000 initial balance.
    let id = h
        .store
        .open_trade(
            "BTCUSDT",
            "LONG",
            dec!(50000),
            dec!(49000),
            dec!(52000),
            dec!(1000),
            None,
            Some(MarketState::A),
            0.6,
            0.4,
        )
        .unwrap();
    h.store
        .close_trade(id, dec!(47000), "SL", dec!(-600))
        .unwrap();

    let outcome = h.gatekeeper.send_signal(&happy_snapshot(), happy_intent()).await;

    let SendOutcome::Blocked { stage, .. } = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert_eq!(stage, "RiskCore");

    // No outbound message, no new open trade.
    assert!(h.sink.messages().is_empty());
    assert!(h.store.open_trades().unwrap().is_empty());

    let decisions = h.store.recent_decisions(20, Some("BTCUSDT")).unwrap();
    let risk_entry = decisions
        .iter()
        .find(|d| d.decision_source == "RiskCore")
        .unwrap();
    assert!(!risk_entry.allow_trading);
    assert!(risk_entry.reason.contains("LOCKED"));

    let final_entry = decisions
        .iter()
        .find(|d| d.decision_source == "Gatekeeper")
        .unwrap();
    assert!(final_entry.reason.contains("BLOCK"));
}

/// Scenario: meta HARD block on entropy 0.80 + confidence 0.30, and no
/// later validator runs.
#[tokio::test]
async fn test_meta_hard_block_short_circuits() {
    let h = harness();

    let snapshot = SnapshotBuilder::new("BTCUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::D))
        .score(90, 125)
        .confidence(0.30)
        .entropy(0.80)
        .decision(SignalDecision::Enter, "test")
        .build()
        .unwrap();

    let outcome = h.gatekeeper.send_signal(&snapshot, happy_intent()).await;

    let SendOutcome::Blocked { stage, reason } = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert_eq!(stage, "META");
    assert!(reason.contains("HARD BLOCK"));

    let decisions = h.store.recent_decisions(20, Some("BTCUSDT")).unwrap();
    let meta_entry = decisions
        .iter()
        .find(|d| d.decision_source == "META")
        .unwrap();
    assert_eq!(meta_entry.block_level, aegis_persistence::BlockLevel::Hard);

    // The chain stopped: DecisionCore, PortfolioBrain, PositionSizer never
    // recorded anything.
    for source in ["DecisionCore", "PortfolioBrain", "PositionSizer"] {
        assert!(
            !decisions.iter().any(|d| d.decision_source == source),
            "{source} should not have run"
        );
    }
}

/// The snapshot's session phase reaches the meta stage: session end with
/// elevated entropy is a SOFT block even when everything else is clean.
#[tokio::test]
async fn test_session_end_soft_block() {
    let h = harness();

    let snapshot = SnapshotBuilder::new("BTCUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::D))
        .score(90, 125)
        .confidence(0.7)
        .entropy(0.65)
        .decision(SignalDecision::Enter, "rejection entry")
        .time_context(TimeContext::SessionEnd)
        .build()
        .unwrap();

    let outcome = h.gatekeeper.send_signal(&snapshot, happy_intent()).await;

    let SendOutcome::Blocked { stage, reason } = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert_eq!(stage, "META");
    assert!(reason.contains("End of trading session"), "reason: {reason}");

    let decisions = h.store.recent_decisions(20, Some("BTCUSDT")).unwrap();
    let meta_entry = decisions
        .iter()
        .find(|d| d.decision_source == "META")
        .unwrap();
    assert_eq!(meta_entry.block_level, aegis_persistence::BlockLevel::Soft);
    assert!(h.sink.messages().is_empty());
}

/// Scenario: the book holds three positions all in state A; a new state-A
/// signal reinforces the dominant state and is blocked.
#[tokio::test]
async fn test_portfolio_reinforcement_block() {
    let h = harness();

    for (symbol, size) in [("ETHUSDT", 300), ("BNBUSDT", 250), ("XRPUSDT", 150)] {
        h.store
            .open_trade(
                symbol,
                "LONG",
                dec!(100),
                dec!(95),
                dec!(110),
                rust_decimal::Decimal::from(size),
                None,
                Some(MarketState::A),
                0.7,
                0.3,
            )
            .unwrap();
    }

    let snapshot = SnapshotBuilder::new("BTCUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::A))
        .score(90, 125)
        .confidence(0.7)
        .entropy(0.3)
        .decision(SignalDecision::Enter, "impulse entry")
        .build()
        .unwrap();

    let outcome = h.gatekeeper.send_signal(&snapshot, happy_intent()).await;

    let SendOutcome::Blocked { stage, reason } = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert_eq!(stage, "PortfolioBrain");
    assert!(reason.contains("reinforce"), "reason: {reason}");
    assert!(h.sink.messages().is_empty());
}

/// Scenario: book averaging 0.8 confidence across mixed states, incoming
/// confidence 0.5: portfolio scales the size down and the signal still
/// sends.
#[tokio::test]
async fn test_portfolio_scale_down_path() {
    let h = harness();

    for (symbol, state) in [
        ("ETHUSDT", MarketState::A),
        ("BNBUSDT", MarketState::B),
        ("XRPUSDT", MarketState::C),
    ] {
        h.store
            .open_trade(
                symbol,
                "LONG",
                dec!(100),
                dec!(95),
                dec!(110),
                dec!(50),
                None,
                Some(state),
                0.8,
                0.3,
            )
            .unwrap();
    }

    let snapshot = SnapshotBuilder::new("SOLUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::D))
        .score(90, 125)
        .confidence(0.5)
        .entropy(0.3)
        .decision(SignalDecision::Enter, "rejection entry")
        .build()
        .unwrap();

    let mut intent = happy_intent();
    intent.symbol = "SOLUSDT".to_string();

    let outcome = h.gatekeeper.send_signal(&snapshot, intent).await;
    assert!(matches!(outcome, SendOutcome::Sent { .. }), "{outcome:?}");

    let decisions = h.store.recent_decisions(30, Some("SOLUSDT")).unwrap();
    let portfolio_entry = decisions
        .iter()
        .find(|d| d.decision_source == "PortfolioBrain")
        .unwrap();
    assert!(portfolio_entry.allow_trading);
    assert!(portfolio_entry.reason.contains("below portfolio average"));
    assert_eq!(h.sink.messages().len(), 1);
}

/// The guardian denies everything when the machine is not RUNNING, before
/// any trace is collected.
#[tokio::test]
async fn test_guardian_blocks_outside_running() {
    let h = harness();
    h.machine
        .transition_to(RunState::Degraded, "test", "test", serde_json::json!({}));

    let outcome = h.gatekeeper.send_signal(&happy_snapshot(), happy_intent()).await;
    let SendOutcome::Blocked { stage, .. } = outcome else {
        panic!("expected Blocked, got {outcome:?}");
    };
    assert_eq!(stage, "SystemGuardian");
    assert!(h.store.recent_decisions(10, None).unwrap().is_empty());
}

/// Dedup: the same anchor state emits once.
#[tokio::test]
async fn test_duplicate_anchor_state_suppressed() {
    let h = harness();

    let first = h.gatekeeper.send_signal(&happy_snapshot(), happy_intent()).await;
    assert!(matches!(first, SendOutcome::Sent { .. }));

    let second = h.gatekeeper.send_signal(&happy_snapshot(), happy_intent()).await;
    assert_eq!(second, SendOutcome::Duplicate);
    assert_eq!(h.sink.messages().len(), 1);

    // A changed anchor state emits again (different state on M15).
    let changed = SnapshotBuilder::new("BTCUSDT")
        .anchor(Timeframe::M15)
        .state(Timeframe::M15, Some(MarketState::A))
        .score(90, 125)
        .confidence(0.7)
        .entropy(0.3)
        .decision(SignalDecision::Enter, "impulse entry")
        .build()
        .unwrap();
    let third = h.gatekeeper.send_signal(&changed, happy_intent()).await;
    assert!(matches!(third, SendOutcome::Sent { .. }), "{third:?}");

    assert_eq!(h.state.recent_signal_count(), 2);
}
