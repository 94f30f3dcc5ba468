//! Liveness scenarios across the watchdog, the event queue, and the FSM.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use aegis_runtime::{
    ExitCode, Exiter, FatalReaper, HeartbeatClock, RunState, StateMachineConfig,
    SystemStateMachine, ThreadWatchdog, WatchdogConfig,
};
use aegis_state::SystemStateHandle;

#[derive(Default)]
struct RecordingExiter {
    calls: Mutex<Vec<ExitCode>>,
}

impl Exiter for RecordingExiter {
    fn exit(&self, code: ExitCode) {
        self.calls.lock().push(code);
    }
}

/// Heartbeat not updated for 3x the interval: the watchdog enqueues a
/// LOOP_STALL, the pump drives the FSM to SAFE_MODE with the watchdog as
/// owner, and the derived trading_paused flag follows.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loop_stall_end_to_end() {
    let machine = Arc::new(SystemStateMachine::default());
    let state = SystemStateHandle::new();
    let clock = HeartbeatClock::new();
    let exiter = Arc::new(RecordingExiter::default());

    let rx = machine.take_event_receiver().unwrap();
    let pump_machine = machine.clone();
    let pump_state = state.clone();
    let pump = tokio::spawn(async move {
        pump_machine.run_event_pump(rx, pump_state).await;
    });

    let watchdog = ThreadWatchdog::new(
        machine.clone(),
        clock.clone(),
        WatchdogConfig {
            check_interval: Duration::from_millis(10),
            stall_threshold: Duration::from_millis(60),
        },
        exiter.clone(),
    )
    .spawn();

    // Never beat the clock: the stall fires.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(machine.state(), RunState::SafeMode);
    let health = state.system_health();
    assert!(health.safe_mode);
    assert!(health.trading_paused);

    let last = machine.recent_transitions(1).pop().unwrap();
    assert_eq!(last.owner, "ThreadWatchdog");
    assert!(last.reason.contains("LOOP_STALL"));

    // The stall alone did not kill the process.
    assert!(exiter.calls.lock().is_empty());

    watchdog.stop();
    pump.abort();
}

/// SAFE_MODE past its TTL is FATAL, and the reaper turns FATAL into a
/// process exit with code 10 within one tick.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_safe_mode_ttl_reaches_fatal_and_reaper_fires() {
    let machine = Arc::new(SystemStateMachine::new(StateMachineConfig {
        safe_mode_ttl: Duration::from_millis(30),
        ..Default::default()
    }));
    let exiter = Arc::new(RecordingExiter::default());

    let reaper = FatalReaper::new(machine.clone(), exiter.clone()).spawn();

    assert!(machine.transition_to(RunState::SafeMode, "test", "test", json!({})));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(machine.check_safe_mode_ttl());
    assert!(machine.is_fatal());

    // The reaper polls at 500ms; give it one tick.
    tokio::time::sleep(Duration::from_millis(700)).await;
    reaper.stop();

    assert_eq!(exiter.calls.lock().as_slice(), &[ExitCode::Critical]);
}

/// After shutdown start the watchdog's events are rejected and nothing
/// transitions.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_transitions_after_shutdown() {
    let machine = Arc::new(SystemStateMachine::default());
    let state = SystemStateHandle::new();

    machine.mark_shutdown_started();
    assert!(!machine.publish_loop_stall(Duration::from_secs(120)));
    assert!(!machine.transition_to(RunState::SafeMode, "late", "test", json!({})));
    assert_eq!(machine.state(), RunState::Running);

    machine.sync_to_system_state(&state);
    assert!(!state.system_health().trading_paused);
}
