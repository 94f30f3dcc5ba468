//! Out-of-band liveness watchdog.
//!
//! Runs on an OS thread so a wedged scheduler cannot silence it. It never
//! mutates FSM state: a stalled heartbeat only publishes a LOOP_STALL event
//! to the bounded queue. The one exception to "events only" is the
//! SAFE_MODE TTL: past the TTL the watchdog force-exits the process with
//! code 10 without relying on the main loop being alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::exit::{ExitCode, Exiter};
use crate::heartbeat::HeartbeatClock;
use crate::state_machine::SystemStateMachine;

/// Watchdog timing configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the watchdog wakes up.
    pub check_interval: Duration,
    /// Heartbeat gap considered a stall (typically 3x the heartbeat
    /// interval).
    pub stall_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(90),
        }
    }
}

/// Handle to a background worker thread.
pub struct WorkerHandle {
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// The liveness watchdog.
pub struct ThreadWatchdog {
    machine: Arc<SystemStateMachine>,
    clock: HeartbeatClock,
    config: WatchdogConfig,
    exiter: Arc<dyn Exiter>,
}

impl ThreadWatchdog {
    pub fn new(
        machine: Arc<SystemStateMachine>,
        clock: HeartbeatClock,
        config: WatchdogConfig,
        exiter: Arc<dyn Exiter>,
    ) -> Self {
        Self {
            machine,
            clock,
            config,
            exiter,
        }
    }

    /// Spawn the watchdog thread.
    pub fn spawn(self) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let join = std::thread::Builder::new()
            .name("aegis-watchdog".to_string())
            .spawn(move || self.run(stop_flag))
            .expect("failed to spawn watchdog thread");

        WorkerHandle {
            stop,
            join: Some(join),
        }
    }

    fn run(self, stop: Arc<AtomicBool>) {
        info!(
            stall_threshold_s = self.config.stall_threshold.as_secs_f64(),
            "watchdog started"
        );
        // Idempotent trigger: once fired, re-arming requires a fresh
        // heartbeat below the threshold.
        let mut triggered = false;

        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(self.config.check_interval);
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let gap = self.clock.elapsed();
            if gap > self.config.stall_threshold {
                if !triggered {
                    warn!(
                        gap_s = gap.as_secs_f64(),
                        threshold_s = self.config.stall_threshold.as_secs_f64(),
                        "loop stall detected, publishing event"
                    );
                    self.machine.publish_loop_stall(gap);
                    triggered = true;
                }
            } else {
                triggered = false;
            }

            // SAFE_MODE TTL: the main loop may be the thing that is stuck,
            // so enforcement cannot depend on it.
            if let Some(elapsed) = self.machine.safe_mode_elapsed() {
                if elapsed >= self.machine.safe_mode_ttl() {
                    error!(
                        elapsed_s = elapsed.as_secs_f64(),
                        ttl_s = self.machine.safe_mode_ttl().as_secs_f64(),
                        "SAFE_MODE TTL exceeded, force-exiting process"
                    );
                    self.exiter.exit(ExitCode::Critical);
                    return;
                }
            }
        }

        info!("watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{RunState, StateMachineConfig};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingExiter {
        calls: Mutex<Vec<ExitCode>>,
    }

    impl Exiter for RecordingExiter {
        fn exit(&self, code: ExitCode) {
            self.calls.lock().push(code);
        }
    }

    fn fast_config() -> WatchdogConfig {
        WatchdogConfig {
            check_interval: Duration::from_millis(10),
            stall_threshold: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_stall_publishes_event_once() {
        let machine = Arc::new(SystemStateMachine::default());
        let clock = HeartbeatClock::new();
        let exiter = Arc::new(RecordingExiter::default());

        let handle = ThreadWatchdog::new(machine.clone(), clock.clone(), fast_config(), exiter)
            .spawn();

        // Do not beat: the heartbeat goes stale.
        std::thread::sleep(Duration::from_millis(200));
        handle.stop();

        // Exactly one event in the queue: the trigger is idempotent.
        let mut rx = machine.take_event_receiver().unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fresh_heartbeat_rearms() {
        let machine = Arc::new(SystemStateMachine::default());
        let clock = HeartbeatClock::new();
        let exiter = Arc::new(RecordingExiter::default());

        let handle = ThreadWatchdog::new(machine.clone(), clock.clone(), fast_config(), exiter)
            .spawn();

        std::thread::sleep(Duration::from_millis(120));
        // Fresh heartbeat re-arms the trigger.
        clock.beat();
        std::thread::sleep(Duration::from_millis(120));
        handle.stop();

        let mut rx = machine.take_event_receiver().unwrap();
        // Two distinct stall episodes -> two events.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_safe_mode_ttl_forces_exit() {
        let machine = Arc::new(SystemStateMachine::new(StateMachineConfig {
            safe_mode_ttl: Duration::from_millis(20),
            ..Default::default()
        }));
        assert!(machine.transition_to(RunState::SafeMode, "test", "test", json!({})));

        let clock = HeartbeatClock::new();
        let exiter = Arc::new(RecordingExiter::default());
        let handle = ThreadWatchdog::new(
            machine.clone(),
            clock.clone(),
            fast_config(),
            exiter.clone(),
        )
        .spawn();

        std::thread::sleep(Duration::from_millis(150));
        handle.stop();

        let calls = exiter.calls.lock();
        assert!(calls.contains(&ExitCode::Critical));
    }

    #[test]
    fn test_watchdog_never_transitions_directly() {
        let machine = Arc::new(SystemStateMachine::default());
        let clock = HeartbeatClock::new();
        let exiter = Arc::new(RecordingExiter::default());

        let handle =
            ThreadWatchdog::new(machine.clone(), clock, fast_config(), exiter).spawn();
        std::thread::sleep(Duration::from_millis(200));
        handle.stop();

        // The event was only enqueued; without the pump the FSM state is
        // untouched.
        assert_eq!(machine.state(), RunState::Running);
    }
}
