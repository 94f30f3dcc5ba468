//! Fatal reaper: the last line of defense.
//!
//! A task may decide on FATAL while the cooperative scheduler is wedged
//! and unable to run the exit path. The reaper polls the FSM from its own
//! OS thread and exits the process the moment it observes FATAL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::exit::{ExitCode, Exiter};
use crate::state_machine::SystemStateMachine;
use crate::watchdog::WorkerHandle;

/// Poll interval. FATAL must turn into a process exit within one tick.
const REAPER_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct FatalReaper {
    machine: Arc<SystemStateMachine>,
    exiter: Arc<dyn Exiter>,
    poll_interval: Duration,
}

impl FatalReaper {
    pub fn new(machine: Arc<SystemStateMachine>, exiter: Arc<dyn Exiter>) -> Self {
        Self {
            machine,
            exiter,
            poll_interval: REAPER_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let join = std::thread::Builder::new()
            .name("aegis-reaper".to_string())
            .spawn(move || self.run(stop_flag))
            .expect("failed to spawn reaper thread");

        WorkerHandle {
            stop,
            join: Some(join),
        }
    }

    fn run(self, stop: Arc<AtomicBool>) {
        info!("fatal reaper started");
        while !stop.load(Ordering::SeqCst) {
            if self.machine.is_fatal() {
                error!("FATAL state observed, exiting process");
                self.exiter.exit(ExitCode::Critical);
                return;
            }
            std::thread::sleep(self.poll_interval);
        }
        info!("fatal reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::RunState;
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

    #[test]
    fn test_reaper_exits_on_fatal() {
        let machine = Arc::new(SystemStateMachine::default());
        let exiter = Arc::new(RecordingExiter::default());

        let handle = FatalReaper::new(machine.clone(), exiter.clone())
            .with_poll_interval(Duration::from_millis(10))
            .spawn();

        assert!(machine.transition_to(RunState::Fatal, "test", "test", json!({})));
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();

        assert_eq!(exiter.calls.lock().as_slice(), &[ExitCode::Critical]);
    }

    #[test]
    fn test_reaper_idle_without_fatal() {
        let machine = Arc::new(SystemStateMachine::default());
        let exiter = Arc::new(RecordingExiter::default());

        let handle = FatalReaper::new(machine, exiter.clone())
            .with_poll_interval(Duration::from_millis(10))
            .spawn();
        std::thread::sleep(Duration::from_millis(60));
        handle.stop();

        assert!(exiter.calls.lock().is_empty());
    }
}
