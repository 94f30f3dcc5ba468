//! Shared heartbeat clock between the main loop and the watchdog thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic heartbeat timestamp. The main loop beats it once per cycle;
/// the watchdog thread reads the gap.
#[derive(Debug, Clone)]
pub struct HeartbeatClock {
    last: Arc<Mutex<Instant>>,
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl HeartbeatClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last.lock().elapsed()
    }
}
