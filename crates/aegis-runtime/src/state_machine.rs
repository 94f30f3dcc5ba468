//! Explicit system state machine.
//!
//! Replaces boolean safe-mode flags with a guarded FSM:
//!
//! ```text
//! RUNNING    -> DEGRADED | SAFE_MODE | FATAL
//! DEGRADED   -> RUNNING  | SAFE_MODE | FATAL
//! SAFE_MODE  -> RECOVERING | FATAL
//! RECOVERING -> RUNNING  | SAFE_MODE | FATAL
//! FATAL      -> (terminal)
//! ```
//!
//! All transitions go through `transition_to` behind a single lock; the
//! watchdog thread communicates only through the bounded event queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use aegis_state::SystemStateHandle;

/// Bounded event queue capacity. Small on purpose: overflow is a signal,
/// not something to absorb by growing.
const EVENT_QUEUE_CAPACITY: usize = 10;

/// Consecutive queue drops that escalate to FATAL.
const MAX_CONSECUTIVE_DROPS: u32 = 5;

/// Transition records kept in the bounded ring.
const TRANSITION_RING_CAPACITY: usize = 256;

/// System run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Degraded,
    SafeMode,
    Recovering,
    Fatal,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Degraded => "DEGRADED",
            Self::SafeMode => "SAFE_MODE",
            Self::Recovering => "RECOVERING",
            Self::Fatal => "FATAL",
        }
    }

    /// Transition guard table.
    pub fn allows(&self, to: RunState) -> bool {
        use RunState::*;
        match self {
            Running => matches!(to, Degraded | SafeMode | Fatal),
            Degraded => matches!(to, Running | SafeMode | Fatal),
            SafeMode => matches!(to, Recovering | Fatal),
            Recovering => matches!(to, Running | SafeMode | Fatal),
            Fatal => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub incident_id: String,
    pub owner: String,
    pub metadata: serde_json::Value,
}

/// Events published to the FSM from out-of-band workers.
#[derive(Debug, Clone)]
pub enum FsmEvent {
    /// Main loop heartbeat went stale.
    LoopStall {
        elapsed: Duration,
        incident_id: String,
    },
}

/// Configuration for the state machine.
#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    /// Maximum time in SAFE_MODE before FATAL.
    pub safe_mode_ttl: Duration,
    /// Clean recovery cycles required per stage (SAFE_MODE -> RECOVERING,
    /// RECOVERING -> RUNNING).
    pub recovery_cycles_required: u32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            safe_mode_ttl: Duration::from_secs(600),
            recovery_cycles_required: 3,
        }
    }
}

/// Read-only summary for observers and command handlers.
#[derive(Debug, Clone, Serialize)]
pub struct StateInfo {
    pub state: RunState,
    pub seconds_in_state: f64,
    pub consecutive_errors: u32,
    pub recovery_cycles: u32,
    pub safe_mode_seconds: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub transitions_count: u64,
    pub last_transition: Option<StateTransition>,
    pub event_queue_drops: u64,
}

#[derive(Debug)]
struct MachineInner {
    state: RunState,
    state_entered_at: Instant,
    transitions: VecDeque<StateTransition>,
    transitions_total: u64,
    consecutive_errors: u32,
    recovery_cycles: u32,
    safe_mode_entered_at: Option<Instant>,
    last_heartbeat: Option<DateTime<Utc>>,
    event_queue_drops: u64,
    event_queue_consecutive_drops: u32,
}

/// The state machine. Single writer: every mutation happens inside
/// `transition_locked` under the one inner lock.
pub struct SystemStateMachine {
    inner: Mutex<MachineInner>,
    config: StateMachineConfig,
    event_tx: mpsc::Sender<FsmEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<FsmEvent>>>,
    shutdown_started: AtomicBool,
}

impl SystemStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            inner: Mutex::new(MachineInner {
                state: RunState::Running,
                state_entered_at: Instant::now(),
                transitions: VecDeque::with_capacity(TRANSITION_RING_CAPACITY),
                transitions_total: 0,
                consecutive_errors: 0,
                recovery_cycles: 0,
                safe_mode_entered_at: None,
                last_heartbeat: None,
                event_queue_drops: 0,
                event_queue_consecutive_drops: 0,
            }),
            config,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn is_safe_mode(&self) -> bool {
        self.state() == RunState::SafeMode
    }

    pub fn is_fatal(&self) -> bool {
        self.state() == RunState::Fatal
    }

    /// Derived flag: SAFE_MODE or FATAL always pause trading.
    pub fn trading_paused(&self) -> bool {
        matches!(self.state(), RunState::SafeMode | RunState::Fatal)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.inner.lock().consecutive_errors
    }

    pub fn recovery_cycles(&self) -> u32 {
        self.inner.lock().recovery_cycles
    }

    /// Attempt a transition. Returns false when denied (guard table,
    /// terminal FATAL, or shutdown already started).
    pub fn transition_to(
        &self,
        new_state: RunState,
        reason: &str,
        owner: &str,
        metadata: serde_json::Value,
    ) -> bool {
        if self.shutdown_started.load(Ordering::SeqCst) {
            warn!(
                to = %new_state,
                owner,
                "transition blocked: shutdown started"
            );
            return false;
        }

        let mut inner = self.inner.lock();
        Self::transition_locked(&mut inner, new_state, reason, owner, metadata)
    }

    fn transition_locked(
        inner: &mut MachineInner,
        new_state: RunState,
        reason: &str,
        owner: &str,
        metadata: serde_json::Value,
    ) -> bool {
        let old_state = inner.state;

        if !old_state.allows(new_state) {
            warn!(
                from = %old_state,
                to = %new_state,
                reason,
                owner,
                "state transition denied"
            );
            return false;
        }

        let incident_id = format!("state-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let seconds_in_old = inner.state_entered_at.elapsed().as_secs_f64();

        inner.state = new_state;
        inner.state_entered_at = Instant::now();

        match new_state {
            RunState::SafeMode => {
                inner.safe_mode_entered_at = Some(Instant::now());
                inner.recovery_cycles = 0;
            }
            RunState::Recovering => {
                inner.safe_mode_entered_at = None;
                inner.recovery_cycles = 0;
            }
            _ => {
                if old_state == RunState::SafeMode {
                    inner.safe_mode_entered_at = None;
                }
            }
        }

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            reason: reason.to_string(),
            timestamp: Utc::now(),
            incident_id: incident_id.clone(),
            owner: owner.to_string(),
            metadata,
        };

        if inner.transitions.len() >= TRANSITION_RING_CAPACITY {
            inner.transitions.pop_front();
        }
        inner.transitions.push_back(transition);
        inner.transitions_total += 1;

        error!(
            incident_id,
            from = %old_state,
            to = %new_state,
            reason,
            owner,
            seconds_in_old_state = seconds_in_old,
            "STATE_TRANSITION"
        );

        true
    }

    /// Record one failed cycle. Drives the error-threshold transitions:
    /// >= 5 consecutive errors -> SAFE_MODE, >= 3 while RUNNING -> DEGRADED.
    pub fn record_error(&self, error_msg: &str) {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock();
        inner.consecutive_errors += 1;
        let errors = inner.consecutive_errors;

        if errors >= 5 && inner.state != RunState::SafeMode {
            Self::transition_locked(
                &mut inner,
                RunState::SafeMode,
                &format!("consecutive_errors >= 5 (current: {errors})"),
                "error_handler",
                json!({ "error_count": errors, "last_error": error_msg }),
            );
        } else if errors >= 3 && inner.state == RunState::Running {
            Self::transition_locked(
                &mut inner,
                RunState::Degraded,
                &format!("consecutive_errors >= 3 (current: {errors})"),
                "error_handler",
                json!({ "error_count": errors, "last_error": error_msg }),
            );
        }
    }

    /// Record one clean cycle. DEGRADED returns to RUNNING once the error
    /// counter clears.
    pub fn reset_errors(&self) {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.consecutive_errors == 0 {
            return;
        }
        let old_errors = inner.consecutive_errors;
        inner.consecutive_errors = 0;

        if inner.state == RunState::Degraded {
            Self::transition_locked(
                &mut inner,
                RunState::Running,
                &format!("errors reset (was {old_errors})"),
                "recovery_mechanism",
                json!({}),
            );
        }
    }

    /// Record one recovery cycle while in SAFE_MODE or RECOVERING.
    /// Returns true when a stage transition happened.
    pub fn record_recovery_cycle(&self, success: bool) -> bool {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return false;
        }

        let mut inner = self.inner.lock();
        if !matches!(inner.state, RunState::SafeMode | RunState::Recovering) {
            return false;
        }

        if !success {
            if inner.recovery_cycles > 0 {
                warn!(
                    state = %inner.state,
                    recovery_cycles = inner.recovery_cycles,
                    "recovery cycle failed, resetting counter"
                );
                inner.recovery_cycles = 0;
            }
            return false;
        }

        inner.recovery_cycles += 1;
        let cycles = inner.recovery_cycles;
        let required = self.config.recovery_cycles_required;

        if inner.state == RunState::SafeMode && cycles >= required {
            return Self::transition_locked(
                &mut inner,
                RunState::Recovering,
                &format!("recovery_cycles >= {required} (current: {cycles})"),
                "recovery_mechanism",
                json!({ "recovery_cycles": cycles }),
            );
        }

        if inner.state == RunState::Recovering && cycles >= required {
            return Self::transition_locked(
                &mut inner,
                RunState::Running,
                &format!("recovery completed (cycles: {cycles})"),
                "recovery_mechanism",
                json!({ "recovery_cycles": cycles }),
            );
        }

        false
    }

    /// TTL check for SAFE_MODE. Expired TTL transitions to FATAL and
    /// returns true.
    pub fn check_safe_mode_ttl(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RunState::SafeMode {
            return false;
        }
        let Some(entered) = inner.safe_mode_entered_at else {
            return false;
        };

        let elapsed = entered.elapsed();
        if elapsed >= self.config.safe_mode_ttl {
            Self::transition_locked(
                &mut inner,
                RunState::Fatal,
                &format!(
                    "SAFE_MODE TTL expired (duration: {:.1}s, limit: {:.1}s)",
                    elapsed.as_secs_f64(),
                    self.config.safe_mode_ttl.as_secs_f64()
                ),
                "safe_mode_ttl_guard",
                json!({ "duration_s": elapsed.as_secs_f64() }),
            );
            return true;
        }
        false
    }

    /// Time spent in SAFE_MODE so far. Thread-safe read for the watchdog.
    pub fn safe_mode_elapsed(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != RunState::SafeMode {
            return None;
        }
        inner.safe_mode_entered_at.map(|t| t.elapsed())
    }

    pub fn safe_mode_ttl(&self) -> Duration {
        self.config.safe_mode_ttl
    }

    /// Publish a loop-stall event from a watchdog thread.
    ///
    /// Single-writer principle: the caller never mutates state. The event
    /// travels through the bounded queue; overflow is counted, and
    /// `MAX_CONSECUTIVE_DROPS` consecutive drops escalate to FATAL through
    /// the queue guard (delivery must not silently degrade).
    pub fn publish_loop_stall(&self, elapsed: Duration) -> bool {
        if self.shutdown_started.load(Ordering::SeqCst) {
            warn!("shutdown started, rejecting loop-stall event");
            return false;
        }
        if self.is_fatal() {
            return false;
        }

        let incident_id = format!("thread-watchdog-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let event = FsmEvent::LoopStall {
            elapsed,
            incident_id,
        };

        match self.event_tx.try_send(event) {
            Ok(()) => {
                self.inner.lock().event_queue_consecutive_drops = 0;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut inner = self.inner.lock();
                inner.event_queue_drops += 1;
                inner.event_queue_consecutive_drops += 1;
                let consecutive = inner.event_queue_consecutive_drops;
                error!(
                    drops = inner.event_queue_drops,
                    consecutive, "event queue full, LOOP_STALL event dropped"
                );

                if consecutive >= MAX_CONSECUTIVE_DROPS {
                    error!(
                        consecutive,
                        "EVENT_DELIVERY_FAILURE: escalating to FATAL"
                    );
                    Self::transition_locked(
                        &mut inner,
                        RunState::Fatal,
                        &format!("EVENT_DELIVERY_FAILURE: {consecutive} consecutive queue drops"),
                        "event_queue_guard",
                        json!({ "consecutive_drops": consecutive }),
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("event queue closed, cannot deliver LOOP_STALL");
                false
            }
        }
    }

    /// Take the event receiver for the pump task. Can only be taken once.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<FsmEvent>> {
        self.event_rx.lock().take()
    }

    /// Process one event on the scheduler. All watchdog-originated
    /// transitions happen here, serialized with everything else.
    pub fn handle_event(&self, event: FsmEvent, system_state: &SystemStateHandle) {
        match event {
            FsmEvent::LoopStall {
                elapsed,
                incident_id,
            } => {
                self.transition_to(
                    RunState::SafeMode,
                    &format!(
                        "LOOP_STALL detected by ThreadWatchdog (time_since_heartbeat: {:.1}s)",
                        elapsed.as_secs_f64()
                    ),
                    "ThreadWatchdog",
                    json!({
                        "time_since_heartbeat_s": elapsed.as_secs_f64(),
                        "incident_id": incident_id,
                    }),
                );
                self.sync_to_system_state(system_state);
            }
        }
    }

    /// Synchronize the derived flags into `SystemHealth`.
    ///
    /// This is the ONLY writer of `safe_mode` and `trading_paused`.
    /// Called after every transition.
    pub fn sync_to_system_state(&self, system_state: &SystemStateHandle) {
        let safe_mode = self.is_safe_mode();
        let trading_paused = self.trading_paused();
        system_state.sync_flags_from_state_machine(safe_mode, trading_paused);

        if safe_mode {
            let health = system_state.system_health();
            assert!(
                health.trading_paused,
                "INVARIANT VIOLATION: SAFE_MODE must imply trading_paused == true"
            );
        }
    }

    /// Disable all further transitions; called once at shutdown start.
    pub fn mark_shutdown_started(&self) {
        self.shutdown_started.store(true, Ordering::SeqCst);
        error!("state machine: shutdown started, all transitions disabled");
    }

    pub fn shutdown_started(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    pub fn update_heartbeat(&self) {
        self.inner.lock().last_heartbeat = Some(Utc::now());
    }

    pub fn recent_transitions(&self, limit: usize) -> Vec<StateTransition> {
        let inner = self.inner.lock();
        inner
            .transitions
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn state_info(&self) -> StateInfo {
        let inner = self.inner.lock();
        StateInfo {
            state: inner.state,
            seconds_in_state: inner.state_entered_at.elapsed().as_secs_f64(),
            consecutive_errors: inner.consecutive_errors,
            recovery_cycles: inner.recovery_cycles,
            safe_mode_seconds: inner.safe_mode_entered_at.map(|t| t.elapsed().as_secs_f64()),
            last_heartbeat: inner.last_heartbeat,
            transitions_count: inner.transitions_total,
            last_transition: inner.transitions.back().cloned(),
            event_queue_drops: inner.event_queue_drops,
        }
    }

    /// Async event pump. Runs on the scheduler; exits when the machine is
    /// shut down or the queue closes.
    pub async fn run_event_pump(
        &self,
        mut rx: mpsc::Receiver<FsmEvent>,
        system_state: SystemStateHandle,
    ) {
        while let Some(event) = rx.recv().await {
            if self.shutdown_started() {
                break;
            }
            self.handle_event(event, &system_state);
        }
    }
}

impl Default for SystemStateMachine {
    fn default() -> Self {
        Self::new(StateMachineConfig::default())
    }
}
