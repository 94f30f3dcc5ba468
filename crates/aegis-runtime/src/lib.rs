//! Safety runtime: the explicit system state machine and the out-of-band
//! liveness workers.
//!
//! Invariants enforced here:
//! - FATAL implies the process exits within one reaper tick
//! - SAFE_MODE TTL expiry exits the process even if the scheduler is wedged
//! - the watchdog never mutates state, it only publishes events
//! - the state machine is single-writer (all transitions via `transition_to`)
//! - event-queue overflow escalates to FATAL (delivery must not silently
//!   degrade)
//! - no state transitions after shutdown start

pub mod error;
pub mod exit;
pub mod heartbeat;
pub mod notify;
pub mod reaper;
pub mod state_machine;
pub mod watchdog;

pub use error::{RuntimeError, RuntimeResult};
pub use exit::{ExitCode, Exiter, ProcessExiter};
pub use heartbeat::HeartbeatClock;
pub use notify::ServiceNotifier;
pub use reaper::FatalReaper;
pub use state_machine::{
    FsmEvent, RunState, StateInfo, StateMachineConfig, StateTransition, SystemStateMachine,
};
pub use watchdog::{ThreadWatchdog, WatchdogConfig, WorkerHandle};
