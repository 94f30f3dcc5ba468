//! Shared mutable system state.
//!
//! All cross-cutting runtime state lives behind one cheaply clonable
//! handle. The state is split into slices, each behind its own lock:
//! every brain updates its own slice, readers see a consistent view per
//! slice, and no global lock is needed.
//!
//! `SystemHealth.safe_mode` and `.trading_paused` are derived from the
//! state machine and are written only through its sync call, never
//! directly.

pub mod checkpoint;
pub mod health;
pub mod state;

pub use checkpoint::StateCheckpoint;
pub use health::{PerformanceMetrics, SystemHealth};
pub use state::{OpenPosition, PositionSide, RecentSignal, SystemStateHandle};
