//! Persistence: the relational store, the append-only signal log, and the
//! storage fault-injection hook.
//!
//! SQLite holds trades, the decision trace, and periodic system-state
//! checkpoints. Writes serialize behind one connection lock; the trace is
//! append-only and written strictly after decisions are made, so a storage
//! failure can never alter a decision.

pub mod error;
pub mod fault;
pub mod signal_log;
pub mod store;
pub mod trace;

pub use error::{PersistenceError, PersistenceResult};
pub use fault::storage_fault_injected;
pub use signal_log::{SignalLogEntry, SignalLogWriter};
pub use store::{SqliteStore, TradeRecord, TradeStatus, TradeStats};
pub use trace::{BlockLevel, DecisionRecord};
