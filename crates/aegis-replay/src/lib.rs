//! Offline analysis tools: the replay engine and the drift detector.
//!
//! Both consume recorded snapshots only. Neither trades, touches the live
//! system state, or writes production logs: they exist to detect logic
//! drift between releases and behavior drift over time.

pub mod drift;
pub mod error;
pub mod replay;
pub mod report;

pub use drift::{DriftDetector, DriftSeverity, DriftState, MetricDrift, SnapshotStat};
pub use error::{ReplayError, ReplayResult};
pub use replay::ReplayEngine;
pub use report::ReplayReport;
