//! Gatekeeper: the single egress between signals and the user.
//!
//! Every candidate signal passes the ordered validator chain —
//! SystemGuardian, RiskCore, MetaDecisionBrain, DecisionCore,
//! PortfolioBrain, PositionSizer — and any veto short-circuits. Each stage
//! is recorded into the decision trace strictly after the verdict, so a
//! storage failure can never change a decision. At most one external
//! message is emitted per call, and the paper trade opens only after the
//! message went out.

pub mod error;
pub mod gatekeeper;
pub mod intent;
pub mod message;
pub mod paper;
pub mod sink;

pub use error::{GatekeeperError, GatekeeperResult};
pub use gatekeeper::{Gatekeeper, GatekeeperConfig, GatekeeperStats, SendOutcome};
pub use intent::SignalIntent;
pub use paper::{ClosedTrade, PaperLedger};
pub use sink::{NullSink, SignalSink, SinkError};
