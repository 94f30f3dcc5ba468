//! Module registry and the global trading gate.
//!
//! `ModuleRegistry` classifies every decision-flow module by criticality
//! and owns its health-check timeout. `SystemGuardian` is the absolute
//! barrier in front of trading: FSM state, invariants, and CRITICAL module
//! health are all checked, and any failure or internal error denies
//! trading (fail-closed).

pub mod error;
pub mod guardian;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use guardian::{
    InvariantViolation, PolicyEnforcer, SystemGuardian, TradingPermission, ViolationSeverity,
};
pub use registry::{Module, ModuleCriticality, ModuleEntry, ModuleHealth, ModuleRegistry};
