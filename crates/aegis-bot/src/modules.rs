//! Registry adapters for the decision-flow components.
//!
//! The registry needs a `Module` view of each component; most are passive
//! and healthy by construction, the state machine reports its own
//! consistency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use aegis_registry::{Module, ModuleCriticality, ModuleRegistry};
use aegis_runtime::SystemStateMachine;

/// Passive component: registered for availability tracking only.
pub struct PassiveModule;

#[async_trait]
impl Module for PassiveModule {}

/// State machine module: data is valid while the machine is not FATAL.
pub struct StateMachineModule {
    machine: Arc<SystemStateMachine>,
}

impl StateMachineModule {
    pub fn new(machine: Arc<SystemStateMachine>) -> Self {
        Self { machine }
    }
}

#[async_trait]
impl Module for StateMachineModule {
    async fn validate_data(&self) -> bool {
        !self.machine.is_fatal()
    }
}

/// Register the standard module set with its criticality classification.
pub fn register_standard_modules(registry: &ModuleRegistry, machine: Arc<SystemStateMachine>) {
    let critical: &[&str] = &["DecisionCore", "RiskExposureBrain", "Gatekeeper"];
    for name in critical {
        registry.register(
            name,
            ModuleCriticality::Critical,
            Arc::new(PassiveModule),
            Duration::from_secs(5),
            "critical decision-flow module",
        );
    }

    registry.register(
        "SystemStateMachine",
        ModuleCriticality::Critical,
        Arc::new(StateMachineModule::new(machine)),
        Duration::from_millis(100),
        "system run-state management",
    );

    let non_critical: &[&str] = &[
        "MetaDecisionBrain",
        "MarketRegimeBrain",
        "CognitiveFilter",
        "OpportunityAwareness",
        "PortfolioBrain",
        "PositionSizer",
    ];
    for name in non_critical {
        registry.register(
            name,
            ModuleCriticality::NonCritical,
            Arc::new(PassiveModule),
            Duration::from_secs(3),
            "decision-flow module, graceful degradation",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_runtime::RunState;
    use serde_json::json;

    #[test]
    fn test_standard_registration() {
        let registry = ModuleRegistry::new();
        let machine = Arc::new(SystemStateMachine::default());
        register_standard_modules(&registry, machine);

        assert_eq!(registry.critical_modules().len(), 4);
        assert!(registry.is_critical("Gatekeeper"));
        assert!(!registry.is_critical("PortfolioBrain"));
    }

    #[tokio::test]
    async fn test_state_machine_module_invalid_when_fatal() {
        let machine = Arc::new(SystemStateMachine::default());
        let module = StateMachineModule::new(machine.clone());
        assert!(module.validate_data().await);

        machine.transition_to(RunState::Fatal, "test", "test", json!({}));
        assert!(!module.validate_data().await);
    }
}
