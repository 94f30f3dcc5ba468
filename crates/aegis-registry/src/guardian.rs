//! SystemGuardian: the hard gate in front of trading.
//!
//! Every signal must pass `can_trade` before anything else runs. The check
//! is fail-closed at every step: a missing module, a timed-out health
//! check, a broken invariant, or an unreachable scheduler all deny
//! trading.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{error, warn};

use aegis_runtime::{RunState, SystemStateMachine};
use aegis_state::SystemStateHandle;

use crate::registry::{ModuleCriticality, ModuleHealth, ModuleRegistry};

/// Timeout for the whole synchronous gate check.
const SYNC_GATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity of an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationSeverity {
    Critical,
    Warning,
}

/// One invariant violation.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub invariant_id: &'static str,
    pub severity: ViolationSeverity,
    pub message: String,
    pub module: Option<String>,
}

/// The guardian's verdict.
#[derive(Debug, Clone)]
pub struct TradingPermission {
    pub allowed: bool,
    pub reason: String,
    pub blocked_by: Option<String>,
    pub violations: Vec<InvariantViolation>,
}

impl TradingPermission {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: "All checks passed".to_string(),
            blocked_by: None,
            violations: Vec::new(),
        }
    }

    pub fn deny(
        reason: impl Into<String>,
        blocked_by: impl Into<String>,
        violations: Vec<InvariantViolation>,
    ) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            blocked_by: Some(blocked_by.into()),
            violations,
        }
    }

    /// Fail-safe denial used whenever the check itself cannot run.
    pub fn fail_safe() -> Self {
        Self::deny(
            "SystemGuardian error - fail-safe block",
            "SystemGuardian",
            Vec::new(),
        )
    }
}

/// The global trading gate.
pub struct SystemGuardian {
    registry: Arc<ModuleRegistry>,
    machine: Arc<SystemStateMachine>,
    state: SystemStateHandle,
    /// Scheduler handle for the synchronous adapter. Installed once at
    /// startup; absent handle means sync callers get the fail-safe denial.
    runtime_handle: Mutex<Option<Handle>>,
}

impl SystemGuardian {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        machine: Arc<SystemStateMachine>,
        state: SystemStateHandle,
    ) -> Self {
        Self {
            registry,
            machine,
            state,
            runtime_handle: Mutex::new(None),
        }
    }

    /// Install the scheduler handle for `can_trade_blocking`. Called once
    /// from the composition root.
    pub fn install_runtime_handle(&self, handle: Handle) {
        *self.runtime_handle.lock() = Some(handle);
    }

    /// The global gate, async form.
    ///
    /// Checks in order: FSM is RUNNING, no CRITICAL invariant violations,
    /// every CRITICAL module healthy and valid within its timeout.
    pub async fn can_trade(&self) -> TradingPermission {
        // 1. System state.
        let current_state = self.machine.state();
        if current_state != RunState::Running {
            return TradingPermission::deny(
                format!(
                    "System state is {current_state}, trading only allowed in RUNNING state"
                ),
                "SystemStateMachine",
                Vec::new(),
            );
        }

        // 2. Invariants.
        let violations = self.check_all_invariants().await;
        let critical: Vec<InvariantViolation> = violations
            .into_iter()
            .filter(|v| v.severity == ViolationSeverity::Critical)
            .collect();
        if !critical.is_empty() {
            return TradingPermission::deny(
                format!("Critical invariant violations detected: {}", critical.len()),
                "InvariantEnforcer",
                critical,
            );
        }

        // 3. CRITICAL module health.
        let mut health_violations = Vec::new();
        for entry in self.registry.critical_modules() {
            let health = self.check_module_health(&entry.name).await;
            if !health.is_ok() {
                health_violations.push(InvariantViolation {
                    invariant_id: "INV-1",
                    severity: ViolationSeverity::Critical,
                    message: format!(
                        "CRITICAL module {} unavailable or invalid: {}",
                        entry.name,
                        health.error.as_deref().unwrap_or("unknown")
                    ),
                    module: Some(entry.name.clone()),
                });
            }
        }
        if !health_violations.is_empty() {
            return TradingPermission::deny(
                format!(
                    "CRITICAL modules unavailable or invalid: {}",
                    health_violations.len()
                ),
                "ModuleHealthMonitor",
                health_violations,
            );
        }

        TradingPermission::allow()
    }

    /// The global gate, synchronous form.
    ///
    /// The only way to check trading permission from synchronous context.
    /// Work is posted onto the installed scheduler handle with a timeout;
    /// no scheduler handle (or any failure to complete) yields the
    /// fail-safe denial. Never spins up a nested runtime.
    pub fn can_trade_blocking(self: &Arc<Self>) -> TradingPermission {
        let Some(handle) = self.runtime_handle.lock().clone() else {
            error!("no scheduler handle installed, returning fail-safe denial");
            return TradingPermission::fail_safe();
        };

        let guardian = self.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        handle.spawn(async move {
            let permission = guardian.can_trade().await;
            let _ = tx.send(permission);
        });

        match rx.recv_timeout(SYNC_GATE_TIMEOUT) {
            Ok(permission) => permission,
            Err(e) => {
                error!(?e, "synchronous gate check did not complete, fail-safe denial");
                TradingPermission::fail_safe()
            }
        }
    }

    /// Check every registered invariant.
    pub async fn check_all_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        // INV-1: CRITICAL module availability.
        for entry in self.registry.critical_modules() {
            // Presence in the registry carries the instance, so only the
            // name list can go stale; re-read defensively.
            if self.registry.get(&entry.name).is_none() {
                violations.push(InvariantViolation {
                    invariant_id: "INV-1",
                    severity: ViolationSeverity::Critical,
                    message: format!("CRITICAL module {} not registered", entry.name),
                    module: Some(entry.name.clone()),
                });
            }
        }

        // INV-2: DecisionCore authority.
        if self.registry.get("DecisionCore").is_none() {
            violations.push(InvariantViolation {
                invariant_id: "INV-2",
                severity: ViolationSeverity::Critical,
                message: "DecisionCore not registered".to_string(),
                module: Some("DecisionCore".to_string()),
            });
        }

        // INV-4: state machine consistency. SAFE_MODE or FATAL must imply
        // trading_paused in the shared health slice.
        let state = self.machine.state();
        if matches!(state, RunState::SafeMode | RunState::Fatal) {
            let health = self.state.system_health();
            if !health.trading_paused {
                violations.push(InvariantViolation {
                    invariant_id: "INV-4",
                    severity: ViolationSeverity::Critical,
                    message: format!(
                        "State {state} requires trading_paused=true, but it is false"
                    ),
                    module: None,
                });
            }
        }

        // INV-5: data validity of CRITICAL modules, bounded by their
        // declared timeouts.
        for entry in self.registry.critical_modules() {
            let check = tokio::time::timeout(entry.timeout, entry.instance.validate_data()).await;
            match check {
                Ok(true) => {}
                Ok(false) => violations.push(InvariantViolation {
                    invariant_id: "INV-5",
                    severity: ViolationSeverity::Critical,
                    message: format!("CRITICAL module {} has invalid data", entry.name),
                    module: Some(entry.name.clone()),
                }),
                Err(_) => violations.push(InvariantViolation {
                    invariant_id: "INV-5",
                    severity: ViolationSeverity::Critical,
                    message: format!("CRITICAL module {} data validation timeout", entry.name),
                    module: Some(entry.name.clone()),
                }),
            }
        }

        violations
    }

    /// Check one module's health within its declared timeout.
    pub async fn check_module_health(&self, name: &str) -> ModuleHealth {
        let Some(entry) = self.registry.get(name) else {
            return ModuleHealth::unavailable("Module not registered");
        };

        let available =
            match tokio::time::timeout(entry.timeout, entry.instance.health_check()).await {
                Ok(ok) => ok,
                Err(_) => {
                    warn!(module = name, "module health check timeout");
                    false
                }
            };

        let valid = if available {
            match tokio::time::timeout(entry.timeout, entry.instance.validate_data()).await {
                Ok(ok) => ok,
                Err(_) => false,
            }
        } else {
            false
        };

        ModuleHealth {
            available,
            valid,
            last_heartbeat: entry.instance.last_heartbeat(),
            error: if available && valid {
                None
            } else {
                Some("Module unavailable or invalid".to_string())
            },
        }
    }

    /// Escalate critical violations to SAFE_MODE.
    pub fn handle_violations(&self, violations: &[InvariantViolation]) {
        let critical: Vec<&InvariantViolation> = violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Critical)
            .collect();

        if critical.is_empty() {
            for v in violations {
                warn!(invariant = v.invariant_id, message = %v.message, "invariant warning");
            }
            return;
        }

        for v in &critical {
            error!(
                invariant = v.invariant_id,
                module = v.module.as_deref().unwrap_or("-"),
                message = %v.message,
                "INVARIANT VIOLATION"
            );
        }

        self.machine.transition_to(
            RunState::SafeMode,
            &format!("CRITICAL invariant violations: {}", critical.len()),
            "SystemGuardian",
            json!({ "violations_count": critical.len() }),
        );
        self.machine.sync_to_system_state(&self.state);
    }
}

/// Fail-safe policy application on module failures.
pub struct PolicyEnforcer {
    registry: Arc<ModuleRegistry>,
    machine: Arc<SystemStateMachine>,
    state: SystemStateHandle,
}

impl PolicyEnforcer {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        machine: Arc<SystemStateMachine>,
        state: SystemStateHandle,
    ) -> Self {
        Self {
            registry,
            machine,
            state,
        }
    }

    /// Apply the fail-safe policy for one failed module. Returns true when
    /// trading got blocked (SAFE_MODE entered).
    pub fn apply_module_failure(&self, module_name: &str, failure_type: &str) -> bool {
        let Some(entry) = self.registry.get(module_name) else {
            error!(module = module_name, "failed module not found in registry");
            return false;
        };

        match entry.criticality {
            ModuleCriticality::Critical => {
                error!(
                    module = module_name,
                    failure_type, "CRITICAL module failure, entering SAFE_MODE"
                );
                let transitioned = self.machine.transition_to(
                    RunState::SafeMode,
                    &format!("CRITICAL module {module_name} failure: {failure_type}"),
                    "PolicyEnforcer",
                    json!({ "module": module_name, "failure_type": failure_type }),
                );
                if transitioned {
                    self.machine.sync_to_system_state(&self.state);
                }
                transitioned
            }
            ModuleCriticality::NonCritical => {
                if self.machine.state() == RunState::Running {
                    warn!(
                        module = module_name,
                        failure_type, "NON_CRITICAL module failure, degrading"
                    );
                    self.machine.transition_to(
                        RunState::Degraded,
                        &format!("NON_CRITICAL module {module_name} failure: {failure_type}"),
                        "PolicyEnforcer",
                        json!({ "module": module_name, "failure_type": failure_type }),
                    );
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Module;
    use async_trait::async_trait;

    struct HealthyModule;

    #[async_trait]
    impl Module for HealthyModule {}

    struct BrokenModule;

    #[async_trait]
    impl Module for BrokenModule {
        async fn health_check(&self) -> bool {
            false
        }
    }

    struct SlowModule;

    #[async_trait]
    impl Module for SlowModule {
        async fn health_check(&self) -> bool {
            tokio::time::sleep(Duration::from_secs(30)).await;
            true
        }
    }

    fn setup(register_core: bool) -> (Arc<ModuleRegistry>, Arc<SystemStateMachine>, SystemStateHandle) {
        let registry = Arc::new(ModuleRegistry::new());
        if register_core {
            registry.register(
                "DecisionCore",
                ModuleCriticality::Critical,
                Arc::new(HealthyModule),
                Duration::from_secs(1),
                "decision synthesis",
            );
        }
        let machine = Arc::new(SystemStateMachine::default());
        let state = SystemStateHandle::new();
        (registry, machine, state)
    }

    #[tokio::test]
    async fn test_allows_when_healthy() {
        let (registry, machine, state) = setup(true);
        let guardian = SystemGuardian::new(registry, machine, state);
        let permission = guardian.can_trade().await;
        assert!(permission.allowed, "reason: {}", permission.reason);
    }

    #[tokio::test]
    async fn test_denies_when_not_running() {
        let (registry, machine, state) = setup(true);
        machine.transition_to(RunState::Degraded, "test", "test", json!({}));
        let guardian = SystemGuardian::new(registry, machine, state);

        let permission = guardian.can_trade().await;
        assert!(!permission.allowed);
        assert_eq!(permission.blocked_by.as_deref(), Some("SystemStateMachine"));
    }

    #[tokio::test]
    async fn test_denies_when_decision_core_missing() {
        let (registry, machine, state) = setup(false);
        let guardian = SystemGuardian::new(registry, machine, state);

        let permission = guardian.can_trade().await;
        assert!(!permission.allowed);
        assert!(permission
            .violations
            .iter()
            .any(|v| v.invariant_id == "INV-2"));
    }

    #[tokio::test]
    async fn test_denies_on_broken_critical_module() {
        let (registry, machine, state) = setup(true);
        registry.register(
            "Gatekeeper",
            ModuleCriticality::Critical,
            Arc::new(BrokenModule),
            Duration::from_secs(1),
            "signal egress",
        );
        let guardian = SystemGuardian::new(registry, machine, state);

        let permission = guardian.can_trade().await;
        assert!(!permission.allowed);
        assert_eq!(permission.blocked_by.as_deref(), Some("ModuleHealthMonitor"));
    }

    #[tokio::test]
    async fn test_health_check_timeout_is_unhealthy() {
        let (registry, machine, state) = setup(true);
        registry.register(
            "SlowBrain",
            ModuleCriticality::NonCritical,
            Arc::new(SlowModule),
            Duration::from_millis(50),
            "slow module",
        );
        let guardian = SystemGuardian::new(registry, machine, state);

        let health = guardian.check_module_health("SlowBrain").await;
        assert!(!health.available);
    }

    #[tokio::test]
    async fn test_blocking_adapter_without_handle_is_fail_safe() {
        let (registry, machine, state) = setup(true);
        let guardian = Arc::new(SystemGuardian::new(registry, machine, state));

        // No runtime handle installed: never silently succeeds.
        let permission = guardian.can_trade_blocking();
        assert!(!permission.allowed);
        assert_eq!(permission.blocked_by.as_deref(), Some("SystemGuardian"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_adapter_with_handle() {
        let (registry, machine, state) = setup(true);
        let guardian = Arc::new(SystemGuardian::new(registry, machine, state));
        guardian.install_runtime_handle(Handle::current());

        let g = guardian.clone();
        let permission = tokio::task::spawn_blocking(move || g.can_trade_blocking())
            .await
            .unwrap();
        assert!(permission.allowed, "reason: {}", permission.reason);
    }

    #[test]
    fn test_policy_enforcer_critical_failure() {
        let (registry, machine, state) = setup(true);
        let enforcer = PolicyEnforcer::new(registry, machine.clone(), state.clone());

        assert!(enforcer.apply_module_failure("DecisionCore", "unavailable"));
        assert_eq!(machine.state(), RunState::SafeMode);
        assert!(state.system_health().trading_paused);
    }

    #[test]
    fn test_policy_enforcer_non_critical_failure() {
        let (registry, machine, state) = setup(true);
        registry.register(
            "PortfolioBrain",
            ModuleCriticality::NonCritical,
            Arc::new(HealthyModule),
            Duration::from_secs(1),
            "portfolio analysis",
        );
        let enforcer = PolicyEnforcer::new(registry, machine.clone(), state);

        assert!(!enforcer.apply_module_failure("PortfolioBrain", "timeout"));
        assert_eq!(machine.state(), RunState::Degraded);
    }
}
