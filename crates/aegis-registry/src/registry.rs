//! Registry of decision-flow modules with criticality classification.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

/// Module criticality.
///
/// CRITICAL unavailability halts trading (SAFE_MODE); NON_CRITICAL
/// unavailability degrades gracefully (DEGRADED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleCriticality {
    Critical,
    NonCritical,
}

impl ModuleCriticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::NonCritical => "NON_CRITICAL",
        }
    }
}

/// Health of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleHealth {
    pub available: bool,
    pub valid: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ModuleHealth {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            valid: false,
            last_heartbeat: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.available && self.valid
    }
}

/// Behavior a registered module may expose to the guardian.
///
/// Both checks default to healthy so passive modules need no
/// implementation; modules with real dependencies override them.
#[async_trait]
pub trait Module: Send + Sync {
    /// Responds within the registered timeout when the module is alive.
    async fn health_check(&self) -> bool {
        true
    }

    /// Validates the module's own data is usable.
    async fn validate_data(&self) -> bool {
        true
    }

    /// Last time this module made progress, when tracked.
    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A registered module.
#[derive(Clone)]
pub struct ModuleEntry {
    pub name: String,
    pub criticality: ModuleCriticality,
    pub timeout: Duration,
    pub description: String,
    pub instance: Arc<dyn Module>,
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("criticality", &self.criticality)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registry of all decision-flow modules.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<BTreeMap<String, ModuleEntry>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: &str,
        criticality: ModuleCriticality,
        instance: Arc<dyn Module>,
        timeout: Duration,
        description: &str,
    ) {
        let mut modules = self.modules.write();
        if modules.contains_key(name) {
            warn!(module = name, "module already registered, overwriting");
        }

        modules.insert(
            name.to_string(),
            ModuleEntry {
                name: name.to_string(),
                criticality,
                timeout,
                description: description.to_string(),
                instance,
                registered_at: Utc::now(),
            },
        );

        info!(
            module = name,
            criticality = criticality.as_str(),
            timeout_s = timeout.as_secs_f64(),
            "module registered"
        );
    }

    pub fn get(&self, name: &str) -> Option<ModuleEntry> {
        self.modules.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    pub fn critical_modules(&self) -> Vec<ModuleEntry> {
        self.modules
            .read()
            .values()
            .filter(|m| m.criticality == ModuleCriticality::Critical)
            .cloned()
            .collect()
    }

    pub fn is_critical(&self, name: &str) -> bool {
        self.get(name)
            .map(|m| m.criticality == ModuleCriticality::Critical)
            .unwrap_or(false)
    }

    pub fn unregister(&self, name: &str) {
        if self.modules.write().remove(name).is_some() {
            info!(module = name, "module unregistered");
        }
    }
}
