//! Shared orchestration context: one place that wires the registry, budget
//! governor, bus, health monitor, and router together.
//!
//! Components receive the context (or the pieces they need) explicitly;
//! nothing in the crate reaches for global state. Two contexts in one
//! process are fully independent, which is what the tests rely on.

use std::sync::Arc;

use crate::budget::BudgetGovernor;
use crate::bus::MessageBus;
use crate::config::OrchestratorConfig;
use crate::monitor::HealthMonitor;
use crate::registry::AgentRegistry;
use crate::router::Router;

/// Owns the shared components of one orchestration instance.
#[derive(Clone)]
pub struct OrchestrationContext {
    pub config: OrchestratorConfig,
    pub registry: Arc<AgentRegistry>,
    pub governor: Arc<BudgetGovernor>,
    pub bus: Arc<MessageBus>,
    pub monitor: Arc<HealthMonitor>,
    pub router: Router,
}

impl OrchestrationContext {
    /// Build a context over the built-in agent catalog.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, AgentRegistry::builtin())
    }

    /// Build a context over a custom agent catalog.
    pub fn with_registry(config: OrchestratorConfig, registry: AgentRegistry) -> Self {
        let registry = Arc::new(registry);
        let governor = Arc::new(BudgetGovernor::new(&config));
        let bus = Arc::new(MessageBus::new(registry.clone(), governor.clone()));
        let monitor = Arc::new(HealthMonitor::new(&config));
        Self {
            config,
            registry,
            governor,
            bus,
            monitor,
            router: Router::new(),
        }
    }

    /// Build a context from environment-derived configuration.
    pub fn from_env() -> Self {
        Self::new(OrchestratorConfig::from_env())
    }
}
