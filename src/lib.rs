//! # Smartloop
//!
//! Agent orchestration core for recruitment workflows: a typed message bus
//! with priority routing, a cost ledger with daily/monthly budget windows
//! and an approval governor, category-based task routing, dependency-ordered
//! hiring pipelines with retry and substitution, and per-agent health
//! monitoring.
//!
//! Everything hangs off an [`OrchestrationContext`]; see
//! [`PipelineOrchestrator`] for the pipeline lifecycle.

pub mod budget;
pub mod bus;
pub mod config;
pub mod context;
pub mod contract;
pub mod errors;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod router;

pub use budget::{Approval, BudgetAlert, BudgetGovernor, BudgetWindow, LedgerSnapshot};
pub use bus::{AgentMessage, MessageBus, MessageContext, MessageKind, Priority, Recipients};
pub use config::{ApprovalPolicy, BudgetPolicy, OrchestratorConfig};
pub use context::OrchestrationContext;
pub use contract::{AgentExecutor, AgentResponse, TaskFailure, TaskOutcome, TaskRequest};
pub use errors::{OrchestrationError, StageDependencyError};
pub use monitor::{HealthAlert, HealthMetric, HealthMonitor};
pub use pipeline::{
    hiring_stages, Pipeline, PipelineOrchestrator, PipelineStatus, StageSpec, StageStatus, Urgency,
};
pub use registry::{AgentDescriptor, AgentRegistry, AgentRole, CostTier};
pub use router::{RouteDispatch, Router, TaskCategory, UNIT_ROUTE_COST};
