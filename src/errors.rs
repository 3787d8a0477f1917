//! Error types for the orchestration runtime.
//!
//! Validation and registry errors are synchronous and handled by the
//! immediate caller. Budget rejections are *not* errors: they surface as
//! [`crate::budget::Approval::Rejected`] results. Pipeline issues are
//! reported as supervisor notifications on the message bus rather than
//! propagated as hard failures.

use thiserror::Error;

/// Errors raised while validating a pipeline's stage dependency graph.
#[derive(Debug, Error)]
pub enum StageDependencyError {
    /// A stage names a dependency that does not exist in the same pipeline.
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// Two stages in the same pipeline share a name, making dependency
    /// resolution ambiguous.
    #[error("duplicate stage name '{stage}'")]
    DuplicateName { stage: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle among stages: {stages:?}")]
    Cycle { stages: Vec<String> },
}

/// Top-level error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A message failed field validation before dispatch.
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Registry lookup miss.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// The referenced pipeline does not exist.
    #[error("pipeline not found: {pipeline_id}")]
    PipelineNotFound { pipeline_id: String },

    /// The referenced stage does not exist within the pipeline.
    #[error("stage '{stage}' not found in pipeline {pipeline_id}")]
    StageNotFound { pipeline_id: String, stage: String },

    /// The pipeline's stage graph is invalid.
    #[error(transparent)]
    StageDependency(#[from] StageDependencyError),

    /// An operation was attempted in a pipeline state that does not allow it.
    #[error("pipeline {pipeline_id} cannot {action} while {status}")]
    InvalidTransition {
        pipeline_id: String,
        action: String,
        status: String,
    },
}
