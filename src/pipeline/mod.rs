//! Multi-stage pipeline construction, validation, and orchestration.

mod orchestrator;
mod stage;

pub use orchestrator::{Pipeline, PipelineOrchestrator, PipelineStatus};
pub use stage::{hiring_stages, validate_stages, PipelineStage, StageSpec, StageStatus, Urgency};
