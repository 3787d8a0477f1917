//! Pipeline orchestrator: builds the stage DAG for a hiring request,
//! allocates budget, dispatches ready stages over the bus, and advances
//! dependents as completions arrive.
//!
//! The orchestrator is the sole owner of pipeline state; no other component
//! writes stage status. Advancement is completion-driven — reporting a stage
//! complete immediately dispatches whatever it unblocked — while a periodic
//! tick sweeps retry backoffs and deadline overruns. All bus traffic is sent
//! after the state lock is released, so an agent handler may report
//! completions back into the orchestrator synchronously.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::stage::{
    hiring_stages, validate_stages, PipelineStage, StageSpec, StageStatus, Urgency,
};
use crate::budget::{Approval, BudgetGovernor};
use crate::bus::{AgentMessage, MessageBus, MessageContext, MessageKind, Priority};
use crate::config::OrchestratorConfig;
use crate::context::OrchestrationContext;
use crate::errors::OrchestrationError;
use crate::monitor::HealthMonitor;
use crate::registry::AgentRegistry;

/// Lifecycle of a pipeline. Terminal once Completed, Failed, or Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One hiring request's dependency-ordered stage set.
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub urgency: Urgency,
    pub status: PipelineStatus,
    pub stages: Vec<PipelineStage>,
    pub total_budget: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    /// Whether cancellation was requested for this pipeline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn stage(&self, name: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut PipelineStage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    fn all_completed(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status == StageStatus::Completed)
    }
}

/// Coordinates named agents through multi-stage pipelines.
pub struct PipelineOrchestrator {
    bus: Arc<MessageBus>,
    governor: Arc<BudgetGovernor>,
    registry: Arc<AgentRegistry>,
    monitor: Arc<HealthMonitor>,
    /// Agent id the orchestrator speaks as on the bus.
    supervisor: String,
    max_stage_retries: u32,
    retry_backoff: Duration,
    poll_interval: Duration,
    pipelines: Mutex<HashMap<Uuid, Pipeline>>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over a shared context.
    pub fn new(ctx: &OrchestrationContext) -> Self {
        Self::with_config(ctx, &ctx.config)
    }

    fn with_config(ctx: &OrchestrationContext, config: &OrchestratorConfig) -> Self {
        Self {
            bus: ctx.bus.clone(),
            governor: ctx.governor.clone(),
            registry: ctx.registry.clone(),
            monitor: ctx.monitor.clone(),
            supervisor: "ceo".to_string(),
            max_stage_retries: config.max_stage_retries,
            retry_backoff: config.retry_backoff,
            poll_interval: config.poll_interval,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Construction and budget allocation
    // -----------------------------------------------------------------------

    /// Validate the stage graph and register a new pipeline in `Created`
    /// state. Every assigned agent must exist in the registry.
    pub fn build_pipeline(
        &self,
        specs: Vec<StageSpec>,
        urgency: Urgency,
    ) -> Result<Uuid, OrchestrationError> {
        validate_stages(&specs)?;
        for spec in &specs {
            self.registry.describe(&spec.agent_id)?;
        }

        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            urgency,
            status: PipelineStatus::Created,
            stages: specs.into_iter().map(PipelineStage::from_spec).collect(),
            total_budget: 0.0,
            created_at: Utc::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let id = pipeline.id;
        log::info!(
            "[pipeline] built pipeline {id} with {} stages ({:?} urgency)",
            pipeline.stages.len(),
            urgency
        );
        self.pipelines.lock().insert(id, pipeline);
        Ok(id)
    }

    /// Build the standard seven-stage hiring pipeline.
    pub fn build_hiring_pipeline(&self, urgency: Urgency) -> Result<Uuid, OrchestrationError> {
        self.build_pipeline(hiring_stages(urgency), urgency)
    }

    /// Partition `total_budget` across stages proportionally to each
    /// stage's duration estimate. Only valid before the pipeline starts.
    pub fn allocate_budget(&self, id: Uuid, total_budget: f64) -> Result<(), OrchestrationError> {
        let mut pipelines = self.pipelines.lock();
        let pipeline = Self::pipeline_mut(&mut pipelines, id)?;
        if pipeline.status != PipelineStatus::Created {
            return Err(Self::invalid_transition(pipeline, "allocate budget"));
        }

        let total_hours: u32 = pipeline.stages.iter().map(|s| s.duration_hours).sum();
        if total_hours == 0 {
            return Ok(());
        }
        for stage in &mut pipeline.stages {
            stage.allocated_budget =
                total_budget * stage.duration_hours as f64 / total_hours as f64;
        }
        pipeline.total_budget = total_budget;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Start the pipeline: dispatch every stage with no unmet dependencies.
    pub fn start(&self, id: Uuid) -> Result<(), OrchestrationError> {
        let outbox = {
            let mut pipelines = self.pipelines.lock();
            let pipeline = Self::pipeline_mut(&mut pipelines, id)?;
            if pipeline.status != PipelineStatus::Created {
                return Err(Self::invalid_transition(pipeline, "start"));
            }
            pipeline.status = PipelineStatus::Running;

            let mut outbox = vec![self.supervisor_note(json!({
                "event": "hiring:started",
                "pipelineId": id.to_string(),
                "stages": pipeline.stages.len(),
                "urgency": pipeline.urgency,
            }))];
            self.advance_locked(pipeline, Utc::now(), &mut outbox);
            outbox
        };
        self.flush(outbox);
        Ok(())
    }

    /// Record a stage's successful completion and dispatch whatever it
    /// unblocked. Completions for cancelled pipelines are acknowledged but
    /// advance nothing.
    pub fn complete_stage(
        &self,
        id: Uuid,
        stage_name: &str,
        result: Value,
    ) -> Result<(), OrchestrationError> {
        let outbox = {
            let mut pipelines = self.pipelines.lock();
            let pipeline = Self::pipeline_mut(&mut pipelines, id)?;
            let now = Utc::now();

            let Some(stage) = pipeline.stage_mut(stage_name) else {
                return Err(OrchestrationError::StageNotFound {
                    pipeline_id: id.to_string(),
                    stage: stage_name.to_string(),
                });
            };
            if stage.status != StageStatus::InProgress {
                log::warn!(
                    "[pipeline] ignoring completion for stage '{stage_name}' in state {:?}",
                    stage.status
                );
                return Ok(());
            }

            stage.status = StageStatus::Completed;
            let agent_id = stage.agent_id.clone();
            if let Some(started_at) = stage.started_at {
                if let Ok(elapsed) = (now - started_at).to_std() {
                    self.monitor.record_latency(&agent_id, elapsed);
                }
            }
            log::info!("[pipeline] stage '{stage_name}' of {id} completed by {agent_id}");
            log::debug!("[pipeline] stage '{stage_name}' result: {result}");

            let mut outbox = Vec::new();
            if pipeline.is_cancelled() {
                outbox
            } else if pipeline.all_completed() {
                pipeline.status = PipelineStatus::Completed;
                outbox.push(self.supervisor_note(json!({
                    "event": "pipeline:completed",
                    "pipelineId": id.to_string(),
                })));
                outbox
            } else {
                self.advance_locked(pipeline, now, &mut outbox);
                outbox
            }
        };
        self.flush(outbox);
        Ok(())
    }

    /// Record a stage failure. The stage is retried with backoff up to the
    /// configured bound; once exhausted, a capability-equivalent substitute
    /// agent from the registry is tried; only when none remains does the
    /// stage — and the pipeline — fail, with a high-priority issue report to
    /// the supervisors.
    pub fn fail_stage(
        &self,
        id: Uuid,
        stage_name: &str,
        reason: &str,
    ) -> Result<(), OrchestrationError> {
        let outbox = {
            let mut pipelines = self.pipelines.lock();
            let pipeline = Self::pipeline_mut(&mut pipelines, id)?;
            let now = Utc::now();

            let max_retries = self.max_stage_retries;
            let backoff = self.retry_backoff;
            let Some(index) = pipeline.stages.iter().position(|s| s.name == stage_name) else {
                return Err(OrchestrationError::StageNotFound {
                    pipeline_id: id.to_string(),
                    stage: stage_name.to_string(),
                });
            };
            let substitute = self
                .registry
                .substitutes_for(&pipeline.stages[index].agent_id)
                .first()
                .map(|s| s.to_string());

            let stage = &mut pipeline.stages[index];
            if stage.status != StageStatus::InProgress {
                log::warn!(
                    "[pipeline] ignoring failure report for stage '{stage_name}' in state {:?}",
                    stage.status
                );
                return Ok(());
            }
            let agent_id = stage.agent_id.clone();
            self.monitor.record_error(&agent_id, reason);

            let mut outbox = Vec::new();
            if stage.attempts <= max_retries {
                // Back off, scaled by how often this stage already ran.
                stage.status = StageStatus::Pending;
                stage.not_before =
                    Some(now + ChronoDuration::from_std(backoff).unwrap_or_default() * stage.attempts as i32);
                log::warn!(
                    "[pipeline] stage '{stage_name}' failed ({reason}), retry {}/{} pending",
                    stage.attempts,
                    max_retries + 1
                );
            } else if let Some(substitute) = substitute.filter(|_| !stage.substituted) {
                log::warn!(
                    "[pipeline] stage '{stage_name}' exhausted retries on {agent_id}, reassigning to {substitute}"
                );
                stage.agent_id = substitute.clone();
                stage.substituted = true;
                stage.attempts = 0;
                stage.status = StageStatus::Pending;
                stage.not_before = Some(now + ChronoDuration::from_std(backoff).unwrap_or_default());
                outbox.push(self.supervisor_note(json!({
                    "event": "pipeline:issues",
                    "pipelineId": id.to_string(),
                    "issues": [{
                        "stage": stage_name,
                        "reassignedFrom": agent_id,
                        "reassignedTo": substitute,
                        "reason": reason,
                    }],
                })));
            } else {
                stage.status = StageStatus::Failed;
                pipeline.status = PipelineStatus::Failed;
                log::error!(
                    "[pipeline] stage '{stage_name}' of {id} failed unrecoverably: {reason}"
                );
                outbox.push(
                    AgentMessage::new(
                        self.supervisor.clone(),
                        self.supervisor_recipients(),
                        MessageKind::Error,
                        Priority::High,
                        json!({
                            "event": "pipeline:issues",
                            "pipelineId": id.to_string(),
                            "issues": [{
                                "stage": stage_name,
                                "agent": agent_id,
                                "reason": reason,
                                "fatal": true,
                            }],
                        }),
                    )
                    .with_context(MessageContext {
                        job_id: Some(id.to_string()),
                        ..Default::default()
                    }),
                );
            }
            outbox
        };
        self.flush(outbox);
        Ok(())
    }

    /// Request cancellation: the pipeline goes `Cancelled` and no further
    /// stage is dispatched. In-flight stages finish on their own, but their
    /// completions no longer advance anything.
    pub fn cancel(&self, id: Uuid) -> Result<(), OrchestrationError> {
        let outbox = {
            let mut pipelines = self.pipelines.lock();
            let pipeline = Self::pipeline_mut(&mut pipelines, id)?;
            match pipeline.status {
                PipelineStatus::Created | PipelineStatus::Running => {}
                _ => return Err(Self::invalid_transition(pipeline, "cancel")),
            }
            pipeline.status = PipelineStatus::Cancelled;
            pipeline.cancelled.store(true, Ordering::SeqCst);
            log::info!("[pipeline] pipeline {id} cancelled");
            vec![self.supervisor_note(json!({
                "event": "pipeline:cancelled",
                "pipelineId": id.to_string(),
            }))]
        };
        self.flush(outbox);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    /// One monitor pass over all running pipelines: re-dispatch pending
    /// stages whose backoff elapsed and whose dependencies are met, and
    /// report — without halting — stages past their deadline.
    pub fn tick(&self) {
        let now = Utc::now();
        let outbox = {
            let mut pipelines = self.pipelines.lock();
            let mut outbox = Vec::new();
            for pipeline in pipelines.values_mut() {
                if pipeline.status != PipelineStatus::Running {
                    continue;
                }
                self.advance_locked(pipeline, now, &mut outbox);

                let id = pipeline.id;
                let mut overdue = Vec::new();
                for stage in &mut pipeline.stages {
                    if stage.status == StageStatus::InProgress && !stage.deadline_flagged {
                        if let Some(deadline) = stage.deadline {
                            if now > deadline {
                                stage.deadline_flagged = true;
                                overdue.push(json!({
                                    "stage": stage.name,
                                    "agent": stage.agent_id,
                                    "deadline": deadline,
                                }));
                            }
                        }
                    }
                }
                if !overdue.is_empty() {
                    log::warn!("[pipeline] {} overdue stage(s) in {id}", overdue.len());
                    outbox.push(self.supervisor_note(json!({
                        "event": "pipeline:issues",
                        "pipelineId": id.to_string(),
                        "issues": overdue,
                    })));
                }
            }
            outbox
        };
        self.flush(outbox);
    }

    /// Spawn the periodic monitor task.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let interval = orchestrator.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                orchestrator.tick();
            }
        })
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Current pipeline status.
    pub fn status(&self, id: Uuid) -> Result<PipelineStatus, OrchestrationError> {
        Ok(self.snapshot(id)?.status)
    }

    /// Current status of one stage.
    pub fn stage_status(&self, id: Uuid, stage_name: &str) -> Result<StageStatus, OrchestrationError> {
        let snapshot = self.snapshot(id)?;
        snapshot
            .stage(stage_name)
            .map(|s| s.status)
            .ok_or_else(|| OrchestrationError::StageNotFound {
                pipeline_id: id.to_string(),
                stage: stage_name.to_string(),
            })
    }

    /// A point-in-time copy of the whole pipeline.
    pub fn snapshot(&self, id: Uuid) -> Result<Pipeline, OrchestrationError> {
        self.pipelines
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestrationError::PipelineNotFound {
                pipeline_id: id.to_string(),
            })
    }

    /// Estimated completion instant: creation time plus the sum of stage
    /// duration estimates.
    pub fn estimate_completion(&self, id: Uuid) -> Result<DateTime<Utc>, OrchestrationError> {
        let snapshot = self.snapshot(id)?;
        let total_hours: u32 = snapshot.stages.iter().map(|s| s.duration_hours).sum();
        Ok(snapshot.created_at + ChronoDuration::hours(total_hours as i64))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Dispatch every stage that is ready: pending, backoff elapsed, all
    /// dependencies completed, pipeline not cancelled. Approved spend is
    /// cleared with the governor per stage; a rejected stage stays pending
    /// and is retried on a later tick.
    fn advance_locked(
        &self,
        pipeline: &mut Pipeline,
        now: DateTime<Utc>,
        outbox: &mut Vec<AgentMessage>,
    ) {
        if pipeline.is_cancelled() {
            return;
        }
        let completed: Vec<String> = pipeline
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .map(|s| s.name.clone())
            .collect();
        let pipeline_id = pipeline.id;
        let urgency = pipeline.urgency;

        for stage in &mut pipeline.stages {
            if stage.status != StageStatus::Pending {
                continue;
            }
            if let Some(not_before) = stage.not_before {
                if now < not_before {
                    continue;
                }
            }
            if !stage
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep))
            {
                continue;
            }

            if stage.allocated_budget > 0.0 {
                match self
                    .governor
                    .request_approval(&stage.agent_id, stage.allocated_budget)
                {
                    Approval::Approved { .. } => {}
                    Approval::Rejected { reason } => {
                        log::warn!(
                            "[pipeline] budget rejected for stage '{}': {reason}",
                            stage.name
                        );
                        stage.not_before = Some(
                            now + ChronoDuration::from_std(self.retry_backoff)
                                .unwrap_or_default(),
                        );
                        // Report once per rejection episode, not every tick.
                        if !stage.budget_flagged {
                            stage.budget_flagged = true;
                            outbox.push(self.supervisor_note(json!({
                                "event": "pipeline:issues",
                                "pipelineId": pipeline_id.to_string(),
                                "issues": [{
                                    "stage": stage.name,
                                    "reason": format!("budget approval rejected: {reason}"),
                                }],
                            })));
                        }
                        continue;
                    }
                }
            }

            stage.status = StageStatus::InProgress;
            stage.attempts += 1;
            stage.started_at = Some(now);
            stage.not_before = None;
            stage.deadline = Some(now + ChronoDuration::hours(stage.duration_hours as i64));
            stage.deadline_flagged = false;
            stage.budget_flagged = false;
            log::info!(
                "[pipeline] dispatching stage '{}' of {pipeline_id} to {} (attempt {})",
                stage.name,
                stage.agent_id,
                stage.attempts
            );

            let priority = match urgency {
                Urgency::High => Priority::High,
                Urgency::Normal => Priority::Medium,
            };
            outbox.push(
                AgentMessage::new(
                    self.supervisor.clone(),
                    stage.agent_id.as_str(),
                    MessageKind::Request,
                    priority,
                    json!({
                        "task": stage.name,
                        "budget": stage.allocated_budget,
                        "deadline": stage.deadline,
                    }),
                )
                .with_context(MessageContext {
                    job_id: Some(pipeline_id.to_string()),
                    ..Default::default()
                }),
            );
        }
    }

    fn supervisor_recipients(&self) -> Vec<String> {
        self.registry
            .supervisors()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn supervisor_note(&self, data: Value) -> AgentMessage {
        AgentMessage::notification(self.supervisor.clone(), self.supervisor_recipients(), data)
    }

    fn flush(&self, outbox: Vec<AgentMessage>) {
        for message in outbox {
            if let Err(err) = self.bus.send(message) {
                log::error!("[pipeline] failed to send pipeline message: {err}");
            }
        }
    }

    fn pipeline_mut(
        pipelines: &mut HashMap<Uuid, Pipeline>,
        id: Uuid,
    ) -> Result<&mut Pipeline, OrchestrationError> {
        pipelines
            .get_mut(&id)
            .ok_or_else(|| OrchestrationError::PipelineNotFound {
                pipeline_id: id.to_string(),
            })
    }

    fn invalid_transition(pipeline: &Pipeline, action: &str) -> OrchestrationError {
        OrchestrationError::InvalidTransition {
            pipeline_id: pipeline.id.to_string(),
            action: action.to_string(),
            status: pipeline.status.to_string(),
        }
    }
}
