//! Pipeline stages and build-time dependency validation.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StageDependencyError;

/// How quickly a hiring request needs to move. High urgency halves every
/// stage's duration estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Normal,
}

/// Lifecycle of one stage. Only the orchestrator mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Declarative description of a stage, used to build a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within the pipeline.
    pub name: String,
    /// Agent assigned to execute the stage.
    pub agent_id: String,
    /// Duration estimate in hours; drives budget allocation and deadlines.
    pub duration_hours: u32,
    /// Names of stages that must complete first.
    pub dependencies: Vec<String>,
}

impl StageSpec {
    /// Convenience constructor.
    pub fn new(
        name: impl Into<String>,
        agent_id: impl Into<String>,
        duration_hours: u32,
        dependencies: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            duration_hours,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// One node of a running pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStage {
    pub name: String,
    pub agent_id: String,
    pub duration_hours: u32,
    pub dependencies: Vec<String>,
    pub status: StageStatus,
    /// Share of the pipeline budget assigned to this stage.
    pub allocated_budget: f64,
    /// Dispatch attempts so far (retries included).
    pub attempts: u32,
    /// Backoff gate: the stage is not re-dispatched before this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// Deadline computed from the duration estimate at dispatch time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// When the current attempt was dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Whether the stage was already reassigned to a substitute agent.
    pub substituted: bool,
    /// Whether a deadline overrun was already reported for this attempt.
    #[serde(skip)]
    pub(crate) deadline_flagged: bool,
    /// Whether a budget rejection was already reported for this episode.
    #[serde(skip)]
    pub(crate) budget_flagged: bool,
}

impl PipelineStage {
    pub(crate) fn from_spec(spec: StageSpec) -> Self {
        Self {
            name: spec.name,
            agent_id: spec.agent_id,
            duration_hours: spec.duration_hours,
            dependencies: spec.dependencies,
            status: StageStatus::Pending,
            allocated_budget: 0.0,
            attempts: 0,
            not_before: None,
            deadline: None,
            started_at: None,
            substituted: false,
            deadline_flagged: false,
            budget_flagged: false,
        }
    }
}

/// Validate that stage names are unique, every dependency resolves to a
/// stage in the same list, and the graph is acyclic.
pub fn validate_stages(specs: &[StageSpec]) -> Result<(), StageDependencyError> {
    let mut names = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(StageDependencyError::DuplicateName {
                stage: spec.name.clone(),
            });
        }
    }

    for spec in specs {
        for dependency in &spec.dependencies {
            if !names.contains(dependency.as_str()) {
                return Err(StageDependencyError::UnknownDependency {
                    stage: spec.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    // Kahn's algorithm: whatever cannot be topologically ordered is cyclic.
    let mut indegree: HashMap<&str, usize> = specs
        .iter()
        .map(|s| (s.name.as_str(), s.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for spec in specs {
        for dependency in &spec.dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(spec.name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut ordered = 0usize;
    while let Some(name) = queue.pop_front() {
        ordered += 1;
        if let Some(children) = dependents.get(name) {
            for child in children {
                let degree = indegree.get_mut(child).expect("child is a known stage");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if ordered < specs.len() {
        let mut stages: Vec<String> = indegree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        stages.sort();
        return Err(StageDependencyError::Cycle { stages });
    }
    Ok(())
}

/// The seven-stage hiring chain, each stage depending on its predecessor.
/// High urgency halves the duration estimates.
pub fn hiring_stages(urgency: Urgency) -> Vec<StageSpec> {
    let d = |high: u32, normal: u32| match urgency {
        Urgency::High => high,
        Urgency::Normal => normal,
    };
    vec![
        StageSpec::new("Database Mapping", "smart-database", d(1, 2), &[]),
        StageSpec::new(
            "Profile Building",
            "ideal-profiler",
            d(2, 4),
            &["Database Mapping"],
        ),
        StageSpec::new(
            "Talent Sourcing",
            "talent-sourcer",
            d(3, 6),
            &["Profile Building"],
        ),
        StageSpec::new(
            "Profile Analysis",
            "profile-analyzer",
            d(4, 8),
            &["Talent Sourcing"],
        ),
        StageSpec::new(
            "Culture Matching",
            "culture-matcher",
            d(2, 4),
            &["Profile Analysis"],
        ),
        StageSpec::new(
            "Message Crafting",
            "message-crafter",
            d(1, 2),
            &["Culture Matching"],
        ),
        StageSpec::new("Outreach", "auto-recruiter", d(2, 4), &["Message Crafting"]),
    ]
}
