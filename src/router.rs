//! Task-category routing: maps a task to the ordered agent sequence that
//! should handle it.
//!
//! Routes are a fixed, hand-ordered table. Unknown categories fall back to a
//! single-element route pointing at the supervisory agent. The
//! cost-optimized dispatch variant clears the whole route's estimated cost
//! with the budget governor before sending anything, then walks the route
//! sequentially; total latency is the sum of per-agent latencies.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::budget::BudgetGovernor;
use crate::bus::{AgentMessage, HiringStage, MessageBus, MessageContext};
use crate::errors::OrchestrationError;

/// Estimated unit cost per agent hop in a route.
pub const UNIT_ROUTE_COST: f64 = 0.10;

/// Known task categories plus a catch-all for anything unrecognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    NewJobPosting,
    CandidateFound,
    CostOptimization,
    TechnicalValidation,
    OutreachCampaign,
    #[serde(untagged)]
    Unknown(String),
}

impl TaskCategory {
    /// Parse a category string; anything unrecognized becomes `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "new-job-posting" => TaskCategory::NewJobPosting,
            "candidate-found" => TaskCategory::CandidateFound,
            "cost-optimization" => TaskCategory::CostOptimization,
            "technical-validation" => TaskCategory::TechnicalValidation,
            "outreach-campaign" => TaskCategory::OutreachCampaign,
            other => TaskCategory::Unknown(other.to_string()),
        }
    }
}

/// Outcome of a cost-optimized route dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDispatch {
    /// Every agent in the route received its request.
    Dispatched {
        route: Vec<String>,
        estimated_cost: f64,
    },
    /// The governor rejected the route's estimated cost; nothing was sent.
    Rejected { reason: String },
}

/// Maps task categories to ordered agent sequences.
#[derive(Debug, Clone)]
pub struct Router {
    /// Fallback agent for unrecognized categories.
    default_agent: String,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            default_agent: "ceo".to_string(),
        }
    }
}

impl Router {
    /// Router with the standard supervisory fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with a custom fallback agent.
    pub fn with_default_agent(default_agent: impl Into<String>) -> Self {
        Self {
            default_agent: default_agent.into(),
        }
    }

    /// The ordered agent sequence for a task category.
    pub fn route(&self, category: &TaskCategory) -> Vec<String> {
        let ids: &[&str] = match category {
            TaskCategory::NewJobPosting => &[
                "smart-database",
                "auto-recruiter",
                "culture-matcher",
                "ideal-profiler",
            ],
            TaskCategory::CandidateFound => {
                &["profile-analyzer", "culture-matcher", "message-crafter"]
            }
            TaskCategory::CostOptimization => &["cfo", "smart-database", "auto-recruiter"],
            TaskCategory::TechnicalValidation => &["cto", "profile-analyzer", "ideal-profiler"],
            TaskCategory::OutreachCampaign => &["cmo", "message-crafter", "talent-sourcer"],
            TaskCategory::Unknown(raw) => {
                log::debug!("[router] unknown task category '{raw}', routing to supervisor");
                return vec![self.default_agent.clone()];
            }
        };
        ids.iter().map(|id| id.to_string()).collect()
    }

    /// Cost-optimized dispatch: clear the whole route's estimated cost with
    /// the governor first, then send one request per agent, in route order,
    /// one after another.
    pub fn dispatch_route(
        &self,
        bus: &MessageBus,
        governor: &BudgetGovernor,
        category: &TaskCategory,
        data: Value,
    ) -> Result<RouteDispatch, OrchestrationError> {
        let route = self.route(category);
        let estimated_cost = route.len() as f64 * UNIT_ROUTE_COST;

        match governor.request_approval("system", estimated_cost) {
            crate::budget::Approval::Rejected { reason } => {
                log::info!(
                    "[router] route for {category:?} rejected ({estimated_cost:.2}): {reason}"
                );
                return Ok(RouteDispatch::Rejected { reason });
            }
            crate::budget::Approval::Approved { .. } => {}
        }

        for agent_id in &route {
            bus.send(
                AgentMessage::request("system", agent_id.as_str(), data.clone()).with_context(
                    MessageContext {
                        stage: Some(HiringStage::Sourcing),
                        ..Default::default()
                    },
                ),
            )?;
        }

        log::info!(
            "[router] dispatched {:?} to {} agents ({estimated_cost:.2} approved)",
            category,
            route.len()
        );
        Ok(RouteDispatch::Dispatched {
            route,
            estimated_cost,
        })
    }

    /// Convenience wrapper: announce the route and its estimate to the
    /// budget supervisor before dispatching.
    pub fn announce_route(&self, category: &TaskCategory) -> Value {
        let route = self.route(category);
        json!({
            "task": category,
            "estimatedCost": route.len() as f64 * UNIT_ROUTE_COST,
            "route": route,
        })
    }
}
