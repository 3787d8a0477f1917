//! Static agent catalog: identity, capabilities, dependencies, cost tier.
//!
//! The registry is built once at startup and is read-only afterwards, so it
//! needs no synchronization. Management agents carry an explicit
//! [`AgentRole::Supervisor`] flag (meaning they may address any agent)
//! instead of the legacy `["*"]` wildcard dependency; the wildcard is still
//! produced by [`AgentDescriptor::wire_record`] for compatibility with the
//! descriptor wire shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::OrchestrationError;

/// Cost tier of an agent, mapped to a unit cost charged per message sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    Low,
    Medium,
    High,
}

impl CostTier {
    /// Unit cost recorded against an agent for each message it sends.
    pub fn unit_cost(&self) -> f64 {
        match self {
            CostTier::Free => 0.0,
            CostTier::Low => 0.01,
            CostTier::Medium => 0.10,
            CostTier::High => 1.00,
        }
    }
}

/// Whether an agent is scoped to an explicit dependency list or may reach
/// any agent in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum AgentRole {
    /// Ordinary agent with an explicit list of agents it depends on.
    Worker { dependencies: Vec<String> },
    /// Management agent; may address any agent.
    Supervisor,
}

impl AgentRole {
    /// True for supervisory (management) agents.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, AgentRole::Supervisor)
    }
}

/// Immutable description of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable identifier, e.g. `"talent-sourcer"`.
    pub id: String,
    /// Display name, e.g. `"Talent Sourcer"`.
    pub name: String,
    /// Capability tags used for substitute lookup.
    pub capabilities: Vec<String>,
    /// Worker with explicit dependencies, or supervisor.
    #[serde(flatten)]
    pub role: AgentRole,
    /// Cost tier charged per sent message.
    pub cost_tier: CostTier,
}

impl AgentDescriptor {
    /// Render the legacy descriptor record:
    /// `{ id, name, capabilities, dependencies: [..] | ["*"], costTier }`.
    pub fn wire_record(&self) -> serde_json::Value {
        let dependencies = match &self.role {
            AgentRole::Worker { dependencies } => json!(dependencies),
            AgentRole::Supervisor => json!(["*"]),
        };
        json!({
            "id": self.id,
            "name": self.name,
            "capabilities": self.capabilities,
            "dependencies": dependencies,
            "costTier": self.cost_tier,
        })
    }
}

/// Read-only lookup table of agent descriptors.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDescriptor>,
    /// Ids in insertion order, for stable iteration.
    order: Vec<String>,
}

impl AgentRegistry {
    /// Build a registry from a custom catalog.
    pub fn new(descriptors: Vec<AgentDescriptor>) -> Self {
        let mut agents = HashMap::with_capacity(descriptors.len());
        let mut order = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if !agents.contains_key(&descriptor.id) {
                order.push(descriptor.id.clone());
            }
            agents.insert(descriptor.id.clone(), descriptor);
        }
        Self { agents, order }
    }

    /// The built-in recruitment catalog: seven worker agents covering the
    /// hiring workflow plus four management agents.
    pub fn builtin() -> Self {
        fn worker(
            id: &str,
            name: &str,
            capabilities: &[&str],
            dependencies: &[&str],
            cost_tier: CostTier,
        ) -> AgentDescriptor {
            AgentDescriptor {
                id: id.to_string(),
                name: name.to_string(),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                role: AgentRole::Worker {
                    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                },
                cost_tier,
            }
        }

        fn supervisor(id: &str, name: &str, capabilities: &[&str]) -> AgentDescriptor {
            AgentDescriptor {
                id: id.to_string(),
                name: name.to_string(),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                role: AgentRole::Supervisor,
                cost_tier: CostTier::Free,
            }
        }

        Self::new(vec![
            worker(
                "smart-database",
                "Smart Database",
                &["resource-mapping", "tagging", "keyword-analysis"],
                &[],
                CostTier::Free,
            ),
            worker(
                "auto-recruiter",
                "Auto Recruiter",
                &["source-expansion", "web-scraping", "cost-monitoring"],
                &["smart-database", "cfo"],
                CostTier::Medium,
            ),
            worker(
                "culture-matcher",
                "Culture Matcher",
                &["culture-analysis", "personality-assessment", "cross-reference"],
                &["smart-database"],
                CostTier::Low,
            ),
            worker(
                "ideal-profiler",
                "Ideal Profiler",
                &["profile-building", "requirement-synthesis", "validation"],
                &["smart-database", "culture-matcher", "auto-recruiter"],
                CostTier::Low,
            ),
            worker(
                "profile-analyzer",
                "Profile Analyzer",
                &["comparison", "scoring", "gap-analysis", "recommendation"],
                &["ideal-profiler"],
                CostTier::Medium,
            ),
            worker(
                "message-crafter",
                "Message Crafter",
                &["personalization", "a-b-testing", "tone-adjustment", "translation"],
                &["profile-analyzer", "culture-matcher"],
                CostTier::Low,
            ),
            worker(
                "talent-sourcer",
                "Talent Sourcer",
                &["linkedin-search", "github-search", "multi-platform-search"],
                &["smart-database", "auto-recruiter"],
                CostTier::High,
            ),
            supervisor(
                "ceo",
                "CEO Agent",
                &["orchestration", "decision-making", "conflict-resolution"],
            ),
            supervisor(
                "cfo",
                "CFO Agent",
                &["cost-tracking", "budget-management", "roi-analysis"],
            ),
            supervisor(
                "cto",
                "CTO Agent",
                &["tech-validation", "integration-management", "performance-monitoring"],
            ),
            supervisor(
                "cmo",
                "CMO Agent",
                &["branding", "content-strategy", "market-analysis"],
            ),
        ])
    }

    /// Look up an agent by id.
    pub fn describe(&self, id: &str) -> Result<&AgentDescriptor, OrchestrationError> {
        self.agents
            .get(id)
            .ok_or_else(|| OrchestrationError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    /// Whether the registry knows the given id.
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Ids of all agents declaring the given capability, in catalog order.
    pub fn list_by_capability(&self, capability: &str) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| {
                self.agents[id.as_str()]
                    .capabilities
                    .iter()
                    .any(|c| c == capability)
            })
            .map(|id| id.as_str())
            .collect()
    }

    /// Ids of agents sharing at least one capability with the given agent.
    /// Used to find substitutes when an agent cannot proceed.
    pub fn substitutes_for(&self, id: &str) -> Vec<&str> {
        let Some(agent) = self.agents.get(id) else {
            return Vec::new();
        };
        self.order
            .iter()
            .filter(|other| other.as_str() != id)
            .filter(|other| {
                self.agents[other.as_str()]
                    .capabilities
                    .iter()
                    .any(|c| agent.capabilities.contains(c))
            })
            .map(|other| other.as_str())
            .collect()
    }

    /// Ids of all supervisory agents, in catalog order.
    pub fn supervisors(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.agents[id.as_str()].role.is_supervisor())
            .map(|id| id.as_str())
            .collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when the registry holds no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Iterate over descriptors in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.order.iter().map(|id| &self.agents[id.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_agent() {
        let registry = AgentRegistry::builtin();
        let agent = registry.describe("talent-sourcer").unwrap();
        assert_eq!(agent.name, "Talent Sourcer");
        assert_eq!(agent.cost_tier, CostTier::High);
    }

    #[test]
    fn test_describe_miss_is_not_found() {
        let registry = AgentRegistry::builtin();
        let err = registry.describe("nope").unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::AgentNotFound { agent_id } if agent_id == "nope"
        ));
    }

    #[test]
    fn test_list_by_capability() {
        let registry = AgentRegistry::builtin();
        let ids = registry.list_by_capability("cost-monitoring");
        assert_eq!(ids, vec!["auto-recruiter"]);
    }

    #[test]
    fn test_management_agents_are_supervisors() {
        let registry = AgentRegistry::builtin();
        assert_eq!(registry.supervisors(), vec!["ceo", "cfo", "cto", "cmo"]);
        assert!(registry.describe("cfo").unwrap().role.is_supervisor());
    }

    #[test]
    fn test_substitutes_share_a_capability() {
        let mut descriptors = AgentRegistry::builtin()
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        descriptors.push(AgentDescriptor {
            id: "backup-sourcer".to_string(),
            name: "Backup Sourcer".to_string(),
            capabilities: vec!["linkedin-search".to_string()],
            role: AgentRole::Worker {
                dependencies: vec![],
            },
            cost_tier: CostTier::Medium,
        });
        let registry = AgentRegistry::new(descriptors);
        let subs = registry.substitutes_for("talent-sourcer");
        assert_eq!(subs, vec!["backup-sourcer"]);
    }

    #[test]
    fn test_wire_record_wildcard_for_supervisors() {
        let registry = AgentRegistry::builtin();
        let record = registry.describe("ceo").unwrap().wire_record();
        assert_eq!(record["dependencies"], serde_json::json!(["*"]));
        assert_eq!(record["costTier"], "free");
    }

    #[test]
    fn test_unit_costs() {
        assert_eq!(CostTier::Free.unit_cost(), 0.0);
        assert_eq!(CostTier::Low.unit_cost(), 0.01);
        assert_eq!(CostTier::Medium.unit_cost(), 0.10);
        assert_eq!(CostTier::High.unit_cost(), 1.00);
    }
}
