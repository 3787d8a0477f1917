//! The execution contract agents implement to receive work from the
//! orchestrator, and the response record they report back with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// A unit of work handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// What to do, e.g. `"map-sources"`.
    pub action: String,
    /// Action-specific payload.
    pub data: Value,
}

impl TaskRequest {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }
}

/// Successful task result plus the cost the agent actually incurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: Value,
    /// Incurred cost, reported back for the ledger.
    pub cost: f64,
}

/// Why a task could not be completed.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("action '{action}' is not supported")]
    UnsupportedAction { action: String },
    #[error("task failed: {reason}")]
    Failed { reason: String },
    #[error("task aborted: budget exhausted")]
    BudgetExhausted,
}

/// Executable agent: the orchestrator drives implementations of this trait
/// through the bus without knowing what they do internally.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Stable agent id, matching the registry entry.
    fn id(&self) -> &str;

    /// Execute one task to completion.
    async fn execute(&self, request: TaskRequest) -> Result<TaskOutcome, TaskFailure>;
}

/// The uniform response record agents report with:
/// `{ success, data | error, timestamp, agentId }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
}

impl AgentResponse {
    /// Successful response carrying a payload.
    pub fn ok(agent_id: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
        }
    }

    /// Failed response carrying an error string.
    pub fn err(agent_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
        }
    }

    /// Render as a bus message payload.
    pub fn to_value(&self) -> Value {
        json!(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl AgentExecutor for EchoAgent {
        fn id(&self) -> &str {
            "echo"
        }

        async fn execute(&self, request: TaskRequest) -> Result<TaskOutcome, TaskFailure> {
            match request.action.as_str() {
                "echo" => Ok(TaskOutcome {
                    result: request.data,
                    cost: 0.01,
                }),
                other => Err(TaskFailure::UnsupportedAction {
                    action: other.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_executor_round_trip() {
        let agent = EchoAgent;
        let outcome = agent
            .execute(TaskRequest::new("echo", json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!({"x": 1}));
        assert_eq!(outcome.cost, 0.01);

        let failure = agent
            .execute(TaskRequest::new("unknown", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(failure, TaskFailure::UnsupportedAction { .. }));
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = AgentResponse::ok("echo", json!({"n": 2})).to_value();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["agentId"], "echo");
        assert_eq!(ok["data"]["n"], 2);
        assert!(ok.get("error").is_none());

        let err = AgentResponse::err("echo", "boom").to_value();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "boom");
        assert!(err.get("data").is_none());
    }
}
