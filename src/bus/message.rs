//! Typed messages exchanged between agents.
//!
//! The serialized form matches the wire record used by agent collaborators:
//! lowercase `type`/`priority` tags, ISO-8601 timestamps, `to` as either a
//! single id or a list, and a `context` object whose absent fields are
//! omitted entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::OrchestrationError;

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
}

/// Delivery priority, fixed at send time.
///
/// High and medium messages are delivered synchronously in call order; low
/// priority messages are queued until [`crate::bus::MessageBus::drain_queue`]
/// is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Hiring workflow stage a message relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HiringStage {
    Sourcing,
    Screening,
    Outreach,
    Interview,
    Offer,
}

/// Optional spend accounting attached by the sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostTracking {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

/// Correlation context carried alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<HiringStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_tracking: Option<CostTracking>,
}

/// One recipient id or a list delivered in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Iterate recipient ids in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Recipients::One(id) => std::slice::from_ref(id).iter().map(String::as_str),
            Recipients::Many(ids) => ids.as_slice().iter().map(String::as_str),
        }
    }

    /// True when there is no recipient at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Recipients::One(id) => id.is_empty(),
            Recipients::Many(ids) => ids.is_empty(),
        }
    }
}

impl From<&str> for Recipients {
    fn from(id: &str) -> Self {
        Recipients::One(id.to_string())
    }
}

impl From<Vec<String>> for Recipients {
    fn from(ids: Vec<String>) -> Self {
        Recipients::Many(ids)
    }
}

/// A message routed between named agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Sender agent id.
    pub from: String,
    /// One recipient id or a list.
    pub to: Recipients,
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Delivery priority, fixed at send time.
    pub priority: Priority,
    /// Send timestamp.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload.
    pub data: Value,
    /// Correlation context.
    #[serde(default)]
    pub context: MessageContext,
}

impl AgentMessage {
    /// Construct a message stamped with the current time and an empty
    /// context.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<Recipients>,
        kind: MessageKind,
        priority: Priority,
        data: Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            priority,
            timestamp: Utc::now(),
            data,
            context: MessageContext::default(),
        }
    }

    /// Shorthand for a medium-priority request.
    pub fn request(from: impl Into<String>, to: impl Into<Recipients>, data: Value) -> Self {
        Self::new(from, to, MessageKind::Request, Priority::Medium, data)
    }

    /// Shorthand for a medium-priority notification.
    pub fn notification(from: impl Into<String>, to: impl Into<Recipients>, data: Value) -> Self {
        Self::new(from, to, MessageKind::Notification, Priority::Medium, data)
    }

    /// Builder: attach a context.
    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    /// Builder: override the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check the required fields. Typed fields cannot be absent, so the
    /// checks reject the empty analogues: blank sender, no recipients, a
    /// blank recipient id, or a null payload.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.from.is_empty() {
            return Err(OrchestrationError::InvalidMessage {
                reason: "missing sender".to_string(),
            });
        }
        if self.to.is_empty() {
            return Err(OrchestrationError::InvalidMessage {
                reason: "missing recipient".to_string(),
            });
        }
        if self.to.iter().any(str::is_empty) {
            return Err(OrchestrationError::InvalidMessage {
                reason: "blank recipient id".to_string(),
            });
        }
        if self.data.is_null() {
            return Err(OrchestrationError::InvalidMessage {
                reason: "missing payload".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_single_recipient() {
        let message = AgentMessage::request("ceo", "talent-sourcer", json!({"task": "source"}))
            .with_context(MessageContext {
                job_id: Some("job-1".to_string()),
                stage: Some(HiringStage::Sourcing),
                ..Default::default()
            });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["from"], "ceo");
        assert_eq!(value["to"], "talent-sourcer");
        assert_eq!(value["type"], "request");
        assert_eq!(value["priority"], "medium");
        assert_eq!(value["context"]["jobId"], "job-1");
        assert_eq!(value["context"]["stage"], "sourcing");
        assert!(value["context"].get("candidateId").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_wire_shape_many_recipients() {
        let message = AgentMessage::notification(
            "system",
            vec!["ceo".to_string(), "cfo".to_string()],
            json!({"alert": "x"}),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["to"], json!(["ceo", "cfo"]));
    }

    #[test]
    fn test_roundtrip_deserialization() {
        let raw = json!({
            "from": "cfo",
            "to": ["ceo"],
            "type": "notification",
            "priority": "high",
            "timestamp": "2025-03-01T10:00:00Z",
            "data": {"alert": "budget"},
            "context": {"costTracking": {"estimatedCost": 1.5}}
        });
        let message: AgentMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.kind, MessageKind::Notification);
        assert_eq!(message.priority, Priority::High);
        assert_eq!(
            message.context.cost_tracking.unwrap().estimated_cost,
            Some(1.5)
        );
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut message = AgentMessage::request("", "ceo", json!({}));
        assert!(message.validate().is_err());

        message = AgentMessage::request("ceo", Recipients::Many(vec![]), json!({}));
        assert!(message.validate().is_err());

        message = AgentMessage::request("ceo", "cfo", Value::Null);
        assert!(message.validate().is_err());

        message = AgentMessage::request("ceo", "cfo", json!({}));
        assert!(message.validate().is_ok());
    }
}
