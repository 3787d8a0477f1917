//! Message bus: validated, cost-tracked routing between named agents.
//!
//! Two delivery paths exist. High and medium priority messages are delivered
//! synchronously, in call order, to the handler registered for each
//! `(agent id, message kind)` pair. Low priority messages are appended to an
//! internal FIFO queue and only flow when [`MessageBus::drain_queue`] is
//! called explicitly; nothing drains the queue on a timer.

pub mod message;

pub use message::{
    AgentMessage, CostTracking, HiringStage, MessageContext, MessageKind, Priority, Recipients,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::budget::BudgetGovernor;
use crate::errors::OrchestrationError;
use crate::registry::AgentRegistry;

/// Handler invoked for messages addressed to one `(agent id, kind)` pair.
pub type MessageHandler = Arc<dyn Fn(&AgentMessage) + Send + Sync>;

/// Counters reported by [`MessageBus::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    /// Messages delivered to a handler (immediate and drained).
    pub messages_delivered: u64,
    /// Low-priority messages currently queued.
    pub queue_len: usize,
    /// Registered `(agent, kind)` handlers.
    pub handlers: usize,
}

/// Routes typed messages between named agents.
pub struct MessageBus {
    registry: Arc<AgentRegistry>,
    governor: Arc<BudgetGovernor>,
    handlers: DashMap<(String, MessageKind), MessageHandler>,
    queue: Mutex<VecDeque<AgentMessage>>,
    delivered: AtomicU64,
}

impl MessageBus {
    /// Create a bus over the given registry and budget governor.
    pub fn new(registry: Arc<AgentRegistry>, governor: Arc<BudgetGovernor>) -> Self {
        Self {
            registry,
            governor,
            handlers: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            delivered: AtomicU64::new(0),
        }
    }

    /// Register the handler for messages of `kind` addressed to `agent_id`,
    /// replacing any previous handler for that pair.
    pub fn on(
        &self,
        agent_id: impl Into<String>,
        kind: MessageKind,
        handler: impl Fn(&AgentMessage) + Send + Sync + 'static,
    ) {
        self.handlers
            .insert((agent_id.into(), kind), Arc::new(handler));
    }

    /// Unregister the handler for the given pair.
    pub fn off(&self, agent_id: &str, kind: MessageKind) {
        self.handlers.remove(&(agent_id.to_string(), kind));
    }

    /// Send a message.
    ///
    /// Validates required fields, records the sender's unit cost against the
    /// ledger regardless of delivery path, then either queues (low priority)
    /// or delivers synchronously to each recipient in list order.
    pub fn send(&self, message: AgentMessage) -> Result<(), OrchestrationError> {
        message.validate()?;

        // Senders outside the registry (e.g. "system") incur no cost.
        if let Ok(agent) = self.registry.describe(&message.from) {
            let cost = agent.cost_tier.unit_cost();
            if cost > 0.0 {
                self.governor.record_cost(&message.from, cost);
            }
        }

        if message.priority == Priority::Low {
            log::debug!(
                "[bus] queueing low-priority message {} -> {:?}",
                message.from,
                message.to
            );
            self.queue.lock().push_back(message);
            return Ok(());
        }

        self.deliver(&message);
        Ok(())
    }

    /// Deliver every queued low-priority message in FIFO order.
    ///
    /// Returns the number of messages delivered. Messages enqueued by
    /// handlers during the drain are delivered in the same pass.
    pub fn drain_queue(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(message) => {
                    self.deliver(&message);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Low-priority messages currently queued.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Broadcast a notification from `from` to every supervisory agent.
    pub fn notify_supervisors(
        &self,
        from: impl Into<String>,
        data: Value,
    ) -> Result<(), OrchestrationError> {
        let supervisors: Vec<String> = self
            .registry
            .supervisors()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.send(AgentMessage::notification(from, supervisors, data))
    }

    /// Delivery counters and queue depth.
    pub fn stats(&self) -> BusStats {
        BusStats {
            messages_delivered: self.delivered.load(Ordering::Relaxed),
            queue_len: self.queue_len(),
            handlers: self.handlers.len(),
        }
    }

    fn deliver(&self, message: &AgentMessage) {
        for recipient in message.to.iter() {
            log::debug!(
                "[bus] {} -> {} ({:?})",
                message.from,
                recipient,
                message.kind
            );
            let handler = self
                .handlers
                .get(&(recipient.to_string(), message.kind))
                .map(|entry| entry.value().clone());
            match handler {
                Some(handler) => {
                    handler(message);
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                // No handler registered is not an error: delivery to an
                // unsubscribed agent is a no-op.
                None => log::debug!("[bus] no handler for {recipient}:{:?}", message.kind),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    fn test_bus() -> (Arc<MessageBus>, Arc<BudgetGovernor>) {
        let registry = Arc::new(AgentRegistry::builtin());
        let governor = Arc::new(BudgetGovernor::new(&OrchestratorConfig::default()));
        let bus = Arc::new(MessageBus::new(registry, governor.clone()));
        (bus, governor)
    }

    fn record_kinds(bus: &MessageBus, agent: &str, log: &Arc<PlMutex<Vec<String>>>) {
        for kind in [
            MessageKind::Request,
            MessageKind::Response,
            MessageKind::Notification,
            MessageKind::Error,
        ] {
            let log = log.clone();
            bus.on(agent, kind, move |message| {
                log.lock()
                    .push(message.data["tag"].as_str().unwrap_or("").to_string());
            });
        }
    }

    #[test]
    fn test_immediate_delivery_preserves_send_order() {
        let (bus, _) = test_bus();
        let received = Arc::new(PlMutex::new(Vec::new()));
        record_kinds(&bus, "cfo", &received);

        for (i, priority) in [Priority::High, Priority::Medium, Priority::High]
            .iter()
            .enumerate()
        {
            bus.send(
                AgentMessage::request("ceo", "cfo", json!({"tag": format!("m{i}")}))
                    .with_priority(*priority),
            )
            .unwrap();
        }
        assert_eq!(*received.lock(), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_low_priority_waits_for_drain() {
        let (bus, _) = test_bus();
        let received = Arc::new(PlMutex::new(Vec::new()));
        record_kinds(&bus, "cfo", &received);

        bus.send(
            AgentMessage::request("ceo", "cfo", json!({"tag": "high"}))
                .with_priority(Priority::High),
        )
        .unwrap();
        bus.send(
            AgentMessage::request("ceo", "cfo", json!({"tag": "medium"}))
                .with_priority(Priority::Medium),
        )
        .unwrap();
        bus.send(
            AgentMessage::request("ceo", "cfo", json!({"tag": "low"}))
                .with_priority(Priority::Low),
        )
        .unwrap();

        // The low message is parked until someone drains.
        assert_eq!(*received.lock(), vec!["high", "medium"]);
        assert_eq!(bus.queue_len(), 1);

        let drained = bus.drain_queue();
        assert_eq!(drained, 1);
        assert_eq!(*received.lock(), vec!["high", "medium", "low"]);
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_queued_messages_drain_in_enqueue_order() {
        let (bus, _) = test_bus();
        let received = Arc::new(PlMutex::new(Vec::new()));
        record_kinds(&bus, "smart-database", &received);

        for i in 0..5 {
            bus.send(
                AgentMessage::request("ceo", "smart-database", json!({"tag": format!("q{i}")}))
                    .with_priority(Priority::Low),
            )
            .unwrap();
        }
        assert!(received.lock().is_empty());
        assert_eq!(bus.drain_queue(), 5);
        assert_eq!(*received.lock(), vec!["q0", "q1", "q2", "q3", "q4"]);
    }

    #[test]
    fn test_list_recipients_delivered_in_order() {
        let (bus, _) = test_bus();
        let received = Arc::new(PlMutex::new(Vec::new()));
        for agent in ["ceo", "cfo"] {
            let log = received.clone();
            let agent_name = agent.to_string();
            bus.on(agent, MessageKind::Notification, move |_| {
                log.lock().push(agent_name.clone());
            });
        }

        bus.notify_supervisors("system", json!({"alert": "x"})).unwrap();
        // cto/cmo have no handler; that is a no-op, not an error.
        assert_eq!(*received.lock(), vec!["ceo", "cfo"]);
    }

    #[test]
    fn test_invalid_message_rejected() {
        let (bus, _) = test_bus();
        let err = bus
            .send(AgentMessage::request("", "cfo", json!({})))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidMessage { .. }));
    }

    #[test]
    fn test_send_records_unit_cost_per_message() {
        let (bus, governor) = test_bus();
        // talent-sourcer is a high-tier agent: 1.00 per message.
        for _ in 0..3 {
            bus.send(AgentMessage::request(
                "talent-sourcer",
                "ceo",
                json!({"found": 1}),
            ))
            .unwrap();
        }
        let snapshot = governor.snapshot();
        assert_eq!(snapshot.by_agent.get("talent-sourcer"), Some(&3.0));
        assert_eq!(snapshot.daily_total, 3.0);
    }

    #[test]
    fn test_unknown_sender_costs_nothing() {
        let (bus, governor) = test_bus();
        bus.send(AgentMessage::request("system", "ceo", json!({})))
            .unwrap();
        assert_eq!(governor.snapshot().daily_total, 0.0);
    }

    #[test]
    fn test_stats() {
        let (bus, _) = test_bus();
        bus.on("ceo", MessageKind::Request, |_| {});
        bus.send(AgentMessage::request("cfo", "ceo", json!({}))).unwrap();
        bus.send(
            AgentMessage::request("cfo", "ceo", json!({})).with_priority(Priority::Low),
        )
        .unwrap();
        let stats = bus.stats();
        assert_eq!(stats.messages_delivered, 1);
        assert_eq!(stats.queue_len, 1);
        assert_eq!(stats.handlers, 1);
    }
}
