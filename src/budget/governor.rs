//! Budget governor: gates spend against daily/monthly limits.
//!
//! Approval and spend recording happen under a single lock hold, so two
//! concurrent requests can never both be approved when only one fits the
//! remaining budget. The asynchronous approval round-trip is bounded by a
//! timeout whose outcome is decided by the configured
//! [`ApprovalPolicy`](crate::config::ApprovalPolicy); a late explicit answer
//! after the timeout has fired is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ledger::{AgentSpend, BudgetAlert, BudgetWindow, CostLedger, LedgerSnapshot};
use crate::config::{ApprovalPolicy, OrchestratorConfig};

/// Outcome of a budget approval check. Rejection is a result, not an error;
/// callers must inspect it rather than catch anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Approval {
    Approved {
        remaining_daily: f64,
        remaining_monthly: f64,
    },
    Rejected {
        reason: String,
    },
}

impl Approval {
    /// True when the request was approved.
    pub fn is_approved(&self) -> bool {
        matches!(self, Approval::Approved { .. })
    }
}

/// An in-flight asynchronous approval round-trip.
///
/// Created by [`BudgetGovernor::begin_approval`]; the `id` is what a remote
/// approver passes to [`BudgetGovernor::respond`]. Resolve it with
/// [`BudgetGovernor::finish_approval`].
pub struct ApprovalRequest {
    pub id: Uuid,
    pub agent_id: String,
    pub estimated_cost: f64,
    rx: oneshot::Receiver<bool>,
}

/// Tracks spend and gates expensive operations against budget limits.
pub struct BudgetGovernor {
    ledger: Mutex<CostLedger>,
    approval_policy: ApprovalPolicy,
    approval_timeout: Duration,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
    alert_tx: mpsc::UnboundedSender<BudgetAlert>,
    alert_rx: Mutex<Option<mpsc::UnboundedReceiver<BudgetAlert>>>,
}

impl BudgetGovernor {
    /// Create a governor from the runtime configuration.
    pub fn new(config: &OrchestratorConfig) -> Self {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        Self {
            ledger: Mutex::new(CostLedger::new(config.budget.clone())),
            approval_policy: config.approval_policy,
            approval_timeout: config.approval_timeout,
            pending: Mutex::new(HashMap::new()),
            alert_tx,
            alert_rx: Mutex::new(Some(alert_rx)),
        }
    }

    /// Take the budget-alert receiver. Intended for the supervisory
    /// consumer; returns `None` after the first call.
    pub fn take_alerts(&self) -> Option<mpsc::UnboundedReceiver<BudgetAlert>> {
        self.alert_rx.lock().take()
    }

    /// Record a spend event against an agent and the global windows.
    pub fn record_cost(&self, agent_id: &str, amount: f64) {
        let alerts = self.ledger.lock().record(agent_id, amount, Utc::now());
        self.publish_alerts(alerts);
    }

    /// Approve or reject an estimated spend. On approval the estimate is
    /// recorded immediately; the check and the recording share one lock
    /// hold so no caller can observe an intermediate state.
    pub fn request_approval(&self, agent_id: &str, estimated_cost: f64) -> Approval {
        let (decision, alerts) = {
            let mut ledger = self.ledger.lock();
            match ledger.would_exceed(estimated_cost) {
                Some(window) => {
                    let reason = match window {
                        BudgetWindow::Daily => "would exceed daily budget limit",
                        BudgetWindow::Monthly => "would exceed monthly budget limit",
                    };
                    log::info!(
                        "[budget] rejected {agent_id} for {estimated_cost:.2}: {reason}"
                    );
                    (
                        Approval::Rejected {
                            reason: reason.to_string(),
                        },
                        Vec::new(),
                    )
                }
                None => {
                    let alerts = ledger.record(agent_id, estimated_cost, Utc::now());
                    (
                        Approval::Approved {
                            remaining_daily: ledger.remaining_daily(),
                            remaining_monthly: ledger.remaining_monthly(),
                        },
                        alerts,
                    )
                }
            }
        };
        self.publish_alerts(alerts);
        decision
    }

    /// Open an asynchronous approval round-trip. The caller typically
    /// forwards `request.id` to the approving agent (e.g. over the bus) and
    /// then awaits [`finish_approval`](Self::finish_approval).
    pub fn begin_approval(&self, agent_id: &str, estimated_cost: f64) -> ApprovalRequest {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.pending.lock().insert(id, tx);
        ApprovalRequest {
            id,
            agent_id: agent_id.to_string(),
            estimated_cost,
            rx,
        }
    }

    /// Deliver an explicit decision for a pending request. Returns `false`
    /// when the request is unknown or its timeout has already fired, in
    /// which case the answer is discarded rather than applied retroactively.
    pub fn respond(&self, request_id: Uuid, approve: bool) -> bool {
        let sender = self.pending.lock().remove(&request_id);
        match sender {
            Some(tx) => tx.send(approve).is_ok(),
            None => {
                log::warn!("[budget] discarding late approval response for {request_id}");
                false
            }
        }
    }

    /// Await the outcome of an approval round-trip.
    ///
    /// The first outcome wins: an explicit answer before the deadline is
    /// final; once the timeout fires, the configured policy decides and the
    /// pending entry is dropped. An approved outcome (explicit or fail-open)
    /// records the estimated cost.
    pub async fn finish_approval(&self, request: ApprovalRequest) -> Approval {
        let ApprovalRequest {
            id,
            agent_id,
            estimated_cost,
            rx,
        } = request;

        match tokio::time::timeout(self.approval_timeout, rx).await {
            Ok(Ok(true)) => {
                self.record_cost(&agent_id, estimated_cost);
                let ledger = self.ledger.lock();
                Approval::Approved {
                    remaining_daily: ledger.remaining_daily(),
                    remaining_monthly: ledger.remaining_monthly(),
                }
            }
            Ok(Ok(false)) => Approval::Rejected {
                reason: "declined by approver".to_string(),
            },
            // Timeout, or the responder side went away without answering.
            _ => {
                self.pending.lock().remove(&id);
                log::warn!(
                    "[budget] approval round-trip for {agent_id} timed out after {:?}, applying {:?}",
                    self.approval_timeout,
                    self.approval_policy
                );
                match self.approval_policy {
                    ApprovalPolicy::FailOpen => {
                        self.record_cost(&agent_id, estimated_cost);
                        let ledger = self.ledger.lock();
                        Approval::Approved {
                            remaining_daily: ledger.remaining_daily(),
                            remaining_monthly: ledger.remaining_monthly(),
                        }
                    }
                    ApprovalPolicy::FailClosed => Approval::Rejected {
                        reason: "approval timed out".to_string(),
                    },
                }
            }
        }
    }

    /// Roll budget windows if a calendar boundary has passed. Invoked from
    /// the background window task; safe to call directly (tests).
    pub fn maybe_roll_windows(&self) -> bool {
        let rolled = self.ledger.lock().roll_windows(Local::now());
        if rolled {
            log::info!("[budget] budget window rolled over");
        }
        rolled
    }

    /// Spawn the periodic window rollover check. Resets land at most one
    /// interval after the calendar boundary.
    pub fn spawn_window_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                governor.maybe_roll_windows();
            }
        })
    }

    /// Current totals.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().snapshot()
    }

    /// Per-agent spend sorted by descending amount.
    pub fn breakdown(&self) -> Vec<AgentSpend> {
        self.ledger.lock().breakdown()
    }

    fn publish_alerts(&self, alerts: Vec<BudgetAlert>) {
        for alert in alerts {
            log::warn!(
                "[budget] {:?} spend {:.2} crossed {:.0}% of limit {:.2}",
                alert.window,
                alert.spent,
                alert.fraction * 100.0,
                alert.limit
            );
            // Receiver may have been dropped; alerting stays best-effort.
            let _ = self.alert_tx.send(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetPolicy;

    fn governor_with(daily: f64, monthly: f64, policy: ApprovalPolicy) -> BudgetGovernor {
        let mut config = OrchestratorConfig::default();
        config.budget = BudgetPolicy {
            daily_limit: daily,
            monthly_limit: monthly,
            alert_threshold: 0.8,
        };
        config.approval_policy = policy;
        config.approval_timeout = Duration::from_millis(50);
        BudgetGovernor::new(&config)
    }

    #[test]
    fn test_approval_scenario_near_daily_limit() {
        // dailyLimit=10, currentSpend=9.5: 1.0 rejected, 0.4 approved at 9.9.
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailOpen);
        governor.record_cost("agent", 9.5);

        let rejected = governor.request_approval("agent", 1.0);
        assert!(!rejected.is_approved());

        let approved = governor.request_approval("agent", 0.4);
        assert!(approved.is_approved());
        let snapshot = governor.snapshot();
        assert!((snapshot.daily_total - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_limit_rejects_independently() {
        let governor = governor_with(1000.0, 5.0, ApprovalPolicy::FailOpen);
        governor.record_cost("agent", 4.0);
        let decision = governor.request_approval("agent", 2.0);
        assert_eq!(
            decision,
            Approval::Rejected {
                reason: "would exceed monthly budget limit".to_string()
            }
        );
        // Rejected requests record nothing.
        assert!((governor.snapshot().monthly_total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_approvals_only_one_fits() {
        let governor = Arc::new(governor_with(10.0, 1000.0, ApprovalPolicy::FailOpen));
        governor.record_cost("agent", 9.0);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let governor = Arc::clone(&governor);
            handles.push(std::thread::spawn(move || {
                governor.request_approval("agent", 1.0).is_approved()
            }));
        }
        let approved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        // Exactly one request fit the remaining budget.
        assert_eq!(approved, 1);
        assert!((governor.snapshot().daily_total - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_alert_channel_fires_once() {
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailOpen);
        let mut alerts = governor.take_alerts().unwrap();
        governor.record_cost("agent", 8.5);
        governor.record_cost("agent", 0.5);
        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.window, BudgetWindow::Daily);
        assert!(alerts.try_recv().is_err());
        // Receiver is handed out only once.
        assert!(governor.take_alerts().is_none());
    }

    #[tokio::test]
    async fn test_explicit_approval_wins_and_records() {
        let governor = Arc::new(governor_with(10.0, 1000.0, ApprovalPolicy::FailClosed));
        let request = governor.begin_approval("agent", 2.0);
        assert!(governor.respond(request.id, true));
        let decision = governor.finish_approval(request).await;
        assert!(decision.is_approved());
        assert!((governor.snapshot().daily_total - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_explicit_rejection() {
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailOpen);
        let request = governor.begin_approval("agent", 2.0);
        governor.respond(request.id, false);
        let decision = governor.finish_approval(request).await;
        assert!(!decision.is_approved());
        assert_eq!(governor.snapshot().daily_total, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fail_open_approves_and_records() {
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailOpen);
        let request = governor.begin_approval("agent", 3.0);
        let decision = governor.finish_approval(request).await;
        assert!(decision.is_approved());
        assert!((governor.snapshot().daily_total - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fail_closed_rejects() {
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailClosed);
        let request = governor.begin_approval("agent", 3.0);
        let decision = governor.finish_approval(request).await;
        assert!(!decision.is_approved());
        assert_eq!(governor.snapshot().daily_total, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_discarded() {
        let governor = governor_with(10.0, 1000.0, ApprovalPolicy::FailClosed);
        let request = governor.begin_approval("agent", 3.0);
        let id = request.id;
        let decision = governor.finish_approval(request).await;
        assert!(!decision.is_approved());
        // The round-trip already resolved; a late answer changes nothing.
        assert!(!governor.respond(id, true));
        assert_eq!(governor.snapshot().daily_total, 0.0);
    }
}
