//! Append-only cost ledger with edge-triggered budget alerts.
//!
//! The ledger is plain state; [`crate::budget::BudgetGovernor`] wraps it in
//! a mutex so that approval checks and spend recording happen under one
//! lock hold.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BudgetPolicy;

/// Which budget window an alert or rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindow {
    Daily,
    Monthly,
}

/// Alert emitted once per threshold crossing per window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub window: BudgetWindow,
    pub spent: f64,
    pub limit: f64,
    /// `spent / limit` at the time of the crossing.
    pub fraction: f64,
}

/// One recorded spend event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub agent_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time totals.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub daily_total: f64,
    pub monthly_total: f64,
    pub by_agent: HashMap<String, f64>,
}

/// Per-agent spend with its share of the monthly total.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSpend {
    pub agent_id: String,
    pub amount: f64,
    /// Fraction of the current monthly total, 0 when nothing was spent.
    pub share_of_monthly: f64,
}

/// Running spend totals per agent and globally.
#[derive(Debug)]
pub(crate) struct CostLedger {
    policy: BudgetPolicy,
    by_agent: HashMap<String, f64>,
    entries: Vec<CostLedgerEntry>,
    daily_total: f64,
    monthly_total: f64,
    daily_alerted: bool,
    monthly_alerted: bool,
    window_start: DateTime<Local>,
}

impl CostLedger {
    pub(crate) fn new(policy: BudgetPolicy) -> Self {
        Self {
            policy,
            by_agent: HashMap::new(),
            entries: Vec::new(),
            daily_total: 0.0,
            monthly_total: 0.0,
            daily_alerted: false,
            monthly_alerted: false,
            window_start: Local::now(),
        }
    }

    /// Record a spend event. Returns any alerts whose threshold was crossed
    /// by exactly this event; a total already above threshold does not
    /// re-fire.
    pub(crate) fn record(&mut self, agent_id: &str, amount: f64, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        self.daily_total += amount;
        self.monthly_total += amount;
        *self.by_agent.entry(agent_id.to_string()).or_insert(0.0) += amount;
        self.entries.push(CostLedgerEntry {
            agent_id: agent_id.to_string(),
            amount,
            timestamp: now,
        });

        let mut alerts = Vec::new();
        if !self.daily_alerted
            && self.daily_total >= self.policy.daily_limit * self.policy.alert_threshold
        {
            self.daily_alerted = true;
            alerts.push(BudgetAlert {
                window: BudgetWindow::Daily,
                spent: self.daily_total,
                limit: self.policy.daily_limit,
                fraction: self.daily_total / self.policy.daily_limit,
            });
        }
        if !self.monthly_alerted
            && self.monthly_total >= self.policy.monthly_limit * self.policy.alert_threshold
        {
            self.monthly_alerted = true;
            alerts.push(BudgetAlert {
                window: BudgetWindow::Monthly,
                spent: self.monthly_total,
                limit: self.policy.monthly_limit,
                fraction: self.monthly_total / self.policy.monthly_limit,
            });
        }
        alerts
    }

    /// The first window an additional `estimate` would breach, if any.
    pub(crate) fn would_exceed(&self, estimate: f64) -> Option<BudgetWindow> {
        if self.daily_total + estimate > self.policy.daily_limit {
            Some(BudgetWindow::Daily)
        } else if self.monthly_total + estimate > self.policy.monthly_limit {
            Some(BudgetWindow::Monthly)
        } else {
            None
        }
    }

    pub(crate) fn remaining_daily(&self) -> f64 {
        self.policy.daily_limit - self.daily_total
    }

    pub(crate) fn remaining_monthly(&self) -> f64 {
        self.policy.monthly_limit - self.monthly_total
    }

    /// Roll budget windows if a calendar boundary has passed since the last
    /// check. Daily totals reset on local-date change; monthly totals and
    /// all per-agent aggregates reset on month change. Returns whether any
    /// reset happened.
    pub(crate) fn roll_windows(&mut self, now: DateTime<Local>) -> bool {
        let mut rolled = false;
        if now.date_naive() != self.window_start.date_naive() {
            self.daily_total = 0.0;
            self.daily_alerted = false;
            rolled = true;
        }
        if now.month() != self.window_start.month() || now.year() != self.window_start.year() {
            self.monthly_total = 0.0;
            self.monthly_alerted = false;
            self.by_agent.clear();
            self.entries.clear();
            rolled = true;
        }
        if rolled {
            self.window_start = now;
        }
        rolled
    }

    pub(crate) fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            daily_total: self.daily_total,
            monthly_total: self.monthly_total,
            by_agent: self.by_agent.clone(),
        }
    }

    /// Per-agent spend sorted by descending amount.
    pub(crate) fn breakdown(&self) -> Vec<AgentSpend> {
        let mut spends: Vec<AgentSpend> = self
            .by_agent
            .iter()
            .map(|(agent_id, amount)| AgentSpend {
                agent_id: agent_id.clone(),
                amount: *amount,
                share_of_monthly: if self.monthly_total > 0.0 {
                    amount / self.monthly_total
                } else {
                    0.0
                },
            })
            .collect();
        spends.sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(std::cmp::Ordering::Equal));
        spends
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[CostLedgerEntry] {
        &self.entries
    }
}
