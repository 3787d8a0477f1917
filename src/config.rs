//! Runtime configuration for the orchestration core.
//!
//! Budget limits are read from the `DAILY_BUDGET_LIMIT` and
//! `MONTHLY_BUDGET_LIMIT` environment variables when
//! [`OrchestratorConfig::from_env`] is used; everything else carries
//! defaults suitable for tests and embedded use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Spend ceilings and the alert threshold, process-wide.
///
/// Limits are currency-agnostic magnitudes. Daily totals reset on local-date
/// rollover, monthly totals on month rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Maximum spend per calendar day.
    pub daily_limit: f64,
    /// Maximum spend per calendar month.
    pub monthly_limit: f64,
    /// Fraction of a limit at which a budget alert fires (edge-triggered).
    pub alert_threshold: f64,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            daily_limit: 100.0,
            monthly_limit: 2500.0,
            alert_threshold: 0.8,
        }
    }
}

/// What an unresolved budget-approval round-trip defaults to.
///
/// The historical behavior is fail-open: a request that times out waiting
/// for the budget authority is treated as approved. Fail-closed is available
/// for deployments that prefer to block instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Timeout resolves as approved.
    FailOpen,
    /// Timeout resolves as rejected.
    FailClosed,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy::FailOpen
    }
}

/// Top-level configuration handed to [`crate::context::OrchestrationContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget ceilings and alert threshold.
    pub budget: BudgetPolicy,
    /// Default outcome when an approval round-trip times out.
    pub approval_policy: ApprovalPolicy,
    /// Bound on the asynchronous approval round-trip.
    pub approval_timeout: Duration,
    /// Interval of the pipeline monitor tick.
    pub poll_interval: Duration,
    /// Interval of the budget window rollover check. Resets may land up to
    /// one interval after the calendar boundary.
    pub window_check_interval: Duration,
    /// Retries per pipeline stage before substitute lookup kicks in.
    pub max_stage_retries: u32,
    /// Base backoff between stage retries (scaled by attempt count).
    pub retry_backoff: Duration,
    /// Average latency above which the health monitor raises an alert.
    pub latency_limit: Duration,
    /// Trailing-window error rate above which the health monitor raises
    /// an alert.
    pub error_rate_limit: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: BudgetPolicy::default(),
            approval_policy: ApprovalPolicy::default(),
            approval_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            window_check_interval: Duration::from_secs(60),
            max_stage_retries: 2,
            retry_backoff: Duration::from_secs(30),
            latency_limit: Duration::from_secs(300),
            error_rate_limit: 0.3,
        }
    }
}

impl OrchestratorConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_f64("DAILY_BUDGET_LIMIT") {
            config.budget.daily_limit = v;
        }
        if let Some(v) = env_f64("MONTHLY_BUDGET_LIMIT") {
            config.budget.monthly_limit = v;
        }
        if let Some(v) = env_f64("BUDGET_ALERT_THRESHOLD") {
            config.budget.alert_threshold = v;
        }
        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
