//! Per-agent health tracking: response latencies, error log, and
//! threshold alerts.
//!
//! Latency samples live in a bounded ring (oldest dropped first), the error
//! log in a smaller one. Alerts are edge-triggered like budget alerts: one
//! alert when a metric crosses its limit, re-armed once the metric recovers.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;

/// Latency samples retained per agent.
const LATENCY_RING: usize = 100;
/// Error entries retained per agent.
const ERROR_RING: usize = 50;
/// Observations required before the error-rate threshold can fire.
const MIN_OBSERVATIONS: u64 = 5;

/// Which health metric crossed its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthMetric {
    Latency,
    ErrorRate,
}

/// Emitted once when an agent's metric crosses its configured limit.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub agent_id: String,
    pub metric: HealthMetric,
    /// Observed value: average latency in seconds, or error rate in [0, 1].
    pub value: f64,
    pub limit: f64,
}

/// One logged error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Point-in-time health summary for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthReport {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_latency_secs: Option<f64>,
    pub error_rate: f64,
    pub latency_samples: u64,
    pub error_count: u64,
    pub recent_errors: Vec<ErrorEntry>,
}

#[derive(Debug, Default)]
struct AgentHealth {
    latencies: VecDeque<Duration>,
    latency_samples: u64,
    errors: VecDeque<ErrorEntry>,
    error_count: u64,
    latency_alerted: bool,
    error_rate_alerted: bool,
}

impl AgentHealth {
    fn push_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_RING {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        self.latency_samples += 1;
    }

    fn push_error(&mut self, reason: &str) {
        if self.errors.len() == ERROR_RING {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorEntry {
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.error_count += 1;
    }

    fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// Observations currently retained in the rings (successes + errors).
    /// Lifetime counters are kept for reporting only; the rate must recover
    /// once bad history falls out of the window.
    fn retained_observations(&self) -> usize {
        self.latencies.len() + self.errors.len()
    }

    /// Errors as a fraction of the observations retained in the rings.
    fn error_rate(&self) -> f64 {
        let observations = self.retained_observations();
        if observations == 0 {
            0.0
        } else {
            self.errors.len() as f64 / observations as f64
        }
    }
}

/// Tracks per-agent latency and error history and raises threshold alerts.
pub struct HealthMonitor {
    agents: DashMap<String, AgentHealth>,
    latency_limit: Duration,
    error_rate_limit: f64,
    alert_tx: mpsc::UnboundedSender<HealthAlert>,
    alert_rx: Mutex<Option<mpsc::UnboundedReceiver<HealthAlert>>>,
}

impl HealthMonitor {
    pub fn new(config: &OrchestratorConfig) -> Self {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        Self {
            agents: DashMap::new(),
            latency_limit: config.latency_limit,
            error_rate_limit: config.error_rate_limit,
            alert_tx,
            alert_rx: Mutex::new(Some(alert_rx)),
        }
    }

    /// Take the alert receiver. Yields `Some` exactly once.
    pub fn take_alerts(&self) -> Option<mpsc::UnboundedReceiver<HealthAlert>> {
        self.alert_rx.lock().take()
    }

    /// Record a successful response and its latency.
    pub fn record_latency(&self, agent_id: &str, latency: Duration) {
        self.agents
            .entry(agent_id.to_string())
            .or_default()
            .push_latency(latency);
    }

    /// Record a failed response.
    pub fn record_error(&self, agent_id: &str, reason: &str) {
        log::debug!("[monitor] error from {agent_id}: {reason}");
        self.agents
            .entry(agent_id.to_string())
            .or_default()
            .push_error(reason);
    }

    /// Average latency over the retained window, if any sample exists.
    pub fn average_latency(&self, agent_id: &str) -> Option<Duration> {
        self.agents.get(agent_id).and_then(|h| h.average_latency())
    }

    /// Error rate over the retained observation window (0.0 when unseen).
    pub fn error_rate(&self, agent_id: &str) -> f64 {
        self.agents.get(agent_id).map_or(0.0, |h| h.error_rate())
    }

    /// Health summaries for every observed agent, sorted by id.
    pub fn report(&self) -> Vec<AgentHealthReport> {
        let mut reports: Vec<AgentHealthReport> = self
            .agents
            .iter()
            .map(|entry| AgentHealthReport {
                agent_id: entry.key().clone(),
                average_latency_secs: entry.average_latency().map(|d| d.as_secs_f64()),
                error_rate: entry.error_rate(),
                latency_samples: entry.latency_samples,
                error_count: entry.error_count,
                recent_errors: entry.errors.iter().cloned().collect(),
            })
            .collect();
        reports.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        reports
    }

    /// One threshold pass over every agent. Each limit crossing emits one
    /// alert; the flag re-arms when the metric drops back under the limit.
    pub fn check(&self) {
        for mut entry in self.agents.iter_mut() {
            let agent_id = entry.key().clone();
            let health = entry.value_mut();

            if let Some(average) = health.average_latency() {
                if average > self.latency_limit {
                    if !health.latency_alerted {
                        health.latency_alerted = true;
                        self.emit(HealthAlert {
                            agent_id: agent_id.clone(),
                            metric: HealthMetric::Latency,
                            value: average.as_secs_f64(),
                            limit: self.latency_limit.as_secs_f64(),
                        });
                    }
                } else {
                    health.latency_alerted = false;
                }
            }

            let observations = health.retained_observations() as u64;
            let rate = health.error_rate();
            if observations >= MIN_OBSERVATIONS && rate > self.error_rate_limit {
                if !health.error_rate_alerted {
                    health.error_rate_alerted = true;
                    self.emit(HealthAlert {
                        agent_id,
                        metric: HealthMetric::ErrorRate,
                        value: rate,
                        limit: self.error_rate_limit,
                    });
                }
            } else {
                health.error_rate_alerted = false;
            }
        }
    }

    /// Spawn a periodic threshold-check task.
    pub fn spawn_check_task(
        self: &std::sync::Arc<Self>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check();
            }
        })
    }

    fn emit(&self, alert: HealthAlert) {
        log::warn!(
            "[monitor] {} crossed {:?} limit: {:.3} > {:.3}",
            alert.agent_id,
            alert.metric,
            alert.value,
            alert.limit
        );
        let _ = self.alert_tx.send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_limits(latency_secs: u64, error_rate: f64) -> HealthMonitor {
        let mut config = OrchestratorConfig::default();
        config.latency_limit = Duration::from_secs(latency_secs);
        config.error_rate_limit = error_rate;
        HealthMonitor::new(&config)
    }

    #[test]
    fn test_average_latency_over_window() {
        let monitor = monitor_with_limits(300, 0.3);
        monitor.record_latency("cfo", Duration::from_secs(2));
        monitor.record_latency("cfo", Duration::from_secs(4));
        assert_eq!(monitor.average_latency("cfo"), Some(Duration::from_secs(3)));
        assert_eq!(monitor.average_latency("unseen"), None);
    }

    #[test]
    fn test_latency_ring_drops_oldest() {
        let monitor = monitor_with_limits(300, 0.3);
        monitor.record_latency("cfo", Duration::from_secs(1000));
        for _ in 0..LATENCY_RING {
            monitor.record_latency("cfo", Duration::from_secs(2));
        }
        // The 1000s outlier has been evicted.
        assert_eq!(monitor.average_latency("cfo"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_error_rate_counts_retained_observations() {
        let monitor = monitor_with_limits(300, 0.3);
        for _ in 0..3 {
            monitor.record_latency("auto-recruiter", Duration::from_secs(1));
        }
        monitor.record_error("auto-recruiter", "scrape failed");
        assert!((monitor.error_rate("auto-recruiter") - 0.25).abs() < 1e-9);
        assert_eq!(monitor.error_rate("unseen"), 0.0);
    }

    #[test]
    fn test_error_rate_is_windowed_not_lifetime() {
        let monitor = monitor_with_limits(300, 0.3);
        monitor.record_error("auto-recruiter", "scrape failed");
        // Far more successes than the ring retains: the denominator is the
        // retained window (100 + 1), not the lifetime total (200 + 1).
        for _ in 0..200 {
            monitor.record_latency("auto-recruiter", Duration::from_secs(1));
        }
        assert!((monitor.error_rate("auto-recruiter") - 1.0 / 101.0).abs() < 1e-9);
        // Lifetime counters survive for reporting.
        let report = monitor.report();
        assert_eq!(report[0].latency_samples, 200);
        assert_eq!(report[0].error_count, 1);
    }

    #[test]
    fn test_error_rate_alert_rearms_as_window_recovers() {
        let monitor = monitor_with_limits(300, 0.3);
        let mut alerts = monitor.take_alerts().unwrap();

        // 4 errors out of 5 observations crosses the limit.
        monitor.record_latency("talent-sourcer", Duration::from_secs(1));
        for _ in 0..4 {
            monitor.record_error("talent-sourcer", "boom");
        }
        monitor.check();
        assert_eq!(alerts.try_recv().unwrap().metric, HealthMetric::ErrorRate);

        // Successes push the windowed rate back under the limit, which
        // re-arms the edge trigger.
        for _ in 0..96 {
            monitor.record_latency("talent-sourcer", Duration::from_secs(1));
        }
        monitor.check();
        assert!(alerts.try_recv().is_err());
        assert!(monitor.error_rate("talent-sourcer") < 0.3);

        // A new error burst crosses the limit again and fires a fresh alert.
        for _ in 0..60 {
            monitor.record_error("talent-sourcer", "boom again");
        }
        monitor.check();
        assert_eq!(alerts.try_recv().unwrap().metric, HealthMetric::ErrorRate);
    }

    #[test]
    fn test_latency_alert_is_edge_triggered() {
        let monitor = monitor_with_limits(5, 0.99);
        let mut alerts = monitor.take_alerts().unwrap();

        monitor.record_latency("cfo", Duration::from_secs(60));
        monitor.check();
        monitor.check();
        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.agent_id, "cfo");
        assert_eq!(alert.metric, HealthMetric::Latency);
        // Second check did not re-fire while still over the limit.
        assert!(alerts.try_recv().is_err());

        // Enough fast samples pull the average back under; flag re-arms.
        for _ in 0..99 {
            monitor.record_latency("cfo", Duration::from_secs(1));
        }
        monitor.check();
        assert!(alerts.try_recv().is_err());
        monitor.record_latency("cfo", Duration::from_secs(50_000));
        monitor.check();
        assert_eq!(alerts.try_recv().unwrap().metric, HealthMetric::Latency);
    }

    #[test]
    fn test_error_rate_alert_needs_minimum_observations() {
        let monitor = monitor_with_limits(300, 0.3);
        let mut alerts = monitor.take_alerts().unwrap();

        // One error out of one observation is a 100% rate, but too few
        // observations to alert on.
        monitor.record_error("talent-sourcer", "boom");
        monitor.check();
        assert!(alerts.try_recv().is_err());

        monitor.record_latency("talent-sourcer", Duration::from_secs(1));
        for _ in 0..3 {
            monitor.record_error("talent-sourcer", "boom");
        }
        monitor.check();
        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.metric, HealthMetric::ErrorRate);
        assert!(alert.value > 0.3);
    }

    #[test]
    fn test_report_sorted_by_agent() {
        let monitor = monitor_with_limits(300, 0.3);
        monitor.record_latency("cfo", Duration::from_secs(1));
        monitor.record_error("auto-recruiter", "x");
        let report = monitor.report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].agent_id, "auto-recruiter");
        assert_eq!(report[0].error_count, 1);
        assert_eq!(report[1].agent_id, "cfo");
        assert_eq!(report[1].average_latency_secs, Some(1.0));
    }
}
