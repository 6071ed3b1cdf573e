//! Process-wide request metrics.
//!
//! Counters are monotonically increasing atomics. Every dispatched request
//! reports exactly once after its backend call resolves; recovered errors that
//! never reach a backend (rate limiting, context load failures, persistence
//! failures) have their own counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, TutorError};

/// Outcome of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    /// Whether a usable result was produced.
    pub success: bool,
    /// End-to-end backend latency, including a fallback attempt.
    pub latency_ms: u64,
    /// Whether a non-preferred backend served (or last attempted) the request.
    pub used_fallback: bool,
    /// The requesting user.
    pub user_id: String,
}

/// Point-in-time view of the aggregate metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Dispatched requests.
    pub total_requests: u64,
    /// Requests that produced a usable result.
    pub successful_requests: u64,
    /// Requests that failed after dispatch.
    pub failed_requests: u64,
    /// Sum of request latencies.
    pub sum_response_time_ms: u64,
    /// Mean request latency; 0 when no requests.
    pub average_response_time: f64,
    /// Requests served by a non-preferred backend.
    pub fallback_count: u64,
    /// `fallback_count / total_requests`; 0 when no requests.
    pub fallback_rate: f64,
    /// Distinct users seen in the current aggregation period.
    pub active_users: usize,
    /// Mean satisfaction score on a 1-5 scale; 0 when no feedback.
    pub user_satisfaction: f64,
    /// Number of satisfaction scores received.
    pub satisfaction_responses: u64,
    /// Requests denied by the rate limiter.
    pub rate_limited_requests: u64,
    /// Backend responses that could not be parsed.
    pub malformed_outputs: u64,
    /// Context loads that fell back to a default.
    pub context_load_failures: u64,
    /// Persistence writes or queries that failed.
    pub persistence_failures: u64,
}

/// Aggregates request outcomes.
#[derive(Debug)]
pub struct MetricsCollector {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    sum_response_ms: AtomicU64,
    fallback: AtomicU64,
    satisfaction_sum: AtomicU64,
    satisfaction_count: AtomicU64,
    rate_limited: AtomicU64,
    malformed: AtomicU64,
    context_load_failures: AtomicU64,
    persistence_failures: AtomicU64,
    active_users: DashSet<String>,
    period_started: AtomicI64,
    period_secs: i64,
    feature_flags: BTreeMap<String, bool>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl MetricsCollector {
    /// Creates a collector using the metrics settings and feature flags in `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            sum_response_ms: AtomicU64::new(0),
            fallback: AtomicU64::new(0),
            satisfaction_sum: AtomicU64::new(0),
            satisfaction_count: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            context_load_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            active_users: DashSet::new(),
            period_started: AtomicI64::new(Utc::now().timestamp()),
            period_secs: i64::try_from(config.metrics.active_user_period_secs)
                .unwrap_or(i64::MAX),
            feature_flags: config.feature_flags.clone(),
        }
    }

    /// Records the outcome of one dispatched request.
    pub fn record_request(&self, outcome: &RequestOutcome) {
        self.roll_period(Utc::now());

        self.total.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.sum_response_ms
            .fetch_add(outcome.latency_ms, Ordering::Relaxed);
        if outcome.used_fallback {
            self.fallback.fetch_add(1, Ordering::Relaxed);
        }
        if !self.active_users.contains(&outcome.user_id) {
            self.active_users.insert(outcome.user_id.clone());
        }
    }

    /// Records a satisfaction score between 1 and 5.
    pub fn record_satisfaction(&self, score: u8) -> Result<()> {
        if !(1..=5).contains(&score) {
            return Err(TutorError::invalid_request(format!(
                "satisfaction score must be between 1 and 5 (got {score})"
            )));
        }
        self.satisfaction_sum
            .fetch_add(u64::from(score), Ordering::Relaxed);
        self.satisfaction_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Counts a request denied by the rate limiter.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a backend response that could not be parsed.
    pub fn record_malformed_output(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a context load that fell back to a default.
    pub fn record_context_load_failure(&self) {
        self.context_load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failed persistence write or query.
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Clears the active-user set if the aggregation period containing `now`
    /// has moved on. Returns `true` if the period rolled.
    pub fn roll_period(&self, now: DateTime<Utc>) -> bool {
        let started = self.period_started.load(Ordering::Acquire);
        let now_secs = now.timestamp();
        if now_secs.saturating_sub(started) < self.period_secs {
            return false;
        }
        // Only the thread that wins the swap clears the set
        if self
            .period_started
            .compare_exchange(started, now_secs, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let previous = self.active_users.len();
        self.active_users.clear();
        debug!(previous_active_users = previous, "Metrics aggregation period rolled");
        true
    }

    /// Returns whether the named feature flag is enabled.
    #[must_use]
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.feature_flags.get(name).copied().unwrap_or(false)
    }

    /// Returns a snapshot of the aggregate metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let sum_response_time_ms = self.sum_response_ms.load(Ordering::Relaxed);
        let fallback_count = self.fallback.load(Ordering::Relaxed);
        let satisfaction_responses = self.satisfaction_count.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            sum_response_time_ms,
            average_response_time: ratio(sum_response_time_ms, total),
            fallback_count,
            fallback_rate: ratio(fallback_count, total),
            active_users: self.active_users.len(),
            user_satisfaction: ratio(
                self.satisfaction_sum.load(Ordering::Relaxed),
                satisfaction_responses,
            ),
            satisfaction_responses,
            rate_limited_requests: self.rate_limited.load(Ordering::Relaxed),
            malformed_outputs: self.malformed.load(Ordering::Relaxed),
            context_load_failures: self.context_load_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::FEATURE_ANALYTICS;

    fn outcome(user: &str, success: bool, latency_ms: u64, used_fallback: bool) -> RequestOutcome {
        RequestOutcome {
            success,
            latency_ms,
            used_fallback,
            user_id: user.to_string(),
        }
    }

    #[test]
    fn test_empty_snapshot_has_zero_rates() {
        let metrics = MetricsCollector::new(&Config::default()).metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.average_response_time, 0.0);
        assert_eq!(metrics.fallback_rate, 0.0);
        assert_eq!(metrics.user_satisfaction, 0.0);
    }

    #[test]
    fn test_record_request_aggregates() {
        let collector = MetricsCollector::new(&Config::default());
        collector.record_request(&outcome("u1", true, 100, false));
        collector.record_request(&outcome("u2", true, 300, true));
        collector.record_request(&outcome("u1", false, 200, true));
        collector.record_request(&outcome("u3", true, 400, false));

        let m = collector.metrics();
        assert_eq!(m.total_requests, 4);
        assert_eq!(m.successful_requests, 3);
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.sum_response_time_ms, 1000);
        assert_eq!(m.average_response_time, 250.0);
        assert_eq!(m.fallback_count, 2);
        assert_eq!(m.fallback_rate, 0.5);
        assert_eq!(m.active_users, 3);
    }

    #[test]
    fn test_satisfaction_running_average() {
        let collector = MetricsCollector::new(&Config::default());
        collector.record_satisfaction(5).unwrap();
        collector.record_satisfaction(4).unwrap();
        collector.record_satisfaction(3).unwrap();

        let m = collector.metrics();
        assert_eq!(m.user_satisfaction, 4.0);
        assert_eq!(m.satisfaction_responses, 3);
    }

    #[test]
    fn test_satisfaction_out_of_range() {
        let collector = MetricsCollector::new(&Config::default());
        assert!(matches!(
            collector.record_satisfaction(0),
            Err(TutorError::InvalidRequest { .. })
        ));
        assert!(collector.record_satisfaction(6).is_err());
        assert_eq!(collector.metrics().satisfaction_responses, 0);
    }

    #[test]
    fn test_error_counters() {
        let collector = MetricsCollector::new(&Config::default());
        collector.record_rate_limited();
        collector.record_malformed_output();
        collector.record_malformed_output();
        collector.record_context_load_failure();
        collector.record_persistence_failure();

        let m = collector.metrics();
        assert_eq!(m.rate_limited_requests, 1);
        assert_eq!(m.malformed_outputs, 2);
        assert_eq!(m.context_load_failures, 1);
        assert_eq!(m.persistence_failures, 1);
        // None of these are dispatched requests
        assert_eq!(m.total_requests, 0);
    }

    #[test]
    fn test_roll_period_clears_active_users_only() {
        let mut config = Config::default();
        config.metrics.active_user_period_secs = 60;
        let collector = MetricsCollector::new(&config);
        collector.record_request(&outcome("u1", true, 10, false));

        assert!(!collector.roll_period(Utc::now()));
        assert!(collector.roll_period(Utc::now() + Duration::seconds(61)));

        let m = collector.metrics();
        assert_eq!(m.active_users, 0);
        assert_eq!(m.total_requests, 1);
    }

    #[test]
    fn test_feature_flags_from_config() {
        let mut config = Config::default();
        config
            .feature_flags
            .insert(FEATURE_ANALYTICS.to_string(), false);
        let collector = MetricsCollector::new(&config);

        assert!(!collector.is_feature_enabled(FEATURE_ANALYTICS));
        assert!(collector.is_feature_enabled(crate::config::FEATURE_MULTI_MODAL));
        assert!(!collector.is_feature_enabled("unknown"));
    }
}
