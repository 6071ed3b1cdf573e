//! Backend health tracking with failure hysteresis.
//!
//! A service becomes unhealthy only after `failureThreshold` consecutive failed
//! outcomes and becomes healthy again after a single success. Outcomes come
//! from live calls and from a background probe loop per service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ServiceId};
use crate::websocket::{EventBroadcaster, TutorEvent};

/// Health state of one backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthRecord {
    /// The service this record describes.
    pub service_id: ServiceId,
    /// Whether the router may prefer this service.
    pub healthy: bool,
    /// Failed outcomes since the last success.
    pub consecutive_failures: u32,
    /// When the last outcome was recorded.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Latency of the last outcome that reported one.
    pub last_latency_ms: Option<u64>,
}

impl ServiceHealthRecord {
    /// Creates a healthy record with no history.
    #[must_use]
    pub const fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            healthy: true,
            consecutive_failures: 0,
            last_checked_at: None,
            last_latency_ms: None,
        }
    }

    /// Applies one outcome. Returns `true` if `healthy` flipped.
    fn apply(&mut self, success: bool, latency_ms: Option<u64>, threshold: u32) -> bool {
        let was_healthy = self.healthy;
        self.last_checked_at = Some(Utc::now());
        if latency_ms.is_some() {
            self.last_latency_ms = latency_ms;
        }

        if success {
            self.consecutive_failures = 0;
            self.healthy = true;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures >= threshold {
                self.healthy = false;
            }
        }

        was_healthy != self.healthy
    }
}

/// Tracks the health of every registered backend.
#[derive(Debug)]
pub struct HealthMonitor {
    threshold: u32,
    records: DashMap<ServiceId, ServiceHealthRecord>,
    events: EventBroadcaster,
}

impl HealthMonitor {
    /// Creates a monitor with a healthy record for both services.
    #[must_use]
    pub fn new(failure_threshold: u32, events: EventBroadcaster) -> Self {
        let records = DashMap::new();
        for id in ServiceId::ALL {
            records.insert(id, ServiceHealthRecord::new(id));
        }
        Self {
            threshold: failure_threshold.max(1),
            records,
            events,
        }
    }

    /// Returns whether a service is currently considered healthy.
    #[must_use]
    pub fn is_service_healthy(&self, id: ServiceId) -> bool {
        self.records.get(&id).map_or(true, |r| r.healthy)
    }

    /// Records the outcome of a live call or probe.
    ///
    /// Returns `true` if the outcome changed the service's health.
    pub fn record_outcome(&self, id: ServiceId, success: bool, latency_ms: Option<u64>) -> bool {
        let changed = {
            let mut record = self
                .records
                .entry(id)
                .or_insert_with(|| ServiceHealthRecord::new(id));
            record
                .apply(success, latency_ms, self.threshold)
                .then(|| record.clone())
        };

        let Some(record) = changed else {
            return false;
        };

        if record.healthy {
            info!(service = %id, "Service recovered");
        } else {
            warn!(
                service = %id,
                consecutive_failures = record.consecutive_failures,
                "Service marked unhealthy"
            );
        }
        self.events.send(TutorEvent::service_health_changed(&record));
        true
    }

    /// Returns a snapshot of every service's health, in [`ServiceId::ALL`] order.
    #[must_use]
    pub fn service_health(&self) -> Vec<ServiceHealthRecord> {
        ServiceId::ALL
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect()
    }

    /// Probes a backend once and records the result.
    pub async fn probe_once(&self, id: ServiceId, backend: &dyn Backend) -> bool {
        let started = Instant::now();
        let ok = backend.probe().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(service = %id, ok, latency_ms, "Probe complete");
        self.record_outcome(id, ok, Some(latency_ms));
        ok
    }

    /// Spawns a loop probing `backend` every `interval`.
    ///
    /// The loop runs until the returned handle is aborted.
    pub fn spawn_probe_loop(
        self: &Arc<Self>,
        id: ServiceId,
        backend: Arc<dyn Backend>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(service = %id, interval_secs = interval.as_secs(), "Health probe loop started");
            loop {
                ticker.tick().await;
                monitor.probe_once(id, backend.as_ref()).await;
            }
        })
    }
}
