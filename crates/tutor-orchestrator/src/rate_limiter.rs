//! Per-user, per-request-type hourly quotas.
//!
//! Windows are fixed and hour-aligned. Each `(user, request type)` key owns one
//! [`RateLimitWindow`]; the increment-and-compare for a key happens while the
//! map shard holding it is locked, so concurrent checks for the same key can
//! never both pass the limit boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::request::RequestType;

/// Length of one quota window in seconds.
pub const WINDOW_SECS: i64 = 3600;

/// Stale windows are purged once every this many checks.
const PURGE_EVERY: u64 = 1024;

/// Quota usage for one `(user, request type)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    /// Start of the hour this window covers.
    pub window_start: DateTime<Utc>,
    /// Accepted requests in this window.
    pub count: u32,
}

/// Returns the start of the hour containing `now`.
#[must_use]
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::seconds(WINDOW_SECS))
        .unwrap_or(now)
}

/// Enforces hourly quotas per user and request type.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimitConfig,
    windows: DashMap<(String, RequestType), RateLimitWindow>,
    denials: AtomicU64,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter with the given per-type limits.
    #[must_use]
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
            denials: AtomicU64::new(0),
            checks: AtomicU64::new(0),
        }
    }

    /// Returns the hourly limit for a request type.
    #[must_use]
    pub const fn limit(&self, request_type: RequestType) -> u32 {
        self.limits.limit_for(request_type)
    }

    /// Consumes one unit of quota if available.
    ///
    /// Returns `true` if the request is allowed. Denied calls do not count
    /// toward the limit.
    pub fn check_rate_limit(&self, user_id: &str, request_type: RequestType) -> bool {
        self.check_at(user_id, request_type, Utc::now())
    }

    /// Same as [`check_rate_limit`](Self::check_rate_limit), evaluated at `now`.
    pub fn check_at(&self, user_id: &str, request_type: RequestType, now: DateTime<Utc>) -> bool {
        let limit = self.limit(request_type);
        let current = window_start(now);

        let allowed = {
            let mut window = self
                .windows
                .entry((user_id.to_string(), request_type))
                .or_insert(RateLimitWindow {
                    window_start: current,
                    count: 0,
                });
            if window.window_start < current {
                window.window_start = current;
                window.count = 0;
            }
            if window.count < limit {
                window.count += 1;
                true
            } else {
                false
            }
        };

        if !allowed {
            self.denials.fetch_add(1, Ordering::Relaxed);
            debug!(user_id, request_type = %request_type, limit, "Rate limit denied");
        }

        // The entry guard is gone by now; retain() needs every shard lock.
        if self.checks.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_stale(now);
        }

        allowed
    }

    /// Returns the quota left for a key in the window containing `now`.
    #[must_use]
    pub fn remaining(&self, user_id: &str, request_type: RequestType, now: DateTime<Utc>) -> u32 {
        let limit = self.limit(request_type);
        let current = window_start(now);
        self.windows
            .get(&(user_id.to_string(), request_type))
            .filter(|w| w.window_start >= current)
            .map_or(limit, |w| limit.saturating_sub(w.count))
    }

    /// Returns the seconds until the window containing `now` rolls over.
    #[must_use]
    pub fn retry_after_secs(now: DateTime<Utc>) -> u64 {
        let next = window_start(now) + Duration::seconds(WINDOW_SECS);
        u64::try_from((next - now).num_seconds()).unwrap_or(0).max(1)
    }

    /// Returns a copy of the window for a key, if one exists.
    #[must_use]
    pub fn window(&self, user_id: &str, request_type: RequestType) -> Option<RateLimitWindow> {
        self.windows
            .get(&(user_id.to_string(), request_type))
            .map(|w| *w)
    }

    /// Drops every window that ended before the window containing `now`.
    ///
    /// Returns the number of windows removed.
    pub fn purge_stale(&self, now: DateTime<Utc>) -> usize {
        let current = window_start(now);
        let before = self.windows.len();
        self.windows.retain(|_, w| w.window_start >= current);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Purged stale rate-limit windows");
        }
        removed
    }

    /// Returns the number of denied checks since startup.
    #[must_use]
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    /// Returns the number of tracked windows.
    #[must_use]
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
