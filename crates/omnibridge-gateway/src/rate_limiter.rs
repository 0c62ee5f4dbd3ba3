//! Per-caller sliding-window rate limiter
//!
//! Each caller gets a trailing one-hour window of request timestamps.
//! Quotas come from the caller's role; unlimited roles short-circuit without
//! recording anything. A periodic sweep drops stale timestamps and callers
//! with empty windows.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Trailing window length
pub const RATE_WINDOW: Duration = Duration::from_secs(3600);

/// How often the sweep loop prunes stale entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Hourly request quota for a role; `None` means unlimited.
pub fn role_quota(role: &str) -> Option<u32> {
    match role {
        "admin" | "super_admin" => None,
        "dba" => Some(200),
        "senior_dev" => Some(150),
        "power_user" => Some(100),
        "junior_dba" => Some(50),
        "qa_tester" => Some(50),
        "read_only" => Some(30),
        "contractor" => Some(20),
        _ => Some(30),
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, PartialEq)]
pub enum RateDecision {
    /// Request admitted; `remaining` is `None` for unlimited roles.
    Allowed { remaining: Option<u32> },
    /// Request rejected until the window frees up.
    Limited {
        count: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
}

/// One caller's current window, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RateCallerStats {
    pub caller: String,
    pub requests_in_window: u32,
}

/// Sliding-window limiter keyed by caller
pub struct RateLimiter {
    windows: RwLock<HashMap<String, VecDeque<Instant>>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            window,
        }
    }

    /// Checks the caller's quota and records the request if admitted.
    ///
    /// Prunes timestamps older than the window, counts what is left, and
    /// only then records. A rejected request is never recorded, so being
    /// limited does not extend the limitation.
    pub async fn check_and_record(&self, caller: &str, role: &str) -> RateDecision {
        let Some(limit) = role_quota(role) else {
            return RateDecision::Allowed { remaining: None };
        };

        let mut windows = self.windows.write().await;
        let timestamps = windows.entry(caller.to_string()).or_default();

        let now = Instant::now();
        while timestamps
            .front()
            .map(|t| now.duration_since(*t) >= self.window)
            .unwrap_or(false)
        {
            timestamps.pop_front();
        }

        let count = timestamps.len() as u32;
        if count >= limit {
            // Window frees up when the oldest recorded request ages out.
            let reset_in = timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or_default();
            let reset_at = Utc::now()
                + chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(caller, role, count, limit, "Rate limit exceeded");
            return RateDecision::Limited {
                count,
                limit,
                reset_at,
            };
        }

        timestamps.push_back(now);
        debug!(caller, role, used = count + 1, limit, "Request admitted");
        RateDecision::Allowed {
            remaining: Some(limit - count - 1),
        }
    }

    /// Admin override: wipes a caller's window.
    pub async fn reset(&self, caller: &str) {
        self.windows.write().await.remove(caller);
        info!(caller, "Rate window reset");
    }

    /// Current window sizes, sorted by caller.
    pub async fn stats(&self) -> Vec<RateCallerStats> {
        let windows = self.windows.read().await;
        let now = Instant::now();
        let mut stats: Vec<RateCallerStats> = windows
            .iter()
            .map(|(caller, timestamps)| RateCallerStats {
                caller: caller.clone(),
                requests_in_window: timestamps
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count() as u32,
            })
            .collect();
        stats.sort_by(|a, b| a.caller.cmp(&b.caller));
        stats
    }

    /// Drops aged-out timestamps and callers with empty windows.
    pub async fn sweep(&self) {
        let mut windows = self.windows.write().await;
        let now = Instant::now();
        windows.retain(|_, timestamps| {
            while timestamps
                .front()
                .map(|t| now.duration_since(*t) >= self.window)
                .unwrap_or(false)
            {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
        debug!(tracked_callers = windows.len(), "Rate limiter swept");
    }

    /// Periodic sweep task.
    pub async fn run_sweep_loop(self: std::sync::Arc<Self>) {
        info!(interval_secs = SWEEP_INTERVAL.as_secs(), "Starting rate sweep loop");
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            self.sweep().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn age_requests(&self, caller: &str, age: Duration) {
        let mut windows = self.windows.write().await;
        if let Some(timestamps) = windows.get_mut(caller) {
            for t in timestamps.iter_mut() {
                *t -= age;
            }
        }
    }
}
