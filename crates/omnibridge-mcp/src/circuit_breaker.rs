//! Per-provider circuit breaker
//!
//! Consecutive failures trip the circuit; an open circuit rejects calls
//! until its cooldown deadline passes, then admits exactly one trial call.
//! Further calls are rejected until the trial's outcome lands. Trial
//! success closes the circuit; trial failure reopens it with a longer
//! cooldown, capped at the configured maximum.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Where a provider's circuit currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    current_cooldown: Duration,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitState {
    fn new(base_cooldown: Duration) -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            current_cooldown: base_cooldown,
            open_until: None,
            trial_in_flight: false,
        }
    }
}

/// Snapshot of one provider's circuit for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub provider: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub retry_after_seconds: Option<u64>,
}

/// Circuit breaker tracking every provider the registry talks to
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: RwLock<CircuitBreakerConfig>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
        }
    }

    /// Replaces the tuning, e.g. after the store's config changed.
    pub async fn load_config(&self, config: CircuitBreakerConfig) {
        info!(
            failure_threshold = config.failure_threshold,
            cooldown_seconds = config.cooldown_seconds,
            "Loaded circuit breaker config"
        );
        *self.config.write().await = config;
    }

    /// True when calls to the provider must be rejected.
    ///
    /// A circuit whose cooldown deadline has passed flips to half-open here
    /// and lets the caller through as the single trial request; anyone else
    /// checking before the trial's outcome is recorded stays rejected.
    pub async fn is_open(&self, provider: &str) -> bool {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(provider) else {
            return false;
        };

        match state.status {
            CircuitStatus::Closed => false,
            CircuitStatus::HalfOpen => state.trial_in_flight,
            CircuitStatus::Open => {
                let deadline = match state.open_until {
                    Some(deadline) => deadline,
                    None => return false,
                };
                if Instant::now() >= deadline {
                    debug!(provider, "Circuit cooldown elapsed, admitting trial call");
                    state.status = CircuitStatus::HalfOpen;
                    state.open_until = None;
                    state.trial_in_flight = true;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Seconds until an open circuit admits a trial, if it is open.
    pub async fn retry_after(&self, provider: &str) -> Option<u64> {
        let states = self.states.read().await;
        let state = states.get(provider)?;
        if state.status != CircuitStatus::Open {
            return None;
        }
        let deadline = state.open_until?;
        let now = Instant::now();
        if deadline > now {
            // Round up so callers never retry a hair too early.
            Some((deadline - now).as_secs() + 1)
        } else {
            Some(0)
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut states = self.states.write().await;
        let config = *self.config.read().await;
        let state = states
            .entry(provider.to_string())
            .or_insert_with(|| CircuitState::new(Duration::from_secs(config.cooldown_seconds)));

        if state.status != CircuitStatus::Closed {
            info!(provider, "Circuit closed after successful call");
        }
        state.status = CircuitStatus::Closed;
        state.consecutive_failures = 0;
        state.current_cooldown = Duration::from_secs(config.cooldown_seconds);
        state.open_until = None;
        state.trial_in_flight = false;
    }

    pub async fn record_failure(&self, provider: &str) {
        let mut states = self.states.write().await;
        let config = *self.config.read().await;
        let state = states
            .entry(provider.to_string())
            .or_insert_with(|| CircuitState::new(Duration::from_secs(config.cooldown_seconds)));

        match state.status {
            CircuitStatus::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= config.failure_threshold {
                    state.status = CircuitStatus::Open;
                    state.current_cooldown = Duration::from_secs(config.cooldown_seconds);
                    state.open_until = Some(Instant::now() + state.current_cooldown);
                    warn!(
                        provider,
                        failures = state.consecutive_failures,
                        cooldown_secs = state.current_cooldown.as_secs(),
                        "Circuit opened"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                // Failed trial: reopen with a longer cooldown.
                state.consecutive_failures += 1;
                state.trial_in_flight = false;
                let grown = state.current_cooldown.as_secs_f64() * config.cooldown_multiplier;
                let capped = grown.min(config.max_cooldown_seconds as f64);
                state.current_cooldown = Duration::from_secs_f64(capped);
                state.status = CircuitStatus::Open;
                state.open_until = Some(Instant::now() + state.current_cooldown);
                warn!(
                    provider,
                    cooldown_secs = state.current_cooldown.as_secs(),
                    "Trial call failed, circuit reopened"
                );
            }
            CircuitStatus::Open => {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Current status without side effects (no half-open transition).
    pub async fn status(&self, provider: &str) -> CircuitStatus {
        let states = self.states.read().await;
        states
            .get(provider)
            .map(|s| s.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    /// Snapshots for every tracked provider.
    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let states = self.states.read().await;
        let now = Instant::now();
        let mut snapshots: Vec<CircuitSnapshot> = states
            .iter()
            .map(|(provider, state)| CircuitSnapshot {
                provider: provider.clone(),
                status: state.status,
                consecutive_failures: state.consecutive_failures,
                retry_after_seconds: state.open_until.and_then(|deadline| {
                    (state.status == CircuitStatus::Open && deadline > now)
                        .then(|| (deadline - now).as_secs() + 1)
                }),
            })
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Drops the tracked state for a provider, e.g. on unload.
    pub async fn forget(&self, provider: &str) {
        self.states.write().await.remove(provider);
    }

    #[cfg(test)]
    pub(crate) async fn expire_cooldown(&self, provider: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(provider) {
            state.open_until = Some(Instant::now() - Duration::from_secs(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooldown: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_seconds: cooldown,
            cooldown_multiplier: 2.0,
            max_cooldown_seconds: 300,
        }
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(config(3, 30));
        for _ in 0..2 {
            breaker.record_failure("alpha").await;
            assert!(!breaker.is_open("alpha").await);
        }
        breaker.record_failure("alpha").await;
        assert!(breaker.is_open("alpha").await);
        assert_eq!(breaker.status("alpha").await, CircuitStatus::Open);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new(config(3, 30));
        breaker.record_failure("alpha").await;
        breaker.record_failure("alpha").await;
        breaker.record_success("alpha").await;
        breaker.record_failure("alpha").await;
        breaker.record_failure("alpha").await;
        assert!(!breaker.is_open("alpha").await);
    }

    #[tokio::test]
    async fn test_retry_after_only_while_open() {
        let breaker = CircuitBreaker::new(config(1, 30));
        assert_eq!(breaker.retry_after("alpha").await, None);
        breaker.record_failure("alpha").await;
        let wait = breaker.retry_after("alpha").await.unwrap();
        assert!(wait >= 1 && wait <= 31);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new(config(1, 30));
        breaker.record_failure("alpha").await;
        assert!(breaker.is_open("alpha").await);

        breaker.expire_cooldown("alpha").await;
        assert!(!breaker.is_open("alpha").await);
        assert_eq!(breaker.status("alpha").await, CircuitStatus::HalfOpen);

        breaker.record_success("alpha").await;
        assert_eq!(breaker.status("alpha").await, CircuitStatus::Closed);
        assert!(!breaker.is_open("alpha").await);
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_trial() {
        let breaker = CircuitBreaker::new(config(1, 30));
        breaker.record_failure("alpha").await;
        breaker.expire_cooldown("alpha").await;

        // First check after the cooldown is the trial; the next is rejected
        // until the trial's outcome lands.
        assert!(!breaker.is_open("alpha").await);
        assert!(breaker.is_open("alpha").await);
        assert!(breaker.is_open("alpha").await);

        breaker.record_success("alpha").await;
        assert!(!breaker.is_open("alpha").await);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_grows_cooldown() {
        let breaker = CircuitBreaker::new(config(1, 30));
        breaker.record_failure("alpha").await;
        breaker.expire_cooldown("alpha").await;
        assert!(!breaker.is_open("alpha").await);

        breaker.record_failure("alpha").await;
        assert!(breaker.is_open("alpha").await);
        let wait = breaker.retry_after("alpha").await.unwrap();
        // Cooldown doubled from 30 to 60.
        assert!(wait > 31 && wait <= 61);
    }

    #[tokio::test]
    async fn test_cooldown_capped_at_max() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_seconds: 200,
            cooldown_multiplier: 2.0,
            max_cooldown_seconds: 300,
        });
        breaker.record_failure("alpha").await;
        breaker.expire_cooldown("alpha").await;
        assert!(!breaker.is_open("alpha").await);
        breaker.record_failure("alpha").await;

        let wait = breaker.retry_after("alpha").await.unwrap();
        assert!(wait <= 301);
    }

    #[tokio::test]
    async fn test_providers_are_independent() {
        let breaker = CircuitBreaker::new(config(1, 30));
        breaker.record_failure("alpha").await;
        assert!(breaker.is_open("alpha").await);
        assert!(!breaker.is_open("beta").await);
    }

    #[tokio::test]
    async fn test_forget_drops_state() {
        let breaker = CircuitBreaker::new(config(1, 30));
        breaker.record_failure("alpha").await;
        breaker.forget("alpha").await;
        assert!(!breaker.is_open("alpha").await);
    }
}
