//! Gateway layer for OmniBridge
#![forbid(unsafe_code)]

//!
//! Fronts the provider registry with the checks every call must pass:
//! per-caller rate limiting, circuit breaker gating and permission
//! resolution. Also wires the background reconcile, health and sweep tasks.

pub mod dispatch;
pub mod rate_limiter;

pub use dispatch::{CacheStats, CallOutcome, Dispatcher, ProviderTools};
pub use rate_limiter::{
    role_quota, RateCallerStats, RateDecision, RateLimiter, RATE_WINDOW, SWEEP_INTERVAL,
};
