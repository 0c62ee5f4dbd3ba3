//! Reconnect-and-retry loop for provider calls
//!
//! Only connection-class failures are retried; anything else is a real
//! answer from the provider and surfaces immediately. The caller's closure
//! receives the attempt number so it can tear down and rebuild its
//! connection before a retry.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// Runs `operation` up to `policy.max_attempts` times.
///
/// Connection-class errors sleep `policy.delay_seconds` and try again; other
/// errors abort after the first attempt. Exhausted retries collapse into a
/// single "unavailable after N attempts" error naming the provider.
pub async fn with_reconnect_retry<T, F, Fut>(
    operation_name: &str,
    display_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        debug!(
            operation = operation_name,
            provider = display_name,
            attempt,
            max_attempts,
            "Attempting provider operation"
        );

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_connection_error() => {
                debug!(
                    operation = operation_name,
                    provider = display_name,
                    error = %err,
                    "Provider operation failed with non-retryable error"
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    operation = operation_name,
                    provider = display_name,
                    attempt,
                    error = %err,
                    "Connection-class failure"
                );
                if attempt == max_attempts {
                    return Err(Error::ProviderUnavailable {
                        display_name: display_name.to_string(),
                        attempts: max_attempts,
                    });
                }
                tokio::time::sleep(Duration::from_secs_f64(policy.delay_seconds)).await;
            }
        }
    }

    // max_attempts >= 1, so the loop always returns.
    Err(Error::ProviderUnavailable {
        display_name: display_name.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_seconds: 0.0,
            connection_max_age_seconds: 600,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_reconnect_retry("call_tool", "Alpha", &policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_errors_retry_until_exhausted() {
        let calls = AtomicU32::new(0);
        let err = with_reconnect_retry::<(), _, _>("call_tool", "Alpha", &policy(2), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ConnectionError("connection refused".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.to_string(), "Alpha is unavailable after 2 attempts");
    }

    #[tokio::test]
    async fn test_non_connection_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_reconnect_retry::<(), _, _>("call_tool", "Alpha", &policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ToolNotFound("get_users".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_reconnect_retry("call_tool", "Alpha", &policy(2), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(Error::ConnectionError("broken pipe".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_clamped_to_one() {
        let calls = AtomicU32::new(0);
        let _ = with_reconnect_retry::<(), _, _>("call_tool", "Alpha", &policy(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ConnectionError("timed out".to_string())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
