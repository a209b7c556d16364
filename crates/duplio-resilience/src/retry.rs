// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy with jittered exponential backoff.
//!
//! Retries are for transient upstream failures (timeouts, rate limits,
//! overload); fatal classifications (auth, invalid request) propagate
//! immediately. Jitter prevents correlated retries across sessions from
//! stampeding a degraded upstream.

use std::future::Future;
use std::time::Duration;

use duplio_core::DuplioError;
use rand::Rng;
use tracing::warn;

use crate::breaker::CircuitBreaker;

/// Retry parameters for one adapter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), with full jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        exp.mul_f64(jitter)
    }
}

/// Whether an error is worth retrying against the same upstream.
pub fn is_transient(err: &DuplioError) -> bool {
    matches!(
        err,
        DuplioError::Timeout { .. }
            | DuplioError::LlmTimeout { .. }
            | DuplioError::RateLimitExceeded
            | DuplioError::GpuUnavailable
            | DuplioError::AsrOverload
    )
}

/// Runs `op` under the breaker with the given retry policy.
///
/// The breaker is consulted before every attempt; a transient failure counts
/// against it and backs off, a fatal failure counts and propagates at once.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    mut op: F,
) -> Result<T, DuplioError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DuplioError>>,
{
    let mut last_err = None;

    for attempt in 0..policy.max_attempts {
        breaker.try_acquire()?;

        match op().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(err) => {
                breaker.record_failure();
                if !is_transient(&err) || attempt + 1 == policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.backoff_delay(attempt);
                warn!(
                    service = breaker.service(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient upstream failure, backing off"
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| DuplioError::Internal("retry loop exhausted".into())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::breaker::BreakerConfig;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        // Full jitter keeps each delay within [0.5, 1.0] of the exponential step.
        assert!(p.backoff_delay(0) <= Duration::from_millis(100));
        assert!(p.backoff_delay(1) <= Duration::from_millis(200));
        assert!(p.backoff_delay(4) <= Duration::from_millis(350));
        assert!(p.backoff_delay(4) >= Duration::from_millis(175));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let breaker = CircuitBreaker::new("test", BreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = call_with_retry(&policy(), &breaker, move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DuplioError::RateLimitExceeded)
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let breaker = CircuitBreaker::new("test", BreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, _> = call_with_retry(&policy(), &breaker, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DuplioError::AuthInvalid("bad key".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
        );
        breaker.record_failure();

        let result: Result<u32, _> =
            call_with_retry(&policy(), &breaker, || async { Ok(1u32) }).await;

        match result {
            Err(DuplioError::CircuitOpen { service }) => assert_eq!(service, "test"),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}
