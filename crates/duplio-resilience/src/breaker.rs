// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-adapter circuit breaker.
//!
//! State machine: `closed -> open` after `failure_threshold` consecutive
//! failures; `open -> half_open` after `reset_timeout`; `half_open -> closed`
//! after `success_threshold` consecutive successes; `half_open -> open` on
//! any failure.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use duplio_core::DuplioError;
use tracing::warn;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { consecutive_successes: u32 },
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// A circuit breaker guarding one upstream service.
///
/// Callers acquire before each call and report the outcome after; an open
/// breaker fails fast with [`DuplioError::CircuitOpen`].
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
            trips: AtomicU64::new(0),
        }
    }

    /// Name of the guarded service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Number of closed/half-open -> open transitions since construction.
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Current state. An expired open interval reads as half-open.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match *inner {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { since } if since.elapsed() < self.config.reset_timeout => {
                BreakerState::Open
            }
            Inner::Open { .. } => BreakerState::HalfOpen,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Checks whether a call may proceed.
    ///
    /// Moves `open -> half_open` once the reset timeout has elapsed.
    pub fn try_acquire(&self) -> Result<(), DuplioError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match *inner {
            Inner::Closed { .. } | Inner::HalfOpen { .. } => Ok(()),
            Inner::Open { since } => {
                if since.elapsed() >= self.config.reset_timeout {
                    *inner = Inner::HalfOpen {
                        consecutive_successes: 0,
                    };
                    Ok(())
                } else {
                    Err(DuplioError::CircuitOpen {
                        service: self.service.clone(),
                    })
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match *inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            }
            Inner::HalfOpen {
                consecutive_successes,
            } => {
                let successes = consecutive_successes + 1;
                if successes >= self.config.success_threshold {
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    *inner = Inner::HalfOpen {
                        consecutive_successes: successes,
                    };
                }
            }
            // A success while open can only come from a call admitted before
            // the trip; the open interval stands.
            Inner::Open { .. } => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(service = %self.service, failures, "circuit breaker opened");
                    self.trips.fetch_add(1, Ordering::Relaxed);
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                } else {
                    *inner = Inner::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!(service = %self.service, "half-open probe failed, circuit re-opened");
                self.trips.fetch_add(1, Ordering::Relaxed);
                *inner = Inner::Open {
                    since: Instant::now(),
                };
            }
            Inner::Open { .. } => {}
        }
    }
}
