// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process connection/turn health aggregation.
//!
//! Prometheus histograms answer fleet questions; this aggregator answers the
//! service's own "am I healthy" question: success rates, average connect
//! time, and timeout rate against configurable alert thresholds, served as a
//! JSON snapshot.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Alert thresholds applied when building a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    /// Minimum acceptable connection success rate.
    pub success_rate_min: f64,
    /// Maximum acceptable average connection-establishment time.
    pub avg_connect_ms_max: f64,
    /// Maximum acceptable fraction of failures that are timeouts.
    pub timeout_rate_max: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            success_rate_min: 0.95,
            avg_connect_ms_max: 3000.0,
            timeout_rate_max: 0.05,
        }
    }
}

/// Point-in-time aggregation of connection and turn health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub connection_attempts: u64,
    pub connection_successes: u64,
    pub connection_failures: HashMap<String, u64>,
    pub success_rate: f64,
    pub avg_connect_ms: f64,
    pub timeout_rate: f64,
    pub active_sessions: u64,
    pub peak_sessions: u64,
    pub turns_completed: u64,
    pub turns_interrupted: u64,
    pub turns_failed: u64,
    pub breaker_trips: u64,
    /// Human-readable alerts for thresholds currently breached.
    pub alerts: Vec<String>,
}

/// Thread-safe accumulator behind the snapshot endpoint.
#[derive(Default)]
pub struct HealthAggregator {
    attempts: AtomicU64,
    successes: AtomicU64,
    connect_ms_sum: AtomicU64,
    failures: Mutex<HashMap<String, u64>>,
    active: AtomicU64,
    peak: AtomicU64,
    turns_completed: AtomicU64,
    turns_interrupted: AtomicU64,
    turns_failed: AtomicU64,
    breaker_trips: AtomicU64,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_success(&self, connect_ms: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.connect_ms_sum.fetch_add(connect_ms, Ordering::Relaxed);
    }

    pub fn connection_failure(&self, reason: &str) {
        let mut failures = self.failures.lock().expect("aggregator lock poisoned");
        *failures.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn session_opened(&self) {
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(active, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Saturating: a close without a matching open is a bug upstream but
        // must not wrap the gauge.
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_interrupted(&self) {
        self.turns_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_failed(&self) {
        self.turns_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn breaker_trip(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a snapshot and evaluates the given thresholds.
    pub fn snapshot(&self, thresholds: &AlertThresholds) -> HealthSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self
            .failures
            .lock()
            .expect("aggregator lock poisoned")
            .clone();
        let timeouts = failures.get("TIMEOUT").copied().unwrap_or(0);

        let success_rate = if attempts == 0 {
            1.0
        } else {
            successes as f64 / attempts as f64
        };
        let avg_connect_ms = if successes == 0 {
            0.0
        } else {
            self.connect_ms_sum.load(Ordering::Relaxed) as f64 / successes as f64
        };
        let timeout_rate = if attempts == 0 {
            0.0
        } else {
            timeouts as f64 / attempts as f64
        };

        let mut alerts = Vec::new();
        if success_rate < thresholds.success_rate_min {
            alerts.push(format!(
                "connection success rate {success_rate:.3} below {:.3}",
                thresholds.success_rate_min
            ));
        }
        if avg_connect_ms > thresholds.avg_connect_ms_max {
            alerts.push(format!(
                "average connect time {avg_connect_ms:.0}ms above {:.0}ms",
                thresholds.avg_connect_ms_max
            ));
        }
        if timeout_rate > thresholds.timeout_rate_max {
            alerts.push(format!(
                "timeout rate {timeout_rate:.3} above {:.3}",
                thresholds.timeout_rate_max
            ));
        }

        HealthSnapshot {
            connection_attempts: attempts,
            connection_successes: successes,
            connection_failures: failures,
            success_rate,
            avg_connect_ms,
            timeout_rate,
            active_sessions: self.active.load(Ordering::Relaxed),
            peak_sessions: self.peak.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_interrupted: self.turns_interrupted.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregator_is_healthy() {
        let agg = HealthAggregator::new();
        let snap = agg.snapshot(&AlertThresholds::default());
        assert_eq!(snap.connection_attempts, 0);
        assert!((snap.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(snap.alerts.is_empty());
    }

    #[test]
    fn success_rate_alert_fires() {
        let agg = HealthAggregator::new();
        for _ in 0..10 {
            agg.connection_attempt();
        }
        for _ in 0..8 {
            agg.connection_success(100);
        }
        agg.connection_failure("AUTH_INVALID");
        agg.connection_failure("SESSION_CREATE_FAILED");

        let snap = agg.snapshot(&AlertThresholds::default());
        assert!((snap.success_rate - 0.8).abs() < 1e-9);
        assert_eq!(snap.alerts.len(), 1);
        assert!(snap.alerts[0].contains("success rate"));
    }

    #[test]
    fn timeout_rate_counts_only_timeouts() {
        let agg = HealthAggregator::new();
        for _ in 0..100 {
            agg.connection_attempt();
        }
        for _ in 0..90 {
            agg.connection_success(50);
        }
        for _ in 0..6 {
            agg.connection_failure("TIMEOUT");
        }
        for _ in 0..4 {
            agg.connection_failure("AUTH_EXPIRED");
        }

        let snap = agg.snapshot(&AlertThresholds::default());
        assert!((snap.timeout_rate - 0.06).abs() < 1e-9);
        assert!(snap.alerts.iter().any(|a| a.contains("timeout rate")));
    }

    #[test]
    fn peak_sessions_tracks_high_water_mark() {
        let agg = HealthAggregator::new();
        agg.session_opened();
        agg.session_opened();
        agg.session_opened();
        agg.session_closed();
        agg.session_opened();

        let snap = agg.snapshot(&AlertThresholds::default());
        assert_eq!(snap.active_sessions, 3);
        assert_eq!(snap.peak_sessions, 3);
    }

    #[test]
    fn session_close_never_underflows() {
        let agg = HealthAggregator::new();
        agg.session_closed();
        let snap = agg.snapshot(&AlertThresholds::default());
        assert_eq!(snap.active_sessions, 0);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let agg = HealthAggregator::new();
        agg.connection_attempt();
        agg.connection_success(120);
        let snap = agg.snapshot(&AlertThresholds::default());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["connection_attempts"], 1);
        assert_eq!(json["avg_connect_ms"], 120.0);
    }
}
