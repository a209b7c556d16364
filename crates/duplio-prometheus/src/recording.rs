// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Duplio metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("duplio_connections_total", "Connection attempts by outcome");
    describe_counter!(
        "duplio_connection_failures_total",
        "Connection failures by reason"
    );
    describe_counter!("duplio_turns_total", "Completed turns by terminal status");
    describe_counter!("duplio_interruptions_total", "Mid-turn interruptions");
    describe_counter!("duplio_retries_total", "Upstream retries by service");
    describe_counter!(
        "duplio_breaker_trips_total",
        "Circuit breaker trips by service"
    );
    describe_gauge!("duplio_active_sessions", "Currently active sessions");
    describe_gauge!(
        "duplio_session_queue_depth",
        "Live sessions at the last bind attempt (cap pressure)"
    );
    describe_histogram!(
        "duplio_connect_seconds",
        "Connection establishment time in seconds"
    );
    describe_histogram!(
        "duplio_stage_latency_seconds",
        "Per-stage latency in seconds"
    );
    describe_histogram!(
        "duplio_turn_latency_seconds",
        "End-to-end turn latency in seconds"
    );
}

/// Record a successful connection establishment.
pub fn record_connection_success(connect_secs: f64) {
    metrics::counter!("duplio_connections_total", "outcome" => "success").increment(1);
    metrics::histogram!("duplio_connect_seconds").record(connect_secs);
}

/// Record a failed connection attempt.
pub fn record_connection_failure(reason: &str) {
    metrics::counter!("duplio_connections_total", "outcome" => "failure").increment(1);
    metrics::counter!("duplio_connection_failures_total", "reason" => reason.to_string())
        .increment(1);
}

/// Record a stage latency sample.
pub fn record_stage_latency(stage: &'static str, seconds: f64) {
    metrics::histogram!("duplio_stage_latency_seconds", "stage" => stage).record(seconds);
}

/// Record a finished turn with its terminal status and total latency.
pub fn record_turn_complete(status: &str, total_secs: f64) {
    metrics::counter!("duplio_turns_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("duplio_turn_latency_seconds").record(total_secs);
}

/// Record a mid-turn interruption.
pub fn record_interruption() {
    metrics::counter!("duplio_interruptions_total").increment(1);
}

/// Set the number of active sessions.
pub fn set_active_sessions(count: f64) {
    metrics::gauge!("duplio_active_sessions").set(count);
}

/// Set the session queue depth observed at a bind attempt.
pub fn set_queue_depth(depth: f64) {
    metrics::gauge!("duplio_session_queue_depth").set(depth);
}

/// Record an upstream retry.
pub fn record_retry(service: &str) {
    metrics::counter!("duplio_retries_total", "service" => service.to_string()).increment(1);
}

/// Record a circuit breaker trip.
pub fn record_breaker_trip(service: &str) {
    metrics::counter!("duplio_breaker_trips_total", "service" => service.to_string())
        .increment(1);
}
