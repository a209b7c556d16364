// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for the Duplio service.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. Metrics are
//! rendered as Prometheus text format via the `render()` method, which the
//! gateway exposes at /metrics. The in-process [`HealthAggregator`] backs
//! the JSON summary endpoint with alert-threshold evaluation.

pub mod aggregate;
pub mod recording;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use duplio_core::DuplioError;

pub use aggregate::{AlertThresholds, HealthAggregator, HealthSnapshot};
pub use recording::{
    record_breaker_trip, record_connection_failure, record_connection_success,
    record_interruption, record_retry, record_stage_latency, record_turn_complete,
    set_active_sessions, set_queue_depth,
};

/// Prometheus metrics recorder.
///
/// Installs the global recorder and exposes a handle for rendering metrics
/// in Prometheus text format. Only one recorder can be installed per process.
pub struct PrometheusRecorder {
    handle: PrometheusHandle,
}

impl PrometheusRecorder {
    /// Installs the Prometheus recorder globally.
    ///
    /// Returns an error if a recorder is already installed.
    pub fn install() -> Result<Self, DuplioError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            DuplioError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
