// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session network-quality estimation.
//!
//! Feeds: ping/pong round-trip times observed by the gateway and playback
//! buffer levels reported by the client. The estimator maintains an EWMA of
//! RTT and maps it onto the quality ladder. Mode transitions are soft: the
//! pipeline samples the mode once per synthesis unit, never mid-unit.

use std::sync::Mutex;

use duplio_core::types::QualityMode;
use tracing::debug;

const RTT_EWMA_ALPHA: f64 = 0.3;

/// RTT ceilings for each rung of the quality ladder, in milliseconds.
const HIGH_MAX_RTT_MS: f64 = 100.0;
const MEDIUM_MAX_RTT_MS: f64 = 250.0;
const LOW_MAX_RTT_MS: f64 = 500.0;

/// A starved client buffer demotes the estimate by one rung.
const BUFFER_STARVED_MS: u32 = 200;

#[derive(Debug)]
struct Estimate {
    rtt_ewma_ms: Option<f64>,
    playback_buffer_ms: Option<u32>,
}

/// Chooses the session's quality mode from network observations.
#[derive(Debug)]
pub struct QualityEstimator {
    inner: Mutex<Estimate>,
}

impl Default for QualityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityEstimator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Estimate {
                rtt_ewma_ms: None,
                playback_buffer_ms: None,
            }),
        }
    }

    /// Feeds one ping/pong round-trip observation.
    pub fn observe_rtt(&self, rtt_ms: f64) {
        let mut inner = self.inner.lock().expect("estimator lock poisoned");
        inner.rtt_ewma_ms = Some(match inner.rtt_ewma_ms {
            Some(ewma) => ewma * (1.0 - RTT_EWMA_ALPHA) + rtt_ms * RTT_EWMA_ALPHA,
            None => rtt_ms,
        });
    }

    /// Feeds a client-reported playback buffer level.
    pub fn observe_client_report(&self, playback_buffer_ms: u32) {
        let mut inner = self.inner.lock().expect("estimator lock poisoned");
        inner.playback_buffer_ms = Some(playback_buffer_ms);
    }

    /// Current mode. Sampled by the pipeline at synthesis-unit boundaries.
    pub fn current_mode(&self) -> QualityMode {
        let inner = self.inner.lock().expect("estimator lock poisoned");

        let Some(rtt) = inner.rtt_ewma_ms else {
            // No observations yet: start optimistic.
            return QualityMode::High;
        };

        let mut mode = if rtt <= HIGH_MAX_RTT_MS {
            QualityMode::High
        } else if rtt <= MEDIUM_MAX_RTT_MS {
            QualityMode::Medium
        } else if rtt <= LOW_MAX_RTT_MS {
            QualityMode::Low
        } else {
            QualityMode::AudioOnly
        };

        if let Some(buffer) = inner.playback_buffer_ms
            && buffer < BUFFER_STARVED_MS
        {
            mode = demote(mode);
            debug!(buffer_ms = buffer, %mode, "client buffer starved, demoting quality");
        }

        mode
    }
}

fn demote(mode: QualityMode) -> QualityMode {
    match mode {
        QualityMode::High => QualityMode::Medium,
        QualityMode::Medium => QualityMode::Low,
        QualityMode::Low | QualityMode::AudioOnly => QualityMode::AudioOnly,
    }
}
