// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock synthesizer and lip-sync engine with failure injection.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Mutex;

use duplio_core::error::DuplioError;
use duplio_core::traits::{
    AudioFormat, LipSyncAdapter, ServiceAdapter, TtsAdapter, TtsChunk, TtsPreferences,
};
use duplio_core::types::{FaceModelHandle, HealthStatus, SynthesisUnit, VideoPayload, VoiceModelHandle};

/// Deterministic synthesizer: each unit yields `chunks_per_unit` chunks
/// whose bytes encode `(unit_index, chunk_index)`. Failures can be injected
/// per unit index; each injected failure consumes one attempt, so a unit
/// scripted with one failure succeeds on retry.
pub struct MockTts {
    pub chunks_per_unit: u32,
    chunk_delay: Duration,
    failures: Arc<Mutex<HashMap<u32, u32>>>,
    synth_count: AtomicU32,
}

impl MockTts {
    pub fn new(chunks_per_unit: u32) -> Self {
        Self {
            chunks_per_unit,
            chunk_delay: Duration::ZERO,
            failures: Arc::new(Mutex::new(HashMap::new())),
            synth_count: AtomicU32::new(0),
        }
    }

    /// Adds a pause before each chunk, simulating synthesis pace.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Scripts `attempts` consecutive failures for `unit_index`.
    pub async fn fail_unit(&self, unit_index: u32, attempts: u32) {
        self.failures.lock().await.insert(unit_index, attempts);
    }

    /// Total synthesize calls observed.
    pub fn calls(&self) -> u32 {
        self.synth_count.load(Ordering::SeqCst)
    }

    /// The audio payload for `(unit, chunk)`, for asserting delivery order.
    pub fn payload(unit_index: u32, chunk_index: u32) -> Vec<u8> {
        vec![unit_index as u8, chunk_index as u8, 0xAA]
    }
}

#[async_trait]
impl ServiceAdapter for MockTts {
    fn name(&self) -> &str {
        "mock-tts"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl TtsAdapter for MockTts {
    async fn synthesize(
        &self,
        unit: &SynthesisUnit,
        _voice: &VoiceModelHandle,
        _prefs: &TtsPreferences,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<TtsChunk, DuplioError>> + Send>>, DuplioError>
    {
        self.synth_count.fetch_add(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(&unit.index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DuplioError::Tts {
                    message: format!("scripted failure for unit {}", unit.index),
                    source: None,
                });
            }
        }
        drop(failures);

        let unit_index = unit.index;
        let chunks = self.chunks_per_unit;
        let delay = self.chunk_delay;

        let stream = futures::stream::unfold(0u32, move |chunk_index| async move {
            if chunk_index >= chunks {
                return None;
            }
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            Some((
                Ok(TtsChunk {
                    data: MockTts::payload(unit_index, chunk_index),
                    format: AudioFormat::Pcm16,
                    sample_rate: 16_000,
                }),
                chunk_index + 1,
            ))
        });

        Ok(Box::pin(stream))
    }
}

/// Lip-sync mock returning a video frame derived from the audio chunk, or
/// failing permanently when poisoned.
pub struct MockLipSync {
    failing: AtomicBool,
    render_count: AtomicU32,
}

impl MockLipSync {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            render_count: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.render_count.load(Ordering::SeqCst)
    }
}

impl Default for MockLipSync {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MockLipSync {
    fn name(&self) -> &str {
        "mock-lipsync"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl LipSyncAdapter for MockLipSync {
    async fn render(
        &self,
        audio: &[u8],
        _face: &FaceModelHandle,
    ) -> Result<VideoPayload, DuplioError> {
        self.render_count.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DuplioError::LipSync("scripted failure".into()));
        }
        Ok(VideoPayload {
            data: audio.to_vec(),
            format: "h264".into(),
        })
    }
}
