// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TTS and lip-sync adapter traits.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::DuplioError;
use crate::traits::adapter::ServiceAdapter;
use crate::types::{FaceModelHandle, SynthesisUnit, VideoPayload, VoiceModelHandle};

/// Audio encoding declared by the TTS engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    Opus,
    Mp3,
}

/// Synthesis preferences forwarded to the TTS provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsPreferences {
    pub provider: String,
    pub sample_rate: u32,
    pub speaking_rate: f32,
}

impl Default for TtsPreferences {
    fn default() -> Self {
        Self {
            provider: "default".to_string(),
            sample_rate: 16_000,
            speaking_rate: 1.0,
        }
    }
}

/// One audio chunk from the synthesizer.
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub data: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate: u32,
}

/// Adapter for a streaming speech synthesizer.
#[async_trait]
pub trait TtsAdapter: ServiceAdapter {
    /// Synthesizes one unit, returning an ordered stream of audio chunks.
    async fn synthesize(
        &self,
        unit: &SynthesisUnit,
        voice: &VoiceModelHandle,
        prefs: &TtsPreferences,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<TtsChunk, DuplioError>> + Send>>, DuplioError>;
}

/// Adapter for a lip-sync engine producing one video frame per audio chunk.
#[async_trait]
pub trait LipSyncAdapter: ServiceAdapter {
    async fn render(
        &self,
        audio: &[u8],
        face: &FaceModelHandle,
    ) -> Result<VideoPayload, DuplioError>;
}
