// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming speech-recognition adapter trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::error::DuplioError;
use crate::traits::adapter::ServiceAdapter;
use crate::types::TranscriptEvent;

/// One open duplex recognition stream.
///
/// Audio goes in through `audio_tx` (16 kHz mono 16-bit PCM, ~100 ms per
/// chunk); interim and final transcripts come back on `events`. Dropping
/// `audio_tx` signals end of audio; the recognizer then flushes and emits a
/// final transcript before the event stream ends.
pub struct AsrStreamHandle {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub events: Pin<Box<dyn Stream<Item = Result<TranscriptEvent, DuplioError>> + Send>>,
}

/// Adapter for a streaming speech recognizer.
#[async_trait]
pub trait AsrAdapter: ServiceAdapter {
    /// Opens a new recognition stream for one utterance.
    async fn open_stream(&self) -> Result<AsrStreamHandle, DuplioError>;
}
