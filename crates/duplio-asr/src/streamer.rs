// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ASR streamer: one task per utterance bridging client audio frames to
//! the recognizer.
//!
//! Responsibilities:
//! - validate that frame sequence numbers are contiguous (a gap aborts the
//!   utterance with a recoverable error)
//! - forward audio to the recognizer without ever pausing audio intake; if
//!   the recognizer cannot keep up, the utterance aborts with ASR_OVERLOAD
//! - throttle interim transcripts to the configured cadence
//! - detect end of utterance by trailing silence when the client has not
//!   sent an explicit boundary

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use duplio_core::error::DuplioError;
use duplio_core::traits::AsrAdapter;
use duplio_core::types::{AudioFrame, TranscriptEvent};

use crate::vad::SilenceDetector;

/// Events the streamer reports to the turn pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum AsrStreamerEvent {
    /// Throttled interim transcript for client feedback.
    Interim(TranscriptEvent),
    /// Silence crossed the VAD threshold; the utterance should close.
    EndOfUtterance,
}

/// Outcome of one completed utterance.
#[derive(Debug, Clone)]
pub struct UtteranceResult {
    pub transcript: TranscriptEvent,
    /// Total inbound audio bytes consumed.
    pub audio_bytes: usize,
}

/// Tuning for the streamer.
#[derive(Debug, Clone)]
pub struct AsrStreamerConfig {
    pub interim_cadence: Duration,
    pub vad_silence_ms: u64,
    pub voice_energy_threshold: f32,
    pub sample_rate: u32,
}

/// Bridges one utterance's audio into the recognizer and its transcripts out.
#[derive(Clone)]
pub struct AsrStreamer {
    adapter: std::sync::Arc<dyn AsrAdapter>,
    config: AsrStreamerConfig,
}

impl AsrStreamer {
    pub fn new(adapter: std::sync::Arc<dyn AsrAdapter>, config: AsrStreamerConfig) -> Self {
        Self { adapter, config }
    }

    /// Runs one utterance to completion.
    ///
    /// Consumes audio frames until `frames` closes (explicit end-of-utterance
    /// from the client) or trailing silence crosses the VAD threshold, then
    /// flushes the recognizer and returns the final transcript.
    ///
    /// Returns `Ok(None)` when cancelled.
    pub async fn run(
        &self,
        mut frames: mpsc::Receiver<AudioFrame>,
        events_tx: mpsc::Sender<AsrStreamerEvent>,
        cancel: CancellationToken,
    ) -> Result<Option<UtteranceResult>, DuplioError> {
        let mut handle = self.adapter.open_stream().await?;
        let mut audio_tx = Some(handle.audio_tx);

        let mut detector =
            SilenceDetector::new(self.config.voice_energy_threshold, self.config.sample_rate);
        let mut expected_seq: Option<u64> = None;
        let mut audio_bytes = 0usize;
        let mut last_interim: Option<Instant> = None;
        let mut final_transcript: Option<TranscriptEvent> = None;

        use futures::StreamExt;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("utterance cancelled");
                    return Ok(None);
                }

                frame = frames.recv(), if audio_tx.is_some() => {
                    match frame {
                        Some(frame) => {
                            if let Some(expected) = expected_seq
                                && frame.seq != expected
                            {
                                return Err(DuplioError::Asr {
                                    message: format!(
                                        "audio sequence gap: expected {expected}, got {}",
                                        frame.seq
                                    ),
                                    source: None,
                                });
                            }
                            expected_seq = Some(frame.seq + 1);
                            audio_bytes += frame.data.len();
                            detector.observe(&frame.data);

                            // Audio intake never pauses; a full recognizer
                            // channel means the recognizer lost the race.
                            if let Some(tx) = &audio_tx
                                && tx.try_send(frame.data).is_err()
                            {
                                return Err(DuplioError::AsrOverload);
                            }

                            if detector.end_of_utterance(self.config.vad_silence_ms) {
                                debug!(audio_bytes, "VAD silence boundary reached");
                                let _ = events_tx
                                    .send(AsrStreamerEvent::EndOfUtterance)
                                    .await;
                                // Closing the audio channel flushes the recognizer.
                                audio_tx = None;
                            }
                        }
                        None => {
                            // Client sent an explicit end_utterance.
                            audio_tx = None;
                        }
                    }
                }

                event = handle.events.next() => {
                    match event {
                        Some(Ok(transcript)) if transcript.is_final => {
                            final_transcript = Some(transcript);
                            break;
                        }
                        Some(Ok(transcript)) => {
                            let due = last_interim
                                .is_none_or(|at| at.elapsed() >= self.config.interim_cadence);
                            if due {
                                last_interim = Some(Instant::now());
                                let _ = events_tx
                                    .send(AsrStreamerEvent::Interim(transcript))
                                    .await;
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => {
                            // Recognizer closed without a final transcript.
                            if audio_tx.is_none() {
                                break;
                            }
                            warn!("recognizer event stream ended early");
                            return Err(DuplioError::Asr {
                                message: "recognizer closed before final transcript".into(),
                                source: None,
                            });
                        }
                    }
                }
            }
        }

        let transcript = final_transcript.ok_or_else(|| DuplioError::Asr {
            message: "no final transcript produced".into(),
            source: None,
        })?;

        Ok(Some(UtteranceResult {
            transcript,
            audio_bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;

    use async_trait::async_trait;
    use duplio_core::traits::{AsrStreamHandle, ServiceAdapter};
    use duplio_core::types::HealthStatus;
    use futures::Stream;

    use super::*;

    /// Recognizer that echoes per-chunk interims and a fixed final on flush.
    struct EchoRecognizer {
        final_text: String,
    }

    #[async_trait]
    impl ServiceAdapter for EchoRecognizer {
        fn name(&self) -> &str {
            "echo-asr"
        }
        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl AsrAdapter for EchoRecognizer {
        async fn open_stream(&self) -> Result<AsrStreamHandle, DuplioError> {
            let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(32);
            let (event_tx, event_rx) = mpsc::channel(32);
            let final_text = self.final_text.clone();

            tokio::spawn(async move {
                let mut chunks = 0u32;
                while audio_rx.recv().await.is_some() {
                    chunks += 1;
                    let _ = event_tx
                        .send(Ok(TranscriptEvent {
                            text: format!("interim {chunks}"),
                            is_final: false,
                            confidence: 0.5,
                        }))
                        .await;
                }
                let _ = event_tx
                    .send(Ok(TranscriptEvent {
                        text: final_text,
                        is_final: true,
                        confidence: 0.93,
                    }))
                    .await;
            });

            let events: Pin<
                Box<dyn Stream<Item = Result<TranscriptEvent, DuplioError>> + Send>,
            > = Box::pin(futures::stream::unfold(event_rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            }));

            Ok(AsrStreamHandle { audio_tx, events })
        }
    }

    fn config() -> AsrStreamerConfig {
        AsrStreamerConfig {
            interim_cadence: Duration::from_millis(0),
            vad_silence_ms: 500,
            voice_energy_threshold: 0.05,
            sample_rate: 16_000,
        }
    }

    fn loud_frame(seq: u64) -> AudioFrame {
        let sample = (i16::MAX / 2).to_le_bytes();
        AudioFrame {
            seq,
            data: sample.iter().copied().cycle().take(3200).collect(),
            captured_at_ms: seq as i64 * 100,
        }
    }

    fn silent_frame(seq: u64) -> AudioFrame {
        AudioFrame {
            seq,
            data: vec![0u8; 3200],
            captured_at_ms: seq as i64 * 100,
        }
    }

    #[tokio::test]
    async fn explicit_end_yields_final_transcript() {
        let adapter = std::sync::Arc::new(EchoRecognizer {
            final_text: "hello world".into(),
        });
        let streamer = AsrStreamer::new(adapter, config());
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);

        let run = tokio::spawn({
            let cancel = CancellationToken::new();
            async move { streamer.run(frame_rx, event_tx, cancel).await }
        });

        for seq in 1..=3 {
            frame_tx.send(loud_frame(seq)).await.unwrap();
        }
        drop(frame_tx);

        let result = run.await.unwrap().unwrap().unwrap();
        assert_eq!(result.transcript.text, "hello world");
        assert_eq!(result.audio_bytes, 3 * 3200);

        // At least one interim surfaced.
        let mut saw_interim = false;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, AsrStreamerEvent::Interim(_)) {
                saw_interim = true;
            }
        }
        assert!(saw_interim);
    }

    #[tokio::test]
    async fn sequence_gap_aborts_with_asr_error() {
        let adapter = std::sync::Arc::new(EchoRecognizer {
            final_text: "x".into(),
        });
        let streamer = AsrStreamer::new(adapter, config());
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);

        let run = tokio::spawn({
            let cancel = CancellationToken::new();
            async move { streamer.run(frame_rx, event_tx, cancel).await }
        });

        frame_tx.send(loud_frame(1)).await.unwrap();
        frame_tx.send(loud_frame(3)).await.unwrap(); // gap: 2 skipped

        match run.await.unwrap() {
            Err(DuplioError::Asr { message, .. }) => {
                assert!(message.contains("sequence gap"), "got: {message}");
            }
            other => panic!("expected Asr error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn vad_silence_emits_end_of_utterance() {
        let adapter = std::sync::Arc::new(EchoRecognizer {
            final_text: "done".into(),
        });
        let streamer = AsrStreamer::new(adapter, config());
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (event_tx, mut event_rx) = mpsc::channel(32);

        let run = tokio::spawn({
            let cancel = CancellationToken::new();
            async move { streamer.run(frame_rx, event_tx, cancel).await }
        });

        frame_tx.send(loud_frame(1)).await.unwrap();
        // 500ms of trailing silence (5 x 100ms frames).
        for seq in 2..=6 {
            frame_tx.send(silent_frame(seq)).await.unwrap();
        }

        let result = run.await.unwrap().unwrap().unwrap();
        assert_eq!(result.transcript.text, "done");

        let mut saw_boundary = false;
        while let Ok(event) = event_rx.try_recv() {
            if event == AsrStreamerEvent::EndOfUtterance {
                saw_boundary = true;
            }
        }
        assert!(saw_boundary, "VAD boundary was not emitted");
    }

    #[tokio::test]
    async fn cancellation_returns_none() {
        let adapter = std::sync::Arc::new(EchoRecognizer {
            final_text: "x".into(),
        });
        let streamer = AsrStreamer::new(adapter, config());
        let (_frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(16);
        let (event_tx, _event_rx) = mpsc::channel(16);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = streamer.run(frame_rx, event_tx, cancel).await.unwrap();
        assert!(result.is_none());
    }
}
