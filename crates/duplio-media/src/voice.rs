// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The voice/video streamer: synthesizes one unit and pairs its audio chunks
//! with lip-sync video frames.
//!
//! Units may be synthesized concurrently (the pipeline bounds parallelism);
//! every chunk is keyed `(unit_index, chunk_index)` so the reorder buffer
//! can restore delivery order. Lip-sync failure degrades the remainder of
//! the turn to audio-only without surfacing an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use duplio_core::error::DuplioError;
use duplio_core::traits::{LipSyncAdapter, TtsAdapter, TtsPreferences};
use duplio_core::types::{
    ChunkKey, FaceModelHandle, MediaChunk, SynthesisUnit, TurnId, VoiceModelHandle,
};
use duplio_resilience::CircuitBreaker;

/// Per-unit synthesis context snapshotted by the pipeline.
#[derive(Clone)]
pub struct UnitContext {
    pub turn_id: TurnId,
    pub voice: VoiceModelHandle,
    pub face: Option<FaceModelHandle>,
    pub prefs: TtsPreferences,
    /// Sampled from the quality estimator at the unit boundary.
    pub video_enabled: bool,
}

/// Synthesizes units and pairs chunks with video.
pub struct VoiceStreamer {
    tts: Arc<dyn TtsAdapter>,
    lipsync: Option<Arc<dyn LipSyncAdapter>>,
    tts_breaker: Arc<CircuitBreaker>,
    lipsync_breaker: Arc<CircuitBreaker>,
}

impl VoiceStreamer {
    pub fn new(
        tts: Arc<dyn TtsAdapter>,
        lipsync: Option<Arc<dyn LipSyncAdapter>>,
        tts_breaker: Arc<CircuitBreaker>,
        lipsync_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            tts,
            lipsync,
            tts_breaker,
            lipsync_breaker,
        }
    }

    /// Synthesizes one unit, publishing keyed chunks into `out`.
    ///
    /// A failure before the first chunk is retried once; a second failure
    /// propagates so the pipeline can skip the unit. A failure after chunks
    /// have been delivered truncates the unit instead of duplicating keys.
    /// Returns the number of chunks published (0 on cancellation).
    pub async fn stream_unit(
        &self,
        unit: &SynthesisUnit,
        ctx: &UnitContext,
        out: &mpsc::Sender<MediaChunk>,
        cancel: &CancellationToken,
        lipsync_degraded: &AtomicBool,
    ) -> Result<u32, DuplioError> {
        let mut first_chunk_error: Option<DuplioError> = None;

        for attempt in 0..2u8 {
            if cancel.is_cancelled() {
                return Ok(0);
            }
            if attempt > 0 {
                debug!(unit = unit.index, "retrying synthesis after failure");
            }

            match self
                .stream_unit_once(unit, ctx, out, cancel, lipsync_degraded)
                .await
            {
                Ok(chunks) => return Ok(chunks),
                Err(UnitError::BeforeFirstChunk(err)) => {
                    first_chunk_error = Some(err);
                }
                Err(UnitError::Truncated { chunks_sent, err }) => {
                    // Chunks already reached the client; retrying would
                    // duplicate (unit, chunk) keys. Deliver what we have.
                    warn!(
                        unit = unit.index,
                        chunks_sent,
                        error = %err,
                        "synthesis truncated mid-unit"
                    );
                    return Ok(chunks_sent);
                }
            }
        }

        Err(first_chunk_error
            .unwrap_or_else(|| DuplioError::Internal("synthesis retry loop exhausted".into())))
    }

    async fn stream_unit_once(
        &self,
        unit: &SynthesisUnit,
        ctx: &UnitContext,
        out: &mpsc::Sender<MediaChunk>,
        cancel: &CancellationToken,
        lipsync_degraded: &AtomicBool,
    ) -> Result<u32, UnitError> {
        use futures::StreamExt;

        if let Err(err) = self.tts_breaker.try_acquire() {
            return Err(UnitError::BeforeFirstChunk(err));
        }

        let mut stream = match self.tts.synthesize(unit, &ctx.voice, &ctx.prefs).await {
            Ok(stream) => {
                self.tts_breaker.record_success();
                stream
            }
            Err(err) => {
                self.tts_breaker.record_failure();
                return Err(UnitError::BeforeFirstChunk(err));
            }
        };

        let mut chunk_index = 0u32;
        // One-chunk lookahead so the final chunk can carry `last_in_unit`.
        let mut pending: Option<Vec<u8>> = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(chunk_index),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if let Some(audio) = pending.replace(chunk.data) {
                        self.publish(audio, false, unit, ctx, out, cancel, lipsync_degraded, &mut chunk_index)
                            .await?;
                    }
                }
                Some(Err(err)) => {
                    if chunk_index == 0 && pending.is_none() {
                        return Err(UnitError::BeforeFirstChunk(err));
                    }
                    // Flush the lookahead as the (truncated) end of unit.
                    if let Some(audio) = pending.take() {
                        self.publish(audio, true, unit, ctx, out, cancel, lipsync_degraded, &mut chunk_index)
                            .await?;
                    }
                    return Err(UnitError::Truncated {
                        chunks_sent: chunk_index,
                        err,
                    });
                }
                None => {
                    if let Some(audio) = pending.take() {
                        self.publish(audio, true, unit, ctx, out, cancel, lipsync_degraded, &mut chunk_index)
                            .await?;
                    }
                    return Ok(chunk_index);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish(
        &self,
        audio: Vec<u8>,
        last_in_unit: bool,
        unit: &SynthesisUnit,
        ctx: &UnitContext,
        out: &mpsc::Sender<MediaChunk>,
        cancel: &CancellationToken,
        lipsync_degraded: &AtomicBool,
        chunk_index: &mut u32,
    ) -> Result<(), UnitError> {
        let video = if ctx.video_enabled && !lipsync_degraded.load(Ordering::Relaxed) {
            match (&self.lipsync, &ctx.face) {
                (Some(engine), Some(face)) => match self.lipsync_breaker.try_acquire() {
                    Ok(()) => match engine.render(&audio, face).await {
                        Ok(frame) => {
                            self.lipsync_breaker.record_success();
                            Some(frame)
                        }
                        Err(err) => {
                            self.lipsync_breaker.record_failure();
                            warn!(error = %err, "lip-sync failed, degrading turn to audio-only");
                            lipsync_degraded.store(true, Ordering::Relaxed);
                            None
                        }
                    },
                    Err(_) => {
                        lipsync_degraded.store(true, Ordering::Relaxed);
                        None
                    }
                },
                _ => None,
            }
        } else {
            None
        };

        let chunk = MediaChunk {
            turn_id: ctx.turn_id.clone(),
            key: ChunkKey::new(unit.index, *chunk_index),
            audio,
            video,
            last_in_unit,
        };

        // A full channel here is back-pressure from the client; block until
        // there is room or the turn is cancelled.
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            sent = out.send(chunk) => {
                if sent.is_err() {
                    return Err(UnitError::Truncated {
                        chunks_sent: *chunk_index,
                        err: DuplioError::Internal("media channel closed".into()),
                    });
                }
                *chunk_index += 1;
                Ok(())
            }
        }
    }
}

enum UnitError {
    /// Failed before any chunk reached the client; safe to retry.
    BeforeFirstChunk(DuplioError),
    /// Failed after delivery started; the unit ends truncated.
    Truncated { chunks_sent: u32, err: DuplioError },
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use duplio_core::traits::{ServiceAdapter, TtsChunk};
    use duplio_core::types::{HealthStatus, VideoPayload};
    use duplio_resilience::BreakerConfig;
    use futures::Stream;

    use super::*;

    struct ScriptedTts {
        /// Chunks per successful stream; failures_before counts attempts
        /// that error before the first chunk.
        chunks: usize,
        failures_before: AtomicU32,
    }

    #[async_trait]
    impl ServiceAdapter for ScriptedTts {
        fn name(&self) -> &str {
            "scripted-tts"
        }
        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl TtsAdapter for ScriptedTts {
        async fn synthesize(
            &self,
            _unit: &SynthesisUnit,
            _voice: &VoiceModelHandle,
            _prefs: &TtsPreferences,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<TtsChunk, DuplioError>> + Send>>,
            DuplioError,
        > {
            if self
                .failures_before
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    if v > 0 { Some(v - 1) } else { None }
                })
                .is_ok()
            {
                return Err(DuplioError::Tts {
                    message: "synthesizer unavailable".into(),
                    source: None,
                });
            }

            let chunks: Vec<Result<TtsChunk, DuplioError>> = (0..self.chunks)
                .map(|i| {
                    Ok(TtsChunk {
                        data: vec![i as u8; 4],
                        format: duplio_core::traits::AudioFormat::Pcm16,
                        sample_rate: 16_000,
                    })
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct FixedLipSync;

    #[async_trait]
    impl ServiceAdapter for FixedLipSync {
        fn name(&self) -> &str {
            "fixed-lipsync"
        }
        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl LipSyncAdapter for FixedLipSync {
        async fn render(
            &self,
            audio: &[u8],
            _face: &FaceModelHandle,
        ) -> Result<VideoPayload, DuplioError> {
            Ok(VideoPayload {
                data: audio.to_vec(),
                format: "h264".into(),
            })
        }
    }

    struct FailingLipSync;

    #[async_trait]
    impl ServiceAdapter for FailingLipSync {
        fn name(&self) -> &str {
            "failing-lipsync"
        }
        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl LipSyncAdapter for FailingLipSync {
        async fn render(
            &self,
            _audio: &[u8],
            _face: &FaceModelHandle,
        ) -> Result<VideoPayload, DuplioError> {
            Err(DuplioError::LipSync("render farm offline".into()))
        }
    }

    fn streamer(tts: ScriptedTts, lipsync: Option<Arc<dyn LipSyncAdapter>>) -> VoiceStreamer {
        VoiceStreamer::new(
            Arc::new(tts),
            lipsync,
            Arc::new(CircuitBreaker::new("tts", BreakerConfig::default())),
            Arc::new(CircuitBreaker::new("lipsync", BreakerConfig::default())),
        )
    }

    fn unit() -> SynthesisUnit {
        SynthesisUnit {
            index: 2,
            text: "Hello there.".into(),
        }
    }

    fn ctx(video: bool) -> UnitContext {
        UnitContext {
            turn_id: TurnId("turn-1".into()),
            voice: VoiceModelHandle("voice-a".into()),
            face: Some(FaceModelHandle("face-a".into())),
            prefs: TtsPreferences::default(),
            video_enabled: video,
        }
    }

    #[tokio::test]
    async fn chunks_are_keyed_and_last_is_flagged() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 3,
                failures_before: AtomicU32::new(0),
            },
            None,
        );
        let (tx, mut rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);

        let sent = streamer
            .stream_unit(&unit(), &ctx(false), &tx, &CancellationToken::new(), &degraded)
            .await
            .unwrap();
        assert_eq!(sent, 3);

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.key, ChunkKey::new(2, i as u32));
            assert_eq!(chunk.last_in_unit, i == 2);
            assert!(chunk.video.is_none());
        }
    }

    #[tokio::test]
    async fn video_pairs_when_enabled() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 2,
                failures_before: AtomicU32::new(0),
            },
            Some(Arc::new(FixedLipSync)),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);

        streamer
            .stream_unit(&unit(), &ctx(true), &tx, &CancellationToken::new(), &degraded)
            .await
            .unwrap();

        let chunk = rx.try_recv().unwrap();
        let video = chunk.video.expect("video frame expected");
        assert_eq!(video.format, "h264");
        assert_eq!(video.data, chunk.audio);
    }

    #[tokio::test]
    async fn lipsync_failure_degrades_silently() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 2,
                failures_before: AtomicU32::new(0),
            },
            Some(Arc::new(FailingLipSync)),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);

        let sent = streamer
            .stream_unit(&unit(), &ctx(true), &tx, &CancellationToken::new(), &degraded)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert!(degraded.load(Ordering::Relaxed));
        while let Ok(chunk) = rx.try_recv() {
            assert!(chunk.video.is_none());
        }
    }

    #[tokio::test]
    async fn one_failure_is_retried() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 1,
                failures_before: AtomicU32::new(1),
            },
            None,
        );
        let (tx, _rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);

        let sent = streamer
            .stream_unit(&unit(), &ctx(false), &tx, &CancellationToken::new(), &degraded)
            .await
            .unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn two_failures_propagate_for_skip() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 1,
                failures_before: AtomicU32::new(2),
            },
            None,
        );
        let (tx, _rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);

        let result = streamer
            .stream_unit(&unit(), &ctx(false), &tx, &CancellationToken::new(), &degraded)
            .await;
        assert!(matches!(result, Err(DuplioError::Tts { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_publishing() {
        let streamer = streamer(
            ScriptedTts {
                chunks: 5,
                failures_before: AtomicU32::new(0),
            },
            None,
        );
        let (tx, _rx) = mpsc::channel(16);
        let degraded = AtomicBool::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let sent = streamer
            .stream_unit(&unit(), &ctx(false), &tx, &cancel, &degraded)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }
}
