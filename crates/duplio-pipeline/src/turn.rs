// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-turn pipeline: one user utterance end to end.
//!
//! Phase 1 streams audio into the recognizer while surfacing interim
//! transcripts. Phase 2 fans out: retrieval (budgeted, degrading), the LLM
//! token stream split into synthesis units, a bounded TTS worker pool, and
//! an emitter that restores `(unit, chunk)` order through the reorder
//! buffer.
//!
//! Back-pressure is structural: emitter -> outbound queue, workers -> media
//! channel, LLM consumer -> units channel. A slow client therefore pauses
//! TTS reads, which pauses token consumption. The turn's cancellation token
//! is observed at every suspension point.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplio_asr::{AsrStreamer, AsrStreamerEvent, UtteranceResult};
use duplio_core::error::DuplioError;
use duplio_core::protocol::ServerMessage;
use duplio_core::traits::{LlmEvent, TtsPreferences};
use duplio_core::types::{
    AudioFrame, MediaChunk, SynthesisUnit, Turn, TurnId, TurnStatus,
};
use duplio_llm::{GenerationStreamer, PromptComposer, SynthesisSplitter};
use duplio_media::{UnitContext, VoiceStreamer};
use duplio_prometheus::HealthAggregator;
use duplio_retrieval::RetrievalCoordinator;
use duplio_session::{Session, StateHandle, Trigger};

use crate::reorder::ReorderBuffer;

/// Per-turn tuning, all defaults per the design latency budgets.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub rag_budget: Duration,
    pub llm_first_token: Duration,
    pub stall_timeout: Duration,
    pub tts_parallelism: usize,
    pub min_prefetch_chars: usize,
    pub reorder_capacity: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            rag_budget: Duration::from_millis(200),
            llm_first_token: Duration::from_millis(1000),
            stall_timeout: Duration::from_millis(750),
            tts_parallelism: 2,
            min_prefetch_chars: 60,
            reorder_capacity: 256,
        }
    }
}

/// Stage collaborators shared by all turns.
pub struct PipelineDeps {
    pub asr: AsrStreamer,
    pub retrieval: RetrievalCoordinator,
    pub llm: GenerationStreamer,
    pub composer: PromptComposer,
    pub voice: Arc<VoiceStreamer>,
    pub tts_prefs: TtsPreferences,
    pub aggregator: Arc<HealthAggregator>,
}

/// Everything one turn needs from its session.
pub struct TurnContext {
    pub session: Arc<Session>,
    pub state: StateHandle,
    pub frames: mpsc::Receiver<AudioFrame>,
    pub cancel: CancellationToken,
}

/// Orchestrates turns for one process.
pub struct TurnPipeline {
    deps: Arc<PipelineDeps>,
    config: TurnConfig,
}

struct LlmSummary {
    reply_text: String,
    usage: Option<duplio_core::types::TokenUsage>,
    first_token_ms: Option<u64>,
    total_ms: u64,
    truncated: bool,
    units_total: u32,
    tts_characters: u64,
}

impl TurnPipeline {
    pub fn new(deps: Arc<PipelineDeps>, config: TurnConfig) -> Self {
        Self { deps, config }
    }

    /// Runs one utterance end to end.
    ///
    /// Returns `None` when the utterance ended before a turn existed
    /// (cancellation or ASR failure during listening); otherwise the
    /// finalized, immutable [`Turn`].
    pub async fn run(&self, mut ctx: TurnContext) -> Option<Turn> {
        let outbound = ctx.session.outbound();
        let started = Instant::now();

        let utterance = match self.utterance_phase(&mut ctx, &outbound).await {
            Ok(Some(utterance)) => utterance,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "utterance aborted");
                let _ = outbound.send(ServerMessage::from_error(&err)).await;
                let _ = ctx.state.apply(Trigger::FatalFailure).await;
                return None;
            }
        };

        // Covers the explicit end_utterance path; the VAD path already
        // applied this and the duplicate is rejected harmlessly.
        let _ = ctx.state.apply(Trigger::EndOfUtterance).await;

        let turn_index = ctx.session.next_turn_index();
        let mut turn = Turn::new(ctx.session.id.clone(), turn_index);
        ctx.session.set_current_turn(Some(turn.id.clone()));
        turn.audio_bytes = utterance.audio_bytes;
        turn.transcript = Some(utterance.transcript.text.clone());
        turn.metrics.timings.asr_ms = Some(started.elapsed().as_millis() as u64);
        duplio_prometheus::record_stage_latency("asr", started.elapsed().as_secs_f64());

        let _ = outbound
            .send(ServerMessage::Transcript {
                text: utterance.transcript.text.clone(),
                is_final: true,
                confidence: utterance.transcript.confidence,
            })
            .await;
        let _ = ctx.state.apply(Trigger::FinalTranscript).await;

        let status = self.reply_phase(&mut turn, &ctx, &outbound, started).await;
        turn.status = status;
        ctx.session.set_current_turn(None);

        let total_secs = started.elapsed().as_secs_f64();
        match status {
            TurnStatus::Completed => {
                self.deps.aggregator.turn_completed();
                duplio_prometheus::record_turn_complete("completed", total_secs);
            }
            TurnStatus::Interrupted => {
                self.deps.aggregator.turn_interrupted();
                duplio_prometheus::record_turn_complete("interrupted", total_secs);
            }
            TurnStatus::Failed => {
                self.deps.aggregator.turn_failed();
                duplio_prometheus::record_turn_complete("failed", total_secs);
            }
        }

        // Partial transcript and text are kept for history even on
        // interruption.
        if let Some(transcript) = &turn.transcript
            && !matches!(status, TurnStatus::Failed)
        {
            ctx.session.push_history(duplio_core::types::TurnSummary {
                turn_index: turn.index,
                user_text: transcript.clone(),
                reply_text: turn.reply_text.clone(),
            });
        }

        info!(
            session_id = %turn.session_id,
            turn = turn.index,
            status = %turn.status,
            total_ms = turn.metrics.timings.total_ms,
            "turn finished"
        );
        Some(turn)
    }

    /// Phase 1: stream audio to the recognizer until the final transcript.
    async fn utterance_phase(
        &self,
        ctx: &mut TurnContext,
        outbound: &mpsc::Sender<ServerMessage>,
    ) -> Result<Option<UtteranceResult>, DuplioError> {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let asr = self.deps.asr.clone();
        let cancel = ctx.cancel.clone();
        let frames = std::mem::replace(&mut ctx.frames, mpsc::channel(1).1);

        let asr_task =
            tokio::spawn(async move { asr.run(frames, events_tx, cancel).await });

        while let Some(event) = events_rx.recv().await {
            match event {
                AsrStreamerEvent::Interim(transcript) => {
                    let _ = outbound
                        .send(ServerMessage::Transcript {
                            text: transcript.text,
                            is_final: false,
                            confidence: transcript.confidence,
                        })
                        .await;
                }
                AsrStreamerEvent::EndOfUtterance => {
                    let _ = ctx.state.apply(Trigger::EndOfUtterance).await;
                }
            }
        }

        asr_task
            .await
            .map_err(|e| DuplioError::Internal(format!("asr task panicked: {e}")))?
    }

    /// Phase 2: retrieval, generation, synthesis fan-out, ordered delivery.
    async fn reply_phase(
        &self,
        turn: &mut Turn,
        ctx: &TurnContext,
        outbound: &mpsc::Sender<ServerMessage>,
        turn_started: Instant,
    ) -> TurnStatus {
        let transcript = turn.transcript.clone().unwrap_or_default();

        // Retrieval, hard-budgeted; degrades to empty context.
        let rag_started = Instant::now();
        let retrieval = self
            .deps
            .retrieval
            .retrieve(&ctx.session.user_id, &transcript, self.config.rag_budget)
            .await;
        turn.metrics.rag_timeout = retrieval.rag_timeout;
        turn.metrics.timings.rag_ms = Some(rag_started.elapsed().as_millis() as u64);
        duplio_prometheus::record_stage_latency("rag", rag_started.elapsed().as_secs_f64());
        turn.sources = retrieval
            .chunks
            .iter()
            .map(|chunk| chunk.chunk_id.clone())
            .collect();

        if ctx.cancel.is_cancelled() {
            return TurnStatus::Interrupted;
        }

        let _ = outbound
            .send(ServerMessage::ResponseStart {
                turn_id: turn.id.clone(),
                sources: turn.sources.clone(),
            })
            .await;

        let request =
            self.deps
                .composer
                .compose(&transcript, &retrieval.chunks, &ctx.session.history());

        let llm_started = Instant::now();
        let stream = match self
            .deps
            .llm
            .open(ctx.session.llm_provider.as_deref(), request)
            .await
        {
            Ok(stream) => stream,
            Err(err) => return self.fail_turn(ctx, outbound, err).await,
        };

        // Fan-out plumbing. Every channel is bounded; the chain
        // emitter <- media <- workers <- units <- LLM carries back-pressure
        // upstream.
        let parallelism = self.config.tts_parallelism.max(1);
        let (units_tx, units_rx) = mpsc::channel::<(SynthesisUnit, UnitContext)>(parallelism);
        let (media_tx, mut media_rx) = mpsc::channel::<MediaChunk>(parallelism * 4);
        let (done_tx, mut done_rx) = mpsc::channel::<(u32, Result<u32, DuplioError>)>(16);
        let lipsync_degraded = Arc::new(AtomicBool::new(false));

        let mut consumer = tokio::spawn(consume_llm(
            stream,
            units_tx,
            ctx.session.clone(),
            turn.id.clone(),
            self.deps.tts_prefs.clone(),
            self.config.min_prefetch_chars,
            self.config.llm_first_token,
            ctx.cancel.clone(),
        ));

        let pool = tokio::spawn(worker_pool(
            units_rx,
            self.deps.voice.clone(),
            media_tx,
            done_tx,
            ctx.cancel.clone(),
            lipsync_degraded,
            parallelism,
        ));

        // Emitter: restore order and deliver.
        let mut reorder = ReorderBuffer::new(self.config.reorder_capacity);
        let mut consumer_result: Option<Result<LlmSummary, DuplioError>> = None;
        let mut units_done = 0u32;
        let mut first_audio_ms: Option<u64> = None;
        let mut first_video_ms: Option<u64> = None;
        let mut gap_since: Option<Instant> = None;
        let mut stall_warned = false;
        let mut interrupted = false;
        let mut stall_error: Option<DuplioError> = None;

        loop {
            if let Some(Ok(summary)) = &consumer_result
                && units_done >= summary.units_total
                && reorder.is_empty()
            {
                break;
            }
            if matches!(consumer_result, Some(Err(_))) {
                break;
            }

            // Biased order matters: media before completions, so a unit's
            // completion mark can never outrun chunks already in the channel.
            let drained = tokio::select! {
                biased;

                _ = ctx.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }

                result = &mut consumer, if consumer_result.is_none() => {
                    consumer_result = Some(result.unwrap_or_else(|e| {
                        Err(DuplioError::Internal(format!("llm consumer panicked: {e}")))
                    }));
                    Vec::new()
                }

                Some(chunk) = media_rx.recv() => {
                    match reorder.offer(chunk) {
                        Ok(ready) => ready,
                        Err(err) => {
                            stall_error = Some(err);
                            break;
                        }
                    }
                }

                Some((unit_index, result)) = done_rx.recv() => {
                    units_done += 1;
                    match result {
                        Ok(chunks) => reorder.complete_unit(unit_index, chunks),
                        Err(err) => {
                            warn!(unit = unit_index, error = %err, "synthesis unit skipped");
                            turn.metrics.units_skipped += 1;
                            turn.metrics.retries += 1;
                            let _ = outbound
                                .send(ServerMessage::Warning {
                                    code: "tts_unit_skipped".into(),
                                    message: format!(
                                        "part of the reply could not be voiced (unit {unit_index})"
                                    ),
                                })
                                .await;
                            reorder.skip_unit(unit_index)
                        }
                    }
                }

                _ = tokio::time::sleep(Duration::from_millis(50)) => Vec::new(),
            };

            for chunk in drained {
                if first_audio_ms.is_none() {
                    first_audio_ms = Some(llm_started.elapsed().as_millis() as u64);
                    let _ = ctx.state.apply(Trigger::FirstMediaReady).await;
                }
                if chunk.video.is_some() && first_video_ms.is_none() {
                    first_video_ms = Some(llm_started.elapsed().as_millis() as u64);
                }
                if !self.emit_chunk(ctx, outbound, chunk).await {
                    interrupted = true;
                    break;
                }
            }
            if interrupted {
                break;
            }

            // Stall clock: a persistent ordering gap means a TTS job died
            // without reporting.
            if reorder.has_gap() {
                let since = *gap_since.get_or_insert_with(Instant::now);
                let elapsed = since.elapsed();
                if elapsed >= self.config.stall_timeout * 2 {
                    stall_error = Some(DuplioError::TtsStall {
                        unit_index: reorder.cursor().unit_index,
                    });
                    break;
                }
                if elapsed >= self.config.stall_timeout && !stall_warned {
                    warn!(
                        cursor_unit = reorder.cursor().unit_index,
                        gap_ms = elapsed.as_millis() as u64,
                        "reorder buffer stalled"
                    );
                    stall_warned = true;
                }
            } else {
                gap_since = None;
                stall_warned = false;
            }
        }

        pool.abort();
        consumer.abort();

        if interrupted {
            let dropped = reorder.discard_all();
            debug!(dropped, "interrupted: discarded buffered media");
            return TurnStatus::Interrupted;
        }

        if let Some(err) = stall_error {
            return self.fail_turn(ctx, outbound, err).await;
        }

        match consumer_result {
            Some(Ok(summary)) => {
                turn.reply_text = summary.reply_text.clone();
                turn.metrics.timings.llm_first_token_ms = summary.first_token_ms;
                turn.metrics.timings.llm_total_ms = Some(summary.total_ms);
                turn.metrics.timings.tts_first_chunk_ms = first_audio_ms;
                if let Some(ms) = summary.first_token_ms {
                    duplio_prometheus::record_stage_latency(
                        "llm_first_token",
                        ms as f64 / 1000.0,
                    );
                }
                if let Some(ms) = first_audio_ms {
                    duplio_prometheus::record_stage_latency("tts_first_chunk", ms as f64 / 1000.0);
                }
                turn.metrics.timings.lipsync_first_frame_ms = first_video_ms;
                turn.metrics.timings.total_ms =
                    Some(turn_started.elapsed().as_millis() as u64);
                turn.metrics.cost.tts_characters = summary.tts_characters;
                if let Some(usage) = summary.usage {
                    turn.metrics.cost.llm_input_tokens = u64::from(usage.input_tokens);
                    turn.metrics.cost.llm_output_tokens = u64::from(usage.output_tokens);
                }
                if summary.truncated {
                    warn!(turn = turn.index, "reply truncated after stream failure");
                }

                let _ = outbound
                    .send(ServerMessage::ResponseEnd {
                        turn_id: turn.id.clone(),
                        metrics: turn.metrics.clone(),
                    })
                    .await;

                if first_audio_ms.is_none() {
                    // Nothing was voiced (empty reply): pass through
                    // speaking so the drain transition stays well-formed.
                    let _ = ctx.state.apply(Trigger::FirstMediaReady).await;
                }
                let _ = ctx.state.apply(Trigger::PlaybackDrained).await;
                TurnStatus::Completed
            }
            Some(Err(err)) => self.fail_turn(ctx, outbound, err).await,
            None => self
                .fail_turn(
                    ctx,
                    outbound,
                    DuplioError::Internal("reply loop exited without llm result".into()),
                )
                .await,
        }
    }

    /// Emits one ordered media chunk (audio, then its paired video).
    /// Returns false if the turn was cancelled mid-send.
    async fn emit_chunk(
        &self,
        ctx: &TurnContext,
        outbound: &mpsc::Sender<ServerMessage>,
        chunk: MediaChunk,
    ) -> bool {
        let audio = ServerMessage::ResponseAudio {
            turn_id: chunk.turn_id.clone(),
            unit_index: chunk.key.unit_index,
            seq: chunk.key.chunk_index,
            data: chunk.audio,
        };
        tokio::select! {
            _ = ctx.cancel.cancelled() => return false,
            sent = outbound.send(audio) => {
                if sent.is_err() {
                    return false;
                }
            }
        }

        if let Some(video) = chunk.video {
            let frame = ServerMessage::ResponseVideo {
                turn_id: chunk.turn_id,
                unit_index: chunk.key.unit_index,
                seq: chunk.key.chunk_index,
                data: video.data,
                format: video.format,
            };
            tokio::select! {
                _ = ctx.cancel.cancelled() => return false,
                sent = outbound.send(frame) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn fail_turn(
        &self,
        ctx: &TurnContext,
        outbound: &mpsc::Sender<ServerMessage>,
        err: DuplioError,
    ) -> TurnStatus {
        warn!(error = %err, "turn failed");
        let _ = outbound.send(ServerMessage::from_error(&err)).await;
        let _ = ctx.state.apply(Trigger::FatalFailure).await;
        TurnStatus::Failed
    }
}

/// LLM consumer task: tokens in, synthesis units out.
#[allow(clippy::too_many_arguments)]
async fn consume_llm(
    mut stream: std::pin::Pin<
        Box<dyn futures::Stream<Item = Result<LlmEvent, DuplioError>> + Send>,
    >,
    units_tx: mpsc::Sender<(SynthesisUnit, UnitContext)>,
    session: Arc<Session>,
    turn_id: TurnId,
    prefs: TtsPreferences,
    min_prefetch_chars: usize,
    first_token_deadline: Duration,
    cancel: CancellationToken,
) -> Result<LlmSummary, DuplioError> {
    use futures::StreamExt;

    let mut splitter = SynthesisSplitter::new(min_prefetch_chars);
    let mut reply_text = String::new();
    let mut usage = None;
    let mut truncated = false;
    let mut first_token_ms: Option<u64> = None;
    let mut tts_characters = 0u64;
    let started = Instant::now();

    let dispatch = |unit: SynthesisUnit| {
        // Quality mode is sampled here, at the unit boundary, so mode
        // changes never take effect mid-unit.
        let video_enabled = session.face_model.is_some()
            && session.quality.current_mode().video_enabled();
        let uctx = UnitContext {
            turn_id: turn_id.clone(),
            voice: session.voice_model.clone(),
            face: session.face_model.clone(),
            prefs: prefs.clone(),
            video_enabled,
        };
        (unit, uctx)
    };

    loop {
        let event = if first_token_ms.is_none() {
            match tokio::time::timeout(first_token_deadline, stream.next()).await {
                Ok(event) => event,
                Err(_) => {
                    return Err(DuplioError::LlmTimeout {
                        duration: first_token_deadline,
                    });
                }
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => event,
            }
        };

        match event {
            Some(Ok(LlmEvent::Token(token))) => {
                if first_token_ms.is_none() {
                    first_token_ms = Some(started.elapsed().as_millis() as u64);
                }
                reply_text.push_str(&token);
                for unit in splitter.push(&token) {
                    tts_characters += unit.text.chars().count() as u64;
                    if units_tx.send(dispatch(unit)).await.is_err() {
                        // Emitter gone; the turn is ending.
                        break;
                    }
                }
            }
            Some(Ok(LlmEvent::Usage(u))) => usage = Some(u),
            Some(Ok(LlmEvent::Done)) | None => break,
            Some(Err(err)) => {
                if first_token_ms.is_none() {
                    // Failure before the first token aborts the turn.
                    return Err(err);
                }
                // After the first token: truncate gracefully.
                warn!(error = %err, "llm stream failed mid-reply, truncating");
                truncated = true;
                break;
            }
        }
    }

    if !cancel.is_cancelled()
        && let Some(unit) = splitter.finish()
    {
        tts_characters += unit.text.chars().count() as u64;
        let _ = units_tx.send(dispatch(unit)).await;
    }

    Ok(LlmSummary {
        reply_text,
        usage,
        first_token_ms,
        total_ms: started.elapsed().as_millis() as u64,
        truncated,
        units_total: splitter.units_emitted(),
        tts_characters,
    })
}

/// Bounded worker pool running TTS jobs concurrently.
async fn worker_pool(
    mut units_rx: mpsc::Receiver<(SynthesisUnit, UnitContext)>,
    voice: Arc<VoiceStreamer>,
    media_tx: mpsc::Sender<MediaChunk>,
    done_tx: mpsc::Sender<(u32, Result<u32, DuplioError>)>,
    cancel: CancellationToken,
    lipsync_degraded: Arc<AtomicBool>,
    parallelism: usize,
) {
    let semaphore = Arc::new(Semaphore::new(parallelism));

    while let Some((unit, uctx)) = units_rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let voice = voice.clone();
        let media_tx = media_tx.clone();
        let done_tx = done_tx.clone();
        let cancel = cancel.clone();
        let lipsync_degraded = lipsync_degraded.clone();

        tokio::spawn(async move {
            let index = unit.index;
            let result = voice
                .stream_unit(&unit, &uctx, &media_tx, &cancel, &lipsync_degraded)
                .await;
            let _ = done_tx.send((index, result)).await;
            drop(permit);
        });
    }
}
