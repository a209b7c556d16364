// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-session controller task.
//!
//! One controller runs for each session's lifetime (it survives
//! reconnects). It owns the state actor, routes client events by current
//! state, spawns one turn pipeline per utterance, and enforces the
//! interruption contract: trip the turn's cancellation token, discard
//! buffered output, notify the client, and stabilize back to listening
//! within the cancellation budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplio_asr::frame_energy;
use duplio_core::protocol::ServerMessage;
use duplio_core::types::{AudioFrame, Turn};
use duplio_session::{ClientEvent, ConversationState, Session, StateHandle, Trigger, spawn_state_actor};

use crate::turn::{TurnContext, TurnPipeline};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Stage tasks must release within this budget after an interrupt.
    pub cancel_budget: Duration,
    /// Treat voice energy during speaking/processing as barge-in.
    pub barge_in_on_voice: bool,
    pub voice_energy_threshold: f32,
    /// Capacity of the per-utterance audio frame channel.
    pub frame_channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cancel_budget: Duration::from_millis(200),
            barge_in_on_voice: true,
            voice_energy_threshold: 0.05,
            frame_channel_capacity: 64,
        }
    }
}

struct CurrentTurn {
    frames_tx: Option<mpsc::Sender<AudioFrame>>,
    cancel: CancellationToken,
    join: JoinHandle<Option<Turn>>,
}

/// Spawns the controller task for a freshly created session.
pub fn spawn_controller(
    session: Arc<Session>,
    events_rx: mpsc::Receiver<ClientEvent>,
    pipeline: Arc<TurnPipeline>,
    config: ControllerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let controller = SessionController {
            session,
            pipeline,
            config,
            current: None,
        };
        controller.run(events_rx).await;
    })
}

struct SessionController {
    session: Arc<Session>,
    pipeline: Arc<TurnPipeline>,
    config: ControllerConfig,
    current: Option<CurrentTurn>,
}

impl SessionController {
    async fn run(mut self, mut events_rx: mpsc::Receiver<ClientEvent>) {
        let (state, mut transitions_rx) = spawn_state_actor(32);
        let outbound = self.session.outbound();
        let session_cancel = self.session.cancel.clone();

        info!(session_id = %self.session.id, "controller started");

        loop {
            tokio::select! {
                _ = session_cancel.cancelled() => break,

                transition = transitions_rx.recv() => {
                    let Some(transition) = transition else { break };
                    // State frames are advisory; never let a stalled client
                    // block event handling.
                    let frame = ServerMessage::StateChanged {
                        from: transition.from.to_string(),
                        to: transition.to.to_string(),
                    };
                    if outbound.try_send(frame).is_err() {
                        debug!("outbound queue full, state_changed frame dropped");
                    }
                }

                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event, &state, &outbound).await;
                }
            }
        }

        // Session teardown: release any in-flight turn.
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
            let abort = current.join.abort_handle();
            if tokio::time::timeout(self.config.cancel_budget, current.join)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        info!(session_id = %self.session.id, "controller stopped");
    }

    async fn handle_event(
        &mut self,
        event: ClientEvent,
        state: &StateHandle,
        outbound: &mpsc::Sender<ServerMessage>,
    ) {
        match event {
            ClientEvent::Audio(frame) => {
                self.session.touch();
                self.handle_audio(frame, state, outbound).await;
            }
            ClientEvent::EndUtterance => {
                self.session.touch();
                // Dropping the sender closes the utterance; the pipeline
                // flushes the recognizer and moves to processing.
                if let Some(current) = self.current.as_mut() {
                    current.frames_tx = None;
                }
            }
            ClientEvent::Interruption => {
                self.session.touch();
                let snapshot = state.state().await;
                match snapshot {
                    ConversationState::Processing | ConversationState::Speaking => {
                        self.interrupt(state, outbound, true).await;
                    }
                    _ => {
                        // Rejected transition: report without changing state.
                        let _ = state.apply(Trigger::Interrupt).await;
                        let _ = outbound
                            .send(ServerMessage::Warning {
                                code: "state_error".into(),
                                message: format!(
                                    "interruption ignored in state '{snapshot}'"
                                ),
                            })
                            .await;
                    }
                }
            }
            ClientEvent::ConnectionDropped => {
                let snapshot = state.state().await;
                debug!(state = %snapshot, "connection dropped");
                match snapshot {
                    ConversationState::Processing | ConversationState::Speaking => {
                        // Abandon the reply; the turn is recorded as
                        // interrupted and the session parks at idle.
                        self.interrupt(state, outbound, false).await;
                        let _ = state.apply(Trigger::Reset).await;
                    }
                    ConversationState::Listening | ConversationState::Interrupted => {
                        self.abandon_utterance().await;
                        let _ = state.apply(Trigger::Reset).await;
                    }
                    _ => {}
                }
            }
        }
    }

    async fn handle_audio(
        &mut self,
        frame: AudioFrame,
        state: &StateHandle,
        outbound: &mpsc::Sender<ServerMessage>,
    ) {
        let snapshot = state.state().await;
        match snapshot {
            ConversationState::Idle => {
                if state.apply(Trigger::AudioChunk).await.is_ok() {
                    self.start_turn(state, Some(frame)).await;
                }
            }
            ConversationState::Listening => {
                match &self.current {
                    Some(current) => {
                        // Forward into the open utterance. A closed sender
                        // means the utterance already ended; drop the frame.
                        if let Some(tx) = &current.frames_tx {
                            let _ = tx.send(frame).await;
                        }
                    }
                    // Post-interrupt listening: this frame opens the next
                    // utterance.
                    None => self.start_turn(state, Some(frame)).await,
                }
            }
            ConversationState::Processing | ConversationState::Speaking => {
                // Barge-in: voice energy during the reply pre-empts it and
                // the triggering frame opens the next utterance.
                if self.config.barge_in_on_voice
                    && frame_energy(&frame.data) >= self.config.voice_energy_threshold
                {
                    debug!(seq = frame.seq, "barge-in detected");
                    self.interrupt(state, outbound, true).await;
                    self.start_turn(state, Some(frame)).await;
                }
            }
            ConversationState::Interrupted | ConversationState::Error => {
                // Stabilization window; drop the frame.
            }
        }
    }

    /// Starts a new utterance/turn. `first_frame` seeds the audio channel.
    async fn start_turn(&mut self, state: &StateHandle, first_frame: Option<AudioFrame>) {
        // A finished pipeline task may still be parked here; drop it.
        if let Some(current) = self.current.take() {
            if !current.join.is_finished() {
                warn!("starting a turn while the previous pipeline is live; cancelling it");
                current.cancel.cancel();
            }
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_channel_capacity);
        if let Some(frame) = first_frame {
            let _ = frames_tx.send(frame).await;
        }

        let cancel = self.session.cancel.child_token();
        let ctx = TurnContext {
            session: self.session.clone(),
            state: state.clone(),
            frames: frames_rx,
            cancel: cancel.clone(),
        };
        let pipeline = self.pipeline.clone();
        let join = tokio::spawn(async move { pipeline.run(ctx).await });

        self.current = Some(CurrentTurn {
            frames_tx: Some(frames_tx),
            cancel,
            join,
        });
    }

    /// The interruption contract: cancel, wait out the release budget,
    /// discard buffered output, notify, and (optionally) stabilize back to
    /// listening.
    async fn interrupt(
        &mut self,
        state: &StateHandle,
        outbound: &mpsc::Sender<ServerMessage>,
        stabilize: bool,
    ) {
        let Some(current) = self.current.take() else {
            return;
        };

        // Discard before cancelling so buffered frames drain away instead of
        // holding the queue open.
        let turn_id = self.session.current_turn();
        if let Some(turn_id) = &turn_id {
            self.session.discard_turn_output(turn_id.clone());
        }

        current.cancel.cancel();
        duplio_prometheus::record_interruption();
        let _ = state.apply(Trigger::Interrupt).await;

        // Stage tasks must release within the budget; past it, force-close.
        let abort = current.join.abort_handle();
        match tokio::time::timeout(self.config.cancel_budget, current.join).await {
            Ok(_) => {}
            Err(_) => {
                warn!(
                    budget_ms = self.config.cancel_budget.as_millis() as u64,
                    "turn did not release within the cancellation budget, aborting"
                );
                abort.abort();
            }
        }

        if let Some(turn_id) = turn_id {
            let _ = outbound
                .send(ServerMessage::Interrupted { turn_id })
                .await;
        }
        self.session.set_current_turn(None);

        if stabilize {
            let _ = state.apply(Trigger::Stabilized).await;
        }
    }

    /// Abandons an utterance that never became a turn (connection dropped
    /// while listening).
    async fn abandon_utterance(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
            let abort = current.join.abort_handle();
            if tokio::time::timeout(self.config.cancel_budget, current.join)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
    }
}
