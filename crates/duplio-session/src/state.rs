// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session conversation state machine.
//!
//! The machine itself is a pure transition table. It is driven through a
//! single-consumer actor so transitions for one session are totally ordered
//! and can never interleave; rejected transitions leave the state unchanged
//! and are reported to the requester.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// States of one conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the user to start speaking.
    Idle,
    /// Buffering an utterance.
    Listening,
    /// Utterance ended; retrieval and generation are in flight.
    Processing,
    /// Streaming the reply to the client.
    Speaking,
    /// A pre-emption is being stabilized.
    Interrupted,
    /// Momentary state while a recoverable failure is surfaced.
    Error,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Idle => write!(f, "idle"),
            ConversationState::Listening => write!(f, "listening"),
            ConversationState::Processing => write!(f, "processing"),
            ConversationState::Speaking => write!(f, "speaking"),
            ConversationState::Interrupted => write!(f, "interrupted"),
            ConversationState::Error => write!(f, "error"),
        }
    }
}

/// Transition triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An audio frame arrived.
    AudioChunk,
    /// Explicit `end_utterance` or VAD silence boundary.
    EndOfUtterance,
    /// The recognizer delivered the final transcript.
    FinalTranscript,
    /// The first TTS chunk is ready for delivery.
    FirstMediaReady,
    /// The reply is fully drained to the client.
    PlaybackDrained,
    /// Explicit interruption or barge-in voice energy.
    Interrupt,
    /// Post-interrupt stabilization finished; a new utterance begins.
    Stabilized,
    /// A stage failed recoverably; state dips into `Error`.
    RecoverableFailure,
    /// Leaves the momentary `Error` state back to the prior steady state.
    Recovered,
    /// A fatal or repeated stage failure; the session returns to idle.
    FatalFailure,
    /// The connection dropped; any utterance or reply is abandoned and the
    /// session parks at idle for the grace window.
    Reset,
}

/// A successfully applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
}

/// A rejected transition request; the state did not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: ConversationState,
    pub trigger: Trigger,
}

/// The pure transition table.
#[derive(Debug)]
pub struct StateMachine {
    state: ConversationState,
    /// Steady state to return to after a momentary `Error`.
    prior: ConversationState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            prior: ConversationState::Idle,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Applies a trigger, returning the transition or a rejection.
    pub fn apply(&mut self, trigger: Trigger) -> Result<Transition, Rejected> {
        use ConversationState::*;
        use Trigger::*;

        let from = self.state;
        let to = match (from, trigger) {
            (Idle, AudioChunk) => Listening,
            (Listening, AudioChunk) => Listening,
            (Listening, EndOfUtterance) => Processing,
            (Processing, FinalTranscript) => Processing,
            (Processing, FirstMediaReady) => Speaking,
            (Speaking, PlaybackDrained) => Idle,
            (Speaking, Interrupt) | (Processing, Interrupt) => Interrupted,
            (Interrupted, Stabilized) => Listening,
            (Error, Recovered) => self.prior,
            (Error, _) => return Err(Rejected { state: from, trigger }),
            (_, RecoverableFailure) => {
                self.prior = from;
                Error
            }
            (_, FatalFailure) => Idle,
            (Interrupted | Listening | Idle, Reset) => Idle,
            _ => return Err(Rejected { state: from, trigger }),
        };

        self.state = to;
        Ok(Transition { from, to })
    }
}

/// Commands accepted by the state actor.
enum StateCommand {
    Apply {
        trigger: Trigger,
        reply: oneshot::Sender<Result<Transition, Rejected>>,
    },
    Get {
        reply: oneshot::Sender<ConversationState>,
    },
}

/// Handle for requesting transitions on one session's state actor.
///
/// All holders funnel into the same single-consumer loop, so observed
/// transitions are totally ordered per session.
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::Sender<StateCommand>,
}

impl StateHandle {
    /// Requests a transition; resolves once the actor has applied it.
    pub async fn apply(&self, trigger: Trigger) -> Result<Transition, Rejected> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(StateCommand::Apply { trigger, reply })
            .await
            .is_err()
        {
            // Actor gone: session is shutting down. Report as rejected.
            return Err(Rejected {
                state: ConversationState::Idle,
                trigger,
            });
        }
        rx.await.unwrap_or(Err(Rejected {
            state: ConversationState::Idle,
            trigger,
        }))
    }

    /// Reads the current state.
    pub async fn state(&self) -> ConversationState {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StateCommand::Get { reply }).await.is_err() {
            return ConversationState::Idle;
        }
        rx.await.unwrap_or(ConversationState::Idle)
    }
}

/// Spawns the state actor for one session.
///
/// Every applied transition with `from != to` is published on the returned
/// events channel (for `state_changed` frames). The actor exits when all
/// handles are dropped.
pub fn spawn_state_actor(buffer: usize) -> (StateHandle, mpsc::Receiver<Transition>) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let (events_tx, events_rx) = mpsc::channel(buffer);

    tokio::spawn(async move {
        let mut machine = StateMachine::new();
        while let Some(command) = rx.recv().await {
            match command {
                StateCommand::Apply { trigger, reply } => {
                    let result = machine.apply(trigger);
                    match &result {
                        Ok(transition) if transition.from != transition.to => {
                            debug!(from = %transition.from, to = %transition.to, "state transition");
                            let _ = events_tx.send(*transition).await;
                        }
                        Ok(_) => {}
                        Err(rejected) => {
                            warn!(
                                state = %rejected.state,
                                trigger = ?rejected.trigger,
                                "transition rejected"
                            );
                        }
                    }
                    let _ = reply.send(result);
                }
                StateCommand::Get { reply } => {
                    let _ = reply.send(machine.state());
                }
            }
        }
    });

    (StateHandle { tx }, events_rx)
}
