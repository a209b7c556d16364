// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-session object and its outbound delivery path.
//!
//! A [`Session`] outlives connections: the WebSocket may drop and a new one
//! reattach within the grace window while the session's state, history, and
//! buffered output stay put. Outbound frames flow through one bounded queue
//! (the system's back-pressure regulator) into a forwarder task that follows
//! whichever connection is currently attached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use duplio_core::protocol::ServerMessage;
use duplio_core::types::{
    AudioFrame, FaceModelHandle, SessionId, TurnId, TurnSummary, UserId, VoiceModelHandle,
};
use duplio_media::QualityEstimator;

/// Events the gateway feeds into a session's controller.
#[derive(Debug)]
pub enum ClientEvent {
    Audio(AudioFrame),
    EndUtterance,
    Interruption,
    /// The attached connection dropped; abandon in-flight work and park at
    /// idle for the grace window.
    ConnectionDropped,
}

/// User-profile inputs for a new session.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_id: UserId,
    pub voice_model: VoiceModelHandle,
    pub face_model: Option<FaceModelHandle>,
    pub llm_provider: Option<String>,
}

/// A long-lived conversation session.
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub voice_model: VoiceModelHandle,
    pub face_model: Option<FaceModelHandle>,
    pub llm_provider: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub quality: Arc<QualityEstimator>,
    /// Cancelled when the session is destroyed; stops controller and forwarder.
    pub cancel: CancellationToken,

    outbound_tx: mpsc::Sender<ServerMessage>,
    /// Sender side of the attached connection, updated on (re)bind.
    conn_tx: watch::Sender<Option<mpsc::Sender<ServerMessage>>>,
    /// Cancellation for the currently attached connection's socket tasks.
    conn_cancel: Mutex<Option<CancellationToken>>,
    /// Turn whose buffered output is being discarded after an interruption.
    discard_turn: Mutex<Option<TurnId>>,
    events_tx: mpsc::Sender<ClientEvent>,
    next_turn_index: AtomicU64,
    current_turn: Mutex<Option<TurnId>>,
    history: Mutex<VecDeque<TurnSummary>>,
    history_cap: usize,
    last_activity: Mutex<Instant>,
}

impl Session {
    /// Creates a session plus the receivers its controller task consumes.
    ///
    /// `outbound_capacity` is the bounded frame queue (the back-pressure
    /// regulator); `history_cap` bounds the turn-summary ring.
    pub fn new(
        profile: SessionProfile,
        outbound_capacity: usize,
        history_cap: usize,
    ) -> (Arc<Self>, SessionChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (conn_tx, conn_rx) = watch::channel(None);

        let session = Arc::new(Self {
            id: SessionId::generate(),
            user_id: profile.user_id,
            voice_model: profile.voice_model,
            face_model: profile.face_model,
            llm_provider: profile.llm_provider,
            started_at: chrono::Utc::now(),
            quality: Arc::new(QualityEstimator::new()),
            cancel: CancellationToken::new(),
            outbound_tx,
            conn_tx,
            conn_cancel: Mutex::new(None),
            discard_turn: Mutex::new(None),
            events_tx,
            next_turn_index: AtomicU64::new(1),
            current_turn: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            history_cap,
            last_activity: Mutex::new(Instant::now()),
        });

        session.clone().spawn_forwarder(outbound_rx, conn_rx);

        (session, SessionChannels { events_rx })
    }

    /// Sender for outbound frames. Blocks when the bounded queue is full,
    /// propagating client back-pressure upstream.
    pub fn outbound(&self) -> mpsc::Sender<ServerMessage> {
        self.outbound_tx.clone()
    }

    /// Sender for client events into the controller.
    pub fn events(&self) -> mpsc::Sender<ClientEvent> {
        self.events_tx.clone()
    }

    /// Attaches a connection, replacing (and cancelling) any previous one.
    pub fn attach_connection(&self, conn: mpsc::Sender<ServerMessage>, cancel: CancellationToken) {
        self.touch();
        let previous = self
            .conn_cancel
            .lock()
            .expect("session lock poisoned")
            .replace(cancel);
        if let Some(previous) = previous {
            previous.cancel();
        }
        let _ = self.conn_tx.send(Some(conn));
    }

    /// Detaches the current connection; the forwarder parks until reattach.
    pub fn detach_connection(&self) {
        if let Some(cancel) = self
            .conn_cancel
            .lock()
            .expect("session lock poisoned")
            .take()
        {
            cancel.cancel();
        }
        let _ = self.conn_tx.send(None);
    }

    /// Whether a connection is currently attached.
    pub fn connected(&self) -> bool {
        self.conn_tx.borrow().is_some()
    }

    /// Allocates the next turn index (dense, starting at 1).
    pub fn next_turn_index(&self) -> u64 {
        self.next_turn_index.fetch_add(1, Ordering::SeqCst)
    }

    /// Sets or clears the live turn. A session in `speaking` always has one.
    pub fn set_current_turn(&self, turn: Option<TurnId>) {
        *self.current_turn.lock().expect("session lock poisoned") = turn;
    }

    /// The live turn, if a reply is in flight.
    pub fn current_turn(&self) -> Option<TurnId> {
        self.current_turn
            .lock()
            .expect("session lock poisoned")
            .clone()
    }

    /// Marks the session active now.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("session lock poisoned") = Instant::now();
    }

    /// Time since the last client activity.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .expect("session lock poisoned")
            .elapsed()
    }

    /// Records a completed turn's summary in the history ring.
    pub fn push_history(&self, summary: TurnSummary) {
        let mut history = self.history.lock().expect("session lock poisoned");
        history.push_back(summary);
        while history.len() > self.history_cap {
            history.pop_front();
        }
    }

    /// Snapshot of the history ring, oldest first.
    pub fn history(&self) -> Vec<TurnSummary> {
        self.history
            .lock()
            .expect("session lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Starts discarding buffered output for `turn` (after an interruption).
    pub fn discard_turn_output(&self, turn: TurnId) {
        *self.discard_turn.lock().expect("session lock poisoned") = Some(turn);
    }

    fn should_discard(&self, message: &ServerMessage) -> bool {
        let discard = self.discard_turn.lock().expect("session lock poisoned");
        let Some(discarded) = discard.as_ref() else {
            return false;
        };
        match message {
            ServerMessage::ResponseAudio { turn_id, .. }
            | ServerMessage::ResponseVideo { turn_id, .. }
            | ServerMessage::ResponseEnd { turn_id, .. } => turn_id == discarded,
            _ => false,
        }
    }

    /// Forwarder: drains the bounded outbound queue into whichever
    /// connection is attached, parking (and letting the queue fill) while
    /// disconnected. Frames of a discarded turn are dropped here wholesale.
    fn spawn_forwarder(
        self: Arc<Self>,
        mut outbound_rx: mpsc::Receiver<ServerMessage>,
        mut conn_rx: watch::Receiver<Option<mpsc::Sender<ServerMessage>>>,
    ) {
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                if self.should_discard(&message) {
                    continue;
                }

                // Deliver to the current connection, waiting out detached
                // intervals. Delivery failure means the connection died
                // mid-send; wait for the next one and retry the same frame.
                'deliver: loop {
                    let conn = conn_rx.borrow_and_update().clone();
                    match conn {
                        Some(conn) => {
                            tokio::select! {
                                _ = self.cancel.cancelled() => return,
                                sent = conn.send(message.clone()) => {
                                    if sent.is_ok() {
                                        break 'deliver;
                                    }
                                    // Connection channel closed; detach and wait.
                                    let _ = self.conn_tx.send(None);
                                }
                            }
                        }
                        None => {
                            tokio::select! {
                                _ = self.cancel.cancelled() => return,
                                changed = conn_rx.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            debug!(session_id = %self.id, "outbound forwarder stopped");
        });
    }
}

/// Receivers handed to the session's controller at creation.
pub struct SessionChannels {
    pub events_rx: mpsc::Receiver<ClientEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SessionProfile {
        SessionProfile {
            user_id: UserId("alice".into()),
            voice_model: VoiceModelHandle("voice-1".into()),
            face_model: None,
            llm_provider: None,
        }
    }

    #[tokio::test]
    async fn turn_indices_are_dense_from_one() {
        let (session, _channels) = Session::new(profile(), 8, 5);
        assert_eq!(session.next_turn_index(), 1);
        assert_eq!(session.next_turn_index(), 2);
        assert_eq!(session.next_turn_index(), 3);
    }

    #[tokio::test]
    async fn history_ring_is_bounded() {
        let (session, _channels) = Session::new(profile(), 8, 2);
        for i in 1..=4 {
            session.push_history(TurnSummary {
                turn_index: i,
                user_text: format!("q{i}"),
                reply_text: format!("a{i}"),
            });
        }
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].turn_index, 3);
        assert_eq!(history[1].turn_index, 4);
    }

    #[tokio::test]
    async fn forwarder_delivers_to_attached_connection() {
        let (session, _channels) = Session::new(profile(), 8, 5);
        let (conn_tx, mut conn_rx) = mpsc::channel(8);
        session.attach_connection(conn_tx, CancellationToken::new());

        session
            .outbound()
            .send(ServerMessage::Ping { ts: 1 })
            .await
            .unwrap();

        match conn_rx.recv().await.unwrap() {
            ServerMessage::Ping { ts } => assert_eq!(ts, 1),
            other => panic!("expected ping, got {other:?}"),
        }
        session.cancel.cancel();
    }

    #[tokio::test]
    async fn frames_survive_a_reconnect() {
        let (session, _channels) = Session::new(profile(), 8, 5);

        // No connection yet: the frame waits in the queue.
        session
            .outbound()
            .send(ServerMessage::Ping { ts: 7 })
            .await
            .unwrap();

        let (conn_tx, mut conn_rx) = mpsc::channel(8);
        session.attach_connection(conn_tx, CancellationToken::new());

        match conn_rx.recv().await.unwrap() {
            ServerMessage::Ping { ts } => assert_eq!(ts, 7),
            other => panic!("expected ping, got {other:?}"),
        }
        session.cancel.cancel();
    }

    #[tokio::test]
    async fn discarded_turn_frames_are_dropped() {
        let (session, _channels) = Session::new(profile(), 8, 5);
        let turn = TurnId("turn-1".into());
        session.discard_turn_output(turn.clone());

        session
            .outbound()
            .send(ServerMessage::ResponseAudio {
                turn_id: turn.clone(),
                unit_index: 0,
                seq: 0,
                data: vec![1, 2],
            })
            .await
            .unwrap();
        session
            .outbound()
            .send(ServerMessage::Ping { ts: 9 })
            .await
            .unwrap();

        let (conn_tx, mut conn_rx) = mpsc::channel(8);
        session.attach_connection(conn_tx, CancellationToken::new());

        // The audio frame of the discarded turn never arrives; the ping does.
        match conn_rx.recv().await.unwrap() {
            ServerMessage::Ping { ts } => assert_eq!(ts, 9),
            other => panic!("expected ping, got {other:?}"),
        }
        session.cancel.cancel();
    }
}
