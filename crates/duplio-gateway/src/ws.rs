// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket transport endpoint.
//!
//! Connection lifecycle: upgrade, read the auth frame (within the bind
//! timeout), bind a session, then split into a writer task (session
//! forwarder -> socket, plus periodic pings) and a reader loop (client
//! frames -> controller events). The endpoint performs no business logic;
//! every conversational decision lives behind the session's controller.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplio_core::error::DuplioError;
use duplio_core::protocol::{ClientMessage, ServerMessage};
use duplio_core::types::{AudioFrame, FaceModelHandle, SessionId, VoiceModelHandle};
use duplio_pipeline::spawn_controller;
use duplio_session::{ClientEvent, SessionProfile};

use crate::auth::validate_token;
use crate::server::GatewayState;

/// Interval between server pings used for RTT estimation.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handles one client connection end to end.
async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    state.aggregator.connection_attempt();
    let connect_started = Instant::now();

    // First frame must be auth, within the bind timeout.
    let identity = match read_auth(&mut socket, &state).await {
        Ok(identity) => identity,
        Err(err) => {
            let code = err.code().to_string();
            state.aggregator.connection_failure(&code);
            duplio_prometheus::record_connection_failure(&code);
            let _ = send_frame(&mut socket, &ServerMessage::from_error(&err)).await;
            let _ = socket.close().await;
            return;
        }
    };

    // Model handles come from the enrollment service in production; the
    // gateway derives stable defaults so guests work out of the box.
    let profile = SessionProfile {
        user_id: identity.user_id.clone(),
        voice_model: VoiceModelHandle(format!("voice-{}", identity.user_id)),
        face_model: if state.lipsync_enabled {
            Some(FaceModelHandle(format!("face-{}", identity.user_id)))
        } else {
            None
        },
        llm_provider: None,
    };

    let outcome = match state.manager.bind(profile) {
        Ok(outcome) => outcome,
        Err(err) => {
            let code = err.code().to_string();
            state.aggregator.connection_failure(&code);
            duplio_prometheus::record_connection_failure(&code);
            let _ = send_frame(&mut socket, &ServerMessage::from_error(&err)).await;
            let _ = socket.close().await;
            return;
        }
    };

    let session = outcome.session.clone();
    let resumed = outcome.resumed;

    // A fresh session gets its controller; it survives reconnects.
    if let Some(events_rx) = outcome.events_rx {
        spawn_controller(
            session.clone(),
            events_rx,
            state.pipeline.clone(),
            state.controller_config.clone(),
        );
    }

    let connect_ms = connect_started.elapsed().as_millis() as u64;
    state.aggregator.connection_success(connect_ms);
    duplio_prometheus::record_connection_success(connect_started.elapsed().as_secs_f64());

    info!(
        session_id = %session.id,
        user_id = %session.user_id,
        resumed,
        connect_ms,
        "connection bound"
    );

    let _ = send_frame(
        &mut socket,
        &ServerMessage::SessionBound {
            session_id: session.id.clone(),
            resumed,
        },
    )
    .await;

    // Attach this connection; a previous one (if any) is cancelled with
    // its writer/reader tasks.
    let conn_cancel = CancellationToken::new();
    let (conn_tx, conn_rx) = mpsc::channel::<ServerMessage>(8);
    session.attach_connection(conn_tx, conn_cancel.clone());

    let (ws_sender, ws_receiver) = socket.split();
    let writer = tokio::spawn(writer_task(ws_sender, conn_rx, conn_cancel.clone()));

    let replaced = reader_loop(ws_receiver, &session, &state, &conn_cancel).await;

    if replaced {
        // Another connection took over; do not start the grace timer.
        debug!(session_id = %session.id, "connection replaced");
    } else {
        let _ = session.events().send(ClientEvent::ConnectionDropped).await;
        state.manager.unbind(&session.user_id);
        info!(session_id = %session.id, "connection closed, grace timer started");
    }

    conn_cancel.cancel();
    let _ = writer.await;
}

/// Reads the auth frame and validates the token.
async fn read_auth(
    socket: &mut WebSocket,
    state: &GatewayState,
) -> Result<crate::auth::AuthIdentity, DuplioError> {
    let frame = tokio::time::timeout(state.bind_timeout, socket.recv())
        .await
        .map_err(|_| DuplioError::SessionCreateFailed("auth frame timed out".into()))?;

    let Some(Ok(Message::Text(text))) = frame else {
        return Err(DuplioError::AuthRequired);
    };

    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(ClientMessage::Auth { token }) => validate_token(&token, &state.auth),
        Ok(_) => Err(DuplioError::AuthRequired),
        Err(e) => Err(DuplioError::AuthInvalid(format!("malformed auth frame: {e}"))),
    }
}

/// Writer: session frames and periodic pings out to the socket.
async fn writer_task(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut conn_rx: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ping.tick() => ServerMessage::Ping {
                ts: Utc::now().timestamp_millis(),
            },
            message = conn_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Ok(json) = serde_json::to_string(&message) else {
            continue;
        };
        if ws_sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

/// Reader: client frames in, controller events out.
///
/// Returns true when the loop ended because the connection was replaced by
/// a newer one (no grace timer in that case).
async fn reader_loop(
    mut ws_receiver: futures::stream::SplitStream<WebSocket>,
    session: &std::sync::Arc<duplio_session::Session>,
    state: &GatewayState,
    conn_cancel: &CancellationToken,
) -> bool {
    let events = session.events();
    let outbound = session.outbound();

    loop {
        let frame = tokio::select! {
            _ = conn_cancel.cancelled() => return true,
            frame = ws_receiver.next() => frame,
        };

        let Some(Ok(frame)) = frame else {
            return false;
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return false,
            // Binary, ping, pong handled by the protocol layer.
            _ => continue,
        };

        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "malformed frame");
                // One error frame; the connection stays open.
                let _ = outbound
                    .send(ServerMessage::Error {
                        code: "WEBSOCKET_ERROR".into(),
                        message: "malformed frame".into(),
                        recoverable: true,
                        retryable: false,
                    })
                    .await;
                continue;
            }
        };

        match message {
            ClientMessage::AudioChunk {
                seq,
                data,
                ts,
                session_id,
            } => {
                if !session_matches(session_id.as_ref(), &session.id, &outbound).await {
                    continue;
                }
                let frame = AudioFrame {
                    seq,
                    data,
                    captured_at_ms: ts,
                };
                if events.send(ClientEvent::Audio(frame)).await.is_err() {
                    return false;
                }
            }
            ClientMessage::EndUtterance { session_id, .. } => {
                if !session_matches(session_id.as_ref(), &session.id, &outbound).await {
                    continue;
                }
                if events.send(ClientEvent::EndUtterance).await.is_err() {
                    return false;
                }
            }
            ClientMessage::Interruption { session_id, .. } => {
                if !session_matches(session_id.as_ref(), &session.id, &outbound).await {
                    continue;
                }
                if events.send(ClientEvent::Interruption).await.is_err() {
                    return false;
                }
            }
            ClientMessage::Pong { ts } => {
                let rtt = Utc::now().timestamp_millis() - ts;
                if rtt >= 0 {
                    session.quality.observe_rtt(rtt as f64);
                }
            }
            ClientMessage::QualityReport { playback_buffer_ms } => {
                session.quality.observe_client_report(playback_buffer_ms);
            }
            ClientMessage::Auth { .. } => {
                warn!("auth frame after bind ignored");
            }
        }
    }
}

/// Validates an optional per-message session id against the bound session.
async fn session_matches(
    claimed: Option<&SessionId>,
    bound: &SessionId,
    outbound: &mpsc::Sender<ServerMessage>,
) -> bool {
    match claimed {
        None => true,
        Some(claimed) if claimed == bound => true,
        Some(claimed) => {
            warn!(claimed = %claimed, bound = %bound, "session id mismatch, frame dropped");
            let _ = outbound
                .send(ServerMessage::Error {
                    code: "WEBSOCKET_ERROR".into(),
                    message: "session id mismatch".into(),
                    recoverable: true,
                    retryable: false,
                })
                .await;
            false
        }
    }
}

/// Serializes and sends one frame directly on the socket (pre-split phase).
async fn send_frame(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}
