// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire protocol for the client channel.
//!
//! Messages are JSON objects with a `type` discriminant. Binary payloads
//! (audio, video) travel base64-encoded.
//!
//! Client -> Server:
//! ```json
//! {"type": "auth", "token": "guest_..."}
//! {"type": "audio_chunk", "seq": 1, "data": "<base64 pcm>", "ts": 1712000000000}
//! {"type": "end_utterance", "ts": 1712000001000}
//! {"type": "interruption", "ts": 1712000002000}
//! ```
//!
//! Server -> Client:
//! ```json
//! {"type": "transcript", "text": "hello", "final": false, "confidence": 0.82}
//! {"type": "response_start", "turn_id": "...", "sources": []}
//! {"type": "response_audio", "turn_id": "...", "unit_index": 0, "seq": 0, "data": "..."}
//! {"type": "response_end", "turn_id": "...", "metrics": {...}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DuplioError;
use crate::types::{SessionId, TurnId, TurnMetrics};

/// Serde helper for base64-encoded binary fields.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Messages a client may send after the connection is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on every connection: presents the auth token.
    Auth { token: String },
    /// One ~100ms PCM audio frame. `seq` is strictly increasing per session.
    AudioChunk {
        seq: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        ts: i64,
        /// When present, must match the bound session; mismatches are
        /// dropped with an error frame.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// Client-detected end of the current utterance.
    EndUtterance {
        ts: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// Explicit interruption of the in-flight reply.
    Interruption {
        ts: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_index: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// Reply to a server ping; used for RTT estimation.
    Pong { ts: i64 },
    /// Client-side playback telemetry feeding the quality estimator.
    QualityReport { playback_buffer_ms: u32 },
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a successful bind. `resumed` is true when the session
    /// was reattached within the grace window.
    SessionBound {
        session_id: SessionId,
        resumed: bool,
    },
    Transcript {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
        confidence: f32,
    },
    ResponseStart {
        turn_id: TurnId,
        sources: Vec<String>,
    },
    ResponseAudio {
        turn_id: TurnId,
        unit_index: u32,
        seq: u32,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    ResponseVideo {
        turn_id: TurnId,
        unit_index: u32,
        seq: u32,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        format: String,
    },
    ResponseEnd {
        turn_id: TurnId,
        metrics: TurnMetrics,
    },
    StateChanged {
        from: String,
        to: String,
    },
    /// The in-flight turn was pre-empted; the client discards any buffered
    /// output for it.
    #[serde(rename = "conversation_interrupted")]
    Interrupted { turn_id: TurnId },
    /// Non-fatal notice, e.g. a skipped synthesis unit.
    Warning {
        code: String,
        message: String,
    },
    Ping {
        ts: i64,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
        retryable: bool,
    },
}

impl ServerMessage {
    /// Builds the wire error frame for an internal error.
    pub fn from_error(err: &DuplioError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.user_message().to_string(),
            recoverable: err.recoverable(),
            retryable: err.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_round_trips_base64() {
        let msg = ClientMessage::AudioChunk {
            seq: 7,
            data: vec![0x01, 0x02, 0xff],
            ts: 1712000000000,
            session_id: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"audio_chunk\""));
        assert!(json.contains("AQL/"));

        match serde_json::from_str::<ClientMessage>(&json).unwrap() {
            ClientMessage::AudioChunk { seq, data, ts, session_id } => {
                assert_eq!(seq, 7);
                assert_eq!(data, vec![0x01, 0x02, 0xff]);
                assert_eq!(ts, 1712000000000);
                assert!(session_id.is_none());
            }
            other => panic!("expected AudioChunk, got {other:?}"),
        }
    }

    #[test]
    fn interruption_turn_index_is_optional() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"interruption","ts":5}"#).unwrap();
        match msg {
            ClientMessage::Interruption { ts, turn_index, session_id } => {
                assert_eq!(ts, 5);
                assert!(turn_index.is_none());
                assert!(session_id.is_none());
            }
            other => panic!("expected Interruption, got {other:?}"),
        }
    }

    #[test]
    fn transcript_uses_final_keyword_on_the_wire() {
        let msg = ServerMessage::Transcript {
            text: "hello".into(),
            is_final: true,
            confidence: 0.9,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"final\":true"));
    }

    #[test]
    fn interrupted_frame_uses_conversation_tag() {
        let msg = ServerMessage::Interrupted {
            turn_id: TurnId("t-1".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"conversation_interrupted\""));
    }

    #[test]
    fn error_frame_carries_flags() {
        let err = DuplioError::QueueFull {
            estimated_wait: std::time::Duration::from_secs(3),
        };
        let msg = ServerMessage::from_error(&err);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "QUEUE_FULL");
        assert_eq!(json["recoverable"], true);
        assert_eq!(json["retryable"], true);
        // Internal wording stays internal.
        assert!(!json["message"].as_str().unwrap().contains("capacity reached, retry in"));
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#);
        assert!(result.is_err());
    }
}
