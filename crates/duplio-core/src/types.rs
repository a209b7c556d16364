// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Duplio conversation core.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a single turn within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the user owning a session and its knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to a trained voice model for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceModelHandle(pub String);

/// Opaque handle to a trained face model for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceModelHandle(pub String);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// An inbound audio frame from the client.
///
/// Sequence numbers are strictly increasing per session; a gap aborts the
/// current utterance.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub seq: u64,
    pub data: Vec<u8>,
    /// Client capture timestamp, milliseconds since epoch.
    pub captured_at_ms: i64,
}

/// Interim or final transcript event from the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// Source a retrieved chunk came from, in priority order.
///
/// FAQ outranks document outranks conversation when merging results.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    Faq,
    Document,
    Conversation,
}

impl SourceType {
    /// Merge priority; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            SourceType::Faq => 0,
            SourceType::Document => 1,
            SourceType::Conversation => 2,
        }
    }
}

/// A knowledge chunk returned by the per-user vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub user_id: UserId,
    pub source: SourceType,
    /// Relevance score in [0, 1].
    pub score: f32,
    pub snippet: String,
}

/// A sentence-sized text span submitted as one TTS job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisUnit {
    /// Monotonic index within the turn, starting at 0.
    pub index: u32,
    pub text: String,
}

/// Ordering key for outbound media: unit index, then chunk index within the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    pub unit_index: u32,
    pub chunk_index: u32,
}

impl ChunkKey {
    pub fn new(unit_index: u32, chunk_index: u32) -> Self {
        Self {
            unit_index,
            chunk_index,
        }
    }
}

/// Video payload paired with an audio chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPayload {
    pub data: Vec<u8>,
    /// Container/codec tag declared by the lip-sync engine, e.g. "h264".
    pub format: String,
}

/// One outbound media chunk: audio, optionally paired with a video frame.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub turn_id: TurnId,
    pub key: ChunkKey,
    pub audio: Vec<u8>,
    pub video: Option<VideoPayload>,
    /// True for the final chunk of its synthesis unit.
    pub last_in_unit: bool,
}

/// Per-session quality mode chosen by the network-quality estimator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityMode {
    #[default]
    High,
    Medium,
    Low,
    AudioOnly,
}

impl QualityMode {
    /// Whether video frames are emitted in this mode.
    pub fn video_enabled(self) -> bool {
        !matches!(self, QualityMode::AudioOnly)
    }
}

/// Wall-clock stage latencies for one turn, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageTimings {
    pub asr_ms: Option<u64>,
    pub rag_ms: Option<u64>,
    pub llm_first_token_ms: Option<u64>,
    pub llm_total_ms: Option<u64>,
    pub tts_first_chunk_ms: Option<u64>,
    pub lipsync_first_frame_ms: Option<u64>,
    pub total_ms: Option<u64>,
}

/// Cost accumulators for one turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostCounters {
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub tts_characters: u64,
}

/// Aggregated per-turn metrics reported in `response_end`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TurnMetrics {
    #[serde(flatten)]
    pub timings: StageTimings,
    /// Retrieval exceeded its budget and the turn continued with empty context.
    pub rag_timeout: bool,
    pub retries: u32,
    pub units_skipped: u32,
    pub cost: CostCounters,
}

/// Terminal status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed,
}

/// A single user-utterance -> system-reply transaction.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: SessionId,
    /// Strictly increasing within the session, starting at 1.
    pub index: u64,
    /// Cumulative inbound audio bytes for this utterance.
    pub audio_bytes: usize,
    pub transcript: Option<String>,
    /// Chunk ids of the retrieved context used for the reply.
    pub sources: Vec<String>,
    /// Generated reply text accumulated from the token stream.
    pub reply_text: String,
    pub metrics: TurnMetrics,
    pub status: TurnStatus,
}

impl Turn {
    pub fn new(session_id: SessionId, index: u64) -> Self {
        Self {
            id: TurnId::generate(),
            session_id,
            index,
            audio_bytes: 0,
            transcript: None,
            sources: Vec::new(),
            reply_text: String::new(),
            metrics: TurnMetrics::default(),
            status: TurnStatus::Completed,
        }
    }
}

/// Compact summary of a completed turn, kept for prompt composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub turn_index: u64,
    pub user_text: String,
    pub reply_text: String,
}

/// Token usage reported by an LLM provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keys_order_lexicographically() {
        let a = ChunkKey::new(0, 5);
        let b = ChunkKey::new(1, 0);
        let c = ChunkKey::new(1, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn source_priority_faq_first() {
        assert!(SourceType::Faq.priority() < SourceType::Document.priority());
        assert!(SourceType::Document.priority() < SourceType::Conversation.priority());
    }

    #[test]
    fn source_type_serde_round_trip() {
        let json = serde_json::to_string(&SourceType::Faq).unwrap();
        assert_eq!(json, "\"faq\"");
        let parsed: SourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SourceType::Faq);
    }

    #[test]
    fn audio_only_disables_video() {
        assert!(QualityMode::High.video_enabled());
        assert!(QualityMode::Low.video_enabled());
        assert!(!QualityMode::AudioOnly.video_enabled());
    }

    #[test]
    fn turn_metrics_serialize_flat() {
        let metrics = TurnMetrics {
            timings: StageTimings {
                total_ms: Some(1500),
                ..Default::default()
            },
            rag_timeout: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["total_ms"], 1500);
        assert_eq!(json["rag_timeout"], true);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_ne!(TurnId::generate(), TurnId::generate());
    }
}
