// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Duplio conversation core.
//!
//! Every error that can reach a client maps to a stable [`ErrorCode`] plus a
//! `recoverable` flag (can the connection continue?) and a `retryable` flag
//! (should the caller retry the same action?). The user-facing string is
//! decoupled from the internal message.

use std::time::Duration;

use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across all Duplio adapters and core operations.
#[derive(Debug, Error)]
pub enum DuplioError {
    /// No auth token was presented on the connection.
    #[error("authentication required")]
    AuthRequired,

    /// Token was presented but failed validation (signature, shape, issuer, audience).
    #[error("authentication invalid: {0}")]
    AuthInvalid(String),

    /// Token was well-formed but past its expiry.
    #[error("authentication expired")]
    AuthExpired,

    /// Session could not be created or bound in time.
    #[error("session create failed: {0}")]
    SessionCreateFailed(String),

    /// Speech recognizer failure (stream error, sequence gap, protocol violation).
    #[error("asr error: {message}")]
    Asr {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The recognizer cannot keep up with the inbound audio rate.
    #[error("asr overloaded")]
    AsrOverload,

    /// Inbound audio is unusable (wrong format, too quiet, clipped).
    #[error("asr audio quality: {0}")]
    AsrAudioQuality(String),

    /// Retrieval exceeded its latency budget. Degradation, not a turn abort.
    #[error("retrieval timed out after {budget:?}")]
    RagTimeout { budget: Duration },

    /// LLM provider failure (API error, malformed stream).
    #[error("llm error: {message}")]
    Llm {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// LLM provider exceeded a deadline.
    #[error("llm timed out after {duration:?}")]
    LlmTimeout { duration: Duration },

    /// TTS provider failure.
    #[error("tts error: {message}")]
    Tts {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The reorder buffer gap persisted past twice the stall timeout.
    #[error("tts stalled waiting for unit {unit_index}")]
    TtsStall { unit_index: u32 },

    /// Lip-sync failure. Degrades to audio-only, never surfaces mid-turn.
    #[error("lip-sync error: {0}")]
    LipSync(String),

    /// Generic network timeout.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Upstream rate limit hit.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// No GPU capacity available for a model-bound stage.
    #[error("gpu unavailable")]
    GpuUnavailable,

    /// Session cap reached; carries an advisory wait before retrying.
    #[error("session capacity reached, retry in {estimated_wait:?}")]
    QueueFull { estimated_wait: Duration },

    /// Transport-level WebSocket failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A circuit breaker is open for the named upstream service.
    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable wire codes for surfaced errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    AuthInvalid,
    AuthExpired,
    SessionCreateFailed,
    AsrError,
    AsrOverload,
    AsrAudioQuality,
    RagTimeout,
    LlmError,
    LlmTimeout,
    TtsError,
    TtsStall,
    LipsyncError,
    Timeout,
    RateLimitExceeded,
    GpuUnavailable,
    QueueFull,
    WebsocketError,
    InternalError,
}

impl DuplioError {
    /// The stable code sent to clients for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DuplioError::AuthRequired => ErrorCode::AuthRequired,
            DuplioError::AuthInvalid(_) => ErrorCode::AuthInvalid,
            DuplioError::AuthExpired => ErrorCode::AuthExpired,
            DuplioError::SessionCreateFailed(_) => ErrorCode::SessionCreateFailed,
            DuplioError::Asr { .. } => ErrorCode::AsrError,
            DuplioError::AsrOverload => ErrorCode::AsrOverload,
            DuplioError::AsrAudioQuality(_) => ErrorCode::AsrAudioQuality,
            DuplioError::RagTimeout { .. } => ErrorCode::RagTimeout,
            DuplioError::Llm { .. } | DuplioError::CircuitOpen { .. } => ErrorCode::LlmError,
            DuplioError::LlmTimeout { .. } => ErrorCode::LlmTimeout,
            DuplioError::Tts { .. } => ErrorCode::TtsError,
            DuplioError::TtsStall { .. } => ErrorCode::TtsStall,
            DuplioError::LipSync(_) => ErrorCode::LipsyncError,
            DuplioError::Timeout { .. } => ErrorCode::Timeout,
            DuplioError::RateLimitExceeded => ErrorCode::RateLimitExceeded,
            DuplioError::GpuUnavailable => ErrorCode::GpuUnavailable,
            DuplioError::QueueFull { .. } => ErrorCode::QueueFull,
            DuplioError::WebSocket(_) => ErrorCode::WebsocketError,
            DuplioError::Config(_) | DuplioError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the connection can continue after this error is surfaced.
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            DuplioError::AuthRequired
                | DuplioError::AuthInvalid(_)
                | DuplioError::AuthExpired
                | DuplioError::SessionCreateFailed(_)
                | DuplioError::WebSocket(_)
                | DuplioError::Internal(_)
        )
    }

    /// Whether the caller should retry the same action.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            DuplioError::SessionCreateFailed(_)
                | DuplioError::AsrOverload
                | DuplioError::LlmTimeout { .. }
                | DuplioError::Timeout { .. }
                | DuplioError::RateLimitExceeded
                | DuplioError::GpuUnavailable
                | DuplioError::QueueFull { .. }
                | DuplioError::CircuitOpen { .. }
        )
    }

    /// Client-facing message, decoupled from the internal error text.
    pub fn user_message(&self) -> &'static str {
        match self.code() {
            ErrorCode::AuthRequired => "Please sign in to start a conversation.",
            ErrorCode::AuthInvalid => "Your session credentials were not accepted.",
            ErrorCode::AuthExpired => "Your session has expired. Please sign in again.",
            ErrorCode::SessionCreateFailed => {
                "We couldn't start your conversation. Please try again."
            }
            ErrorCode::AsrError | ErrorCode::AsrAudioQuality => {
                "We had trouble hearing you. Please try speaking again."
            }
            ErrorCode::AsrOverload => "Speech recognition is busy. Please try again shortly.",
            ErrorCode::RagTimeout => "Knowledge lookup is slow right now.",
            ErrorCode::LlmError | ErrorCode::LlmTimeout => {
                "The reply could not be generated. Please try again."
            }
            ErrorCode::TtsError | ErrorCode::TtsStall => {
                "Voice playback hit a problem. Please try again."
            }
            ErrorCode::LipsyncError => "Video is unavailable; continuing with audio.",
            ErrorCode::Timeout => "The request timed out. Please try again.",
            ErrorCode::RateLimitExceeded => "Too many requests. Please slow down.",
            ErrorCode::GpuUnavailable | ErrorCode::QueueFull => {
                "The service is at capacity. Please retry in a moment."
            }
            ErrorCode::WebsocketError => "The connection was lost.",
            ErrorCode::InternalError => "Something went wrong on our side.",
        }
    }
}
