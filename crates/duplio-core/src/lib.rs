// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Duplio real-time digital-twin service.
//!
//! This crate provides the foundational types shared by the whole workspace:
//! the error taxonomy, session/turn data model, client wire protocol, and the
//! adapter traits implemented for each upstream engine (ASR, embedding,
//! vector search, LLM, TTS, lip-sync).

pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{DuplioError, ErrorCode};
pub use protocol::{ClientMessage, ServerMessage};
pub use types::{SessionId, TurnId, UserId};

pub use traits::{
    AsrAdapter, EmbeddingAdapter, LipSyncAdapter, LlmAdapter, ServiceAdapter, TtsAdapter,
    VectorSearchAdapter,
};
