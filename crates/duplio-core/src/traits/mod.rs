// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits for the upstream services the conversation core consumes.
//!
//! Each upstream engine (ASR, embedding, vector search, LLM, TTS, lip-sync)
//! is opaque to the core and reached only through these traits. Concrete
//! adapters add discovery, retry, and circuit breaking around the typed call.

pub mod adapter;
pub mod asr;
pub mod media;
pub mod provider;
pub mod retrieval;

pub use adapter::ServiceAdapter;
pub use asr::{AsrAdapter, AsrStreamHandle};
pub use media::{AudioFormat, LipSyncAdapter, TtsAdapter, TtsChunk, TtsPreferences};
pub use provider::{GenerationRequest, LlmAdapter, LlmEvent};
pub use retrieval::{EmbeddingAdapter, VectorSearchAdapter};
