// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming LLM provider adapter trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::DuplioError;
use crate::traits::adapter::ServiceAdapter;
use crate::types::TokenUsage;

/// A fully composed generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    /// The user's final transcript plus any conversational history, already
    /// rendered into the provider's message shape by the prompt composer.
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// Events on an LLM token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// An incremental text delta.
    Token(String),
    /// Usage accounting, typically delivered near end of stream.
    Usage(TokenUsage),
    /// End of stream.
    Done,
}

/// Adapter for a streaming text-generation provider.
#[async_trait]
pub trait LlmAdapter: ServiceAdapter {
    /// Opens a streaming generation. Tokens arrive as [`LlmEvent::Token`]
    /// deltas; the stream ends after [`LlmEvent::Done`].
    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>, DuplioError>;
}
