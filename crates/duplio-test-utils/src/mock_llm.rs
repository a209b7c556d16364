// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock generation provider: streams scripted responses token by token.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use duplio_core::error::DuplioError;
use duplio_core::traits::{GenerationRequest, LlmAdapter, LlmEvent, ServiceAdapter};
use duplio_core::types::{HealthStatus, TokenUsage};

/// Scripted provider. Responses are popped from a FIFO queue and streamed
/// as whitespace-separated tokens; when the queue is empty, a default reply
/// is streamed. An optional per-token delay simulates generation pace.
pub struct MockLlm {
    responses: Arc<Mutex<VecDeque<String>>>,
    token_delay: Duration,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            token_delay: Duration::ZERO,
        }
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            token_delay: Duration::ZERO,
        }
    }

    /// Adds a pause between streamed tokens.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub async fn add_response(&self, text: String) {
        self.responses.lock().await.push_back(text);
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MockLlm {
    fn name(&self) -> &str {
        "mock-llm"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl LlmAdapter for MockLlm {
    async fn stream(
        &self,
        _request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>, DuplioError>
    {
        let text = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "This is a mock reply.".to_string());

        // Tokens keep their trailing space so reassembly is exact.
        let mut tokens: Vec<String> = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            current.push(ch);
            if ch == ' ' {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }

        let output_tokens = tokens.len() as u32;
        let delay = self.token_delay;

        let stream = futures::stream::unfold(
            (tokens.into_iter(), false),
            move |(mut tokens, done)| async move {
                if done {
                    return None;
                }
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                match tokens.next() {
                    Some(token) => Some((Ok(LlmEvent::Token(token)), (tokens, false))),
                    None => Some((
                        Ok(LlmEvent::Usage(TokenUsage {
                            input_tokens: 20,
                            output_tokens,
                        })),
                        (tokens, true),
                    )),
                }
            },
        )
        .chain(futures::stream::iter(vec![Ok(LlmEvent::Done)]));

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "mock".into(),
            system_prompt: String::new(),
            user_prompt: "hi".into(),
            max_tokens: 32,
        }
    }

    #[tokio::test]
    async fn tokens_reassemble_exactly() {
        let llm = MockLlm::with_responses(vec!["Hello there. General reply.".into()]);
        let mut stream = llm.stream(request()).await.unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                LlmEvent::Token(t) => text.push_str(&t),
                LlmEvent::Usage(_) => {}
                LlmEvent::Done => saw_done = true,
            }
        }
        assert_eq!(text, "Hello there. General reply.");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn empty_queue_streams_default() {
        let llm = MockLlm::new();
        let mut stream = llm.stream(request()).await.unwrap();
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let LlmEvent::Token(t) = event.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "This is a mock reply.");
    }
}
