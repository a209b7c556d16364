// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uniform streaming interface over one or more generation providers.
//!
//! Sessions carry a preferred provider name; the streamer resolves it,
//! guards the call with the provider's shared circuit breaker, and hands the
//! token stream to the pipeline. Retries for transient open failures live in
//! the HTTP client; the breaker here sheds a degraded provider fleet-wide.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tracing::debug;

use duplio_core::error::DuplioError;
use duplio_core::traits::{GenerationRequest, LlmAdapter, LlmEvent};
use duplio_resilience::CircuitBreaker;

/// Resolves provider names and opens guarded token streams.
pub struct GenerationStreamer {
    providers: HashMap<String, Arc<dyn LlmAdapter>>,
    default_provider: String,
    breaker: Arc<CircuitBreaker>,
}

impl GenerationStreamer {
    pub fn new(default_provider: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
            breaker,
        }
    }

    /// Registers a provider under a name.
    pub fn with_provider(mut self, name: impl Into<String>, adapter: Arc<dyn LlmAdapter>) -> Self {
        self.providers.insert(name.into(), adapter);
        self
    }

    /// Opens a token stream on the named provider (or the default).
    ///
    /// An unknown preferred provider falls back to the default rather than
    /// failing the turn.
    pub async fn open(
        &self,
        preferred: Option<&str>,
        request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>, DuplioError>
    {
        let name = preferred
            .filter(|name| self.providers.contains_key(*name))
            .unwrap_or(self.default_provider.as_str());

        let adapter = self.providers.get(name).ok_or_else(|| DuplioError::Llm {
            message: format!("no generation provider registered under '{name}'"),
            source: None,
        })?;

        debug!(provider = name, model = request.model.as_str(), "opening generation stream");

        self.breaker.try_acquire()?;
        match adapter.stream(request).await {
            Ok(stream) => {
                self.breaker.record_success();
                Ok(stream)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use duplio_core::traits::ServiceAdapter;
    use duplio_core::types::HealthStatus;
    use duplio_resilience::BreakerConfig;
    use futures::{StreamExt, stream};

    use super::*;

    struct ScriptedProvider {
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl ServiceAdapter for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedProvider {
        async fn stream(
            &self,
            _request: GenerationRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>,
            DuplioError,
        > {
            let mut events: Vec<Result<LlmEvent, DuplioError>> = self
                .tokens
                .iter()
                .map(|t| Ok(LlmEvent::Token(t.to_string())))
                .collect();
            events.push(Ok(LlmEvent::Done));
            Ok(Box::pin(stream::iter(events)))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "twin-chat-1".into(),
            system_prompt: String::new(),
            user_prompt: "hi".into(),
            max_tokens: 64,
        }
    }

    fn streamer() -> GenerationStreamer {
        GenerationStreamer::new(
            "primary",
            Arc::new(CircuitBreaker::new("llm", BreakerConfig::default())),
        )
        .with_provider("primary", Arc::new(ScriptedProvider { tokens: vec!["a"] }))
        .with_provider("alt", Arc::new(ScriptedProvider { tokens: vec!["b"] }))
    }

    async fn first_token(
        stream: &mut Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>,
    ) -> String {
        match stream.next().await.unwrap().unwrap() {
            LlmEvent::Token(t) => t,
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn preferred_provider_is_used() {
        let streamer = streamer();
        let mut stream = streamer.open(Some("alt"), request()).await.unwrap();
        assert_eq!(first_token(&mut stream).await, "b");
    }

    #[tokio::test]
    async fn unknown_provider_falls_back_to_default() {
        let streamer = streamer();
        let mut stream = streamer.open(Some("missing"), request()).await.unwrap();
        assert_eq!(first_token(&mut stream).await, "a");
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let breaker = Arc::new(CircuitBreaker::new(
            "llm",
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout: std::time::Duration::from_secs(60),
                success_threshold: 1,
            },
        ));
        breaker.record_failure();

        let streamer = GenerationStreamer::new("primary", breaker)
            .with_provider("primary", Arc::new(ScriptedProvider { tokens: vec![] }));

        match streamer.open(None, request()).await {
            Err(DuplioError::CircuitOpen { service }) => assert_eq!(service, "llm"),
            Ok(_) => panic!("expected CircuitOpen, got Ok"),
            Err(other) => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}
