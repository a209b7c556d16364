// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the streaming generation service.
//!
//! The provider speaks Server-Sent Events: `token` events carry text deltas,
//! `usage` carries accounting, `done` ends the stream. Transient statuses
//! (429, 500, 503, 529) are retried with jittered backoff before the stream
//! opens; fatal statuses (auth, invalid request) propagate immediately.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use duplio_core::error::DuplioError;
use duplio_core::traits::{GenerationRequest, LlmAdapter, LlmEvent, ServiceAdapter};
use duplio_core::types::{HealthStatus, TokenUsage};
use duplio_resilience::RetryPolicy;

#[derive(Debug, Deserialize)]
struct TokenData {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    message: String,
}

/// HTTP client for one generation provider endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmAdapter {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl HttpLlmAdapter {
    pub fn new(endpoint: String, retry: RetryPolicy) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| DuplioError::Llm {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, DuplioError> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.backoff_delay(attempt - 1);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying generation request");
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .json(request)
                .send()
                .await
                .map_err(|e| DuplioError::Llm {
                    message: format!("generation request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, attempt, "generation response received");

            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            if is_transient_status(status) {
                last_error = Some(if status.as_u16() == 429 {
                    DuplioError::RateLimitExceeded
                } else {
                    DuplioError::Llm {
                        message: format!("provider returned {status}: {body}"),
                        source: None,
                    }
                });
                continue;
            }

            // Fatal: auth failures and invalid requests never retry.
            return Err(DuplioError::Llm {
                message: format!("provider returned {status}: {body}"),
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| DuplioError::Llm {
            message: "generation request failed after retries".into(),
            source: None,
        }))
    }
}

/// Statuses worth retrying before the stream has opened.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 503 | 529)
}

fn parse_sse_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>> {
    let event_stream = response.bytes_stream().eventsource();

    let mapped = event_stream.filter_map(|result| async move {
        match result {
            Ok(event) => {
                let parsed = match event.event.as_str() {
                    "token" => serde_json::from_str::<TokenData>(&event.data)
                        .map(|t| LlmEvent::Token(t.text))
                        .map_err(|e| DuplioError::Llm {
                            message: format!("failed to parse token event: {e}"),
                            source: Some(Box::new(e)),
                        }),
                    "usage" => serde_json::from_str::<UsageData>(&event.data)
                        .map(|u| {
                            LlmEvent::Usage(TokenUsage {
                                input_tokens: u.input_tokens,
                                output_tokens: u.output_tokens,
                            })
                        })
                        .map_err(|e| DuplioError::Llm {
                            message: format!("failed to parse usage event: {e}"),
                            source: Some(Box::new(e)),
                        }),
                    "done" => Ok(LlmEvent::Done),
                    "ping" => return None,
                    "error" => {
                        let message = serde_json::from_str::<ErrorData>(&event.data)
                            .map(|e| e.message)
                            .unwrap_or_else(|_| event.data.clone());
                        Err(DuplioError::Llm {
                            message,
                            source: None,
                        })
                    }
                    // Unknown event types are skipped for forward compatibility.
                    _ => return None,
                };
                Some(parsed)
            }
            Err(e) => Some(Err(DuplioError::Llm {
                message: format!("SSE stream error: {e}"),
                source: None,
            })),
        }
    });

    Box::pin(mapped)
}

#[async_trait]
impl ServiceAdapter for HttpLlmAdapter {
    fn name(&self) -> &str {
        "llm"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        match self.client.head(&self.endpoint).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "endpoint returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl LlmAdapter for HttpLlmAdapter {
    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LlmEvent, DuplioError>> + Send>>, DuplioError>
    {
        let response = self.open_stream(&request).await?;
        Ok(parse_sse_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "twin-chat-1".into(),
            system_prompt: "persona".into(),
            user_prompt: "hello".into(),
            max_tokens: 256,
        }
    }

    async fn sse_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body.to_string()),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn streams_tokens_then_done() {
        let sse = "event: token\ndata: {\"text\":\"Hel\"}\n\n\
                   event: token\ndata: {\"text\":\"lo.\"}\n\n\
                   event: usage\ndata: {\"input_tokens\":12,\"output_tokens\":2}\n\n\
                   event: done\ndata: {}\n\n";
        let server = sse_server(sse).await;
        let adapter = HttpLlmAdapter::new(server.uri(), fast_retry()).unwrap();

        let mut stream = adapter.stream(request()).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            LlmEvent::Token("Hel".into())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            LlmEvent::Token("lo.".into())
        );
        match stream.next().await.unwrap().unwrap() {
            LlmEvent::Usage(usage) => assert_eq!(usage.output_tokens, 2),
            other => panic!("expected usage, got {other:?}"),
        }
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Done);
    }

    #[tokio::test]
    async fn unknown_events_are_skipped() {
        let sse = "event: future_thing\ndata: {}\n\nevent: done\ndata: {}\n\n";
        let server = sse_server(sse).await;
        let adapter = HttpLlmAdapter::new(server.uri(), fast_retry()).unwrap();

        let mut stream = adapter.stream(request()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Done);
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("event: done\ndata: {}\n\n"),
            )
            .mount(&server)
            .await;

        let adapter = HttpLlmAdapter::new(server.uri(), fast_retry()).unwrap();
        let mut stream = adapter.stream(request()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), LlmEvent::Done);
    }

    #[tokio::test]
    async fn fatal_status_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpLlmAdapter::new(server.uri(), fast_retry()).unwrap();
        assert!(adapter.stream(request()).await.is_err());
    }

    #[tokio::test]
    async fn error_event_surfaces_message() {
        let sse = "event: error\ndata: {\"message\":\"model overloaded\"}\n\n";
        let server = sse_server(sse).await;
        let adapter = HttpLlmAdapter::new(server.uri(), fast_retry()).unwrap();

        let mut stream = adapter.stream(request()).await.unwrap();
        match stream.next().await.unwrap() {
            Err(DuplioError::Llm { message, .. }) => {
                assert_eq!(message, "model overloaded");
            }
            other => panic!("expected Llm error, got {other:?}"),
        }
    }
}
