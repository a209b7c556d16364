// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Duplex HTTP adapter for the recognition service.
//!
//! Audio is uploaded as a chunked request body while the recognizer answers
//! progressively with Server-Sent Events on the response: `transcript`
//! events carry `{text, is_final, confidence}`. Closing the audio channel
//! ends the request body, which makes the recognizer flush and emit its
//! final transcript.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use duplio_core::error::DuplioError;
use duplio_core::traits::{AsrAdapter, AsrStreamHandle, ServiceAdapter};
use duplio_core::types::{HealthStatus, TranscriptEvent};

#[derive(Debug, Deserialize)]
struct TranscriptData {
    text: String,
    is_final: bool,
    confidence: f32,
}

/// Chunked-HTTP client for one recognition service endpoint.
pub struct HttpAsrAdapter {
    client: reqwest::Client,
    endpoint: String,
    /// Capacity of the per-utterance audio channel; a full channel means the
    /// recognizer fell behind and the utterance aborts upstream.
    audio_channel_capacity: usize,
}

impl HttpAsrAdapter {
    pub fn new(endpoint: String, audio_channel_capacity: usize) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DuplioError::Asr {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            endpoint,
            audio_channel_capacity,
        })
    }
}

#[async_trait]
impl ServiceAdapter for HttpAsrAdapter {
    fn name(&self) -> &str {
        "asr"
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
impl AsrAdapter for HttpAsrAdapter {
    async fn open_stream(&self) -> Result<AsrStreamHandle, DuplioError> {
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(self.audio_channel_capacity);

        let body_stream = futures::stream::unfold(audio_rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<Vec<u8>, std::io::Error>(chunk), rx))
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await
            .map_err(|e| DuplioError::Asr {
                message: format!("recognition request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DuplioError::Asr {
                message: format!("recognizer returned {status}"),
                source: None,
            });
        }

        let events = response.bytes_stream().eventsource().filter_map(|result| async move {
            match result {
                Ok(event) if event.event == "transcript" => {
                    Some(
                        serde_json::from_str::<TranscriptData>(&event.data)
                            .map(|t| TranscriptEvent {
                                text: t.text,
                                is_final: t.is_final,
                                confidence: t.confidence,
                            })
                            .map_err(|e| DuplioError::Asr {
                                message: format!("failed to parse transcript event: {e}"),
                                source: Some(Box::new(e)),
                            }),
                    )
                }
                // Keep-alives and unknown events are skipped.
                Ok(_) => None,
                Err(e) => Some(Err(DuplioError::Asr {
                    message: format!("SSE stream error: {e}"),
                    source: None,
                })),
            }
        });

        let events: Pin<Box<dyn futures::Stream<Item = Result<TranscriptEvent, DuplioError>> + Send>> =
            Box::pin(events);

        Ok(AsrStreamHandle { audio_tx, events })
    }
}
