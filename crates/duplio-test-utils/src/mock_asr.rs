// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock recognizer: emits one interim per audio chunk and a scripted final
//! transcript when the audio channel closes.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{Mutex, mpsc};

use duplio_core::error::DuplioError;
use duplio_core::traits::{AsrAdapter, AsrStreamHandle, ServiceAdapter};
use duplio_core::types::{HealthStatus, TranscriptEvent};

/// Scripted recognizer. Final transcripts are popped from a FIFO queue;
/// when empty, a default transcript is produced.
pub struct MockAsr {
    finals: Arc<Mutex<VecDeque<String>>>,
}

impl MockAsr {
    pub fn new() -> Self {
        Self {
            finals: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn with_finals(finals: Vec<String>) -> Self {
        Self {
            finals: Arc::new(Mutex::new(VecDeque::from(finals))),
        }
    }

    pub async fn add_final(&self, text: String) {
        self.finals.lock().await.push_back(text);
    }
}

impl Default for MockAsr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MockAsr {
    fn name(&self) -> &str {
        "mock-asr"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl AsrAdapter for MockAsr {
    async fn open_stream(&self) -> Result<AsrStreamHandle, DuplioError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(32);
        let (event_tx, event_rx) = mpsc::channel(32);

        let final_text = self
            .finals
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "mock transcript".to_string());

        tokio::spawn(async move {
            let mut chunks = 0u32;
            while audio_rx.recv().await.is_some() {
                chunks += 1;
                let _ = event_tx
                    .send(Ok(TranscriptEvent {
                        text: format!("interim after chunk {chunks}"),
                        is_final: false,
                        confidence: 0.5,
                    }))
                    .await;
            }
            let _ = event_tx
                .send(Ok(TranscriptEvent {
                    text: final_text,
                    is_final: true,
                    confidence: 0.95,
                }))
                .await;
        });

        let events: Pin<Box<dyn Stream<Item = Result<TranscriptEvent, DuplioError>> + Send>> =
            Box::pin(futures::stream::unfold(event_rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            }));

        Ok(AsrStreamHandle { audio_tx, events })
    }
}
