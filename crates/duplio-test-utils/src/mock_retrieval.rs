// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock embedding and vector-search adapters over an in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use duplio_core::error::DuplioError;
use duplio_core::traits::{EmbeddingAdapter, ServiceAdapter, VectorSearchAdapter};
use duplio_core::types::{HealthStatus, RetrievedChunk, UserId};

/// Embedder producing a deterministic vector from text bytes.
pub struct MockEmbedding {
    dimension: usize,
    calls: AtomicU32,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceAdapter for MockEmbedding {
    fn name(&self) -> &str {
        "mock-embedding"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DuplioError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32 / 255.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-memory store returning scripted chunks, with an optional artificial
/// latency to exercise the retrieval budget.
pub struct MockSearch {
    chunks: Arc<Mutex<Vec<RetrievedChunk>>>,
    latency: Duration,
}

impl MockSearch {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn add_chunk(&self, chunk: RetrievedChunk) {
        self.chunks.lock().await.push(chunk);
    }
}

impl Default for MockSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MockSearch {
    fn name(&self) -> &str {
        "mock-search"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl VectorSearchAdapter for MockSearch {
    async fn search(
        &self,
        user_id: &UserId,
        _vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>, DuplioError> {
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }
        let chunks = self.chunks.lock().await;
        Ok(chunks
            .iter()
            .filter(|chunk| &chunk.user_id == user_id && chunk.score >= min_score)
            .take(k)
            .cloned()
            .collect())
    }
}

/// A store that ignores the caller's user id entirely, returning every
/// scripted chunk. Used to prove the coordinator's isolation check.
pub struct LeakySearch {
    pub chunks: Vec<RetrievedChunk>,
}

#[async_trait]
impl ServiceAdapter for LeakySearch {
    fn name(&self) -> &str {
        "leaky-search"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl VectorSearchAdapter for LeakySearch {
    async fn search(
        &self,
        _user_id: &UserId,
        _vector: &[f32],
        _k: usize,
        _min_score: f32,
    ) -> Result<Vec<RetrievedChunk>, DuplioError> {
        Ok(self.chunks.clone())
    }
}
