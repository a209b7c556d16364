// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding and per-user vector-search adapter traits.

use async_trait::async_trait;

use crate::error::DuplioError;
use crate::traits::adapter::ServiceAdapter;
use crate::types::{RetrievedChunk, UserId};

/// Adapter turning text into a fixed-dimensional vector.
#[async_trait]
pub trait EmbeddingAdapter: ServiceAdapter {
    /// Embeds a single text, returning a vector of [`dimension`](Self::dimension) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DuplioError>;

    /// Output dimensionality of this embedder.
    fn dimension(&self) -> usize;
}

/// Adapter over the per-user vector store.
///
/// `user_id` is a required parameter, not a filter predicate: an
/// implementation must never return chunks belonging to another user, and
/// callers verify the tag regardless.
#[async_trait]
pub trait VectorSearchAdapter: ServiceAdapter {
    async fn search(
        &self,
        user_id: &UserId,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>, DuplioError>;
}
