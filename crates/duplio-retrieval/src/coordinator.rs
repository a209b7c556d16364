// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval coordinator: embed the query, search the per-user store, rank
//! and merge results.
//!
//! User isolation is an invariant, not a filter: every call takes a typed
//! `UserId`, and any chunk coming back tagged with a different user is
//! discarded before ranking (and counted, because it means the store is
//! misbehaving).

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use duplio_core::error::DuplioError;
use duplio_core::traits::VectorSearchAdapter;
use duplio_core::types::{RetrievedChunk, UserId};
use duplio_resilience::{CircuitBreaker, RetryPolicy, call_with_retry};

use crate::embedder::CachedEmbedder;

/// Result of one retrieval round.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Ranked chunks, highest priority first. Empty means "no knowledge".
    pub chunks: Vec<RetrievedChunk>,
    /// The retrieval budget expired and the turn proceeds with empty context.
    pub rag_timeout: bool,
}

impl RetrievalOutcome {
    /// True when the model should be directed to refuse rather than answer
    /// from thin air.
    pub fn no_knowledge(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Coordinates embedding, per-user search, and ranking for one query.
pub struct RetrievalCoordinator {
    embedder: CachedEmbedder,
    search: Arc<dyn VectorSearchAdapter>,
    breaker: Arc<CircuitBreaker>,
    /// Retry policy for the store call. Attempts must fit the retrieval
    /// budget, so the backoff base is small.
    retry: RetryPolicy,
    k: usize,
    min_score: f32,
}

impl RetrievalCoordinator {
    pub fn new(
        embedder: CachedEmbedder,
        search: Arc<dyn VectorSearchAdapter>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        k: usize,
        min_score: f32,
    ) -> Self {
        Self {
            embedder,
            search,
            breaker,
            retry,
            k,
            min_score,
        }
    }

    /// Retrieves ranked context for `query` within `budget`.
    ///
    /// On budget expiry or search failure the outcome degrades to empty
    /// context instead of erroring: retrieval never aborts a turn.
    pub async fn retrieve(
        &self,
        user_id: &UserId,
        query: &str,
        budget: Duration,
    ) -> RetrievalOutcome {
        match tokio::time::timeout(budget, self.retrieve_inner(user_id, query)).await {
            Ok(Ok(chunks)) => RetrievalOutcome {
                chunks,
                rag_timeout: false,
            },
            Ok(Err(err)) => {
                warn!(user_id = %user_id, error = %err, "retrieval failed, continuing with empty context");
                RetrievalOutcome {
                    chunks: Vec::new(),
                    rag_timeout: false,
                }
            }
            Err(_) => {
                warn!(user_id = %user_id, budget_ms = budget.as_millis() as u64, "retrieval budget expired");
                RetrievalOutcome {
                    chunks: Vec::new(),
                    rag_timeout: true,
                }
            }
        }
    }

    async fn retrieve_inner(
        &self,
        user_id: &UserId,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>, DuplioError> {
        let vector = self.embedder.embed(query).await?;

        let raw = call_with_retry(&self.retry, &self.breaker, || {
            self.search.search(user_id, &vector, self.k, self.min_score)
        })
        .await?;

        let total = raw.len();
        let mut owned: Vec<RetrievedChunk> = raw
            .into_iter()
            .filter(|chunk| &chunk.user_id == user_id)
            .collect();

        let foreign = total - owned.len();
        if foreign > 0 {
            warn!(
                user_id = %user_id,
                foreign,
                "vector store returned chunks for another user; discarded"
            );
        }

        rank_and_merge(&mut owned);
        owned.truncate(self.k);

        debug!(user_id = %user_id, chunks = owned.len(), "retrieval complete");
        Ok(owned)
    }
}

/// Orders chunks by source priority (FAQ > document > conversation), with
/// relevance score as tiebreaker. The sort is stable, so equal keys keep
/// their store order.
pub fn rank_and_merge(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| {
        a.source
            .priority()
            .cmp(&b.source.priority())
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
}
