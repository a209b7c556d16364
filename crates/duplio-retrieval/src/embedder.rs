// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caching wrapper around an embedding adapter.
//!
//! Query texts repeat heavily in conversational traffic (greetings, follow-up
//! phrasings), so embeddings are cached in an LRU+TTL cache keyed by a
//! SHA-256 of the text.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sha2::{Digest, Sha256};

use duplio_core::error::DuplioError;
use duplio_core::traits::EmbeddingAdapter;

/// An embedding adapter front with an in-process LRU+TTL cache.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingAdapter>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingAdapter>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    /// Embeds `text`, serving repeats from cache.
    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>, DuplioError> {
        let key = cache_key(text);

        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let vector = Arc::new(self.inner.embed(text).await?);
        self.cache.insert(key, Arc::clone(&vector)).await;
        Ok(vector)
    }

    /// Output dimensionality of the wrapped embedder.
    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use duplio_core::traits::ServiceAdapter;
    use duplio_core::types::HealthStatus;

    use super::*;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceAdapter for CountingEmbedder {
        fn name(&self) -> &str {
            "counting-embedder"
        }

        async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl EmbeddingAdapter for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, DuplioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn repeated_text_hits_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(inner.clone(), 16, Duration::from_secs(60));

        let first = embedder.embed("who are you").await.unwrap();
        let second = embedder.embed("who are you").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_texts_miss() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(inner.clone(), 16, Duration::from_secs(60));

        embedder.embed("alpha").await.unwrap();
        embedder.embed("beta").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_keys_are_stable_hashes() {
        assert_eq!(cache_key("x"), cache_key("x"));
        assert_ne!(cache_key("x"), cache_key("y"));
        assert_eq!(cache_key("x").len(), 64);
    }
}
