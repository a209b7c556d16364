// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP adapters for the embedding and vector-search services.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use duplio_core::error::DuplioError;
use duplio_core::traits::{EmbeddingAdapter, ServiceAdapter, VectorSearchAdapter};
use duplio_core::types::{HealthStatus, RetrievedChunk, SourceType, UserId};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    user_id: &'a str,
    vector: &'a [f32],
    k: usize,
    min_score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    chunk_id: String,
    user_id: String,
    source_type: SourceType,
    score: f32,
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

/// Embedding service client.
pub struct HttpEmbeddingAdapter {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
}

impl HttpEmbeddingAdapter {
    pub fn new(endpoint: String, dimension: usize) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DuplioError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            dimension,
        })
    }
}

#[async_trait]
impl ServiceAdapter for HttpEmbeddingAdapter {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        probe(&self.client, &self.endpoint).await
    }
}

#[async_trait]
impl EmbeddingAdapter for HttpEmbeddingAdapter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DuplioError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| DuplioError::Internal(format!("embed request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DuplioError::Internal(format!(
                "embed service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DuplioError::Internal(format!("embed response malformed: {e}")))?;

        if body.vector.len() != self.dimension {
            return Err(DuplioError::Internal(format!(
                "embed dimension mismatch: expected {}, got {}",
                self.dimension,
                body.vector.len()
            )));
        }

        Ok(body.vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Vector-store search client.
pub struct HttpVectorSearchAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVectorSearchAdapter {
    pub fn new(endpoint: String) -> Result<Self, DuplioError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DuplioError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ServiceAdapter for HttpVectorSearchAdapter {
    fn name(&self) -> &str {
        "vector-search"
    }

    async fn health_check(&self) -> Result<HealthStatus, DuplioError> {
        probe(&self.client, &self.endpoint).await
    }
}

#[async_trait]
impl VectorSearchAdapter for HttpVectorSearchAdapter {
    async fn search(
        &self,
        user_id: &UserId,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>, DuplioError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                user_id: &user_id.0,
                vector,
                k,
                min_score,
            })
            .send()
            .await
            .map_err(|e| DuplioError::Internal(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DuplioError::Internal(format!(
                "search service returned {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| DuplioError::Internal(format!("search response malformed: {e}")))?;

        Ok(body
            .results
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.chunk_id,
                user_id: UserId(hit.user_id),
                source: hit.source_type,
                score: hit.score,
                snippet: hit.snippet,
            })
            .collect())
    }
}

/// HEAD-probe an endpoint for readiness reporting.
async fn probe(client: &reqwest::Client, endpoint: &str) -> Result<HealthStatus, DuplioError> {
    match client.head(endpoint).send().await {
        Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
        Ok(response) => Ok(HealthStatus::Degraded(format!(
            "endpoint returned {}",
            response.status()
        ))),
        Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn embed_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"vector": [0.1, 0.2, 0.3]})),
            )
            .mount(&server)
            .await;

        let adapter = HttpEmbeddingAdapter::new(server.uri(), 3).unwrap();
        let vector = adapter.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_rejects_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"vector": [0.1, 0.2]})),
            )
            .mount(&server)
            .await;

        let adapter = HttpEmbeddingAdapter::new(server.uri(), 3).unwrap();
        assert!(adapter.embed("hello").await.is_err());
    }

    #[tokio::test]
    async fn search_sends_user_id_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"user_id": "alice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "chunk_id": "c-1",
                    "user_id": "alice",
                    "source_type": "faq",
                    "score": 0.92,
                    "snippet": "Our opening hours are..."
                }]
            })))
            .mount(&server)
            .await;

        let adapter = HttpVectorSearchAdapter::new(server.uri()).unwrap();
        let hits = adapter
            .search(&UserId("alice".into()), &[0.1], 5, 0.7)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c-1");
        assert_eq!(hits[0].source, SourceType::Faq);
    }
}
