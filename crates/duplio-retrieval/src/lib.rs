// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user knowledge retrieval for the Duplio conversation core.
//!
//! The coordinator embeds the user's final transcript (with an LRU+TTL
//! cache), searches the per-user vector store, and merges FAQ, document, and
//! conversation sources into a stable ranking. Retrieval degrades rather
//! than fails: an expired budget or a broken store yields empty context and
//! a grounded-refusal directive downstream.

pub mod coordinator;
pub mod embedder;
pub mod http;

pub use coordinator::{RetrievalCoordinator, RetrievalOutcome, rank_and_merge};
pub use embedder::CachedEmbedder;
pub use http::{HttpEmbeddingAdapter, HttpVectorSearchAdapter};
