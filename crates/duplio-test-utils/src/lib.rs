// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted mock adapters for deterministic, CI-runnable Duplio tests.
//!
//! Every upstream engine the pipeline talks to has a mock here, scripted
//! through FIFO queues and failure-injection hooks so tests never touch the
//! network.

pub mod mock_asr;
pub mod mock_llm;
pub mod mock_media;
pub mod mock_retrieval;

pub use mock_asr::MockAsr;
pub use mock_llm::MockLlm;
pub use mock_media::{MockLipSync, MockTts};
pub use mock_retrieval::{LeakySearch, MockEmbedding, MockSearch};
