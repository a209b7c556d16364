// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming generation for the Duplio conversation core.
//!
//! Covers the generation stage end to end: HTTP/SSE provider client, prompt
//! composition (persona + retrieved knowledge + history + transcript), the
//! sentence splitter that turns the token stream into synthesis units, and
//! the provider-agnostic streamer the pipeline talks to.

pub mod client;
pub mod prompt;
pub mod splitter;
pub mod streamer;

pub use client::HttpLlmAdapter;
pub use prompt::PromptComposer;
pub use splitter::SynthesisSplitter;
pub use streamer::GenerationStreamer;
