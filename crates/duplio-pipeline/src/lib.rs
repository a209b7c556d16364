// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The turn pipeline for the Duplio conversation core.
//!
//! Executes one user utterance end to end under strict ordering: ASR
//! streaming with VAD boundaries, budgeted retrieval, the LLM token stream
//! split into synthesis units, a bounded parallel TTS pool, and the reorder
//! buffer that restores `(unit, chunk)` delivery order. The
//! [`controller`] module hosts the per-session task that owns state
//! transitions and pre-emption.

pub mod controller;
pub mod reorder;
pub mod turn;

pub use controller::{ControllerConfig, spawn_controller};
pub use reorder::ReorderBuffer;
pub use turn::{PipelineDeps, TurnConfig, TurnContext, TurnPipeline};
