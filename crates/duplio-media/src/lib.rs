// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Voice and video streaming for the Duplio conversation core.
//!
//! For each synthesis unit the [`VoiceStreamer`] opens a TTS stream with the
//! session's voice model, pairs each audio chunk with a lip-sync video frame
//! when the session has a face model and the quality mode permits video, and
//! publishes keyed chunks for the reorder buffer. The [`QualityEstimator`]
//! drives the per-session quality ladder from ping RTT and client playback
//! reports.

pub mod http;
pub mod quality;
pub mod voice;

pub use http::{HttpLipSyncAdapter, HttpTtsAdapter};
pub use quality::QualityEstimator;
pub use voice::{UnitContext, VoiceStreamer};
