// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming speech recognition for the Duplio conversation core.
//!
//! The [`AsrStreamer`] drives one utterance: it validates frame sequencing,
//! forwards audio to the recognizer, throttles interim transcripts, and
//! detects the end-of-utterance boundary by trailing silence. The energy
//! helpers in [`vad`] are also used by the session controller for barge-in
//! detection while the twin is speaking.

pub mod http;
pub mod streamer;
pub mod vad;

pub use http::HttpAsrAdapter;
pub use streamer::{AsrStreamer, AsrStreamerConfig, AsrStreamerEvent, UtteranceResult};
pub use vad::{SilenceDetector, frame_energy};
