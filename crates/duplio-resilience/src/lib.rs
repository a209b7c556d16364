// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker and retry primitives for Duplio upstream adapters.
//!
//! Breaker and retry policy are per-adapter, not per-call: each upstream
//! service (ASR, retrieval, LLM, TTS, lip-sync) gets one breaker shared by
//! all sessions, so a degraded upstream is shed fleet-wide instead of being
//! rediscovered by every turn.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use retry::{RetryPolicy, call_with_retry, is_transient};
