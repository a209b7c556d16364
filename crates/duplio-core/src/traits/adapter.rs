// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by every upstream service adapter.

use async_trait::async_trait;

use crate::error::DuplioError;
use crate::types::HealthStatus;

/// The base trait for all Duplio service adapters.
///
/// Provides identity and the health probe used by the readiness endpoint.
#[async_trait]
pub trait ServiceAdapter: Send + Sync + 'static {
    /// Human-readable name of this adapter instance, e.g. "asr" or "tts".
    fn name(&self) -> &str;

    /// Performs a health check against the upstream service.
    async fn health_check(&self) -> Result<HealthStatus, DuplioError>;
}
