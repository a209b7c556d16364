// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./duplio.toml` > `~/.config/duplio/duplio.toml`
//! > `/etc/duplio/duplio.toml` with environment variable overrides via the
//! `DUPLIO_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::DuplioConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/duplio/duplio.toml` (system-wide)
/// 3. `~/.config/duplio/duplio.toml` (user XDG config)
/// 4. `./duplio.toml` (local directory)
/// 5. `DUPLIO_*` environment variables
pub fn load_config() -> Result<DuplioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DuplioConfig::default()))
        .merge(Toml::file("/etc/duplio/duplio.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("duplio/duplio.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("duplio.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from inline TOML only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<DuplioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DuplioConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DuplioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DuplioConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `DUPLIO_SESSION_GRACE_SECS` must map to
/// `session.grace_secs`, not `session.grace.secs`.
fn env_provider() -> Env {
    Env::prefixed("DUPLIO_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("server_", "server.", 1)
            .replacen("auth_", "auth.", 1)
            .replacen("session_", "session.", 1)
            .replacen("pipeline_", "pipeline.", 1)
            .replacen("asr_", "asr.", 1)
            .replacen("retrieval_", "retrieval.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("tts_", "tts.", 1)
            .replacen("lipsync_", "lipsync.", 1)
            .replacen("resilience_", "resilience.", 1)
            .replacen("metrics_", "metrics.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.pipeline.outbound_queue_frames, 64);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
            [session]
            max_sessions = 8
            grace_secs = 10

            [pipeline]
            tts_parallelism = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.session.max_sessions, 8);
        assert_eq!(config.session.grace_secs, 10);
        assert_eq!(config.pipeline.tts_parallelism, 4);
        // Untouched sections keep defaults.
        assert_eq!(config.retrieval.k, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [session]
            max_sesions = 8
            "#,
        );
        assert!(result.is_err());
    }
}
