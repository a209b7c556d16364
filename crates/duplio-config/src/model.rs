// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Duplio service.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. Every tunable named in the conversation core
//! (latency budgets, queue depths, breaker thresholds) lives here with its
//! documented default.

use serde::{Deserialize, Serialize};

/// Top-level Duplio configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible
/// values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DuplioConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub asr: AsrConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub lipsync: LipSyncConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Connection authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 secret for JWT verification. `None` disables JWT auth
    /// (guest tokens still work).
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,

    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,

    /// Maximum age of a guest token before it is rejected as expired.
    #[serde(default = "default_guest_max_age_secs")]
    pub guest_max_age_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_issuer: default_jwt_issuer(),
            jwt_audience: default_jwt_audience(),
            guest_max_age_secs: default_guest_max_age_secs(),
        }
    }
}

fn default_jwt_issuer() -> String {
    "duplio-accounts".to_string()
}

fn default_jwt_audience() -> String {
    "duplio-realtime".to_string()
}

fn default_guest_max_age_secs() -> u64 {
    3600
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Process-wide cap on concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Grace window after disconnect during which the same user may rebind
    /// and resume the session.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Sessions idle for longer than this are evicted.
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,

    /// Deadline for creating/binding a session on a fresh connection.
    #[serde(default = "default_bind_timeout_secs")]
    pub bind_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            grace_secs: default_grace_secs(),
            idle_eviction_secs: default_idle_eviction_secs(),
            bind_timeout_secs: default_bind_timeout_secs(),
        }
    }
}

fn default_max_sessions() -> usize {
    256
}

fn default_grace_secs() -> u64 {
    30
}

fn default_idle_eviction_secs() -> u64 {
    300
}

fn default_bind_timeout_secs() -> u64 {
    3
}

/// Turn pipeline settings: queues, budgets, pre-emption.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Outbound bounded queue depth per session (~1s at target frame rates).
    /// This queue is the system's back-pressure regulator.
    #[serde(default = "default_outbound_queue_frames")]
    pub outbound_queue_frames: usize,

    /// Concurrent TTS jobs per turn. Output order is restored by the
    /// reorder buffer.
    #[serde(default = "default_tts_parallelism")]
    pub tts_parallelism: usize,

    /// Reorder-buffer gap before a stall warning; the turn aborts with
    /// TTS_STALL after twice this.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// Budget for all stage tasks to observe cancellation and release.
    #[serde(default = "default_cancel_budget_ms")]
    pub cancel_budget_ms: u64,

    /// Minimum accumulated characters before a synthesis boundary is taken.
    #[serde(default = "default_min_prefetch_chars")]
    pub min_prefetch_chars: usize,

    /// Number of completed turn summaries kept for prompt composition.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Treat inbound voice energy during `speaking` as an interruption.
    #[serde(default = "default_barge_in_on_voice")]
    pub barge_in_on_voice: bool,

    /// Retrieval budget; on expiry the turn proceeds with empty context.
    #[serde(default = "default_rag_budget_ms")]
    pub rag_budget_ms: u64,

    /// Deadline for the LLM's first token.
    #[serde(default = "default_llm_first_token_ms")]
    pub llm_first_token_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outbound_queue_frames: default_outbound_queue_frames(),
            tts_parallelism: default_tts_parallelism(),
            stall_timeout_ms: default_stall_timeout_ms(),
            cancel_budget_ms: default_cancel_budget_ms(),
            min_prefetch_chars: default_min_prefetch_chars(),
            history_turns: default_history_turns(),
            barge_in_on_voice: default_barge_in_on_voice(),
            rag_budget_ms: default_rag_budget_ms(),
            llm_first_token_ms: default_llm_first_token_ms(),
        }
    }
}

fn default_outbound_queue_frames() -> usize {
    64
}

fn default_tts_parallelism() -> usize {
    2
}

fn default_stall_timeout_ms() -> u64 {
    750
}

fn default_cancel_budget_ms() -> u64 {
    200
}

fn default_min_prefetch_chars() -> usize {
    60
}

fn default_history_turns() -> usize {
    5
}

fn default_barge_in_on_voice() -> bool {
    true
}

fn default_rag_budget_ms() -> u64 {
    200
}

fn default_llm_first_token_ms() -> u64 {
    1000
}

/// Speech-recognition settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AsrConfig {
    /// Recognizer endpoint URL.
    #[serde(default = "default_asr_endpoint")]
    pub endpoint: String,

    /// Minimum interval between interim transcript emissions.
    #[serde(default = "default_interim_cadence_ms")]
    pub interim_cadence_ms: u64,

    /// Silence length treated as end of utterance when the client has not
    /// sent an explicit boundary.
    #[serde(default = "default_vad_silence_ms")]
    pub vad_silence_ms: u64,

    /// RMS energy (0..1 over i16 range) above which a frame counts as voice.
    #[serde(default = "default_voice_energy_threshold")]
    pub voice_energy_threshold: f32,

    #[serde(default = "default_asr_sample_rate")]
    pub sample_rate: u32,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            endpoint: default_asr_endpoint(),
            interim_cadence_ms: default_interim_cadence_ms(),
            vad_silence_ms: default_vad_silence_ms(),
            voice_energy_threshold: default_voice_energy_threshold(),
            sample_rate: default_asr_sample_rate(),
        }
    }
}

fn default_asr_endpoint() -> String {
    "http://127.0.0.1:9101".to_string()
}

fn default_interim_cadence_ms() -> u64 {
    300
}

fn default_vad_silence_ms() -> u64 {
    500
}

fn default_voice_energy_threshold() -> f32 {
    0.05
}

fn default_asr_sample_rate() -> u32 {
    16_000
}

/// Retrieval settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_embed_endpoint")]
    pub embed_endpoint: String,

    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    /// Dimensionality of the embedding service's vectors.
    #[serde(default = "default_embed_dimension")]
    pub embed_dimension: usize,

    /// Maximum chunks returned per search.
    #[serde(default = "default_search_k")]
    pub k: usize,

    /// Minimum relevance score for a chunk to be considered.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_embed_cache_capacity")]
    pub embed_cache_capacity: u64,

    #[serde(default = "default_embed_cache_ttl_secs")]
    pub embed_cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embed_endpoint: default_embed_endpoint(),
            search_endpoint: default_search_endpoint(),
            embed_dimension: default_embed_dimension(),
            k: default_search_k(),
            min_score: default_min_score(),
            embed_cache_capacity: default_embed_cache_capacity(),
            embed_cache_ttl_secs: default_embed_cache_ttl_secs(),
        }
    }
}

fn default_embed_endpoint() -> String {
    "http://127.0.0.1:9102/embed".to_string()
}

fn default_search_endpoint() -> String {
    "http://127.0.0.1:9102/search".to_string()
}

fn default_embed_dimension() -> usize {
    384
}

fn default_search_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.7
}

fn default_embed_cache_capacity() -> u64 {
    4096
}

fn default_embed_cache_ttl_secs() -> u64 {
    600
}

/// Generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Character budget for retrieved context in the composed prompt.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    /// Persona text prepended to every system prompt.
    #[serde(default)]
    pub persona: Option<String>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            context_char_budget: default_context_char_budget(),
            persona: None,
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:9103/generate".to_string()
}

fn default_llm_model() -> String {
    "twin-chat-1".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_context_char_budget() -> usize {
    6000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

/// Speech-synthesis settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TtsConfig {
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_tts_endpoint(),
            provider: default_tts_provider(),
            sample_rate: default_tts_sample_rate(),
        }
    }
}

fn default_tts_endpoint() -> String {
    "http://127.0.0.1:9104/synthesize".to_string()
}

fn default_tts_provider() -> String {
    "default".to_string()
}

fn default_tts_sample_rate() -> u32 {
    16_000
}

/// Lip-sync settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LipSyncConfig {
    #[serde(default = "default_lipsync_endpoint")]
    pub endpoint: String,

    /// Disables video generation entirely when false.
    #[serde(default = "default_lipsync_enabled")]
    pub enabled: bool,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            endpoint: default_lipsync_endpoint(),
            enabled: default_lipsync_enabled(),
        }
    }
}

fn default_lipsync_endpoint() -> String {
    "http://127.0.0.1:9105/render".to_string()
}

fn default_lipsync_enabled() -> bool {
    true
}

/// Circuit-breaker and retry settings shared by all upstream adapters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before probing half-open.
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    /// Consecutive half-open successes before the breaker closes.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    2
}

/// Alert thresholds applied to the metrics aggregation snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_success_rate_min")]
    pub success_rate_min: f64,

    #[serde(default = "default_avg_connect_ms_max")]
    pub avg_connect_ms_max: f64,

    #[serde(default = "default_timeout_rate_max")]
    pub timeout_rate_max: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            success_rate_min: default_success_rate_min(),
            avg_connect_ms_max: default_avg_connect_ms_max(),
            timeout_rate_max: default_timeout_rate_max(),
        }
    }
}

fn default_success_rate_min() -> f64 {
    0.95
}

fn default_avg_connect_ms_max() -> f64 {
    3000.0
}

fn default_timeout_rate_max() -> f64 {
    0.05
}
