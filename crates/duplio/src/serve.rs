// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `duplio serve` command implementation.
//!
//! Wires every upstream adapter behind its circuit breaker, builds the
//! session manager and turn pipeline, installs signal handlers, and runs
//! the gateway until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use duplio_asr::{AsrStreamer, AsrStreamerConfig, HttpAsrAdapter};
use duplio_config::DuplioConfig;
use duplio_core::ServiceAdapter;
use duplio_core::error::DuplioError;
use duplio_core::traits::TtsPreferences;
use duplio_gateway::{AuthSettings, GatewayState, ServerConfig};
use duplio_llm::{GenerationStreamer, HttpLlmAdapter, PromptComposer};
use duplio_media::{HttpLipSyncAdapter, HttpTtsAdapter, VoiceStreamer};
use duplio_pipeline::{ControllerConfig, PipelineDeps, TurnConfig, TurnPipeline};
use duplio_prometheus::{AlertThresholds, HealthAggregator, PrometheusRecorder};
use duplio_resilience::{BreakerConfig, CircuitBreaker, RetryPolicy};
use duplio_retrieval::{
    CachedEmbedder, HttpEmbeddingAdapter, HttpVectorSearchAdapter, RetrievalCoordinator,
};
use duplio_session::{ManagerConfig, SessionManager};

/// Runs the `duplio serve` command.
pub async fn run_serve(config: DuplioConfig) -> Result<(), DuplioError> {
    init_tracing(&config.server.log_level);

    info!("starting duplio serve");

    let breaker_config = BreakerConfig {
        failure_threshold: config.resilience.failure_threshold,
        reset_timeout: Duration::from_secs(config.resilience.reset_timeout_secs),
        success_threshold: config.resilience.success_threshold,
    };
    let retry_policy = RetryPolicy {
        max_attempts: config.llm.max_attempts,
        base_delay: Duration::from_millis(config.llm.retry_base_ms),
        max_delay: Duration::from_secs(5),
    };

    // Upstream adapters, each behind its own breaker.
    let asr_adapter = Arc::new(HttpAsrAdapter::new(config.asr.endpoint.clone(), 32)?);
    let embed_adapter = Arc::new(HttpEmbeddingAdapter::new(
        config.retrieval.embed_endpoint.clone(),
        config.retrieval.embed_dimension,
    )?);
    let search_adapter = Arc::new(HttpVectorSearchAdapter::new(
        config.retrieval.search_endpoint.clone(),
    )?);
    let llm_adapter = Arc::new(HttpLlmAdapter::new(
        config.llm.endpoint.clone(),
        retry_policy,
    )?);
    let tts_adapter = Arc::new(HttpTtsAdapter::new(config.tts.endpoint.clone())?);
    let lipsync_adapter = if config.lipsync.enabled {
        Some(Arc::new(HttpLipSyncAdapter::new(
            config.lipsync.endpoint.clone(),
        )?))
    } else {
        None
    };

    // Stage collaborators.
    let asr = AsrStreamer::new(
        asr_adapter.clone(),
        AsrStreamerConfig {
            interim_cadence: Duration::from_millis(config.asr.interim_cadence_ms),
            vad_silence_ms: config.asr.vad_silence_ms,
            voice_energy_threshold: config.asr.voice_energy_threshold,
            sample_rate: config.asr.sample_rate,
        },
    );

    let search_breaker = Arc::new(CircuitBreaker::new("vector-search", breaker_config));
    let llm_breaker = Arc::new(CircuitBreaker::new("llm", breaker_config));
    let tts_breaker = Arc::new(CircuitBreaker::new("tts", breaker_config));
    let lipsync_breaker = Arc::new(CircuitBreaker::new("lipsync", breaker_config));

    let retrieval = RetrievalCoordinator::new(
        CachedEmbedder::new(
            embed_adapter.clone(),
            config.retrieval.embed_cache_capacity,
            Duration::from_secs(config.retrieval.embed_cache_ttl_secs),
        ),
        search_adapter.clone(),
        search_breaker.clone(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(100),
        },
        config.retrieval.k,
        config.retrieval.min_score,
    );

    let llm = GenerationStreamer::new("primary", llm_breaker.clone())
        .with_provider("primary", llm_adapter.clone());

    let composer = PromptComposer::new(
        config.llm.model.clone(),
        config.llm.persona.clone(),
        config.llm.max_tokens,
        config.llm.context_char_budget,
    );

    let voice = Arc::new(VoiceStreamer::new(
        tts_adapter.clone(),
        lipsync_adapter
            .clone()
            .map(|adapter| adapter as Arc<dyn duplio_core::LipSyncAdapter>),
        tts_breaker.clone(),
        lipsync_breaker.clone(),
    ));

    let aggregator = Arc::new(HealthAggregator::new());
    spawn_breaker_trip_sampler(
        vec![search_breaker, llm_breaker, tts_breaker, lipsync_breaker],
        aggregator.clone(),
    );

    let pipeline = Arc::new(TurnPipeline::new(
        Arc::new(PipelineDeps {
            asr,
            retrieval,
            llm,
            composer,
            voice,
            tts_prefs: TtsPreferences {
                provider: config.tts.provider.clone(),
                sample_rate: config.tts.sample_rate,
                speaking_rate: 1.0,
            },
            aggregator: aggregator.clone(),
        }),
        TurnConfig {
            rag_budget: Duration::from_millis(config.pipeline.rag_budget_ms),
            llm_first_token: Duration::from_millis(config.pipeline.llm_first_token_ms),
            stall_timeout: Duration::from_millis(config.pipeline.stall_timeout_ms),
            tts_parallelism: config.pipeline.tts_parallelism,
            min_prefetch_chars: config.pipeline.min_prefetch_chars,
            reorder_capacity: 256,
        },
    ));

    let manager = SessionManager::new(
        ManagerConfig {
            max_sessions: config.session.max_sessions,
            grace: Duration::from_secs(config.session.grace_secs),
            idle_eviction: Duration::from_secs(config.session.idle_eviction_secs),
            outbound_queue_frames: config.pipeline.outbound_queue_frames,
            history_turns: config.pipeline.history_turns,
        },
        aggregator.clone(),
    );
    manager.spawn_eviction_sweep(Duration::from_secs(30));

    // Readiness probes.
    let mut dependencies: Vec<Arc<dyn ServiceAdapter>> = vec![
        asr_adapter,
        embed_adapter,
        search_adapter,
        llm_adapter,
        tts_adapter,
    ];
    if let Some(lipsync) = lipsync_adapter {
        dependencies.push(lipsync);
    }

    let prometheus = match PrometheusRecorder::install() {
        Ok(recorder) => {
            let recorder = Arc::new(recorder);
            Some(Arc::new(move || recorder.render())
                as Arc<dyn Fn() -> String + Send + Sync>)
        }
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder unavailable");
            None
        }
    };

    let state = GatewayState {
        manager: manager.clone(),
        pipeline,
        controller_config: ControllerConfig {
            cancel_budget: Duration::from_millis(config.pipeline.cancel_budget_ms),
            barge_in_on_voice: config.pipeline.barge_in_on_voice,
            voice_energy_threshold: config.asr.voice_energy_threshold,
            frame_channel_capacity: 64,
        },
        auth: AuthSettings {
            jwt_secret: config.auth.jwt_secret.clone(),
            jwt_issuer: config.auth.jwt_issuer.clone(),
            jwt_audience: config.auth.jwt_audience.clone(),
            guest_max_age: chrono_duration_secs(config.auth.guest_max_age_secs),
        },
        aggregator,
        alert_thresholds: AlertThresholds {
            success_rate_min: config.metrics.success_rate_min,
            avg_connect_ms_max: config.metrics.avg_connect_ms_max,
            timeout_rate_max: config.metrics.timeout_rate_max,
        },
        dependencies: Arc::new(dependencies),
        prometheus_render: prometheus,
        start_time: std::time::Instant::now(),
        bind_timeout: Duration::from_secs(config.session.bind_timeout_secs),
        lipsync_enabled: config.lipsync.enabled,
    };

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };

    let cancel = install_signal_handler();

    tokio::select! {
        result = duplio_gateway::start_server(&server_config, state) => result?,
        _ = cancel.cancelled() => {
            info!("shutdown signal received, draining sessions");
            manager.destroy_all();
        }
    }

    info!("duplio serve shutdown complete");
    Ok(())
}

/// Mirrors per-breaker trip counters into the aggregator and Prometheus.
fn spawn_breaker_trip_sampler(
    breakers: Vec<Arc<CircuitBreaker>>,
    aggregator: Arc<HealthAggregator>,
) {
    tokio::spawn(async move {
        let mut seen: Vec<u64> = breakers.iter().map(|b| b.trip_count()).collect();
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        loop {
            ticker.tick().await;
            for (breaker, seen) in breakers.iter().zip(seen.iter_mut()) {
                let current = breaker.trip_count();
                for _ in *seen..current {
                    aggregator.breaker_trip();
                    duplio_prometheus::record_breaker_trip(breaker.service());
                }
                *seen = current;
            }
        }
    });
}

/// Installs handlers for SIGTERM and SIGINT (Ctrl+C).
///
/// Returns a token cancelled when either signal is received.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
    });

    token
}

fn chrono_duration_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs as i64)
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("duplio={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
