// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Routes: `/ws` (the conversation channel), `/health`, `/ready`,
//! `/metrics` (Prometheus text), `/metrics/summary` (the C9 aggregation
//! snapshot with alert evaluation).

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use duplio_core::ServiceAdapter;
use duplio_core::error::DuplioError;
use duplio_pipeline::{ControllerConfig, TurnPipeline};
use duplio_prometheus::{AlertThresholds, HealthAggregator};
use duplio_session::SessionManager;

use crate::auth::AuthSettings;
use crate::handlers;
use crate::ws;

/// Shared state for all gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<SessionManager>,
    pub pipeline: Arc<TurnPipeline>,
    pub controller_config: ControllerConfig,
    pub auth: AuthSettings,
    pub aggregator: Arc<HealthAggregator>,
    pub alert_thresholds: AlertThresholds,
    /// Adapters probed by the readiness endpoint.
    pub dependencies: Arc<Vec<Arc<dyn ServiceAdapter>>>,
    /// Prometheus text renderer, when the recorder is installed.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    pub start_time: std::time::Instant,
    pub bind_timeout: Duration,
    pub lipsync_enabled: bool,
}

/// Server bind settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Builds the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(handlers::get_health))
        .route("/ready", get(handlers::get_ready))
        .route("/metrics", get(handlers::get_metrics))
        .route("/metrics/summary", get(handlers::get_metrics_summary))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts the gateway server and serves until the listener fails.
pub async fn start_server(config: &ServerConfig, state: GatewayState) -> Result<(), DuplioError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DuplioError::WebSocket(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| DuplioError::WebSocket(format!("gateway server error: {e}")))?;

    Ok(())
}
