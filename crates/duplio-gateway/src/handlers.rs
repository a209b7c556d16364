// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP handlers for the process interface: health, readiness, metrics.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use duplio_core::types::HealthStatus;

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

/// Per-dependency readiness entry.
#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response body for GET /ready.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

/// GET /health: liveness plus basic service identity.
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.manager.len(),
    })
}

/// GET /ready: probes every upstream adapter.
pub async fn get_ready(State(state): State<GatewayState>) -> Response {
    let mut dependencies = Vec::with_capacity(state.dependencies.len());
    let mut ready = true;

    for adapter in state.dependencies.iter() {
        let (status, detail) = match adapter.health_check().await {
            Ok(HealthStatus::Healthy) => ("healthy".to_string(), None),
            Ok(HealthStatus::Degraded(reason)) => ("degraded".to_string(), Some(reason)),
            Ok(HealthStatus::Unhealthy(reason)) => {
                ready = false;
                ("unhealthy".to_string(), Some(reason))
            }
            Err(e) => {
                ready = false;
                ("unhealthy".to_string(), Some(e.to_string()))
            }
        };
        dependencies.push(DependencyStatus {
            name: adapter.name().to_string(),
            status,
            detail,
        });
    }

    let body = Json(ReadyResponse { ready, dependencies });
    if ready {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

/// GET /metrics: Prometheus text format.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.prometheus_render {
        Some(render) => (StatusCode::OK, render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /metrics/summary: the aggregation snapshot with alert evaluation.
pub async fn get_metrics_summary(State(state): State<GatewayState>) -> Response {
    let snapshot = state.aggregator.snapshot(&state.alert_thresholds);
    Json(snapshot).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let response = HealthResponse {
            status: "ok".into(),
            version: "0.1.0".into(),
            uptime_secs: 42,
            active_sessions: 3,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"uptime_secs\":42"));
        assert!(json.contains("\"active_sessions\":3"));
    }

    #[test]
    fn ready_response_omits_empty_detail() {
        let response = ReadyResponse {
            ready: true,
            dependencies: vec![DependencyStatus {
                name: "asr".into(),
                status: "healthy".into(),
                detail: None,
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("detail"));
    }
}
