//! Ingress HTTP surface.
//!
//! One axum router over the shared daemon state: the push ingress, the
//! state endpoints, the probes and the compatibility `/metrics` encoder.

use std::sync::Arc;

use argus_core::alert::{Alert, PushAlert};
use argus_core::noc::CORRELATION_HEADER;
use argus_core::watchdog::WatchdogState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::coordinator::{correlation_id, Coordinator};
use crate::k8s::{K8sLayerService, LayerState};
use crate::metrics::Metrics;
use crate::noc::NocQueue;
use crate::vector::AlertsVector;
use crate::watchdog::WatchdogService;

/// Shared state behind every route.
pub struct AppState {
    /// The coordinator (push ingestion).
    pub coordinator: Arc<Coordinator>,
    /// The alerts vector.
    pub vector: Arc<AlertsVector>,
    /// The watchdog service.
    pub watchdog: Arc<WatchdogService>,
    /// The Kubernetes layer service.
    pub k8s: Arc<K8sLayerService>,
    /// The NOC decision queue.
    pub queue: Arc<NocQueue>,
    /// The metrics facade.
    pub metrics: Arc<Metrics>,
}

/// Aggregated daemon state served on `/api/health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgusState {
    /// Watchdog view.
    pub watchdog: WatchdogState,
    /// Last Kubernetes layer poll, if one completed.
    pub k8s_layer: Option<LayerState>,
    /// Entries in the vector.
    pub vector_size: usize,
    /// Whether this instance booted in crash recovery.
    pub crash_recovery: bool,
    /// Decisions waiting in the NOC queue.
    pub noc_queue_depth: usize,
    /// When the last push batch arrived.
    pub last_alert_received_at: Option<DateTime<Utc>>,
    /// Whether the boot grace period still holds snapshots back.
    pub grace_period_active: bool,
}

/// Ingress errors with their HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body was not a valid push batch.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the daemon router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v2/alerts", post(receive_alerts))
        .route("/api/health", get(argus_state))
        .route("/api/watchdog", get(watchdog_state))
        .route("/api/alerts", get(alerts_snapshot))
        .route("/api/k8s/health", get(k8s_state))
        .route("/api/k8s/circuit-breaker", get(k8s_breaker))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// `POST /api/v2/alerts`: the push ingress. Echoes `X-Correlation-ID`.
async fn receive_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Vec<PushAlert>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let correlation = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| correlation_id("push"), ToString::to_string);

    let Json(alerts) = body.map_err(|rejection| {
        state.metrics.push_rejected();
        tracing::warn!(
            correlation_id = %correlation,
            error = %rejection.body_text(),
            "rejected push body"
        );
        ApiError::InvalidBody(rejection.body_text())
    })?;

    state.coordinator.receive_alerts(alerts, &correlation);

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = correlation.parse() {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    Ok(response)
}

/// `GET /api/health`: the aggregated state.
async fn argus_state(State(state): State<Arc<AppState>>) -> Json<ArgusState> {
    let metrics = state.metrics.snapshot();
    Json(ArgusState {
        watchdog: state.watchdog.state(),
        k8s_layer: state.k8s.last_state(),
        vector_size: state.vector.len(),
        crash_recovery: state.vector.crash_recovery(),
        noc_queue_depth: state.queue.depth(),
        last_alert_received_at: state.coordinator.last_alert_received(),
        grace_period_active: metrics.grace_period_active,
    })
}

/// `GET /api/watchdog`.
async fn watchdog_state(State(state): State<Arc<AppState>>) -> Json<WatchdogState> {
    Json(state.watchdog.state())
}

/// `GET /api/alerts`: the current vector snapshot.
async fn alerts_snapshot(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(state.vector.snapshot())
}

/// `GET /api/k8s/health`: the last layer poll.
async fn k8s_state(State(state): State<Arc<AppState>>) -> Json<Option<LayerState>> {
    Json(state.k8s.last_state())
}

/// `GET /api/k8s/circuit-breaker`.
async fn k8s_breaker(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "state": state.k8s.breaker().state().to_string(),
    }))
}

/// `GET /livez`: process liveness.
async fn livez() -> &'static str {
    "ok"
}

/// `GET /readyz`: readiness; 503 when internals cannot be read.
async fn readyz(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let _ = state.vector.len();
    Ok("ready")
}

/// `GET /metrics`: kept for scrape compatibility. The deprecation note
/// rides along as a comment line the Prometheus text format ignores.
async fn metrics_text(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    tracing::debug!("/metrics scraped; this endpoint is deprecated");
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(format!(
        "# NOTE: /metrics is deprecated; telemetry flows through the OpenTelemetry collector\n{body}"
    ))
}
