//! The pupil's HTTP(S) listener.
//!
//! One POST route at the configured path plus a health probe. The API key,
//! when configured, is checked in constant time before the body is even
//! parsed. HTTPS mode terminates TLS from a PEM certificate/key pair.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::config::ListenerConfig;
use crate::handler::{HandlerError, PupilHandler, PupilRequest, PupilResponse};
use crate::watchdog::PupilWatchdog;

/// API key header.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Listener errors with their HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The API key is missing or wrong.
    #[error("invalid API key")]
    InvalidApiKey,

    /// The body is not a valid request.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Processing failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ListenerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match &self {
            Self::InvalidApiKey => "invalid API key".to_string(),
            Self::InvalidBody(_) => self.to_string(),
            // Internal details stay in the logs.
            Self::Internal(_) => "internal error".to_string(),
        };
        (status, body).into_response()
    }
}

/// Shared listener state.
pub struct ListenerState {
    /// Request handler.
    pub handler: PupilHandler,
    /// Expected API key, if configured.
    pub api_key: Option<String>,
    /// The pupil watchdog, for the health probe.
    pub watchdog: Arc<PupilWatchdog>,
}

/// Health probe payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    watchdog: argus_core::watchdog::WatchdogState,
}

/// Build the pupil router.
pub fn router(config: &ListenerConfig, state: Arc<ListenerState>) -> Router {
    Router::new()
        .route(&config.endpoint_path, post(receive))
        .route("/health", get(health))
        .with_state(state)
}

/// `POST <endpoint_path>`: the worker's entry point.
async fn receive(
    State(state): State<Arc<ListenerState>>,
    headers: HeaderMap,
    body: Result<Json<PupilRequest>, JsonRejection>,
) -> Result<Json<PupilResponse>, ListenerError> {
    check_api_key(state.api_key.as_deref(), &headers)?;

    let Json(request) = body.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "rejected pupil request body");
        ListenerError::InvalidBody(rejection.body_text())
    })?;

    match state.handler.handle(request).await {
        Ok(response) => Ok(Json(response)),
        Err(HandlerError::InvalidRequest(reason)) => Err(ListenerError::InvalidBody(reason)),
        Err(HandlerError::DispatchFailed(reason)) => {
            tracing::error!(%reason, "pupil request processing failed");
            Err(ListenerError::Internal(reason))
        }
    }
}

/// `GET /health`.
async fn health(State(state): State<Arc<ListenerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        watchdog: state.watchdog.state(),
    })
}

/// Constant-time API key check. Requests are rejected before body parsing
/// so a missing key never leaks whether the body was otherwise valid.
fn check_api_key(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ListenerError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ListenerError::InvalidApiKey)?;

    if provided.len() != expected.len() {
        return Err(ListenerError::InvalidApiKey);
    }
    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(ListenerError::InvalidApiKey)
    }
}

/// Serve the router per the listener configuration, plain or TLS.
///
/// # Errors
///
/// Returns an error when the bind fails or the certificate cannot be
/// loaded.
pub async fn serve(
    config: &ListenerConfig,
    app: Router,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("invalid listener bind address")?;

    if config.use_https {
        let (cert, key) = (
            config
                .certificate_path
                .as_ref()
                .context("certificate_path required for https")?,
            config
                .certificate_key_path
                .as_ref()
                .context("certificate_key_path required for https")?,
        );
        let tls = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certificate or key")?;

        tracing::info!(addr = %addr, "pupil listener serving HTTPS");
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.changed().await;
            shutdown_handle.graceful_shutdown(None);
        });
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("pupil HTTPS listener failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(addr = %addr, "pupil listener serving HTTP");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .context("pupil HTTP listener failed")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_key(key: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert(API_KEY_HEADER, key.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_no_configured_key_accepts_everything() {
        assert!(check_api_key(None, &headers_with_key(None)).is_ok());
        assert!(check_api_key(None, &headers_with_key(Some("anything"))).is_ok());
    }

    #[test]
    fn test_matching_key_accepted() {
        assert!(check_api_key(Some("secret-key"), &headers_with_key(Some("secret-key"))).is_ok());
    }

    #[test]
    fn test_missing_or_wrong_key_rejected() {
        assert!(matches!(
            check_api_key(Some("secret-key"), &headers_with_key(None)),
            Err(ListenerError::InvalidApiKey)
        ));
        assert!(matches!(
            check_api_key(Some("secret-key"), &headers_with_key(Some("wrong"))),
            Err(ListenerError::InvalidApiKey)
        ));
        assert!(matches!(
            check_api_key(Some("secret-key"), &headers_with_key(Some("secret-kez"))),
            Err(ListenerError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ListenerError::InvalidApiKey.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ListenerError::InvalidBody("x".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ListenerError::Internal("x".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
