// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the realtime service.
//!
//! The gateway in front of this service authenticates callers and passes
//! the resolved user id in the `X-User-Id` header. Nothing here performs
//! authentication.

use crate::admission::admission;
use crate::config::Config;
use crate::error::UpgradeError;
use crate::hub::{BatchReport, Hub, HubStats};
use crate::limiter::RateLimiter;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::store::{KvStore, MemoryStore};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Header carrying the caller's resolved user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state.
pub struct AppState<S = MemoryStore> {
    pub limiter: RateLimiter<S>,
    pub hub: Hub,
    pub metrics: Metrics,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubStats>,
}

/// Broadcast request: the message plus its recipients.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub users: Vec<String>,
    #[serde(flatten)]
    pub message: Message,
}

/// The caller's user id, if the gateway supplied one.
pub fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Normalize an origin for comparison (scheme, lowercase host, port).
fn normalize_origin(origin: &str) -> String {
    match url::Url::parse(origin.trim()) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => origin.trim().trim_end_matches('/').to_lowercase(),
    }
}

/// Check the `Origin` header against the allowlist. An empty allowlist
/// accepts every origin, including none.
pub fn check_origin(allowed: &[String], origin: Option<&HeaderValue>) -> Result<(), UpgradeError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let origin = origin.and_then(|v| v.to_str().ok()).unwrap_or_default();
    let normalized = normalize_origin(origin);
    if allowed.iter().any(|a| normalize_origin(a) == normalized) {
        Ok(())
    } else {
        Err(UpgradeError::OriginRejected(origin.to_string()))
    }
}

/// Health check endpoint.
pub async fn health<S: KvStore>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    let hub = state.hub.stats().await.ok();
    Json(HealthResponse {
        status: if hub.is_some() { "healthy" } else { "degraded" },
        service: "ptracker-realtime",
        version: env!("CARGO_PKG_VERSION"),
        hub,
    })
}

/// Upgrade to a websocket and attach it to the hub.
///
/// Origin and identity are checked before the upgrade, so a rejected client
/// never gets a registry entry.
pub async fn notifications_ws<S: KvStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(err) = check_origin(&state.config.hub.allowed_origins, headers.get(header::ORIGIN)) {
        warn!(error = %err, "Rejecting websocket upgrade");
        return err.into_response();
    }

    let Some(user) = user_id(&headers) else {
        warn!("Rejecting websocket upgrade without user identity");
        return UpgradeError::MissingIdentity.into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%user, error = %rejection, "Websocket upgrade failed");
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = hub.connect(user, socket).await {
            error!(error = %err, "Delivery pump panicked");
        }
    })
}

/// Send one message to several users.
pub async fn notify<S: KvStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<NotifyRequest>,
) -> Json<BatchReport> {
    debug!(kind = %req.message.kind, users = req.users.len(), "Processing notify request");
    Json(state.hub.batch_notify(&req.users, req.message).await)
}

/// Prometheus exposition endpoint.
pub async fn metrics<S: KvStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the service router.
pub fn router<S: KvStore>(state: Arc<AppState<S>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::<S>))
        .route("/healthz", get(health::<S>))
        .route("/ws", get(notifications_ws::<S>))
        .route("/notify", post(notify::<S>));

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics::<S>));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), admission::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_id(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(user_id(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u-123"));
        assert_eq!(user_id(&headers).as_deref(), Some("u-123"));
    }

    #[test]
    fn test_check_origin() {
        let allowed = vec!["https://App.Example.com/".to_string()];

        let ok = HeaderValue::from_static("https://app.example.com");
        assert!(check_origin(&allowed, Some(&ok)).is_ok());

        let other = HeaderValue::from_static("https://evil.example.com");
        assert_eq!(
            check_origin(&allowed, Some(&other)),
            Err(UpgradeError::OriginRejected("https://evil.example.com".into()))
        );

        assert!(check_origin(&allowed, None).is_err());
        assert!(check_origin(&[], None).is_ok());
    }

    #[test]
    fn test_notify_request_flattens_message() {
        let req: NotifyRequest = serde_json::from_str(
            r#"{"users":["a","b"],"type":"join_accepted","data":{"project_id":"p1"}}"#,
        )
        .unwrap();
        assert_eq!(req.users, vec!["a", "b"]);
        assert_eq!(
            req.message,
            Message::new("join_accepted").with("project_id", "p1")
        );
    }
}
