// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission middleware: every mutating request spends one token from the
//! caller's bucket before it reaches a handler.

use crate::config::FailureMode;
use crate::error::ErrorResponse;
use crate::handlers::{user_id, AppState};
use crate::limiter::Decision;
use crate::store::KvStore;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, error};

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RETRY_AFTER_HEADER: &str = "x-ratelimit-retry-after";

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub async fn admission<S: KvStore>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) {
        return next.run(request).await;
    }

    let Some(user) = user_id(request.headers()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing user identity".to_string(),
                code: "MISSING_IDENTITY",
                retry_after_ms: None,
            }),
        )
            .into_response();
    };

    match state.limiter.check(&user).await {
        Ok(Decision::Allowed { remaining }) => {
            state.metrics.admission.with_label_values(&["allowed"]).inc();
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            headers.insert(LIMIT_HEADER, HeaderValue::from(state.limiter.capacity()));
            response
        }
        Ok(Decision::Denied { retry_after_ms }) => {
            state.metrics.admission.with_label_values(&["denied"]).inc();
            debug!(%user, retry_after_ms, "Request rate limited");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER_HEADER, retry_after_ms.to_string())],
                Json(ErrorResponse {
                    error: "rate limit exceeded".to_string(),
                    code: "RATE_LIMITED",
                    retry_after_ms: Some(retry_after_ms),
                }),
            )
                .into_response()
        }
        Err(err) => {
            state.metrics.admission.with_label_values(&["error"]).inc();
            match state.config.rate_limit.failure_mode {
                FailureMode::Open => {
                    error!(%user, error = %err, "Rate limiter failed, admitting request");
                    next.run(request).await
                }
                FailureMode::Closed => {
                    error!(%user, error = %err, "Rate limiter failed, rejecting request");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(ErrorResponse {
                            error: "rate limiter unavailable".to_string(),
                            code: "LIMITER_UNAVAILABLE",
                            retry_after_ms: None,
                        }),
                    )
                        .into_response()
                }
            }
        }
    }
}
