// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the realtime service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the key-value store backing the rate limiter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("key {key} holds a value of the wrong type")]
    WrongType { key: String },

    #[error("field {field} of {key} is not a valid number: {value}")]
    Corrupt {
        key: String,
        field: String,
        value: String,
    },
}

/// Rate limiter errors. The admission layer decides what a failure means.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("rate limiter backend: {0}")]
    Backend(#[from] StoreError),
}

/// Outcome of a notification that reached no client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The user has no registered connection. Not a system failure.
    #[error("user {user} is offline")]
    Offline { user: String },

    #[error("notification hub is shut down")]
    HubClosed,

    #[error("mailbox of client {client} did not accept the message in time")]
    MailboxTimeout { client: uuid::Uuid },
}

/// Wire failures seen by a delivery pump. Always handled by tearing the
/// connection down.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("write deadline exceeded")]
    TimedOut,
}

/// Rejections raised before a websocket client is constructed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("missing user identity")]
    MissingIdentity,

    #[error("origin not allowed: {0}")]
    OriginRejected(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            Self::MissingIdentity => (StatusCode::UNAUTHORIZED, "MISSING_IDENTITY"),
            Self::OriginRejected(_) => (StatusCode::FORBIDDEN, "ORIGIN_REJECTED"),
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code,
                retry_after_ms: None,
            }),
        )
            .into_response()
    }
}
