// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server error type and its HTTP projection.
//!
//! The handler layer returns [`ServerError`] everywhere; `IntoResponse`
//! maps the taxonomy onto status codes. Auth failures carry no detail
//! beyond their category, and upstream (driver) failures surface as a
//! bare 500 - the cause goes to the log and, for async work, to the
//! deployment row.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use berth_core::error::CoreError;
use berth_docker::DriverError;

/// Unified server error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Domain/persistence error from berth-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Docker Engine error.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Per-key budget exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Deployment queue is gone; the process is shutting down.
    #[error("Deployment queue closed")]
    QueueClosed,
}

/// Result type for handlers and services.
pub type Result<T> = std::result::Result<T, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            ServerError::Core(CoreError::Validation { field, message }) => (
                StatusCode::BAD_REQUEST,
                "invalid_input",
                format!("invalid {field}: {message}"),
            ),
            ServerError::Core(CoreError::Unauthenticated(failure)) => {
                tracing::warn!(category = failure.category(), "Authentication rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    "invalid credentials".to_string(),
                )
            }
            ServerError::Core(CoreError::Forbidden) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "insufficient scope".to_string(),
            ),
            ServerError::Core(CoreError::NotFound { entity }) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{entity} not found"),
            ),
            ServerError::Core(CoreError::Conflict(message)) => {
                (StatusCode::CONFLICT, "conflict", message.clone())
            }
            ServerError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "request budget exceeded".to_string(),
            ),
            ServerError::Core(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
            ServerError::Driver(e) => {
                tracing::error!(error = %e, "Driver error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream",
                    "container engine error".to_string(),
                )
            }
            ServerError::QueueClosed => {
                tracing::error!("Deployment queue closed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}
