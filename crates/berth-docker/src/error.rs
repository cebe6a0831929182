// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the Docker driver.

use thiserror::Error;

/// Driver errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Could not reach the Engine socket.
    #[error("Engine socket error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP-level failure talking to the Engine.
    #[error("Engine transport error: {0}")]
    Transport(#[from] hyper::Error),

    /// Malformed request construction.
    #[error("Engine request error: {0}")]
    Request(#[from] http::Error),

    /// The Engine answered with an unexpected status.
    #[error("Engine returned {status}: {message}")]
    Api {
        /// HTTP status code from the Engine.
        status: u16,
        /// Engine-provided message, when parseable.
        message: String,
    },

    /// The named resource does not exist.
    ///
    /// Only surfaced by lookups; removal operations normalize 404 to
    /// success.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An in-engine image build failed; carries the build error text.
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// JSON payload from the Engine did not parse.
    #[error("Engine payload error: {0}")]
    Json(#[from] serde_json::Error),

    /// Removal refused because the resource lacks the managed label.
    #[error("Refusing to touch unmanaged resource: {0}")]
    Unmanaged(String),
}

impl DriverError {
    /// Construct an API error from a status and message body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        DriverError::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this error is an Engine 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
            || matches!(self, DriverError::Api { status: 404, .. })
    }

    /// Whether this error is an Engine 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DriverError::Api { status: 409, .. })
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
