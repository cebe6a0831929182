// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for berth-core.

use thiserror::Error;

/// Why an authentication attempt was rejected.
///
/// Every variant surfaces to callers as a bare "unauthenticated"; the
/// variant exists so the server can log the category without leaking it
/// in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthFailure {
    /// The credential string does not match `rw_prod_{key_id}.{secret}`.
    BadFormat,
    /// No API key row exists for the presented key id.
    UnknownKey,
    /// The key has a `revoked_at` stamp.
    Revoked,
    /// The key's `expires_at` is in the past.
    Expired,
    /// The secret did not verify against the stored hash.
    Mismatch,
    /// The magic-link token is missing, already used, or expired.
    LinkInvalid,
}

impl AuthFailure {
    /// Stable category label for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AuthFailure::BadFormat => "BAD_FORMAT",
            AuthFailure::UnknownKey => "UNKNOWN_KEY",
            AuthFailure::Revoked => "REVOKED",
            AuthFailure::Expired => "EXPIRED",
            AuthFailure::Mismatch => "MISMATCH",
            AuthFailure::LinkInvalid => "LINK_INVALID",
        }
    }
}

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// Human-readable reason.
        message: String,
    },

    /// The named entity does not exist or is foreign to the caller.
    ///
    /// Ownership failures are deliberately indistinguishable from
    /// non-existence.
    #[error("{entity} not found")]
    NotFound {
        /// Entity kind, e.g. "environment".
        entity: &'static str,
    },

    /// The operation conflicts with existing state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Authentication failed.
    #[error("Unauthenticated")]
    Unauthenticated(AuthFailure),

    /// The key lacks a required scope.
    #[error("Insufficient scope")]
    Forbidden,

    /// Secret hashing or column encryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl CoreError {
    /// Shorthand for a validation failure.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a not-found failure.
    pub fn not_found(entity: &'static str) -> Self {
        CoreError::NotFound { entity }
    }
}

/// Result type using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;
