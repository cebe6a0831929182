// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication extractor and scope checks.
//!
//! The middleware chain is explicit: the [`Principal`] extractor
//! authenticates the `X-API-Key` header and attaches the caller; each
//! handler then checks its route's static scope set via
//! [`Principal::require`]. No hidden reflection anywhere.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use berth_core::credentials::CredentialService;
use berth_core::error::{AuthFailure, CoreError};
use berth_core::scopes::Scope;
use berth_core::store::{ApiKeyRow, UserRow};

use super::AppState;
use crate::error::ServerError;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated caller attached to a request.
pub struct Principal {
    /// The key's owner.
    pub user: UserRow,
    /// The presented key.
    pub key: ApiKeyRow,
}

impl Principal {
    /// Enforce the route's required scope set.
    pub fn require(&self, required: &[Scope]) -> Result<(), ServerError> {
        CredentialService::require_scopes(&self.key, required)?;
        Ok(())
    }
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(CoreError::Unauthenticated(AuthFailure::BadFormat))?;

        let (user, key) = state.creds.authenticate(raw).await?;
        Ok(Principal { user, key })
    }
}
