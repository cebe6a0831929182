// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential routes.
//!
//! `/auth/verify` is the magic-link landing endpoint and is the only
//! unauthenticated route besides `/health`. Key listing and revocation
//! require authentication but no scope - a key always manages itself.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use berth_core::error::CoreError;

use super::views::ApiKeyView;
use super::{AppState, Principal};
use crate::error::Result;

/// `GET /auth/verify` query.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// The one-shot magic-link token.
    pub token: String,
}

/// The redeemed credential. Shown exactly once.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// The full `rw_prod_...` credential.
    pub api_key: String,
    /// Key expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

/// `GET /auth/verify?token=...`
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>> {
    let redeemed = state.creds.redeem_magic_link(&query.token).await?;
    Ok(Json(VerifyResponse {
        api_key: redeemed.api_key,
        expires_at: redeemed.expires_at,
    }))
}

/// `GET /auth/keys`
pub async fn list(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<ApiKeyView>>> {
    state.charge_general(&principal)?;
    let keys = state
        .creds
        .keys()
        .list_for_user(&principal.user.user_id)
        .await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

/// `POST /auth/revoke` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    /// Public id of the key to revoke.
    pub key_id: String,
}

/// `POST /auth/revoke`
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<serde_json::Value>> {
    state.charge_general(&principal)?;
    let revoked = state
        .creds
        .keys()
        .revoke(&principal.user.user_id, &body.key_id)
        .await?;
    if !revoked {
        return Err(CoreError::not_found("key").into());
    }
    Ok(Json(json!({ "message": "key revoked" })))
}
