// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use berth_core::scopes::Scope;

use super::views::{DeploymentView, EnvironmentDetailView, EnvironmentView};
use super::{AppState, Principal};
use crate::error::Result;

const CREATE_SCOPES: &[Scope] = &[Scope::EnvWrite];
const READ_SCOPES: &[Scope] = &[Scope::EnvRead];
const DELETE_SCOPES: &[Scope] = &[Scope::EnvWrite];
const PUBLIC_SCOPES: &[Scope] = &[Scope::EnvWrite];

/// `POST /environments` body.
#[derive(Debug, Deserialize)]
pub struct CreateEnvironmentRequest {
    /// Logical environment name.
    pub name: String,
}

/// `POST /environments/{id}/public` body.
#[derive(Debug, Deserialize)]
pub struct MakePublicRequest {
    /// Public domain to expose at.
    pub domain: String,
}

/// `POST /environments`
pub async fn create(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<CreateEnvironmentRequest>,
) -> Result<(StatusCode, Json<EnvironmentView>)> {
    state.charge_general(&principal)?;
    principal.require(CREATE_SCOPES)?;
    let row = state
        .environments
        .create(&principal.user.user_id, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

/// `GET /environments`
pub async fn list(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<EnvironmentView>>> {
    state.charge_general(&principal)?;
    principal.require(READ_SCOPES)?;
    let rows = state.environments.list(&principal.user.user_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// `GET /environments/{id}`
pub async fn show(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(env_id): Path<String>,
) -> Result<Json<EnvironmentDetailView>> {
    state.charge_general(&principal)?;
    principal.require(READ_SCOPES)?;
    let env = state
        .environments
        .get(&principal.user.user_id, &env_id)
        .await?;
    let deployments = state
        .engine
        .list_by_environment(&principal.user.user_id, &env_id)
        .await?;
    Ok(Json(EnvironmentDetailView {
        environment: env.into(),
        deployments: deployments
            .into_iter()
            .map(DeploymentView::from)
            .collect(),
    }))
}

/// `DELETE /environments/{id}`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(env_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.charge_general(&principal)?;
    principal.require(DELETE_SCOPES)?;
    state
        .environments
        .delete(&principal.user.user_id, &env_id)
        .await?;
    Ok(Json(json!({ "message": "environment deleted" })))
}

/// `POST /environments/{id}/public`
pub async fn make_public(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(env_id): Path<String>,
    Json(body): Json<MakePublicRequest>,
) -> Result<Json<EnvironmentView>> {
    state.charge_general(&principal)?;
    principal.require(PUBLIC_SCOPES)?;
    let row = state
        .environments
        .make_public(&principal.user.user_id, &env_id, &body.domain)
        .await?;
    Ok(Json(row.into()))
}
