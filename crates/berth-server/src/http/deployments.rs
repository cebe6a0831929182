// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use berth_core::scopes::Scope;

use super::views::{DeploymentDetailView, DeploymentView};
use super::{AppState, Principal};
use crate::deployments::{DeploymentTicket, GitDeployRequest, RegistryDeployRequest};
use crate::error::{Result, ServerError};

const WRITE_SCOPES: &[Scope] = &[Scope::DeployWrite];
const READ_SCOPES: &[Scope] = &[Scope::DeployRead];
const LOGS_SCOPES: &[Scope] = &[Scope::LogsRead];

/// Default log tail when the query omits one.
const DEFAULT_LOG_TAIL: u32 = 100;

/// `POST /deployments`
pub async fn create_registry(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<RegistryDeployRequest>,
) -> Result<(StatusCode, Json<DeploymentTicket>)> {
    principal.require(WRITE_SCOPES)?;
    if !state.limits.registry_deploy.check(&principal.key.key_id) {
        return Err(ServerError::RateLimited);
    }
    let ticket = state
        .engine
        .create_from_registry(&principal.user.user_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// `POST /deployments/from-git`
pub async fn create_git(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<GitDeployRequest>,
) -> Result<(StatusCode, Json<DeploymentTicket>)> {
    principal.require(WRITE_SCOPES)?;
    if !state.limits.git_deploy.check(&principal.key.key_id) {
        return Err(ServerError::RateLimited);
    }
    let ticket = state
        .engine
        .create_from_git(&principal.user.user_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// `GET /deployments/job/{job_id}`
pub async fn status_by_job(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(job_id): Path<String>,
) -> Result<Json<DeploymentDetailView>> {
    state.charge_general(&principal)?;
    principal.require(READ_SCOPES)?;
    let detail = state
        .engine
        .get_status(&principal.user.user_id, &job_id)
        .await?;
    Ok(Json(detail.into()))
}

/// `GET /deployments/environment/{env_id}`
pub async fn list_by_environment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(env_id): Path<String>,
) -> Result<Json<Vec<DeploymentView>>> {
    state.charge_general(&principal)?;
    principal.require(READ_SCOPES)?;
    let rows = state
        .engine
        .list_by_environment(&principal.user.user_id, &env_id)
        .await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// `GET /deployments/{id}/logs` query.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Number of trailing lines.
    pub tail: Option<u32>,
}

/// `GET /deployments/{id}/logs`
pub async fn logs(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(deployment_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>> {
    state.charge_general(&principal)?;
    principal.require(LOGS_SCOPES)?;
    let logs = state
        .engine
        .get_logs(
            &principal.user.user_id,
            &deployment_id,
            query.tail.unwrap_or(DEFAULT_LOG_TAIL),
        )
        .await?;
    Ok(Json(json!({ "logs": logs })))
}

/// `DELETE /deployments/{id}` query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    /// Keep managed volumes in place.
    pub preserve_volumes: Option<bool>,
}

/// `DELETE /deployments/{id}`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(deployment_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>> {
    state.charge_general(&principal)?;
    principal.require(WRITE_SCOPES)?;
    state
        .engine
        .delete(
            &principal.user.user_id,
            &deployment_id,
            query.preserve_volumes.unwrap_or(false),
        )
        .await?;
    Ok(Json(json!({ "message": "deployment deleted" })))
}
