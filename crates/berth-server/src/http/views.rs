// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON projections of persisted rows.
//!
//! Sealed env vars never leave the process; everything else a caller
//! owns is projected as camelCase JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;

use berth_core::model::{PortMapping, VolumeSpec};
use berth_core::store::{ApiKeyRow, DeploymentRow, EnvironmentRow, ServiceRow};

use crate::deployments::DeploymentDetail;

/// An environment row on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentView {
    /// Environment id.
    pub environment_id: String,
    /// Logical name.
    pub name: String,
    /// Lifecycle status string.
    pub status: String,
    /// Overlay network name.
    pub overlay_name: String,
    /// Public exposure flag.
    pub is_public: bool,
    /// Public domain, when exposed.
    pub public_domain: Option<String>,
    /// Failure cause, when status is ERROR.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<EnvironmentRow> for EnvironmentView {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            environment_id: row.env_id,
            name: row.name,
            status: row.status,
            overlay_name: row.overlay_name,
            is_public: row.is_public,
            public_domain: row.public_domain,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

/// An environment with its recent deployments.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDetailView {
    /// The environment.
    #[serde(flatten)]
    pub environment: EnvironmentView,
    /// Newest-first deployments.
    pub deployments: Vec<DeploymentView>,
}

/// A deployment row on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    /// Deployment id.
    pub deployment_id: String,
    /// Public polling handle.
    pub job_id: String,
    /// Owning environment.
    pub environment_id: String,
    /// Image reference.
    pub image: String,
    /// Image tag.
    pub tag: String,
    /// Desired replicas.
    pub replicas: i32,
    /// Lifecycle status string.
    pub status: String,
    /// Failure cause, when FAILED.
    pub error_message: Option<String>,
    /// Port publications.
    pub ports: Vec<PortMapping>,
    /// Volume requests (expanded once the worker ran).
    pub volumes: Vec<VolumeSpec>,
    /// Proxy host override.
    pub virtual_host: Option<String>,
    /// Proxy port override.
    pub virtual_port: Option<i32>,
    /// Git source, when Git-sourced.
    pub git_url: Option<String>,
    /// Git branch.
    pub git_branch: Option<String>,
    /// Desired-state version.
    pub current_version: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Worker start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal-state time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<DeploymentRow> for DeploymentView {
    fn from(row: DeploymentRow) -> Self {
        Self {
            deployment_id: row.deployment_id,
            job_id: row.job_id,
            environment_id: row.env_id,
            image: row.image,
            tag: row.tag,
            replicas: row.replicas,
            status: row.status,
            error_message: row.error_message,
            ports: row.ports.0,
            volumes: row.volumes.0,
            virtual_host: row.virtual_host,
            virtual_port: row.virtual_port,
            git_url: row.git_url,
            git_branch: row.git_branch,
            current_version: row.current_version,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

/// A service projection on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    /// Swarm service name.
    pub name: String,
    /// Engine service id, once created.
    pub driver_service_id: Option<String>,
    /// Lifecycle status string.
    pub status: String,
    /// Health string.
    pub health: String,
    /// Observed restart count.
    pub restart_count: i32,
}

impl From<ServiceRow> for ServiceView {
    fn from(row: ServiceRow) -> Self {
        Self {
            name: row.name,
            driver_service_id: row.driver_service_id,
            status: row.status,
            health: row.health,
            restart_count: row.restart_count,
        }
    }
}

/// The joined answer to a job poll.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetailView {
    /// The deployment.
    #[serde(flatten)]
    pub deployment: DeploymentView,
    /// The 1:1 projection, if created yet.
    pub service: Option<ServiceView>,
    /// The owning environment.
    pub environment: EnvironmentView,
}

impl From<DeploymentDetail> for DeploymentDetailView {
    fn from(detail: DeploymentDetail) -> Self {
        Self {
            deployment: detail.deployment.into(),
            service: detail.service.map(Into::into),
            environment: detail.environment.into(),
        }
    }
}

/// An API key on the wire. The secret hash never leaves the store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyView {
    /// Public key id.
    pub key_id: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation stamp, if revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last successful authentication.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
}

impl From<ApiKeyRow> for ApiKeyView {
    fn from(row: ApiKeyRow) -> Self {
        Self {
            key_id: row.key_id,
            scopes: row.scopes,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}
