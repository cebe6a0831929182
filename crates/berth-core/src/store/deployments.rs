// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment aggregate store.
//!
//! Covers deployments, their 1:1 service projection, and the append-only
//! version/update history. Timestamp stamping lives in the SQL so a
//! status transition is always a single row update: `started_at` is set
//! on first entry into a working state and `completed_at` on entry into
//! a terminal one.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::error::Result;
use crate::model::{DeploymentStatus, PortMapping, ServiceHealth, ServiceStatus, VolumeSpec};

/// Desired state of one workload.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentRow {
    /// Deployment id.
    pub deployment_id: String,
    /// Owning environment.
    pub env_id: String,
    /// Public 16-char polling handle.
    pub job_id: String,
    /// Image reference (registry image, or generated name for Git builds).
    pub image: String,
    /// Image tag.
    pub tag: String,
    /// Desired replica count.
    pub replicas: i32,
    /// Port publications.
    pub ports: Json<Vec<PortMapping>>,
    /// Encrypted env-var envelope (see `berth_core::crypto`).
    pub env_vars: Vec<u8>,
    /// Volume requests; rewritten to expanded managed names by the worker.
    pub volumes: Json<Vec<VolumeSpec>>,
    /// Per-deployment proxy host override.
    pub virtual_host: Option<String>,
    /// Per-deployment proxy port override.
    pub virtual_port: Option<i32>,
    /// Optional `CMD-SHELL` healthcheck command.
    pub healthcheck_cmd: Option<String>,
    /// Optional CPU limit in cores.
    pub cpu_limit: Option<f64>,
    /// Optional memory limit in MiB.
    pub memory_limit_mb: Option<i32>,
    /// Lifecycle status string.
    pub status: String,
    /// Failure cause when status is FAILED.
    pub error_message: Option<String>,
    /// Git source URL (Git-sourced deployments only).
    pub git_url: Option<String>,
    /// Git branch.
    pub git_branch: Option<String>,
    /// Resolved commit, when known.
    pub git_commit_sha: Option<String>,
    /// Monotonic desired-state version.
    pub current_version: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the worker began executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentRow {
    /// Parsed lifecycle status.
    pub fn lifecycle(&self) -> Option<DeploymentStatus> {
        self.status.parse().ok()
    }

    /// Whether this deployment was built from a Git source.
    pub fn is_git_sourced(&self) -> bool {
        self.git_url.is_some()
    }
}

/// The Swarm-service projection of a deployment (1:1).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    /// Database id.
    pub service_id: i64,
    /// Owning deployment (unique).
    pub deployment_id: String,
    /// Docker service id once created.
    pub driver_service_id: Option<String>,
    /// Deterministic Swarm service name.
    pub name: String,
    /// Lifecycle status string.
    pub status: String,
    /// Health string derived from task state.
    pub health: String,
    /// Observed task restart count.
    pub restart_count: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last projection refresh.
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to create a deployment row.
#[derive(Debug, Clone)]
pub struct NewDeployment<'a> {
    /// Deployment id.
    pub deployment_id: &'a str,
    /// Owning environment.
    pub env_id: &'a str,
    /// Public polling handle.
    pub job_id: &'a str,
    /// Image reference.
    pub image: &'a str,
    /// Image tag.
    pub tag: &'a str,
    /// Desired replicas.
    pub replicas: i32,
    /// Port publications.
    pub ports: &'a [PortMapping],
    /// Sealed env-var envelope.
    pub env_vars: &'a [u8],
    /// Volume requests.
    pub volumes: &'a [VolumeSpec],
    /// Proxy host override.
    pub virtual_host: Option<&'a str>,
    /// Proxy port override.
    pub virtual_port: Option<i32>,
    /// Optional `CMD-SHELL` healthcheck command.
    pub healthcheck_cmd: Option<&'a str>,
    /// Optional CPU limit in cores.
    pub cpu_limit: Option<f64>,
    /// Optional memory limit in MiB.
    pub memory_limit_mb: Option<i32>,
    /// Git source URL.
    pub git_url: Option<&'a str>,
    /// Git branch.
    pub git_branch: Option<&'a str>,
}

/// Store for the deployment aggregate.
#[derive(Clone)]
pub struct DeploymentStore {
    pool: PgPool,
}

impl DeploymentStore {
    /// Create a store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a deployment in `PENDING`.
    pub async fn insert(&self, new: NewDeployment<'_>) -> Result<DeploymentRow> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            INSERT INTO deployments (
                deployment_id, env_id, job_id, image, tag, replicas,
                ports, env_vars, volumes, virtual_host, virtual_port,
                healthcheck_cmd, cpu_limit, memory_limit_mb,
                status, git_url, git_branch
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, 'PENDING', $15, $16)
            RETURNING *
            "#,
        )
        .bind(new.deployment_id)
        .bind(new.env_id)
        .bind(new.job_id)
        .bind(new.image)
        .bind(new.tag)
        .bind(new.replicas)
        .bind(Json(new.ports))
        .bind(new.env_vars)
        .bind(Json(new.volumes))
        .bind(new.virtual_host)
        .bind(new.virtual_port)
        .bind(new.healthcheck_cmd)
        .bind(new.cpu_limit)
        .bind(new.memory_limit_mb)
        .bind(new.git_url)
        .bind(new.git_branch)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Get by id regardless of owner.
    pub async fn get(&self, deployment_id: &str) -> Result<Option<DeploymentRow>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE deployment_id = $1",
        )
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Get by id, filtered to the owning user via the environment join.
    pub async fn get_owned(
        &self,
        user_id: &str,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRow>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT d.* FROM deployments d
            JOIN environments e ON d.env_id = e.env_id
            WHERE d.deployment_id = $1 AND e.user_id = $2
            "#,
        )
        .bind(deployment_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Get by job id, filtered to the owning user.
    pub async fn get_by_job(&self, user_id: &str, job_id: &str) -> Result<Option<DeploymentRow>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT d.* FROM deployments d
            JOIN environments e ON d.env_id = e.env_id
            WHERE d.job_id = $1 AND e.user_id = $2
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// List an environment's deployments, newest first.
    pub async fn list_for_env(&self, env_id: &str) -> Result<Vec<DeploymentRow>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE env_id = $1 ORDER BY created_at DESC",
        )
        .bind(env_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All deployments in `RUNNING`, for boot reconciliation.
    pub async fn list_running(&self) -> Result<Vec<DeploymentRow>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE status = 'RUNNING' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Advance the lifecycle status, stamping timestamps in the same
    /// update.
    pub async fn set_status(&self, deployment_id: &str, status: DeploymentStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2,
                started_at = CASE
                    WHEN $2 IN ('BUILDING_IMAGE', 'PULLING_IMAGE') AND started_at IS NULL
                    THEN NOW() ELSE started_at END,
                completed_at = CASE
                    WHEN $2 IN ('RUNNING', 'FAILED', 'STOPPED')
                    THEN NOW() ELSE completed_at END
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip to `FAILED` with a cause; stamps `completed_at`.
    pub async fn set_failed(&self, deployment_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = 'FAILED', error_message = $2, completed_at = NOW()
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rewrite the persisted volume list with expanded managed names.
    pub async fn set_volumes(&self, deployment_id: &str, volumes: &[VolumeSpec]) -> Result<()> {
        sqlx::query("UPDATE deployments SET volumes = $2 WHERE deployment_id = $1")
            .bind(deployment_id)
            .bind(Json(volumes))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the per-deployment proxy host/port fields.
    pub async fn set_virtual_host(
        &self,
        deployment_id: &str,
        virtual_host: &str,
        virtual_port: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET virtual_host = $2,
                virtual_port = COALESCE($3, virtual_port)
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id)
        .bind(virtual_host)
        .bind(virtual_port)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard-delete a deployment; the service row and history cascade.
    pub async fn delete(&self, deployment_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM deployments WHERE deployment_id = $1")
            .bind(deployment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Service projection =====

    /// Insert or refresh the 1:1 service row.
    pub async fn upsert_service(
        &self,
        deployment_id: &str,
        name: &str,
        driver_service_id: Option<&str>,
        status: ServiceStatus,
        health: ServiceHealth,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO services (deployment_id, name, driver_service_id, status, health)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (deployment_id) DO UPDATE SET
                name = EXCLUDED.name,
                driver_service_id = EXCLUDED.driver_service_id,
                status = EXCLUDED.status,
                health = EXCLUDED.health,
                updated_at = NOW()
            "#,
        )
        .bind(deployment_id)
        .bind(name)
        .bind(driver_service_id)
        .bind(status.as_str())
        .bind(health.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the service row for a deployment.
    pub async fn get_service(&self, deployment_id: &str) -> Result<Option<ServiceRow>> {
        let row =
            sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE deployment_id = $1")
                .bind(deployment_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// Refresh the observed projection state.
    pub async fn update_service_state(
        &self,
        deployment_id: &str,
        status: ServiceStatus,
        health: ServiceHealth,
        restart_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE services
            SET status = $2, health = $3, restart_count = $4, updated_at = NOW()
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id)
        .bind(status.as_str())
        .bind(health.as_str())
        .bind(restart_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Version history =====

    /// Append a desired-state snapshot and return the recorded version.
    pub async fn record_version(
        &self,
        deployment_id: &str,
        version: i32,
        spec: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_versions (deployment_id, version, spec)
            VALUES ($1, $2, $3)
            ON CONFLICT (deployment_id, version) DO NOTHING
            "#,
        )
        .bind(deployment_id)
        .bind(version)
        .bind(spec)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump `current_version` and return the new value.
    pub async fn bump_version(&self, deployment_id: &str) -> Result<i32> {
        let version: i32 = sqlx::query_scalar(
            r#"
            UPDATE deployments
            SET current_version = current_version + 1
            WHERE deployment_id = $1
            RETURNING current_version
            "#,
        )
        .bind(deployment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    /// Record a desired-state transition. Written, never executed.
    pub async fn record_update(
        &self,
        deployment_id: &str,
        strategy: &str,
        from_version: i32,
        to_version: i32,
        changes: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_updates
                (deployment_id, strategy, from_version, to_version, status, changes)
            VALUES ($1, $2, $3, $4, 'RECORDED', $5)
            "#,
        )
        .bind(deployment_id)
        .bind(strategy)
        .bind(from_version)
        .bind(to_version)
        .bind(changes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
