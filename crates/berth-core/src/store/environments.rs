// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment aggregate store.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{CoreError, Result};
use crate::model::EnvironmentStatus;

/// A tenant-private overlay network row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnvironmentRow {
    /// Environment id.
    pub env_id: String,
    /// Owning user.
    pub user_id: String,
    /// Logical name, unique per user among live rows.
    pub name: String,
    /// Derived globally-unique overlay network name.
    pub overlay_name: String,
    /// Docker network id once created.
    pub driver_network_id: Option<String>,
    /// Lifecycle status string.
    pub status: String,
    /// Whether the reverse proxy is attached.
    pub is_public: bool,
    /// Public domain when exposed.
    pub public_domain: Option<String>,
    /// Failure cause when status is ERROR.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentRow {
    /// Parsed lifecycle status.
    pub fn lifecycle(&self) -> Option<EnvironmentStatus> {
        self.status.parse().ok()
    }
}

/// Store for the environment aggregate.
#[derive(Clone)]
pub struct EnvironmentStore {
    pool: PgPool,
}

impl EnvironmentStore {
    /// Create a store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new environment in `CREATING`.
    ///
    /// A duplicate live name for the same user surfaces as a conflict.
    pub async fn insert(
        &self,
        env_id: &str,
        user_id: &str,
        name: &str,
        overlay_name: &str,
    ) -> Result<EnvironmentRow> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            INSERT INTO environments (env_id, user_id, name, overlay_name, status)
            VALUES ($1, $2, $3, $4, 'CREATING')
            RETURNING *
            "#,
        )
        .bind(env_id)
        .bind(user_id)
        .bind(name)
        .bind(overlay_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict(format!("environment '{name}' already exists"))
            }
            _ => CoreError::Database(e),
        })?;
        Ok(row)
    }

    /// Record the driver network id and flip to `ACTIVE`.
    pub async fn set_active(&self, env_id: &str, driver_network_id: &str) -> Result<()> {
        self.update_status_sql(
            env_id,
            EnvironmentStatus::Active,
            Some(driver_network_id),
            None,
        )
        .await
    }

    /// Flip to `ERROR` with a cause.
    pub async fn set_error(&self, env_id: &str, message: &str) -> Result<()> {
        self.update_status_sql(env_id, EnvironmentStatus::Error, None, Some(message))
            .await
    }

    /// Flip the lifecycle status without touching other columns.
    pub async fn set_status(&self, env_id: &str, status: EnvironmentStatus) -> Result<()> {
        self.update_status_sql(env_id, status, None, None).await
    }

    async fn update_status_sql(
        &self,
        env_id: &str,
        status: EnvironmentStatus,
        driver_network_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE environments
            SET status = $2,
                driver_network_id = COALESCE($3, driver_network_id),
                error_message = $4,
                updated_at = NOW()
            WHERE env_id = $1
            "#,
        )
        .bind(env_id)
        .bind(status.as_str())
        .bind(driver_network_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark the environment public under the given domain.
    pub async fn mark_public(&self, env_id: &str, domain: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE environments
            SET is_public = TRUE, public_domain = $2, updated_at = NOW()
            WHERE env_id = $1
            "#,
        )
        .bind(env_id)
        .bind(domain)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict(format!("domain '{domain}' is already in use"))
            }
            _ => CoreError::Database(e),
        })?;
        Ok(())
    }

    /// Get by id regardless of owner.
    pub async fn get(&self, env_id: &str) -> Result<Option<EnvironmentRow>> {
        let row = sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE env_id = $1")
            .bind(env_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Get by id, filtered to the owner. Foreign rows read as absent.
    pub async fn get_owned(&self, user_id: &str, env_id: &str) -> Result<Option<EnvironmentRow>> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT * FROM environments WHERE env_id = $1 AND user_id = $2",
        )
        .bind(env_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// List a user's environments, newest first, excluding `DELETED`.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<EnvironmentRow>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT * FROM environments
            WHERE user_id = $1 AND status <> 'DELETED'
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Whether a live environment with this name exists for the user.
    pub async fn name_in_use(&self, user_id: &str, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM environments
            WHERE user_id = $1 AND name = $2 AND status <> 'DELETED'
            "#,
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Whether a domain is claimed by any environment.
    pub async fn domain_in_use(&self, domain: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM environments WHERE public_domain = $1")
                .bind(domain)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}
