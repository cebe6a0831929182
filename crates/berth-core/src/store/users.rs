// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User aggregate store.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// A chat-identified principal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    /// Stable opaque id.
    pub user_id: String,
    /// Chat platform id, unique.
    pub chat_id: i64,
    /// Optional chat handle.
    pub handle: Option<String>,
    /// Deliver deployment lifecycle notifications.
    pub notify_deployments: bool,
    /// Deliver environment lifecycle notifications.
    pub notify_environments: bool,
    /// Deliver recovery notifications.
    pub notify_recovery: bool,
    /// When the user first ran `/start`.
    pub created_at: DateTime<Utc>,
}

/// Which notification preference to flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPref {
    /// Deployment lifecycle events.
    Deployments,
    /// Environment lifecycle events.
    Environments,
    /// Recovery supervisor outcomes.
    Recovery,
}

/// Store for the user aggregate.
#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    /// Create a store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find-or-create a user by chat id, refreshing the handle.
    ///
    /// Called on every `/start`; users are never deleted in normal
    /// operation.
    pub async fn ensure(&self, chat_id: i64, handle: Option<&str>) -> Result<UserRow> {
        let user_id = uuid::Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (user_id, chat_id, handle)
            VALUES ($1, $2, $3)
            ON CONFLICT (chat_id) DO UPDATE SET
                handle = COALESCE(EXCLUDED.handle, users.handle)
            RETURNING *
            "#,
        )
        .bind(&user_id)
        .bind(chat_id)
        .bind(handle)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get a user by id.
    pub async fn get(&self, user_id: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Get a user by chat id.
    pub async fn get_by_chat(&self, chat_id: i64) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Flip one notification preference.
    pub async fn set_notify(&self, user_id: &str, pref: NotifyPref, enabled: bool) -> Result<()> {
        let sql = match pref {
            NotifyPref::Deployments => {
                "UPDATE users SET notify_deployments = $2 WHERE user_id = $1"
            }
            NotifyPref::Environments => {
                "UPDATE users SET notify_environments = $2 WHERE user_id = $1"
            }
            NotifyPref::Recovery => "UPDATE users SET notify_recovery = $2 WHERE user_id = $1",
        };
        sqlx::query(sql)
            .bind(user_id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl UserRow {
    /// Whether this user wants notifications of the given family.
    pub fn wants(&self, kind: crate::events::EventKind) -> bool {
        match kind {
            crate::events::EventKind::Deployment => self.notify_deployments,
            crate::events::EventKind::Environment => self.notify_environments,
            crate::events::EventKind::Recovery => self.notify_recovery,
        }
    }
}
