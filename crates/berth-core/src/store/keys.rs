// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API-key and magic-link store.
//!
//! Revoked and expired keys are never purged; `revoked_at`/`expires_at`
//! gate validity. Magic-link redemption is the one compare-and-set in
//! the system: the conditional `used_at IS NULL` update decides the
//! winner between racing redemptions, and the key insert rides in the
//! same transaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// An opaque bearer credential row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRow {
    /// Public 16-char key id.
    pub key_id: String,
    /// Owning user.
    pub user_id: String,
    /// argon2id hash of the 32-char secret.
    pub secret_hash: String,
    /// Granted scopes, stored as their stable strings.
    pub scopes: Vec<String>,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation stamp; set once, never cleared.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last successful authentication (best-effort).
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRow {
    /// Whether the key is currently usable.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A one-shot exchange token row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MagicLinkRow {
    /// The 32-char unguessable token.
    pub token: String,
    /// Owning user.
    pub user_id: String,
    /// Scopes the resulting key will carry.
    pub scopes: Vec<String>,
    /// Hard expiry (issued + 15 min).
    pub expires_at: DateTime<Utc>,
    /// Redemption stamp; a link redeems at most once.
    pub used_at: Option<DateTime<Utc>>,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
}

/// Store for API keys and magic links.
#[derive(Clone)]
pub struct KeyStore {
    pool: PgPool,
}

impl KeyStore {
    /// Create a store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a freshly issued magic link.
    pub async fn insert_magic_link(
        &self,
        token: &str,
        user_id: &str,
        scopes: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO magic_links (token, user_id, scopes, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(scopes)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Redeem a magic link and issue a key in one transaction.
    ///
    /// The conditional update on `used_at IS NULL AND expires_at > NOW()`
    /// leaves exactly one winner between concurrent redemptions of the
    /// same token. Returns `None` when the link is missing, already
    /// used, or expired; the caller cannot distinguish which.
    pub async fn redeem_and_issue(
        &self,
        token: &str,
        key_id: &str,
        secret_hash: &str,
        key_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<ApiKeyRow>> {
        let mut tx = self.pool.begin().await?;

        let link = sqlx::query_as::<_, MagicLinkRow>(
            r#"
            UPDATE magic_links
            SET used_at = NOW()
            WHERE token = $1 AND used_at IS NULL AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(link) = link else {
            tx.rollback().await?;
            return Ok(None);
        };

        let key = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            INSERT INTO api_keys (key_id, user_id, secret_hash, scopes, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(key_id)
        .bind(&link.user_id)
        .bind(secret_hash)
        .bind(&link.scopes)
        .bind(key_expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(key))
    }

    /// Look up a key by its public id.
    pub async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// List a user's keys, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ApiKeyRow>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Revoke a key owned by the given user.
    ///
    /// Idempotent: re-revoking keeps the original stamp. Returns `false`
    /// when no such key belongs to the user.
    pub async fn revoke(&self, user_id: &str, key_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE key_id = $1 AND user_id = $2
            "#,
        )
        .bind(key_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamp `last_used_at`. Best-effort by contract; the caller logs
    /// and discards the error.
    pub async fn touch_last_used(&self, key_id: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE key_id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
