// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential service: magic links and API keys.
//!
//! Issuance hands out a one-shot link token; redemption burns the link
//! and mints the only copy of the key secret the system will ever emit.
//! Authentication parses the on-wire credential, verifies the argon2id
//! hash, and stamps `last_used_at` best-effort.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::crypto;
use crate::error::{AuthFailure, CoreError, Result};
use crate::ids;
use crate::scopes::{self, Scope};
use crate::store::{ApiKeyRow, KeyStore, UserRow, UserStore};

/// Magic links expire this long after issuance.
pub const MAGIC_LINK_TTL_MINUTES: i64 = 15;

/// A freshly issued magic link.
#[derive(Debug, Clone)]
pub struct IssuedLink {
    /// The one-shot token.
    pub token: String,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
}

/// The result of a successful redemption. The `api_key` string is the
/// only copy of the secret; it is never reissued.
#[derive(Debug, Clone)]
pub struct RedeemedKey {
    /// Formatted `rw_prod_{key_id}.{secret}` credential.
    pub api_key: String,
    /// Public key id.
    pub key_id: String,
    /// Key expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Credential service over the user and key stores.
#[derive(Clone)]
pub struct CredentialService {
    users: UserStore,
    keys: KeyStore,
}

impl CredentialService {
    /// Build the service over one pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserStore::new(pool.clone()),
            keys: KeyStore::new(pool),
        }
    }

    /// The user store, shared with the chat dispatcher.
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// The key store, shared with the key-management handlers.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Issue a magic link carrying the scopes the resulting key will
    /// receive. No side effect beyond the row.
    pub async fn issue_magic_link(&self, user_id: &str, scopes: &[Scope]) -> Result<IssuedLink> {
        let token = ids::new_magic_token();
        let expires_at = Utc::now() + Duration::minutes(MAGIC_LINK_TTL_MINUTES);
        self.keys
            .insert_magic_link(&token, user_id, &scopes::scope_strings(scopes), expires_at)
            .await?;
        Ok(IssuedLink { token, expires_at })
    }

    /// Redeem a magic link for a new API key.
    ///
    /// Missing, already-used, and expired links are indistinguishable to
    /// the caller. Racing redemptions of one token produce exactly one
    /// key; the loser gets `LinkInvalid`.
    pub async fn redeem_magic_link(&self, token: &str) -> Result<RedeemedKey> {
        if token.len() != ids::MAGIC_TOKEN_LEN {
            return Err(CoreError::Unauthenticated(AuthFailure::LinkInvalid));
        }

        let key_id = ids::new_key_id();
        let secret = ids::new_key_secret();
        let secret_hash = crypto::hash_secret(&secret)?;

        let key = self
            .keys
            .redeem_and_issue(token, &key_id, &secret_hash, None)
            .await?
            .ok_or(CoreError::Unauthenticated(AuthFailure::LinkInvalid))?;

        Ok(RedeemedKey {
            api_key: ids::format_api_key(&key.key_id, &secret),
            key_id: key.key_id,
            expires_at: key.expires_at,
        })
    }

    /// Authenticate an `X-API-Key` header value.
    ///
    /// All failure modes surface as [`CoreError::Unauthenticated`]; the
    /// embedded [`AuthFailure`] is for logging only. A successful
    /// authentication stamps `last_used_at` best-effort.
    pub async fn authenticate(&self, raw: &str) -> Result<(UserRow, ApiKeyRow)> {
        let (key_id, secret) = ids::parse_api_key(raw)
            .ok_or(CoreError::Unauthenticated(AuthFailure::BadFormat))?;

        let key = self
            .keys
            .get(key_id)
            .await?
            .ok_or(CoreError::Unauthenticated(AuthFailure::UnknownKey))?;

        if key.revoked_at.is_some() {
            return Err(CoreError::Unauthenticated(AuthFailure::Revoked));
        }
        if key.expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(CoreError::Unauthenticated(AuthFailure::Expired));
        }

        if !crypto::verify_secret(secret, &key.secret_hash)? {
            return Err(CoreError::Unauthenticated(AuthFailure::Mismatch));
        }

        if let Err(e) = self.keys.touch_last_used(&key.key_id).await {
            warn!(key_id = %key.key_id, error = %e, "Failed to stamp last_used_at");
        }

        let user = self
            .users
            .get(&key.user_id)
            .await?
            .ok_or(CoreError::Unauthenticated(AuthFailure::UnknownKey))?;

        Ok((user, key))
    }

    /// Check a key against a required scope set.
    pub fn check_scopes(key: &ApiKeyRow, required: &[Scope]) -> bool {
        scopes::check_scopes(&key.scopes, required)
    }

    /// Check scopes, surfacing a mismatch as [`CoreError::Forbidden`].
    pub fn require_scopes(key: &ApiKeyRow, required: &[Scope]) -> Result<()> {
        if Self::check_scopes(key, required) {
            Ok(())
        } else {
            Err(CoreError::Forbidden)
        }
    }
}
