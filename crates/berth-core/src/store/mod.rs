// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence stores, one per aggregate.
//!
//! Every store is a thin struct over [`PgPool`] exposing typed row
//! operations; cross-aggregate cascades are explicit in the services,
//! never hidden in here.

use std::time::Duration;

use sqlx::PgPool;

pub mod deployments;
pub mod environments;
pub mod keys;
pub mod users;

pub use deployments::{DeploymentRow, DeploymentStore, ServiceRow};
pub use environments::{EnvironmentRow, EnvironmentStore};
pub use keys::{ApiKeyRow, KeyStore, MagicLinkRow};
pub use users::{UserRow, UserStore};

/// Aggregated handle to every store, sharing one pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    /// User aggregate.
    pub users: UserStore,
    /// API keys and magic links.
    pub keys: KeyStore,
    /// Environment aggregate.
    pub environments: EnvironmentStore,
    /// Deployment aggregate (deployments, services, versions, updates).
    pub deployments: DeploymentStore,
}

impl Store {
    /// Build all stores over one pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserStore::new(pool.clone()),
            keys: KeyStore::new(pool.clone()),
            environments: EnvironmentStore::new(pool.clone()),
            deployments: DeploymentStore::new(pool.clone()),
            pool,
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe for the health endpoint.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

/// Wait until the database answers, with exponential backoff.
///
/// Delay starts at 1 s and doubles to a 10 s cap; gives up after
/// `max_attempts` probes. The boot sequence calls this before the
/// recovery supervisor touches any row.
pub async fn wait_ready(pool: &PgPool, max_attempts: u32) -> Result<(), sqlx::Error> {
    let mut delay = Duration::from_secs(1);
    let cap = Duration::from_secs(10);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
            Ok(_) => {
                tracing::debug!(attempt, "Store ready");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts, error = %e, "Store not ready, backing off");
                last_err = Some(e);
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(cap);
        }
    }

    Err(last_err.unwrap_or(sqlx::Error::PoolClosed))
}
