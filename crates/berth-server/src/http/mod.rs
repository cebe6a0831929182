// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handler surface.
//!
//! Handlers are pure translation: authenticate, rate-limit, check the
//! route's static scope set, marshal arguments into a service call, and
//! project rows into camelCase JSON. No domain logic lives here.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use berth_core::credentials::CredentialService;
use berth_core::store::Store;

use crate::deployments::DeploymentEngine;
use crate::environments::EnvironmentService;
use crate::error::{Result, ServerError};
use crate::rate_limit::ApiLimits;

pub mod auth;
pub mod deployments;
pub mod environments;
pub mod health;
pub mod keys;
pub mod views;

pub use auth::Principal;

/// Shared state behind every handler.
pub struct AppState {
    /// Persistence stores.
    pub store: Store,
    /// Credential service.
    pub creds: CredentialService,
    /// Environment lifecycle service.
    pub environments: EnvironmentService,
    /// Deployment engine.
    pub engine: Arc<DeploymentEngine>,
    /// Per-credential budgets.
    pub limits: ApiLimits,
}

impl AppState {
    /// Charge the general per-key budget.
    pub fn charge_general(&self, principal: &Principal) -> Result<()> {
        if self.limits.general.check(&principal.key.key_id) {
            Ok(())
        } else {
            Err(ServerError::RateLimited)
        }
    }
}

/// Build the full route table.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/auth/verify", get(keys::verify))
        .route("/auth/keys", get(keys::list))
        .route("/auth/revoke", post(keys::revoke))
        .route(
            "/environments",
            post(environments::create).get(environments::list),
        )
        .route(
            "/environments/{id}",
            get(environments::show).delete(environments::remove),
        )
        .route("/environments/{id}/public", post(environments::make_public))
        .route("/deployments", post(deployments::create_registry))
        .route("/deployments/from-git", post(deployments::create_git))
        .route("/deployments/job/{job_id}", get(deployments::status_by_job))
        .route(
            "/deployments/environment/{env_id}",
            get(deployments::list_by_environment),
        )
        .route("/deployments/{id}/logs", get(deployments::logs))
        .route("/deployments/{id}", delete(deployments::remove))
        .with_state(state)
}
