// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for berth-server integration tests.
//!
//! Wires the real stores against PostgreSQL and the mock driver in
//! place of the Docker Engine. Tests are DB-gated: without
//! `TEST_DATABASE_URL` (or `DATABASE_URL`) they skip.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use berth_core::credentials::CredentialService;
use berth_core::model::DeploymentStatus;
use berth_core::store::{Store, UserRow};
use berth_core::EventBus;
use berth_docker::MockDriver;

use berth_server::config::ProxySettings;
use berth_server::deployments::{DeploymentEngine, EngineConfig, RegistryDeployRequest};
use berth_server::environments::EnvironmentService;
use berth_server::rate_limit::ApiLimits;

/// The proxy container name used across tests.
pub const PROXY_CONTAINER: &str = "nginx_proxy";

/// Everything a service-level test needs.
pub struct TestContext {
    pub store: Store,
    pub creds: CredentialService,
    pub driver: Arc<MockDriver>,
    pub bus: EventBus,
    pub engine: Arc<DeploymentEngine>,
    pub environments: EnvironmentService,
    pub user: UserRow,
}

impl TestContext {
    /// Connect, migrate, and build the service stack over a mock driver.
    pub async fn new() -> Self {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .expect("TEST_DATABASE_URL or DATABASE_URL must be set");
        let pool = sqlx::PgPool::connect(&url).await.expect("connect");
        berth_core::migrations::run(&pool).await.expect("migrations");

        let store = Store::new(pool.clone());
        let creds = CredentialService::new(pool);
        let driver = Arc::new(MockDriver::new());
        let bus = EventBus::new(64);

        let proxy = ProxySettings {
            letsencrypt_email: "ops@example.com".to_string(),
            letsencrypt_staging: false,
        };
        let (engine, _workers) = DeploymentEngine::new(
            store.clone(),
            driver.clone() as Arc<dyn berth_docker::Driver>,
            bus.clone(),
            None,
            EngineConfig {
                workers: 2,
                queue_capacity: 16,
                proxy: proxy.clone(),
            },
        );
        let environments = EnvironmentService::new(
            store.clone(),
            driver.clone() as Arc<dyn berth_docker::Driver>,
            bus.clone(),
            PROXY_CONTAINER.to_string(),
            proxy,
        );

        let chat_id = (uuid::Uuid::new_v4().as_u128() % (i64::MAX as u128)) as i64;
        let user = store
            .users
            .ensure(chat_id, Some("itest"))
            .await
            .expect("ensure user");

        Self {
            store,
            creds,
            driver,
            bus,
            engine,
            environments,
            user,
        }
    }

    /// Default per-key budgets used by the HTTP tests.
    pub fn limits() -> ApiLimits {
        ApiLimits::new(100, Duration::from_secs(60))
    }

    /// A minimal registry deployment request.
    pub fn registry_request(&self, env_id: &str) -> RegistryDeployRequest {
        serde_json::from_value(serde_json::json!({
            "environmentId": env_id,
            "image": "nginx",
            "tag": "alpine",
            "replicas": 1,
            "ports": [{"container": 80, "host": 8080}],
            "envVars": {"APP_MODE": "test"},
            "volumes": [{"name": "data", "mountPath": "/data"}],
        }))
        .expect("request shape")
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait_for_terminal(&self, job_id: &str) -> DeploymentStatus {
        for _ in 0..250 {
            let detail = self
                .engine
                .get_status(&self.user.user_id, job_id)
                .await
                .expect("job status");
            if let Some(status) = detail.deployment.lifecycle()
                && status.is_terminal()
            {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not reach a terminal state");
    }
}
