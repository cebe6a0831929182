// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable server runtime.
//!
//! Wires the stores, driver, services, background tasks, and the HTTP
//! listener into one startable unit. The boot order is load-bearing:
//! migrations, then the recovery sweep, and only then does the listener
//! open - pollers never observe a pre-reconciliation view.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use berth_core::credentials::CredentialService;
use berth_core::store::Store;
use berth_core::EventBus;
use berth_docker::Driver;

use crate::chat::ChatDispatcher;
use crate::config::Config;
use crate::deployments::{DeploymentEngine, EngineConfig};
use crate::environments::EnvironmentService;
use crate::http::{self, AppState};
use crate::notifier::{ChatSink, Notifier};
use crate::rate_limit::ApiLimits;
use crate::recovery::RecoverySupervisor;

/// A started berth server.
pub struct ServerRuntime {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    server: JoinHandle<()>,
    notifier: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<AppState>,
    chat: ChatDispatcher,
    pool: sqlx::PgPool,
}

impl ServerRuntime {
    /// Boot the full control plane.
    pub async fn start(
        config: Config,
        driver: Arc<dyn Driver>,
        sink: Arc<dyn ChatSink>,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_size)
            .connect(&config.database_url)
            .await
            .context("connecting to database")?;
        info!("Connected to database");

        berth_core::migrations::run(&pool)
            .await
            .context("applying schema")?;
        info!("Database schema verified");

        let store = Store::new(pool.clone());
        let encryptor = config.encryptor().context("building column encryptor")?;
        let bus = EventBus::default();
        let shutdown = Arc::new(Notify::new());

        let notifier = Notifier::new(store.users.clone(), sink).spawn(&bus, shutdown.clone());

        // Reconcile desired state before the handler surface opens.
        if config.enable_deployment_recovery {
            let supervisor = RecoverySupervisor::new(
                store.clone(),
                driver.clone(),
                bus.clone(),
                encryptor.clone(),
                config.proxy_settings(),
            );
            let report = supervisor.run().await.context("recovery sweep")?;
            info!(
                examined = report.examined,
                recovered = report.recovered,
                failed = report.failed,
                "Recovery complete"
            );
        } else {
            info!("Deployment recovery disabled");
        }

        let (engine, workers) = DeploymentEngine::new(
            store.clone(),
            driver.clone(),
            bus.clone(),
            encryptor.clone(),
            EngineConfig {
                workers: config.deploy_workers,
                queue_capacity: 64,
                proxy: config.proxy_settings(),
            },
        );

        let environments = EnvironmentService::new(
            store.clone(),
            driver,
            bus.clone(),
            config.nginx_container_name.clone(),
            config.proxy_settings(),
        );

        let creds = CredentialService::new(pool.clone());
        let chat = ChatDispatcher::new(creds.clone(), config.base_url.clone());

        let state = Arc::new(AppState {
            store,
            creds,
            environments,
            engine,
            limits: ApiLimits::new(
                config.throttle_limit,
                Duration::from_secs(config.throttle_ttl_secs),
            ),
        });

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
            .await
            .context("binding listener")?;
        let addr = listener.local_addr()?;
        let router = http::router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "HTTP server exited with error");
            }
        });
        info!(%addr, "Handler surface open");

        Ok(Self {
            addr,
            shutdown,
            server,
            notifier,
            workers,
            state,
            chat,
            pool,
        })
    }

    /// The bound listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The shared handler state (embedding and tests).
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// The chat-command dispatcher for the external bot transport.
    pub fn chat_dispatcher(&self) -> ChatDispatcher {
        self.chat.clone()
    }

    /// Graceful shutdown: stop accepting, let in-flight workers finish
    /// their terminal row writes, flush the store, close the driver.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        self.server.abort();
        let _ = self.server.await;
        let _ = self.notifier.await;

        // Dropping the state drops the engine, which closes the job
        // queue; workers drain and exit.
        drop(self.state);
        for worker in self.workers {
            let _ = worker.await;
        }

        self.pool.close().await;
        info!("Shutdown complete");
        Ok(())
    }
}
