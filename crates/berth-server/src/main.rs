// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth - Multi-Tenant Swarm Control Plane Server
//!
//! Binds the HTTP surface after running migrations and the recovery
//! sweep. The chat transport is external and talks to this process
//! through the dispatcher; local runs log notifications instead.

use std::sync::Arc;

use tracing::{info, warn};

use berth_docker::DockerDriver;
use berth_server::notifier::LogSink;
use berth_server::{Config, ServerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG wins; LOG_LEVEL is the deployment-facing knob.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "berth=info".to_string())
            .into()
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        port = config.port,
        socket = %config.docker_socket_path,
        recovery = config.enable_deployment_recovery,
        "Starting berth"
    );

    let driver = Arc::new(DockerDriver::new(&config.docker_socket_path));
    let runtime = ServerRuntime::start(config, driver, Arc::new(LogSink)).await?;
    info!(addr = %runtime.addr(), "berth ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;
    info!("berth shut down");

    Ok(())
}
