// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recovery supervisor: boot-time reconciliation of desired state.
//!
//! Runs once at process start, before the handler surface opens. Every
//! deployment row in `RUNNING` is checked against the live Swarm; rows
//! whose service is missing get the service rebuilt from persisted
//! columns, and rows that cannot be rebuilt flip to `FAILED`. A per-row
//! failure never blocks the rest of the sweep or startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use berth_core::events::DomainEvent;
use berth_core::model::{ServiceHealth, ServiceStatus};
use berth_core::store::{self, Store};
use berth_core::EventBus;
use berth_core::crypto::Encryptor;
use berth_docker::Driver;

use crate::config::ProxySettings;
use crate::deployments::build_service_launch;
use crate::naming;

/// How many store probes the supervisor makes before giving up.
const STORE_WAIT_ATTEMPTS: u32 = 10;

/// Outcome of one recovery sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// RUNNING rows examined.
    pub examined: usize,
    /// Services found intact.
    pub intact: usize,
    /// Services relaunched.
    pub recovered: usize,
    /// Rows flipped to FAILED.
    pub failed: usize,
}

/// Boot-time recovery supervisor.
pub struct RecoverySupervisor {
    store: Store,
    driver: Arc<dyn Driver>,
    bus: EventBus,
    encryptor: Option<Encryptor>,
    proxy: ProxySettings,
}

impl RecoverySupervisor {
    /// Build the supervisor.
    pub fn new(
        store: Store,
        driver: Arc<dyn Driver>,
        bus: EventBus,
        encryptor: Option<Encryptor>,
        proxy: ProxySettings,
    ) -> Self {
        Self {
            store,
            driver,
            bus,
            encryptor,
            proxy,
        }
    }

    /// Wait for the store, then reconcile every `RUNNING` row.
    pub async fn run(&self) -> Result<RecoveryReport, sqlx::Error> {
        store::wait_ready(self.store.pool(), STORE_WAIT_ATTEMPTS).await?;

        let running = match self.store.deployments.list_running().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Recovery could not list running deployments");
                return Ok(RecoveryReport::default());
            }
        };

        let mut report = RecoveryReport {
            examined: running.len(),
            ..Default::default()
        };
        info!(count = running.len(), "Recovery sweep started");

        for deployment in running {
            match self.reconcile(&deployment).await {
                Ok(true) => report.intact += 1,
                Ok(false) => report.recovered += 1,
                Err(message) => {
                    report.failed += 1;
                    warn!(
                        deployment_id = %deployment.deployment_id,
                        error = %message,
                        "Recovery failed for deployment"
                    );
                    if let Err(e) = self
                        .store
                        .deployments
                        .set_failed(&deployment.deployment_id, &message)
                        .await
                    {
                        error!(error = %e, "Could not record recovery failure");
                    }
                    let user_id = self
                        .store
                        .environments
                        .get(&deployment.env_id)
                        .await
                        .ok()
                        .flatten()
                        .map(|env| env.user_id)
                        .unwrap_or_default();
                    self.bus.publish(DomainEvent::DeploymentRecoveryFailed {
                        deployment_id: deployment.deployment_id.clone(),
                        user_id,
                        job_id: deployment.job_id.clone(),
                        message,
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            intact = report.intact,
            recovered = report.recovered,
            failed = report.failed,
            "Recovery sweep finished"
        );
        Ok(report)
    }

    /// Reconcile one row. `Ok(true)` means the service was already
    /// there, `Ok(false)` means it was relaunched; `Err` carries the
    /// failure message for the row.
    async fn reconcile(
        &self,
        deployment: &berth_core::store::DeploymentRow,
    ) -> Result<bool, String> {
        let env = self
            .store
            .environments
            .get(&deployment.env_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "owning environment is gone".to_string())?;

        let service = naming::service_name(&env.name, &deployment.job_id);
        if self
            .driver
            .get_service(&service)
            .await
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Ok(true);
        }

        info!(
            deployment_id = %deployment.deployment_id,
            service,
            "Service missing, relaunching"
        );

        // The overlay must exist before the service can attach.
        if self
            .driver
            .inspect_network(&env.overlay_name)
            .await
            .map_err(|e| e.to_string())?
            .is_none()
        {
            let labels = HashMap::from([
                (naming::LABEL_ENV_ID.to_string(), env.env_id.clone()),
                (naming::LABEL_USER_ID.to_string(), env.user_id.clone()),
            ]);
            let network_id = self
                .driver
                .create_overlay_network(&env.overlay_name, &labels)
                .await
                .map_err(|e| e.to_string())?;
            if let Err(e) = self
                .store
                .environments
                .set_active(&env.env_id, &network_id)
                .await
            {
                warn!(error = %e, "Could not refresh recreated network id");
            }
        }

        let launch = build_service_launch(&env, deployment, self.encryptor.as_ref(), &self.proxy)
            .map_err(|e| e.to_string())?;
        let driver_service_id = self
            .driver
            .create_service(&launch)
            .await
            .map_err(|e| e.to_string())?;

        self.store
            .deployments
            .upsert_service(
                &deployment.deployment_id,
                &launch.name,
                Some(&driver_service_id),
                ServiceStatus::Running,
                ServiceHealth::Starting,
            )
            .await
            .map_err(|e| e.to_string())?;

        self.bus.publish(DomainEvent::DeploymentRecovered {
            deployment_id: deployment.deployment_id.clone(),
            user_id: env.user_id,
            job_id: deployment.job_id.clone(),
        });
        Ok(false)
    }
}
