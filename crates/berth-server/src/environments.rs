// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment lifecycle service.
//!
//! Creation is transactional at the row level: the row is inserted in
//! `CREATING`, the overlay network is created, and the row flips to
//! `ACTIVE` or `ERROR`. Deletion cascades across every owned resource
//! and tolerates per-resource absence. Public exposure attaches the
//! shared reverse proxy and patches proxy env vars into running
//! services in place.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{error, info, warn};

use berth_core::error::CoreError;
use berth_core::events::DomainEvent;
use berth_core::model::{DeploymentStatus, EnvironmentStatus};
use berth_core::store::{EnvironmentRow, Store};
use berth_core::EventBus;
use berth_docker::{Driver, VolumeRemoval};

use crate::config::ProxySettings;
use crate::error::Result;
use crate::naming;
use crate::proxy;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static pattern"));

/// Environment lifecycle service.
#[derive(Clone)]
pub struct EnvironmentService {
    store: Store,
    driver: Arc<dyn Driver>,
    bus: EventBus,
    proxy_container: String,
    proxy_settings: ProxySettings,
}

impl EnvironmentService {
    /// Build the service.
    pub fn new(
        store: Store,
        driver: Arc<dyn Driver>,
        bus: EventBus,
        proxy_container: String,
        proxy_settings: ProxySettings,
    ) -> Self {
        Self {
            store,
            driver,
            bus,
            proxy_container,
            proxy_settings,
        }
    }

    /// Create an environment and its overlay network.
    pub async fn create(&self, user_id: &str, name: &str) -> Result<EnvironmentRow> {
        if !NAME_RE.is_match(name) {
            return Err(CoreError::validation(
                "name",
                "only letters, digits, hyphen, and underscore are allowed",
            )
            .into());
        }
        if name.len() > naming::MAX_ENV_NAME_LEN {
            return Err(CoreError::validation(
                "name",
                format!("at most {} characters", naming::MAX_ENV_NAME_LEN),
            )
            .into());
        }
        if self.store.environments.name_in_use(user_id, name).await? {
            return Err(CoreError::Conflict(format!("environment '{name}' already exists")).into());
        }

        let env_id = uuid::Uuid::new_v4().to_string();
        let overlay = naming::overlay_name(name);
        let row = self
            .store
            .environments
            .insert(&env_id, user_id, name, &overlay)
            .await?;

        let labels = HashMap::from([
            (naming::LABEL_ENV_ID.to_string(), env_id.clone()),
            (naming::LABEL_USER_ID.to_string(), user_id.to_string()),
        ]);

        match self.driver.create_overlay_network(&overlay, &labels).await {
            Ok(network_id) => {
                self.store.environments.set_active(&env_id, &network_id).await?;
                info!(env_id = %env_id, overlay = %overlay, "Environment active");
                self.bus.publish(DomainEvent::EnvironmentActive {
                    env_id: env_id.clone(),
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                });
                Ok(self
                    .store
                    .environments
                    .get(&env_id)
                    .await?
                    .unwrap_or(row))
            }
            Err(e) => {
                error!(env_id = %env_id, error = %e, "Overlay network creation failed");
                self.store
                    .environments
                    .set_error(&env_id, &e.to_string())
                    .await?;
                self.bus.publish(DomainEvent::EnvironmentError {
                    env_id,
                    user_id: user_id.to_string(),
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Get an owned environment.
    pub async fn get(&self, user_id: &str, env_id: &str) -> Result<EnvironmentRow> {
        self.store
            .environments
            .get_owned(user_id, env_id)
            .await?
            .filter(|row| row.status != EnvironmentStatus::Deleted.as_str())
            .ok_or_else(|| CoreError::not_found("environment").into())
    }

    /// List a user's live environments.
    pub async fn list(&self, user_id: &str) -> Result<Vec<EnvironmentRow>> {
        Ok(self.store.environments.list_for_user(user_id).await?)
    }

    /// Cascade-delete an environment: services, managed volumes, then
    /// the overlay network.
    pub async fn delete(&self, user_id: &str, env_id: &str) -> Result<()> {
        let env = self
            .store
            .environments
            .get_owned(user_id, env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment"))?;

        match env.lifecycle() {
            Some(EnvironmentStatus::Deleting) | Some(EnvironmentStatus::Deleted) => {
                return Err(
                    CoreError::Conflict("environment is already being deleted".into()).into(),
                );
            }
            _ => {}
        }

        self.store
            .environments
            .set_status(env_id, EnvironmentStatus::Deleting)
            .await?;

        match self.teardown(&env).await {
            Ok(()) => {
                self.store
                    .environments
                    .set_status(env_id, EnvironmentStatus::Deleted)
                    .await?;
                info!(env_id, "Environment deleted");
                self.bus.publish(DomainEvent::EnvironmentDeleted {
                    env_id: env_id.to_string(),
                    user_id: user_id.to_string(),
                    name: env.name.clone(),
                });
                Ok(())
            }
            Err(e) => {
                error!(env_id, error = %e, "Environment teardown failed");
                self.store
                    .environments
                    .set_error(env_id, &e.to_string())
                    .await?;
                self.bus.publish(DomainEvent::EnvironmentError {
                    env_id: env_id.to_string(),
                    user_id: user_id.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn teardown(&self, env: &EnvironmentRow) -> Result<()> {
        // Child services first. Absence at the driver is success.
        let deployments = self.store.deployments.list_for_env(&env.env_id).await?;
        for deployment in &deployments {
            let service = naming::service_name(&env.name, &deployment.job_id);
            self.driver.remove_service(&service).await?;
            self.store
                .deployments
                .delete(&deployment.deployment_id)
                .await?;
        }

        // Managed volumes labelled with this environment. In-use is a
        // warning, not a failure.
        let volumes = self
            .driver
            .list_volumes_by_label(naming::LABEL_ENV_ID, &env.env_id)
            .await?;
        for volume in volumes {
            if self.driver.remove_volume(&volume).await? == VolumeRemoval::InUse {
                warn!(volume, "Volume in use during environment teardown");
            }
        }

        // The overlay network last; the proxy detaches with it.
        self.driver.remove_network(&env.overlay_name).await?;
        Ok(())
    }

    /// Expose an environment at a public domain.
    pub async fn make_public(
        &self,
        user_id: &str,
        env_id: &str,
        domain: &str,
    ) -> Result<EnvironmentRow> {
        let env = self
            .store
            .environments
            .get_owned(user_id, env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment"))?;

        if env.lifecycle() != Some(EnvironmentStatus::Active) {
            return Err(CoreError::Conflict("environment is not active".into()).into());
        }
        if env.is_public {
            return Err(CoreError::Conflict("environment is already public".into()).into());
        }
        if !DOMAIN_RE.is_match(domain) {
            return Err(CoreError::validation("domain", "not a valid domain name").into());
        }
        if self.store.environments.domain_in_use(domain).await? {
            return Err(CoreError::Conflict(format!("domain '{domain}' is already in use")).into());
        }

        // Attach the shared proxy sidecar. Idempotent; attach failures
        // are best-effort and do not roll back the row.
        if let Err(e) = self
            .driver
            .connect_container(&env.overlay_name, &self.proxy_container)
            .await
        {
            warn!(env_id, error = %e, "Proxy attach failed, continuing");
        }

        self.store.environments.mark_public(env_id, domain).await?;

        // Patch proxy env vars into every running service in place.
        let deployments = self.store.deployments.list_for_env(env_id).await?;
        for deployment in deployments {
            if deployment.lifecycle() != Some(DeploymentStatus::Running) {
                continue;
            }
            let vars = proxy::proxy_env_map(
                deployment.virtual_host.as_deref().unwrap_or(domain),
                deployment.virtual_port,
                &self.proxy_settings,
            );
            let service = naming::service_name(&env.name, &deployment.job_id);
            if let Err(e) = self.driver.update_service_env(&service, &vars).await {
                warn!(service, error = %e, "Proxy env patch failed");
                continue;
            }
            if let Err(e) = self
                .store
                .deployments
                .set_virtual_host(&deployment.deployment_id, domain, deployment.virtual_port)
                .await
            {
                warn!(deployment_id = %deployment.deployment_id, error = %e,
                    "Failed to record virtual host");
            }
            if let Err(e) = self.record_patch(&deployment, domain).await {
                warn!(deployment_id = %deployment.deployment_id, error = %e,
                    "Failed to record env-patch history");
            }
        }

        info!(env_id, domain, "Environment made public");
        self.bus.publish(DomainEvent::EnvironmentMadePublic {
            env_id: env_id.to_string(),
            user_id: user_id.to_string(),
            domain: domain.to_string(),
        });

        self.store
            .environments
            .get(env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment").into())
    }

    /// Append the version/update history rows for a proxy env patch.
    /// History is recorded, never executed.
    async fn record_patch(
        &self,
        deployment: &berth_core::store::DeploymentRow,
        domain: &str,
    ) -> Result<()> {
        let from_version = deployment.current_version;
        let to_version = self
            .store
            .deployments
            .bump_version(&deployment.deployment_id)
            .await?;
        let changes = serde_json::json!({ "virtualHost": domain });
        self.store
            .deployments
            .record_version(&deployment.deployment_id, to_version, &changes)
            .await?;
        self.store
            .deployments
            .record_update(
                &deployment.deployment_id,
                "ENV_PATCH",
                from_version,
                to_version,
                &changes,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pattern_accepts_alnum_hyphen_underscore() {
        for ok in ["demo", "Demo-1", "a_b-c", "X"] {
            assert!(NAME_RE.is_match(ok), "{ok} should match");
        }
        for bad in ["", "has space", "dot.name", "slash/name", "ünicode"] {
            assert!(!NAME_RE.is_match(bad), "{bad} should not match");
        }
    }

    #[test]
    fn domain_pattern_requires_a_tld() {
        for ok in ["app.example.com", "a.io", "x-y.example.co"] {
            assert!(DOMAIN_RE.is_match(ok), "{ok} should match");
        }
        for bad in ["localhost", "no_tld", "spaces .com", "trailing.", ".com"] {
            assert!(!DOMAIN_RE.is_match(bad), "{bad} should not match");
        }
    }
}
