// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment engine: the asynchronous pipeline from request to
//! running Swarm service.
//!
//! Creation validates, persists the desired state in `PENDING`, enqueues
//! a typed job, and returns immediately. A bounded pool of worker tasks
//! consumes the queue; each worker drives one deployment serially
//! through its state machine and is contracted to eventually write a
//! terminal row state - errors never escape the worker boundary.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use berth_core::crypto::{self, Encryptor};
use berth_core::error::CoreError;
use berth_core::events::DomainEvent;
use berth_core::ids;
use berth_core::model::{
    DeploymentStatus, EnvironmentStatus, PortMapping, ServiceHealth, ServiceStatus, VolumeSpec,
};
use berth_core::store::deployments::NewDeployment;
use berth_core::store::{DeploymentRow, EnvironmentRow, ServiceRow, Store};
use berth_core::EventBus;
use berth_docker::build::{dockerfile_context, GitBuildSpec};
use berth_docker::driver::{merge_env, PortPublication, VolumeMount};
use berth_docker::{Driver, ServiceLaunch, VolumeRemoval};

use crate::config::ProxySettings;
use crate::error::{Result, ServerError};
use crate::naming;
use crate::proxy;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Job queue capacity.
    pub queue_capacity: usize,
    /// Proxy-injection settings.
    pub proxy: ProxySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            proxy: ProxySettings::default(),
        }
    }
}

/// Registry deployment request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDeployRequest {
    /// Target environment.
    pub environment_id: String,
    /// Registry image reference.
    pub image: String,
    /// Image tag; defaults to `latest`.
    #[serde(default)]
    pub tag: Option<String>,
    /// Replica count; defaults to 1.
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Port publications.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Plain env vars; sealed before persistence.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Volume requests with logical names.
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    /// Per-deployment proxy host override.
    #[serde(default)]
    pub virtual_host: Option<String>,
    /// Per-deployment proxy port override.
    #[serde(default)]
    pub virtual_port: Option<i32>,
    /// Optional `CMD-SHELL` healthcheck.
    #[serde(default)]
    pub healthcheck_cmd: Option<String>,
    /// Optional CPU limit in cores.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Optional memory limit in MiB.
    #[serde(default)]
    pub memory_limit_mb: Option<i32>,
}

/// Git deployment request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitDeployRequest {
    /// Target environment.
    pub environment_id: String,
    /// Repository to clone and build.
    pub git_url: String,
    /// Branch; the image tag defaults to this value.
    #[serde(default)]
    pub branch: Option<String>,
    /// Base image for the synthetic Dockerfile.
    #[serde(default)]
    pub base_image: Option<String>,
    /// Dependency install command.
    #[serde(default)]
    pub install_command: Option<String>,
    /// Build command.
    #[serde(default)]
    pub build_command: Option<String>,
    /// Start command, argv-split into `CMD`.
    #[serde(default)]
    pub start_command: Option<String>,
    /// Replica count; defaults to 1.
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Port publications.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Plain env vars; sealed before persistence.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Volume requests with logical names.
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    /// Per-deployment proxy host override.
    #[serde(default)]
    pub virtual_host: Option<String>,
    /// Per-deployment proxy port override.
    #[serde(default)]
    pub virtual_port: Option<i32>,
    /// Optional `CMD-SHELL` healthcheck.
    #[serde(default)]
    pub healthcheck_cmd: Option<String>,
    /// Optional CPU limit in cores.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Optional memory limit in MiB.
    #[serde(default)]
    pub memory_limit_mb: Option<i32>,
}

/// The immediate answer to a deployment request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTicket {
    /// Public polling handle.
    pub job_id: String,
    /// Deployment id.
    pub deployment_id: String,
    /// Always `PENDING` at creation.
    pub status: String,
}

/// A deployment joined with its projection and environment summary.
#[derive(Debug, Clone)]
pub struct DeploymentDetail {
    /// The deployment row.
    pub deployment: DeploymentRow,
    /// The 1:1 service projection, if created yet.
    pub service: Option<ServiceRow>,
    /// The owning environment.
    pub environment: EnvironmentRow,
}

/// Typed message consumed by the worker pool.
#[derive(Debug)]
struct DeployJob {
    deployment_id: String,
    kind: JobKind,
}

#[derive(Debug)]
enum JobKind {
    Registry,
    Git(GitBuildSpec),
}

/// The deployment engine.
pub struct DeploymentEngine {
    store: Store,
    driver: Arc<dyn Driver>,
    bus: EventBus,
    encryptor: Option<Encryptor>,
    proxy: ProxySettings,
    jobs_tx: mpsc::Sender<DeployJob>,
}

impl DeploymentEngine {
    /// Build the engine and spawn its worker pool. The returned handles
    /// end when the engine (and with it the queue sender) is dropped.
    pub fn new(
        store: Store,
        driver: Arc<dyn Driver>,
        bus: EventBus,
        encryptor: Option<Encryptor>,
        config: EngineConfig,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
        let engine = Arc::new(Self {
            store,
            driver,
            bus,
            encryptor,
            proxy: config.proxy,
            jobs_tx,
        });

        // Workers hold the engine weakly: when the last engine handle
        // drops, the queue sender goes with it, recv() drains to None,
        // and the pool exits on its own.
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        let mut handles = Vec::new();
        for worker in 0..config.workers.max(1) {
            let engine = Arc::downgrade(&engine);
            let jobs_rx = Arc::clone(&jobs_rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { jobs_rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let Some(engine) = engine.upgrade() else { break };
                    engine.run_job(job).await;
                }
                debug!(worker, "Deployment worker stopped");
            }));
        }

        (engine, handles)
    }

    async fn active_env(&self, user_id: &str, env_id: &str) -> Result<EnvironmentRow> {
        let env = self
            .store
            .environments
            .get_owned(user_id, env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment"))?;
        if env.lifecycle() != Some(EnvironmentStatus::Active) {
            return Err(CoreError::Conflict("environment is not active".into()).into());
        }
        Ok(env)
    }

    fn validate_replicas(replicas: Option<i32>) -> Result<i32> {
        let replicas = replicas.unwrap_or(1);
        if replicas < 1 {
            return Err(CoreError::validation("replicas", "must be at least 1").into());
        }
        Ok(replicas)
    }

    /// Create a registry-sourced deployment and schedule its worker.
    pub async fn create_from_registry(
        &self,
        user_id: &str,
        request: RegistryDeployRequest,
    ) -> Result<DeploymentTicket> {
        if request.image.trim().is_empty() {
            return Err(CoreError::validation("image", "must not be empty").into());
        }
        let env = self.active_env(user_id, &request.environment_id).await?;
        let replicas = Self::validate_replicas(request.replicas)?;
        let tag = request.tag.clone().unwrap_or_else(|| "latest".to_string());

        let ticket = self
            .persist_and_enqueue(
                &env,
                &request.image,
                &tag,
                replicas,
                &request.ports,
                &request.env_vars,
                &request.volumes,
                request.virtual_host.as_deref(),
                request.virtual_port,
                request.healthcheck_cmd.as_deref(),
                request.cpu_limit,
                request.memory_limit_mb,
                None,
                JobKind::Registry,
            )
            .await?;
        Ok(ticket)
    }

    /// Create a Git-sourced deployment and schedule its build worker.
    pub async fn create_from_git(
        &self,
        user_id: &str,
        request: GitDeployRequest,
    ) -> Result<DeploymentTicket> {
        if request.git_url.trim().is_empty() {
            return Err(CoreError::validation("gitUrl", "must not be empty").into());
        }
        let env = self.active_env(user_id, &request.environment_id).await?;
        let replicas = Self::validate_replicas(request.replicas)?;

        let image = naming::git_image_name(&env.name);
        let tag = request.branch.clone().unwrap_or_else(|| "latest".to_string());
        let branch = request.branch.clone().unwrap_or_else(|| "main".to_string());

        let build = GitBuildSpec {
            base_image: request
                .base_image
                .clone()
                .unwrap_or_else(|| "node:20-alpine".to_string()),
            git_url: request.git_url.clone(),
            branch: branch.clone(),
            install_command: request
                .install_command
                .clone()
                .or_else(|| Some("yarn install".to_string())),
            build_command: request.build_command.clone(),
            start_command: request.start_command.clone(),
        };

        let ticket = self
            .persist_and_enqueue(
                &env,
                &image,
                &tag,
                replicas,
                &request.ports,
                &request.env_vars,
                &request.volumes,
                request.virtual_host.as_deref(),
                request.virtual_port,
                request.healthcheck_cmd.as_deref(),
                request.cpu_limit,
                request.memory_limit_mb,
                Some((&request.git_url, &branch)),
                JobKind::Git(build),
            )
            .await?;
        Ok(ticket)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_and_enqueue(
        &self,
        env: &EnvironmentRow,
        image: &str,
        tag: &str,
        replicas: i32,
        ports: &[PortMapping],
        env_vars: &HashMap<String, String>,
        volumes: &[VolumeSpec],
        virtual_host: Option<&str>,
        virtual_port: Option<i32>,
        healthcheck_cmd: Option<&str>,
        cpu_limit: Option<f64>,
        memory_limit_mb: Option<i32>,
        git: Option<(&str, &str)>,
        kind: JobKind,
    ) -> Result<DeploymentTicket> {
        let deployment_id = uuid::Uuid::new_v4().to_string();
        let job_id = ids::new_job_id();

        let sealed = crypto::seal_envelope(
            self.encryptor.as_ref(),
            &serde_json::to_vec(env_vars).map_err(CoreError::Json)?,
        )?;

        let row = self
            .store
            .deployments
            .insert(NewDeployment {
                deployment_id: &deployment_id,
                env_id: &env.env_id,
                job_id: &job_id,
                image,
                tag,
                replicas,
                ports,
                env_vars: &sealed,
                volumes,
                virtual_host,
                virtual_port,
                healthcheck_cmd,
                cpu_limit,
                memory_limit_mb,
                git_url: git.map(|(url, _)| url),
                git_branch: git.map(|(_, branch)| branch),
            })
            .await?;

        // First desired-state snapshot. Secrets stay out of history.
        let snapshot = serde_json::json!({
            "image": image,
            "tag": tag,
            "replicas": replicas,
            "ports": ports,
            "volumes": volumes,
            "gitUrl": git.map(|(url, _)| url),
            "gitBranch": git.map(|(_, branch)| branch),
        });
        self.store
            .deployments
            .record_version(&deployment_id, 1, &snapshot)
            .await?;

        self.jobs_tx
            .send(DeployJob {
                deployment_id: deployment_id.clone(),
                kind,
            })
            .await
            .map_err(|_| ServerError::QueueClosed)?;

        info!(
            deployment_id = %deployment_id,
            job_id = %job_id,
            env_id = %env.env_id,
            image,
            "Deployment accepted"
        );

        Ok(DeploymentTicket {
            job_id,
            deployment_id,
            status: row.status,
        })
    }

    // ===== Worker =====

    async fn run_job(&self, job: DeployJob) {
        let deployment = match self.store.deployments.get(&job.deployment_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(deployment_id = %job.deployment_id, "Deployment row gone before worker ran");
                return;
            }
            Err(e) => {
                error!(deployment_id = %job.deployment_id, error = %e, "Worker could not load row");
                return;
            }
        };
        let env = match self.store.environments.get(&deployment.env_id).await {
            Ok(Some(env)) => env,
            _ => {
                let _ = self
                    .store
                    .deployments
                    .set_failed(&job.deployment_id, "owning environment is gone")
                    .await;
                return;
            }
        };

        let job_id = deployment.job_id.clone();
        let user_id = env.user_id.clone();

        self.bus.publish(DomainEvent::DeploymentStarted {
            deployment_id: job.deployment_id.clone(),
            user_id: user_id.clone(),
            job_id: job_id.clone(),
        });

        match self.execute(&job.kind, deployment, &env).await {
            Ok(()) => {
                info!(deployment_id = %job.deployment_id, "Deployment running");
                self.bus.publish(DomainEvent::DeploymentSucceeded {
                    deployment_id: job.deployment_id,
                    user_id,
                    job_id,
                });
            }
            Err(e) => {
                let message = e.to_string();
                error!(deployment_id = %job.deployment_id, error = %message, "Deployment failed");
                if let Err(store_err) = self
                    .store
                    .deployments
                    .set_failed(&job.deployment_id, &message)
                    .await
                {
                    error!(error = %store_err, "Could not record deployment failure");
                }
                self.bus.publish(DomainEvent::DeploymentFailed {
                    deployment_id: job.deployment_id,
                    user_id,
                    job_id,
                    message,
                });
            }
        }
    }

    async fn execute(
        &self,
        kind: &JobKind,
        deployment: DeploymentRow,
        env: &EnvironmentRow,
    ) -> Result<()> {
        let deployment_id = deployment.deployment_id.clone();

        // Acquire the image: build for Git sources, pull for registry.
        match kind {
            JobKind::Registry => {
                self.store
                    .deployments
                    .set_status(&deployment_id, DeploymentStatus::PullingImage)
                    .await?;
                self.driver
                    .pull_image(&deployment.image, &deployment.tag)
                    .await?;
            }
            JobKind::Git(build) => {
                self.store
                    .deployments
                    .set_status(&deployment_id, DeploymentStatus::BuildingImage)
                    .await?;
                let dockerfile = build.render_dockerfile();
                let context = dockerfile_context(&dockerfile);
                self.driver
                    .build_image(context, &format!("{}:{}", deployment.image, deployment.tag))
                    .await?;
            }
        }

        // Managed volumes, with the row rewritten to expanded names.
        self.store
            .deployments
            .set_status(&deployment_id, DeploymentStatus::CreatingVolumes)
            .await?;
        let labels = owner_labels(env, &deployment_id);
        let mut expanded = Vec::with_capacity(deployment.volumes.0.len());
        for volume in deployment.volumes.0.iter() {
            let name = if naming::is_expanded_volume(&env.name, &volume.name) {
                volume.name.clone()
            } else {
                naming::volume_name(&env.name, &volume.name)
            };
            self.driver.create_volume(&name, &labels).await?;
            expanded.push(VolumeSpec {
                name,
                mount_path: volume.mount_path.clone(),
            });
        }
        self.store
            .deployments
            .set_volumes(&deployment_id, &expanded)
            .await?;

        // The Swarm service.
        self.store
            .deployments
            .set_status(&deployment_id, DeploymentStatus::StartingContainers)
            .await?;
        let mut deployment = deployment;
        deployment.volumes = sqlx::types::Json(expanded);
        let launch =
            build_service_launch(env, &deployment, self.encryptor.as_ref(), &self.proxy)?;
        self.store
            .deployments
            .upsert_service(
                &deployment_id,
                &launch.name,
                None,
                ServiceStatus::Creating,
                ServiceHealth::None,
            )
            .await?;
        let driver_service_id = self.driver.create_service(&launch).await?;
        self.store
            .deployments
            .upsert_service(
                &deployment_id,
                &launch.name,
                Some(&driver_service_id),
                ServiceStatus::Running,
                ServiceHealth::Starting,
            )
            .await?;

        self.store
            .deployments
            .set_status(&deployment_id, DeploymentStatus::Running)
            .await?;
        Ok(())
    }

    // ===== Queries =====

    /// Current deployment state by job id, joined with service and
    /// environment. The projection refreshes from driver task state
    /// best-effort.
    pub async fn get_status(&self, user_id: &str, job_id: &str) -> Result<DeploymentDetail> {
        let deployment = self
            .store
            .deployments
            .get_by_job(user_id, job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deployment"))?;
        let environment = self
            .store
            .environments
            .get(&deployment.env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment"))?;

        let mut service = self
            .store
            .deployments
            .get_service(&deployment.deployment_id)
            .await?;

        let refresh_name = service
            .as_ref()
            .filter(|_| deployment.lifecycle() == Some(DeploymentStatus::Running))
            .map(|svc| svc.name.clone());
        if let Some(name) = refresh_name {
            match self.driver.service_tasks(&name).await {
                Ok(tasks) => {
                    let (health, restarts) = project_health(&tasks, deployment.replicas);
                    let _ = self
                        .store
                        .deployments
                        .update_service_state(
                            &deployment.deployment_id,
                            ServiceStatus::Running,
                            health,
                            restarts,
                        )
                        .await;
                    service = self
                        .store
                        .deployments
                        .get_service(&deployment.deployment_id)
                        .await?;
                }
                Err(e) => debug!(error = %e, "Task projection refresh failed"),
            }
        }

        Ok(DeploymentDetail {
            deployment,
            service,
            environment,
        })
    }

    /// Newest-first deployments of an owned environment.
    pub async fn list_by_environment(
        &self,
        user_id: &str,
        env_id: &str,
    ) -> Result<Vec<DeploymentRow>> {
        self.store
            .environments
            .get_owned(user_id, env_id)
            .await?
            .ok_or_else(|| CoreError::not_found("environment"))?;
        Ok(self.store.deployments.list_for_env(env_id).await?)
    }

    /// Combined, timestamped service logs.
    pub async fn get_logs(
        &self,
        user_id: &str,
        deployment_id: &str,
        tail: u32,
    ) -> Result<String> {
        let deployment = self
            .store
            .deployments
            .get_owned(user_id, deployment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deployment"))?;
        let service = self
            .store
            .deployments
            .get_service(&deployment.deployment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("service"))?;

        let raw = self.driver.service_logs(&service.name, tail).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Delete a deployment, its service, and (optionally) its volumes.
    pub async fn delete(
        &self,
        user_id: &str,
        deployment_id: &str,
        preserve_volumes: bool,
    ) -> Result<()> {
        let deployment = self
            .store
            .deployments
            .get_owned(user_id, deployment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deployment"))?;

        let lifecycle = deployment.lifecycle();
        if !lifecycle.map(|s| s.is_terminal()).unwrap_or(true) {
            return Err(CoreError::Conflict("deployment is still in progress".into()).into());
        }
        let was_running = lifecycle == Some(DeploymentStatus::Running);

        if let Some(env) = self.store.environments.get(&deployment.env_id).await? {
            let service = naming::service_name(&env.name, &deployment.job_id);
            self.driver.remove_service(&service).await?;
        }

        if !preserve_volumes {
            for volume in deployment.volumes.0.iter() {
                match self.driver.remove_volume(&volume.name).await {
                    Ok(VolumeRemoval::InUse) => {
                        warn!(volume = %volume.name, "Volume in use, not removed")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(volume = %volume.name, error = %e, "Volume removal failed"),
                }
            }
        }

        self.store.deployments.delete(deployment_id).await?;
        info!(deployment_id, "Deployment deleted");

        if was_running {
            self.bus.publish(DomainEvent::DeploymentStopped {
                deployment_id: deployment_id.to_string(),
                user_id: user_id.to_string(),
                job_id: deployment.job_id,
            });
        }
        Ok(())
    }
}

/// Owner labels for driver resources of one deployment.
fn owner_labels(env: &EnvironmentRow, deployment_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (naming::LABEL_ENV_ID.to_string(), env.env_id.clone()),
        (
            naming::LABEL_DEPLOYMENT_ID.to_string(),
            deployment_id.to_string(),
        ),
        (naming::LABEL_USER_ID.to_string(), env.user_id.clone()),
    ])
}

/// Reconstruct the full service launch from persisted columns.
///
/// Shared between the worker and the recovery supervisor so a recovered
/// service is byte-for-byte the one the worker would have created.
pub fn build_service_launch(
    env: &EnvironmentRow,
    deployment: &DeploymentRow,
    encryptor: Option<&Encryptor>,
    settings: &ProxySettings,
) -> Result<ServiceLaunch> {
    let plain = crypto::open_envelope(encryptor, &deployment.env_vars)?;
    let vars: HashMap<String, String> =
        serde_json::from_slice(&plain).map_err(CoreError::Json)?;
    let mut entries: Vec<String> = vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
    entries.sort();

    let host = deployment
        .virtual_host
        .as_deref()
        .or(env.public_domain.as_deref());
    if env.is_public
        && let Some(host) = host
    {
        let proxy_vars = proxy::proxy_env_map(host, deployment.virtual_port, settings);
        entries = merge_env(&entries, &proxy_vars);
    }

    Ok(ServiceLaunch {
        name: naming::service_name(&env.name, &deployment.job_id),
        image: format!("{}:{}", deployment.image, deployment.tag),
        replicas: deployment.replicas.max(1) as u64,
        env: entries,
        labels: owner_labels(env, &deployment.deployment_id),
        network: env.overlay_name.clone(),
        ports: deployment
            .ports
            .0
            .iter()
            .map(|p| PortPublication {
                target: p.container,
                published: p.host,
            })
            .collect(),
        mounts: deployment
            .volumes
            .0
            .iter()
            .map(|v| VolumeMount {
                source: v.name.clone(),
                target: v.mount_path.clone(),
            })
            .collect(),
        healthcheck_cmd: deployment.healthcheck_cmd.clone(),
        cpu_limit: deployment.cpu_limit,
        memory_limit_bytes: deployment
            .memory_limit_mb
            .map(|mb| i64::from(mb) * 1024 * 1024),
    })
}

/// Project task observations into a health value and restart count.
pub fn project_health(
    tasks: &[berth_docker::driver::TaskSummary],
    replicas: i32,
) -> (ServiceHealth, i32) {
    if tasks.is_empty() {
        return (ServiceHealth::None, 0);
    }
    let running = tasks.iter().filter(|t| t.state == "running").count() as i32;
    let failing = tasks
        .iter()
        .any(|t| matches!(t.state.as_str(), "failed" | "rejected"));
    let restarts = tasks
        .iter()
        .filter(|t| t.desired_state == "shutdown")
        .count() as i32;

    let health = if failing {
        ServiceHealth::Unhealthy
    } else if running >= replicas {
        ServiceHealth::Healthy
    } else {
        ServiceHealth::Starting
    };
    (health, restarts)
}
