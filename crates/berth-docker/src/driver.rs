// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The [`Driver`] trait and the Engine-backed implementation.
//!
//! Drivers are pure Engine clients - they never touch the database.
//! Error normalization is the driver's job: removal of an absent
//! resource succeeds, volume-create conflicts return the existing
//! volume, and "already connected" network attaches succeed. Every
//! resource created here carries the managed label, and removal refuses
//! resources that lack it.

use async_trait::async_trait;
use http::Method;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::build::{BuildReport, BuildStreamParser};
use crate::error::{DriverError, Result};
use crate::spec::{
    ContainerSpec, EndpointSpec, HealthConfig, Mount, NetworkAttachment, NetworkConnect,
    NetworkCreate, NetworkCreated, NetworkInspect, PortConfig, Privileges, Replicated,
    ResourceLimit, ResourceRequirements, RestartPolicy, ServiceCreated, ServiceInspect,
    ServiceMode, ServiceSpec, TaskSpec, VolumeCreate, VolumeList,
};
use crate::transport::{EngineTransport, encode_filters, percent_encode};
use crate::{MANAGED_LABEL, MANAGED_VALUE};

/// One published port on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPublication {
    /// Container-side port.
    pub target: u16,
    /// Node-side port.
    pub published: u16,
}

/// One volume mount on a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Managed volume name.
    pub source: String,
    /// Mount path inside the container.
    pub target: String,
}

/// Everything needed to create a hardened Swarm service.
#[derive(Debug, Clone)]
pub struct ServiceLaunch {
    /// Deterministic service name.
    pub name: String,
    /// Image reference including tag.
    pub image: String,
    /// Desired replicas.
    pub replicas: u64,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Labels applied to both the service and its containers.
    pub labels: HashMap<String, String>,
    /// The single overlay network to attach.
    pub network: String,
    /// Port publications.
    pub ports: Vec<PortPublication>,
    /// Volume mounts.
    pub mounts: Vec<VolumeMount>,
    /// Optional `CMD-SHELL` healthcheck command.
    pub healthcheck_cmd: Option<String>,
    /// Optional CPU limit in cores.
    pub cpu_limit: Option<f64>,
    /// Optional memory limit in bytes.
    pub memory_limit_bytes: Option<i64>,
}

/// Observed state of an existing service.
#[derive(Debug, Clone)]
pub struct ServiceState {
    /// Engine service id.
    pub id: String,
    /// Service name.
    pub name: String,
    /// Spec version index, needed for updates.
    pub version: u64,
    /// Current `KEY=VALUE` environment on the container spec.
    pub env: Vec<String>,
    /// Service labels.
    pub labels: HashMap<String, String>,
}

/// Observed state of one service task.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    /// Task state string (`running`, `failed`, ...).
    pub state: String,
    /// Scheduler intent (`running`, `shutdown`, ...).
    pub desired_state: String,
}

/// Outcome of a volume removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRemoval {
    /// Volume removed.
    Removed,
    /// Volume did not exist; success.
    Absent,
    /// Volume is in use; callers treat this as a warning.
    InUse,
}

/// Typed operations against the container engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Create an attachable overlay network; returns the engine id.
    async fn create_overlay_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String>;

    /// Look up a network id by name; `None` when absent.
    async fn inspect_network(&self, name: &str) -> Result<Option<String>>;

    /// Remove a managed network; absence is success.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Attach a standalone container to a network; "already connected"
    /// is success.
    async fn connect_container(&self, network: &str, container: &str) -> Result<()>;

    /// Detach a container from a network; absence is success.
    async fn disconnect_container(&self, network: &str, container: &str) -> Result<()>;

    /// Create a managed volume; an existing volume is success.
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Remove a managed volume; see [`VolumeRemoval`].
    async fn remove_volume(&self, name: &str) -> Result<VolumeRemoval>;

    /// List managed volume names carrying `label_key=label_value`.
    async fn list_volumes_by_label(&self, label_key: &str, label_value: &str)
    -> Result<Vec<String>>;

    /// Pull an image, following progress to completion.
    async fn pull_image(&self, image: &str, tag: &str) -> Result<()>;

    /// Build an image from a tar context, streaming build events.
    async fn build_image(&self, context_tar: Vec<u8>, image_tag: &str) -> Result<BuildReport>;

    /// Create a hardened Swarm service; returns the engine id.
    async fn create_service(&self, launch: &ServiceLaunch) -> Result<String>;

    /// Inspect a service by name; `None` when absent.
    async fn get_service(&self, name: &str) -> Result<Option<ServiceState>>;

    /// List the tasks of a service.
    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskSummary>>;

    /// Merge environment entries into a service spec in place.
    async fn update_service_env(
        &self,
        name: &str,
        set: &HashMap<String, String>,
    ) -> Result<()>;

    /// Remove a managed service; absence is success.
    async fn remove_service(&self, name: &str) -> Result<()>;

    /// Fetch combined, timestamped stdout+stderr of a service.
    async fn service_logs(&self, name: &str, tail: u32) -> Result<Vec<u8>>;
}

/// Engine-backed driver over the local Unix socket.
#[derive(Debug, Clone)]
pub struct DockerDriver {
    transport: EngineTransport,
}

impl DockerDriver {
    /// Create a driver for the given socket path.
    pub fn new(socket_path: impl AsRef<std::path::Path>) -> Self {
        Self {
            transport: EngineTransport::new(socket_path),
        }
    }

    fn managed_labels(extra: &HashMap<String, String>) -> HashMap<String, String> {
        let mut labels = extra.clone();
        labels.insert(MANAGED_LABEL.to_string(), MANAGED_VALUE.to_string());
        labels
    }

    fn is_managed(labels: &HashMap<String, String>) -> bool {
        labels.get(MANAGED_LABEL).map(String::as_str) == Some(MANAGED_VALUE)
    }

    async fn inspect_network_full(&self, name: &str) -> Result<Option<NetworkInspect>> {
        let result: Result<NetworkInspect> = self
            .transport
            .json(Method::GET, &format!("/networks/{name}"), None::<&()>)
            .await;
        match result {
            Ok(inspect) => Ok(Some(inspect)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn inspect_service_full(&self, name: &str) -> Result<Option<ServiceInspect>> {
        let result: Result<ServiceInspect> = self
            .transport
            .json(Method::GET, &format!("/services/{name}"), None::<&()>)
            .await;
        match result {
            Ok(inspect) => Ok(Some(inspect)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn launch_to_spec(launch: &ServiceLaunch) -> ServiceSpec {
        let labels = Self::managed_labels(&launch.labels);

        let healthcheck = launch.healthcheck_cmd.as_ref().map(|cmd| HealthConfig {
            test: vec!["CMD-SHELL".to_string(), cmd.clone()],
            interval: 10_000_000_000,
            timeout: 5_000_000_000,
            retries: 3,
        });

        let limits = if launch.cpu_limit.is_some() || launch.memory_limit_bytes.is_some() {
            Some(ResourceRequirements {
                limits: Some(ResourceLimit {
                    nano_cpus: launch.cpu_limit.map(|c| (c * 1e9) as i64),
                    memory_bytes: launch.memory_limit_bytes,
                }),
            })
        } else {
            None
        };

        let endpoint_spec = if launch.ports.is_empty() {
            None
        } else {
            Some(EndpointSpec {
                ports: launch
                    .ports
                    .iter()
                    .map(|p| PortConfig {
                        protocol: "tcp".to_string(),
                        target_port: p.target,
                        published_port: p.published,
                        publish_mode: "ingress".to_string(),
                    })
                    .collect(),
            })
        };

        ServiceSpec {
            name: launch.name.clone(),
            labels: labels.clone(),
            task_template: TaskSpec {
                container_spec: ContainerSpec {
                    image: launch.image.clone(),
                    env: launch.env.clone(),
                    labels,
                    mounts: launch
                        .mounts
                        .iter()
                        .map(|m| Mount {
                            kind: "volume".to_string(),
                            source: m.source.clone(),
                            target: m.target.clone(),
                        })
                        .collect(),
                    capability_drop: vec!["ALL".to_string()],
                    privileges: Some(Privileges {
                        no_new_privileges: true,
                    }),
                    health_check: healthcheck,
                },
                restart_policy: Some(RestartPolicy {
                    condition: "on-failure".to_string(),
                    delay: 5_000_000_000,
                    max_attempts: 3,
                }),
                resources: limits,
                networks: vec![NetworkAttachment {
                    target: launch.network.clone(),
                }],
            },
            mode: ServiceMode {
                replicated: Replicated {
                    replicas: launch.replicas,
                },
            },
            endpoint_spec,
        }
    }
}

#[async_trait]
impl Driver for DockerDriver {
    async fn create_overlay_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String> {
        let request = NetworkCreate {
            name: name.to_string(),
            driver: "overlay".to_string(),
            attachable: true,
            labels: Self::managed_labels(labels),
        };
        let created: NetworkCreated = self
            .transport
            .json(Method::POST, "/networks/create", Some(&request))
            .await?;
        info!(network = name, id = %created.id, "Created overlay network");
        Ok(created.id)
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<String>> {
        Ok(self.inspect_network_full(name).await?.map(|n| n.id))
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let Some(network) = self.inspect_network_full(name).await? else {
            debug!(network = name, "Network already absent");
            return Ok(());
        };
        if !Self::is_managed(&network.labels) {
            return Err(DriverError::Unmanaged(format!("network {name}")));
        }
        let response = self
            .transport
            .request(
                Method::DELETE,
                &format!("/networks/{}", network.id),
                None,
                "application/json",
            )
            .await?;
        let status = response.status;
        let body = response.collect().await?;
        if status.is_success() || status.as_u16() == 404 {
            info!(network = name, "Removed overlay network");
            return Ok(());
        }
        Err(crate::transport::api_error(status, &body))
    }

    async fn connect_container(&self, network: &str, container: &str) -> Result<()> {
        let request = NetworkConnect {
            container: container.to_string(),
        };
        match self
            .transport
            .json_unit(
                Method::POST,
                &format!("/networks/{network}/connect"),
                Some(&request),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(DriverError::Api { message, .. }) if message.contains("already") => {
                debug!(network, container, "Container already connected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect_container(&self, network: &str, container: &str) -> Result<()> {
        let request = NetworkConnect {
            container: container.to_string(),
        };
        match self
            .transport
            .json_unit(
                Method::POST,
                &format!("/networks/{network}/disconnect"),
                Some(&request),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(DriverError::Api { message, .. }) if message.contains("is not connected") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let request = VolumeCreate {
            name: name.to_string(),
            labels: Self::managed_labels(labels),
        };
        match self
            .transport
            .json_unit(Method::POST, "/volumes/create", Some(&request))
            .await
        {
            Ok(()) => Ok(()),
            // An existing volume of the same name is the desired state.
            Err(e) if e.is_conflict() => {
                debug!(volume = name, "Volume already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_volume(&self, name: &str) -> Result<VolumeRemoval> {
        let response = self
            .transport
            .request(
                Method::DELETE,
                &format!("/volumes/{name}"),
                None,
                "application/json",
            )
            .await?;
        let status = response.status;
        let body = response.collect().await?;
        match status.as_u16() {
            204 | 200 => Ok(VolumeRemoval::Removed),
            404 => Ok(VolumeRemoval::Absent),
            409 => {
                warn!(volume = name, "Volume in use, leaving in place");
                Ok(VolumeRemoval::InUse)
            }
            _ => Err(crate::transport::api_error(status, &body)),
        }
    }

    async fn list_volumes_by_label(
        &self,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<String>> {
        let filters = serde_json::json!({
            "label": [format!("{label_key}={label_value}")]
        });
        let list: VolumeList = self
            .transport
            .json(
                Method::GET,
                &format!("/volumes?filters={}", encode_filters(&filters)),
                None::<&()>,
            )
            .await?;
        Ok(list
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    async fn pull_image(&self, image: &str, tag: &str) -> Result<()> {
        let path = format!(
            "/images/create?fromImage={}&tag={}",
            percent_encode(image),
            percent_encode(tag)
        );
        let response = self
            .transport
            .request(Method::POST, &path, None, "application/json")
            .await?;
        let status = response.status;
        if !status.is_success() {
            let body = response.collect().await?;
            return Err(crate::transport::api_error(status, &body));
        }

        // Progress events stream as JSON lines; an error event anywhere
        // in the stream fails the pull even though the HTTP status was 200.
        let mut error: Option<String> = None;
        let mut line_buf = String::new();
        response
            .drain_chunks(|chunk| {
                line_buf.push_str(&String::from_utf8_lossy(chunk));
                while let Some(pos) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=pos).collect();
                    if error.is_none()
                        && let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim())
                        && let Some(message) = value.get("error").and_then(|e| e.as_str())
                    {
                        error = Some(message.to_string());
                    }
                }
            })
            .await?;

        match error {
            Some(message) => Err(DriverError::api(500, message)),
            None => {
                info!(image, tag, "Image pulled");
                Ok(())
            }
        }
    }

    async fn build_image(&self, context_tar: Vec<u8>, image_tag: &str) -> Result<BuildReport> {
        let path = format!("/build?t={}", percent_encode(image_tag));
        let response = self
            .transport
            .request(
                Method::POST,
                &path,
                Some(bytes::Bytes::from(context_tar)),
                "application/x-tar",
            )
            .await?;
        let status = response.status;
        if !status.is_success() {
            let body = response.collect().await?;
            return Err(crate::transport::api_error(status, &body));
        }

        let mut parser = BuildStreamParser::new();
        response.drain_chunks(|chunk| parser.feed(chunk)).await?;
        let report = parser.finish()?;
        info!(tag = image_tag, tagged = report.tagged, "Image built");
        Ok(report)
    }

    async fn create_service(&self, launch: &ServiceLaunch) -> Result<String> {
        let spec = Self::launch_to_spec(launch);
        let created: ServiceCreated = self
            .transport
            .json(Method::POST, "/services/create", Some(&spec))
            .await?;
        info!(service = %launch.name, id = %created.id, "Created service");
        Ok(created.id)
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceState>> {
        Ok(self.inspect_service_full(name).await?.map(|s| ServiceState {
            id: s.id,
            name: s.spec.name.clone(),
            version: s.version.index,
            env: s.spec.task_template.container_spec.env.clone(),
            labels: s.spec.labels.clone(),
        }))
    }

    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskSummary>> {
        let filters = serde_json::json!({"service": [name]});
        let tasks: Vec<crate::spec::Task> = self
            .transport
            .json(
                Method::GET,
                &format!("/tasks?filters={}", encode_filters(&filters)),
                None::<&()>,
            )
            .await?;
        Ok(tasks
            .into_iter()
            .map(|t| TaskSummary {
                state: t.status.state,
                desired_state: t.desired_state,
            })
            .collect())
    }

    async fn update_service_env(
        &self,
        name: &str,
        set: &HashMap<String, String>,
    ) -> Result<()> {
        let Some(current) = self.inspect_service_full(name).await? else {
            return Err(DriverError::NotFound(format!("service {name}")));
        };

        let mut spec = current.spec;
        spec.task_template.container_spec.env =
            merge_env(&spec.task_template.container_spec.env, set);

        self.transport
            .json_unit(
                Method::POST,
                &format!(
                    "/services/{}/update?version={}",
                    current.id, current.version.index
                ),
                Some(&spec),
            )
            .await?;
        info!(service = name, keys = set.len(), "Patched service environment");
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        let Some(service) = self.inspect_service_full(name).await? else {
            debug!(service = name, "Service already absent");
            return Ok(());
        };
        if !Self::is_managed(&service.spec.labels) {
            return Err(DriverError::Unmanaged(format!("service {name}")));
        }
        let response = self
            .transport
            .request(
                Method::DELETE,
                &format!("/services/{}", service.id),
                None,
                "application/json",
            )
            .await?;
        let status = response.status;
        let body = response.collect().await?;
        if status.is_success() || status.as_u16() == 404 {
            info!(service = name, "Removed service");
            return Ok(());
        }
        Err(crate::transport::api_error(status, &body))
    }

    async fn service_logs(&self, name: &str, tail: u32) -> Result<Vec<u8>> {
        let path = format!(
            "/services/{name}/logs?stdout=true&stderr=true&timestamps=true&tail={tail}"
        );
        let response = self
            .transport
            .request(Method::GET, &path, None, "application/json")
            .await?;
        let status = response.status;
        let bytes = response.collect().await?;
        if !status.is_success() {
            return Err(crate::transport::api_error(status, &bytes));
        }
        Ok(demux_log_stream(&bytes))
    }
}

/// Merge `set` into an existing `KEY=VALUE` list, replacing keys that
/// already exist and appending the rest in sorted order for stable
/// output.
pub fn merge_env(current: &[String], set: &HashMap<String, String>) -> Vec<String> {
    let mut merged: Vec<String> = current
        .iter()
        .filter(|entry| {
            let key = entry.split('=').next().unwrap_or("");
            !set.contains_key(key)
        })
        .cloned()
        .collect();

    let mut additions: Vec<&String> = set.keys().collect();
    additions.sort();
    for key in additions {
        merged.push(format!("{key}={}", set[key]));
    }
    merged
}

/// Strip the 8-byte multiplexing headers from an Engine log stream.
///
/// Streams from TTY-less containers interleave stdout/stderr frames,
/// each prefixed with `{stream, 0, 0, 0, len_be_u32}`. A stream that
/// does not look framed is returned untouched.
pub fn demux_log_stream(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut cursor = raw;

    while cursor.len() >= 8 {
        let header = &cursor[..8];
        let framed = matches!(header[0], 0 | 1 | 2) && header[1..4] == [0, 0, 0];
        if !framed {
            // TTY stream: no frames at all.
            return raw.to_vec();
        }
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let end = (8 + len).min(cursor.len());
        out.extend_from_slice(&cursor[8..end]);
        cursor = &cursor[end..];
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_env_replaces_and_appends() {
        let current = vec!["A=1".to_string(), "VIRTUAL_HOST=old.example".to_string()];
        let set = HashMap::from([
            ("VIRTUAL_HOST".to_string(), "app.example.com".to_string()),
            ("LETSENCRYPT_HOST".to_string(), "app.example.com".to_string()),
        ]);
        let merged = merge_env(&current, &set);
        assert_eq!(
            merged,
            vec![
                "A=1".to_string(),
                "LETSENCRYPT_HOST=app.example.com".to_string(),
                "VIRTUAL_HOST=app.example.com".to_string(),
            ]
        );
    }

    #[test]
    fn demux_strips_frame_headers() {
        let mut framed = Vec::new();
        framed.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 5]);
        framed.extend_from_slice(b"hello");
        framed.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 6]);
        framed.extend_from_slice(b" world");
        assert_eq!(demux_log_stream(&framed), b"hello world");
    }

    #[test]
    fn demux_passes_tty_streams_through() {
        let raw = b"plain log line with no framing".to_vec();
        assert_eq!(demux_log_stream(&raw), raw);
    }

    #[test]
    fn launch_spec_carries_hardening_defaults() {
        let launch = ServiceLaunch {
            name: "job_demo_abcdefgh12345678".to_string(),
            image: "nginx:alpine".to_string(),
            replicas: 1,
            env: vec![],
            labels: HashMap::new(),
            network: "overlay_env_demo_1".to_string(),
            ports: vec![],
            mounts: vec![],
            healthcheck_cmd: None,
            cpu_limit: None,
            memory_limit_bytes: None,
        };
        let spec = DockerDriver::launch_to_spec(&launch);
        let container = &spec.task_template.container_spec;
        assert_eq!(container.capability_drop, vec!["ALL"]);
        assert!(container.privileges.as_ref().unwrap().no_new_privileges);
        assert_eq!(spec.labels.get("managed").map(String::as_str), Some("true"));
        let restart = spec.task_template.restart_policy.as_ref().unwrap();
        assert_eq!(restart.condition, "on-failure");
        assert_eq!(restart.max_attempts, 3);
        assert_eq!(restart.delay, 5_000_000_000);
        assert!(spec.endpoint_spec.is_none());
        assert!(spec.task_template.resources.is_none());
    }

    #[test]
    fn launch_spec_converts_limits() {
        let launch = ServiceLaunch {
            name: "svc".to_string(),
            image: "app:1".to_string(),
            replicas: 2,
            env: vec!["A=1".to_string()],
            labels: HashMap::new(),
            network: "net".to_string(),
            ports: vec![PortPublication {
                target: 80,
                published: 8080,
            }],
            mounts: vec![],
            healthcheck_cmd: Some("curl -f http://localhost/".to_string()),
            cpu_limit: Some(0.5),
            memory_limit_bytes: Some(256 * 1024 * 1024),
        };
        let spec = DockerDriver::launch_to_spec(&launch);
        let limits = spec
            .task_template
            .resources
            .unwrap()
            .limits
            .unwrap();
        assert_eq!(limits.nano_cpus, Some(500_000_000));
        assert_eq!(limits.memory_bytes, Some(256 * 1024 * 1024));
        let ports = spec.endpoint_spec.unwrap().ports;
        assert_eq!(ports[0].published_port, 8080);
        let hc = spec
            .task_template
            .container_spec
            .health_check
            .unwrap();
        assert_eq!(hc.test[0], "CMD-SHELL");
    }
}
