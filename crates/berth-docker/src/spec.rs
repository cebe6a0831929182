// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serde types for the Engine API payloads this crate uses.
//!
//! Only the fields berth reads or writes are modelled; everything else
//! in an Engine answer is ignored on deserialization and omitted on
//! serialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `POST /networks/create` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkCreate {
    /// Network name.
    pub name: String,
    /// Always `overlay` for berth networks.
    pub driver: String,
    /// Standalone containers may attach (the reverse proxy does).
    pub attachable: bool,
    /// Managed + owner labels.
    pub labels: HashMap<String, String>,
}

/// `POST /networks/create` response.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkCreated {
    /// Engine-assigned network id.
    #[serde(rename = "Id")]
    pub id: String,
}

/// `GET /networks/{name}` response (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInspect {
    /// Engine network id.
    #[serde(rename = "Id")]
    pub id: String,
    /// Network name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Network labels.
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
}

/// `POST /networks/{name}/connect` and `/disconnect` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConnect {
    /// Container name or id.
    pub container: String,
}

/// `POST /volumes/create` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeCreate {
    /// Volume name.
    pub name: String,
    /// Managed + owner labels.
    pub labels: HashMap<String, String>,
}

/// One volume in a `GET /volumes` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSummary {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Volume labels.
    #[serde(rename = "Labels", default)]
    pub labels: Option<HashMap<String, String>>,
}

/// `GET /volumes` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeList {
    /// Matching volumes.
    #[serde(rename = "Volumes", default)]
    pub volumes: Option<Vec<VolumeSummary>>,
}

/// Full Swarm service spec, for create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    /// Service name.
    pub name: String,
    /// Service-level labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Task template.
    pub task_template: TaskSpec,
    /// Replication mode.
    pub mode: ServiceMode,
    /// Published ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_spec: Option<EndpointSpec>,
}

/// Task template inside a service spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSpec {
    /// Container spec.
    pub container_spec: ContainerSpec,
    /// Restart policy; berth pins on-failure with bounded attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Resource limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Overlay attachments; berth services join exactly one.
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
}

/// Container spec inside a task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    /// Image reference including tag.
    pub image: String,
    /// `KEY=VALUE` environment entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Container labels (the reverse proxy reads these too).
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    /// Hardening: every berth service drops all capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_drop: Vec<String>,
    /// Hardening: no-new-privileges at the engine level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileges: Option<Privileges>,
    /// Optional container healthcheck.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthConfig>,
}

/// Privilege settings on a container spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Privileges {
    /// Disallow privilege escalation inside the container.
    pub no_new_privileges: bool,
}

/// A volume mount on a container spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Always `volume` for berth mounts.
    #[serde(rename = "Type")]
    pub kind: String,
    /// Volume name.
    #[serde(rename = "Source")]
    pub source: String,
    /// Mount path inside the container.
    #[serde(rename = "Target")]
    pub target: String,
}

/// Container healthcheck definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthConfig {
    /// `["CMD-SHELL", command]`.
    pub test: Vec<String>,
    /// Interval between probes, nanoseconds.
    pub interval: i64,
    /// Probe timeout, nanoseconds.
    pub timeout: i64,
    /// Consecutive failures before unhealthy.
    pub retries: i64,
}

/// Restart policy on a task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    /// `on-failure` for every berth service.
    pub condition: String,
    /// Delay between restarts, nanoseconds.
    pub delay: i64,
    /// Bounded attempts before giving up.
    pub max_attempts: i64,
}

/// Resource limits on a task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRequirements {
    /// Hard limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimit>,
}

/// One resource limit set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// CPU limit in units of 10^-9 cores.
    #[serde(rename = "NanoCPUs", skip_serializing_if = "Option::is_none")]
    pub nano_cpus: Option<i64>,
    /// Memory limit in bytes.
    #[serde(rename = "MemoryBytes", skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,
}

/// One overlay attachment on a task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAttachment {
    /// Network name or id.
    pub target: String,
}

/// Service replication mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMode {
    /// Replicated mode with an explicit count.
    pub replicated: Replicated,
}

/// Replica count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Replicated {
    /// Desired replicas.
    pub replicas: u64,
}

/// Published ports on a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSpec {
    /// Port publications.
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// One published port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortConfig {
    /// `tcp` for every berth publication.
    pub protocol: String,
    /// Container-side port.
    pub target_port: u16,
    /// Node-side port.
    pub published_port: u16,
    /// `ingress` routing-mesh publication.
    pub publish_mode: String,
}

/// `POST /services/create` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCreated {
    /// Engine-assigned service id.
    #[serde(rename = "ID")]
    pub id: String,
}

/// `GET /services/{name}` response (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInspect {
    /// Engine service id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Spec version, required for updates.
    #[serde(rename = "Version")]
    pub version: ServiceVersion,
    /// The current spec.
    #[serde(rename = "Spec")]
    pub spec: ServiceSpec,
}

/// Service spec version counter.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceVersion {
    /// Monotonic index.
    #[serde(rename = "Index")]
    pub index: u64,
}

/// One task in a `GET /tasks` listing (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    /// Observed status.
    #[serde(rename = "Status")]
    pub status: TaskStatus,
    /// Scheduler intent for this task.
    #[serde(rename = "DesiredState", default)]
    pub desired_state: String,
}

/// Task status.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    /// Task state string (`running`, `failed`, ...).
    #[serde(rename = "State", default)]
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_spec_serializes_engine_field_names() {
        let spec = ServiceSpec {
            name: "job_demo_abc".into(),
            labels: HashMap::from([("managed".into(), "true".into())]),
            task_template: TaskSpec {
                container_spec: ContainerSpec {
                    image: "nginx:alpine".into(),
                    env: vec!["A=1".into()],
                    labels: HashMap::new(),
                    mounts: vec![Mount {
                        kind: "volume".into(),
                        source: "vol_demo_data".into(),
                        target: "/data".into(),
                    }],
                    capability_drop: vec!["ALL".into()],
                    privileges: Some(Privileges {
                        no_new_privileges: true,
                    }),
                    health_check: None,
                },
                restart_policy: Some(RestartPolicy {
                    condition: "on-failure".into(),
                    delay: 5_000_000_000,
                    max_attempts: 3,
                }),
                resources: Some(ResourceRequirements {
                    limits: Some(ResourceLimit {
                        nano_cpus: Some(500_000_000),
                        memory_bytes: Some(128 * 1024 * 1024),
                    }),
                }),
                networks: vec![NetworkAttachment {
                    target: "overlay_env_demo_1".into(),
                }],
            },
            mode: ServiceMode {
                replicated: Replicated { replicas: 2 },
            },
            endpoint_spec: Some(EndpointSpec {
                ports: vec![PortConfig {
                    protocol: "tcp".into(),
                    target_port: 80,
                    published_port: 8080,
                    publish_mode: "ingress".into(),
                }],
            }),
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["Name"], "job_demo_abc");
        assert_eq!(
            json["TaskTemplate"]["ContainerSpec"]["CapabilityDrop"][0],
            "ALL"
        );
        assert_eq!(
            json["TaskTemplate"]["ContainerSpec"]["Privileges"]["NoNewPrivileges"],
            true
        );
        assert_eq!(
            json["TaskTemplate"]["ContainerSpec"]["Mounts"][0]["Type"],
            "volume"
        );
        assert_eq!(
            json["TaskTemplate"]["Resources"]["Limits"]["NanoCPUs"],
            500_000_000
        );
        assert_eq!(json["TaskTemplate"]["RestartPolicy"]["MaxAttempts"], 3);
        assert_eq!(json["Mode"]["Replicated"]["Replicas"], 2);
        assert_eq!(json["EndpointSpec"]["Ports"][0]["PublishedPort"], 8080);
        assert_eq!(json["TaskTemplate"]["Networks"][0]["Target"], "overlay_env_demo_1");
    }

    #[test]
    fn service_inspect_round_trips_through_spec() {
        let raw = serde_json::json!({
            "ID": "svc1",
            "Version": {"Index": 7},
            "Spec": {
                "Name": "job_demo_abc",
                "Labels": {},
                "TaskTemplate": {
                    "ContainerSpec": {"Image": "nginx:alpine", "Labels": {}},
                    "Networks": []
                },
                "Mode": {"Replicated": {"Replicas": 1}}
            }
        });
        let inspect: ServiceInspect = serde_json::from_value(raw).unwrap();
        assert_eq!(inspect.id, "svc1");
        assert_eq!(inspect.version.index, 7);
        assert_eq!(inspect.spec.task_template.container_spec.image, "nginx:alpine");
        // Re-serialize for an update call.
        let out = serde_json::to_value(&inspect.spec).unwrap();
        assert_eq!(out["Name"], "job_demo_abc");
    }
}
