// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status enums and wire-stable value types.
//!
//! Enum string values are the identifiers stored in status columns and
//! returned over the API; they never change. Variant declaration order is
//! lifecycle order, so `Ord` on these enums is "comes later in life".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! status_enum {
    ($(#[$doc:meta])* $name:ident { $($(#[$vdoc:meta])* $variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vdoc])* #[serde(rename = $s)] $variant),+
        }

        impl $name {
            /// The stable string stored in the status column.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), " '{}'"), other)),
                }
            }
        }
    };
}

status_enum! {
    /// Lifecycle of a tenant environment.
    EnvironmentStatus {
        /// Row inserted, overlay network not yet created.
        Creating => "CREATING",
        /// Overlay network exists and is labelled managed.
        Active => "ACTIVE",
        /// Cascade teardown in progress.
        Deleting => "DELETING",
        /// Teardown finished; row retained for history.
        Deleted => "DELETED",
        /// Driver failure; `error_message` carries the cause.
        Error => "ERROR",
    }
}

status_enum! {
    /// Lifecycle of a deployment. Workers advance strictly forward
    /// through a prefix of this order; `Failed` is the sink for every
    /// pre-`Running` state and `Stopped` is terminal from `Running`.
    DeploymentStatus {
        /// Accepted; worker not yet started.
        Pending => "PENDING",
        /// Git path: in-engine image build in progress.
        BuildingImage => "BUILDING_IMAGE",
        /// Registry path: image pull in progress.
        PullingImage => "PULLING_IMAGE",
        /// Managed volumes being created.
        CreatingVolumes => "CREATING_VOLUMES",
        /// Swarm service being created.
        StartingContainers => "STARTING_CONTAINERS",
        /// Service is live.
        Running => "RUNNING",
        /// A pre-RUNNING step failed; `error_message` carries the cause.
        Failed => "FAILED",
        /// Explicitly deleted from `Running`.
        Stopped => "STOPPED",
    }
}

status_enum! {
    /// Lifecycle of the Swarm-service projection.
    ServiceStatus {
        /// Service create issued.
        Creating => "CREATING",
        /// Driver reports the service.
        Running => "RUNNING",
        /// Service removed.
        Stopped => "STOPPED",
        /// Service create or converge failed.
        Failed => "FAILED",
    }
}

status_enum! {
    /// Health of the Swarm-service projection, derived from task state.
    ServiceHealth {
        /// All tasks healthy.
        Healthy => "HEALTHY",
        /// At least one task failing.
        Unhealthy => "UNHEALTHY",
        /// Tasks still converging.
        Starting => "STARTING",
        /// No healthcheck configured or no tasks observed.
        None => "NONE",
    }
}

impl DeploymentStatus {
    /// Whether a worker may still advance this deployment.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Running | DeploymentStatus::Failed | DeploymentStatus::Stopped
        )
    }
}

/// A container-to-host port publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub container: u16,
    /// Published port on the node.
    pub host: u16,
}

/// A named volume request on a deployment.
///
/// `name` is the caller's logical name until the worker expands it to the
/// managed `vol_{env}_{name}` form and rewrites the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Volume name (logical, then expanded).
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            DeploymentStatus::Pending,
            DeploymentStatus::BuildingImage,
            DeploymentStatus::PullingImage,
            DeploymentStatus::CreatingVolumes,
            DeploymentStatus::StartingContainers,
            DeploymentStatus::Running,
            DeploymentStatus::Failed,
            DeploymentStatus::Stopped,
        ] {
            assert_eq!(s.as_str().parse::<DeploymentStatus>().unwrap(), s);
        }
        assert_eq!(
            "ACTIVE".parse::<EnvironmentStatus>().unwrap(),
            EnvironmentStatus::Active
        );
        assert!("active".parse::<EnvironmentStatus>().is_err());
    }

    #[test]
    fn deployment_statuses_sort_by_lifecycle() {
        assert!(DeploymentStatus::Pending < DeploymentStatus::BuildingImage);
        assert!(DeploymentStatus::BuildingImage < DeploymentStatus::PullingImage);
        assert!(DeploymentStatus::PullingImage < DeploymentStatus::CreatingVolumes);
        assert!(DeploymentStatus::CreatingVolumes < DeploymentStatus::StartingContainers);
        assert!(DeploymentStatus::StartingContainers < DeploymentStatus::Running);
        assert!(DeploymentStatus::Running < DeploymentStatus::Failed);
    }

    #[test]
    fn terminal_states() {
        assert!(DeploymentStatus::Running.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::Stopped.is_terminal());
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::StartingContainers.is_terminal());
    }

    #[test]
    fn port_mapping_serde_shape() {
        let p = PortMapping {
            container: 80,
            host: 8080,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!({"container": 80, "host": 8080}));
    }
}
