// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock driver for testing.
//!
//! Keeps networks, volumes, and services in memory and honors the same
//! normalization contract as the real driver. Failure injection flags
//! let tests drive every worker error path without an Engine.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::build::BuildReport;
use crate::driver::{Driver, ServiceLaunch, ServiceState, TaskSummary, VolumeRemoval};
use crate::error::{DriverError, Result};

#[derive(Debug, Clone)]
struct MockNetwork {
    id: String,
    labels: HashMap<String, String>,
    containers: HashSet<String>,
}

#[derive(Debug, Clone)]
struct MockService {
    id: String,
    launch: ServiceLaunch,
    version: u64,
}

/// In-memory driver for tests.
#[derive(Default)]
pub struct MockDriver {
    networks: Mutex<HashMap<String, MockNetwork>>,
    volumes: Mutex<HashMap<String, HashMap<String, String>>>,
    services: Mutex<HashMap<String, MockService>>,
    logs: Mutex<HashMap<String, Vec<u8>>>,
    in_use_volumes: Mutex<HashSet<String>>,
    built_images: Mutex<Vec<String>>,
    pulled_images: Mutex<Vec<String>>,
    next_id: AtomicU64,
    /// Fail the next network creation.
    pub fail_network_create: AtomicBool,
    /// Fail every image pull.
    pub fail_pull: AtomicBool,
    /// Fail every image build with a fixed message.
    pub fail_build: AtomicBool,
    /// Fail every service creation.
    pub fail_service_create: AtomicBool,
}

impl MockDriver {
    /// Create an empty mock driver.
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Names of currently existing services.
    pub fn service_names(&self) -> Vec<String> {
        self.services.lock().unwrap().keys().cloned().collect()
    }

    /// The environment entries of a service, if it exists.
    pub fn service_env(&self, name: &str) -> Option<Vec<String>> {
        self.services
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.launch.env.clone())
    }

    /// The recorded launch of a service, if it exists.
    pub fn service_launch(&self, name: &str) -> Option<ServiceLaunch> {
        self.services
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.launch.clone())
    }

    /// Names of currently existing volumes.
    pub fn volume_names(&self) -> Vec<String> {
        self.volumes.lock().unwrap().keys().cloned().collect()
    }

    /// Names of currently existing networks.
    pub fn network_names(&self) -> Vec<String> {
        self.networks.lock().unwrap().keys().cloned().collect()
    }

    /// Containers attached to a network.
    pub fn network_containers(&self, name: &str) -> Vec<String> {
        self.networks
            .lock()
            .unwrap()
            .get(name)
            .map(|n| n.containers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Images built in order.
    pub fn built_images(&self) -> Vec<String> {
        self.built_images.lock().unwrap().clone()
    }

    /// Images pulled in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.pulled_images.lock().unwrap().clone()
    }

    /// Seed the log buffer returned for a service.
    pub fn set_logs(&self, name: &str, logs: &[u8]) {
        self.logs
            .lock()
            .unwrap()
            .insert(name.to_string(), logs.to_vec());
    }

    /// Mark a volume as in use so removal reports [`VolumeRemoval::InUse`].
    pub fn set_volume_in_use(&self, name: &str) {
        self.in_use_volumes.lock().unwrap().insert(name.to_string());
    }

    /// Drop a service behind the control plane's back, as a crashed
    /// node would.
    pub fn lose_service(&self, name: &str) {
        self.services.lock().unwrap().remove(name);
    }

    /// Drop a network behind the control plane's back.
    pub fn lose_network(&self, name: &str) {
        self.networks.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn create_overlay_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String> {
        if self.fail_network_create.load(Ordering::SeqCst) {
            return Err(DriverError::api(500, "mock: network create failed"));
        }
        let mut networks = self.networks.lock().unwrap();
        if let Some(existing) = networks.get(name) {
            return Ok(existing.id.clone());
        }
        let id = self.id("net");
        let mut labels = labels.clone();
        labels.insert(crate::MANAGED_LABEL.into(), crate::MANAGED_VALUE.into());
        networks.insert(
            name.to_string(),
            MockNetwork {
                id: id.clone(),
                labels,
                containers: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<String>> {
        Ok(self.networks.lock().unwrap().get(name).map(|n| n.id.clone()))
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        if let Some(network) = networks.get(name) {
            if network.labels.get(crate::MANAGED_LABEL).map(String::as_str)
                != Some(crate::MANAGED_VALUE)
            {
                return Err(DriverError::Unmanaged(format!("network {name}")));
            }
            networks.remove(name);
        }
        Ok(())
    }

    async fn connect_container(&self, network: &str, container: &str) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        match networks.get_mut(network) {
            Some(n) => {
                // Re-connecting is success, mirroring the Engine contract.
                n.containers.insert(container.to_string());
                Ok(())
            }
            None => Err(DriverError::NotFound(format!("network {network}"))),
        }
    }

    async fn disconnect_container(&self, network: &str, container: &str) -> Result<()> {
        if let Some(n) = self.networks.lock().unwrap().get_mut(network) {
            n.containers.remove(container);
        }
        Ok(())
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(name) {
            return Ok(());
        }
        let mut labels = labels.clone();
        labels.insert(crate::MANAGED_LABEL.into(), crate::MANAGED_VALUE.into());
        volumes.insert(name.to_string(), labels);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<VolumeRemoval> {
        if self.in_use_volumes.lock().unwrap().contains(name) {
            return Ok(VolumeRemoval::InUse);
        }
        match self.volumes.lock().unwrap().remove(name) {
            Some(_) => Ok(VolumeRemoval::Removed),
            None => Ok(VolumeRemoval::Absent),
        }
    }

    async fn list_volumes_by_label(
        &self,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<String>> {
        Ok(self
            .volumes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, labels)| labels.get(label_key).map(String::as_str) == Some(label_value))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn pull_image(&self, image: &str, tag: &str) -> Result<()> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(DriverError::api(
                500,
                format!("mock: pull of {image}:{tag} failed"),
            ));
        }
        self.pulled_images
            .lock()
            .unwrap()
            .push(format!("{image}:{tag}"));
        Ok(())
    }

    async fn build_image(&self, _context_tar: Vec<u8>, image_tag: &str) -> Result<BuildReport> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(DriverError::BuildFailed(
                "mock: repository not found".to_string(),
            ));
        }
        self.built_images.lock().unwrap().push(image_tag.to_string());
        Ok(BuildReport { tagged: true })
    }

    async fn create_service(&self, launch: &ServiceLaunch) -> Result<String> {
        if self.fail_service_create.load(Ordering::SeqCst) {
            return Err(DriverError::api(500, "mock: service create failed"));
        }
        if self
            .networks
            .lock()
            .unwrap()
            .get(&launch.network)
            .is_none()
        {
            return Err(DriverError::api(
                404,
                format!("network {} not found", launch.network),
            ));
        }
        let id = self.id("svc");
        self.services.lock().unwrap().insert(
            launch.name.clone(),
            MockService {
                id: id.clone(),
                launch: launch.clone(),
                version: 1,
            },
        );
        Ok(id)
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceState>> {
        Ok(self.services.lock().unwrap().get(name).map(|s| ServiceState {
            id: s.id.clone(),
            name: name.to_string(),
            version: s.version,
            env: s.launch.env.clone(),
            labels: s.launch.labels.clone(),
        }))
    }

    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskSummary>> {
        Ok(match self.services.lock().unwrap().get(name) {
            Some(service) => (0..service.launch.replicas)
                .map(|_| TaskSummary {
                    state: "running".to_string(),
                    desired_state: "running".to_string(),
                })
                .collect(),
            None => Vec::new(),
        })
    }

    async fn update_service_env(
        &self,
        name: &str,
        set: &HashMap<String, String>,
    ) -> Result<()> {
        let mut services = self.services.lock().unwrap();
        let Some(service) = services.get_mut(name) else {
            return Err(DriverError::NotFound(format!("service {name}")));
        };
        service.launch.env = crate::driver::merge_env(&service.launch.env, set);
        service.version += 1;
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        self.services.lock().unwrap().remove(name);
        Ok(())
    }

    async fn service_logs(&self, name: &str, _tail: u32) -> Result<Vec<u8>> {
        if self.services.lock().unwrap().get(name).is_none()
            && !self.logs.lock().unwrap().contains_key(name)
        {
            return Err(DriverError::NotFound(format!("service {name}")));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("{name}: mock log line\n").into_bytes()))
    }
}
