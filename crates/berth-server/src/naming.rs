// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic resource naming and owner-label conventions.
//!
//! Swarm caps service names at 63 characters; every name produced here
//! stays under that by construction (environment names are validated to
//! a bounded length before they ever reach a derivation).

use chrono::Utc;

/// Owner label carrying the environment id.
pub const LABEL_ENV_ID: &str = "berth.env_id";

/// Owner label carrying the deployment id.
pub const LABEL_DEPLOYMENT_ID: &str = "berth.deployment_id";

/// Owner label carrying the user id.
pub const LABEL_USER_ID: &str = "berth.user_id";

/// Maximum accepted environment name length.
///
/// `job_` + name + `_` + 16-char job id must fit in Swarm's 63-char
/// service-name limit, so names are capped at 32.
pub const MAX_ENV_NAME_LEN: usize = 32;

/// Derive the globally unique overlay network name for an environment.
///
/// The epoch-millisecond suffix keeps rapid recreations of the same
/// logical name from colliding.
pub fn overlay_name(env_name: &str) -> String {
    format!("overlay_env_{env_name}_{}", Utc::now().timestamp_millis())
}

/// The Swarm service name for a deployment.
pub fn service_name(env_name: &str, job_id: &str) -> String {
    format!("job_{env_name}_{job_id}")
}

/// The managed volume name for a logical volume of a deployment.
pub fn volume_name(env_name: &str, logical: &str) -> String {
    format!("vol_{env_name}_{logical}")
}

/// Whether a stored volume name is already in expanded managed form.
pub fn is_expanded_volume(env_name: &str, name: &str) -> bool {
    name.starts_with(&format!("vol_{env_name}_"))
}

/// The generated image name for a Git-sourced deployment.
pub fn git_image_name(env_name: &str) -> String {
    format!("img_{}_{}", env_name.to_lowercase(), Utc::now().timestamp())
}
