// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reverse-proxy env-var injection.
//!
//! The TLS-issuing proxy sidecar discovers routes from container env
//! vars on the Docker socket; berth only has to put the right variables
//! on the service spec.

use std::collections::HashMap;

use crate::config::ProxySettings;

/// The proxy env vars for one exposed deployment.
pub fn proxy_env_map(
    host: &str,
    virtual_port: Option<i32>,
    settings: &ProxySettings,
) -> HashMap<String, String> {
    let mut vars = HashMap::from([
        ("VIRTUAL_HOST".to_string(), host.to_string()),
        ("LETSENCRYPT_HOST".to_string(), host.to_string()),
        (
            "LETSENCRYPT_EMAIL".to_string(),
            settings.letsencrypt_email.clone(),
        ),
    ]);
    if let Some(port) = virtual_port {
        vars.insert("VIRTUAL_PORT".to_string(), port.to_string());
    }
    if settings.letsencrypt_staging {
        vars.insert("LETSENCRYPT_TEST".to_string(), "true".to_string());
    }
    vars
}

/// The same variables as `KEY=VALUE` entries, sorted for stable specs.
pub fn proxy_env_entries(
    host: &str,
    virtual_port: Option<i32>,
    settings: &ProxySettings,
) -> Vec<String> {
    let map = proxy_env_map(host, virtual_port, settings);
    let mut entries: Vec<String> = map.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    entries.sort();
    entries
}
