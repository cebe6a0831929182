// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health endpoint with per-indicator status.
//!
//! Three indicators: database reachability, resident set under the
//! ceiling, and free disk above the floor. Any failing indicator turns
//! the answer into a 503 so orchestrators stop routing to the node.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::AppState;

/// RSS ceiling in MiB.
const MAX_RSS_MIB: u64 = 300;

/// Minimum free-disk fraction.
const MIN_DISK_FREE: f64 = 0.5;

/// One indicator in the health report.
#[derive(Debug, Serialize)]
pub struct Indicator {
    /// `up` or `down`.
    pub status: &'static str,
    /// Human-readable detail.
    pub detail: String,
}

impl Indicator {
    fn up(detail: String) -> Self {
        Self {
            status: "up",
            detail,
        }
    }

    fn down(detail: String) -> Self {
        Self {
            status: "down",
            detail,
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// The health report body.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `ok` or `error`.
    pub status: &'static str,
    /// Database indicator.
    pub database: Indicator,
    /// Memory indicator.
    pub memory: Indicator,
    /// Disk indicator.
    pub disk: Indicator,
}

/// `GET /health`
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthReport>) {
    let database = if state.store.health_check().await {
        Indicator::up("database reachable".to_string())
    } else {
        Indicator::down("database unreachable".to_string())
    };

    let memory = match rss_mib() {
        Some(rss) if rss <= MAX_RSS_MIB => Indicator::up(format!("rss {rss} MiB")),
        Some(rss) => Indicator::down(format!("rss {rss} MiB exceeds {MAX_RSS_MIB} MiB")),
        // An unreadable proc table should not take the node out of rotation.
        None => Indicator::up("rss unavailable".to_string()),
    };

    let disk = match disk_free_fraction() {
        Some(free) if free >= MIN_DISK_FREE => {
            Indicator::up(format!("{:.0}% free", free * 100.0))
        }
        Some(free) => Indicator::down(format!(
            "{:.0}% free is below {:.0}%",
            free * 100.0,
            MIN_DISK_FREE * 100.0
        )),
        None => Indicator::up("disk stats unavailable".to_string()),
    };

    let healthy = database.is_up() && memory.is_up() && disk.is_up();
    let report = HealthReport {
        status: if healthy { "ok" } else { "error" },
        database,
        memory,
        disk,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Resident set size in MiB from `/proc/self/status`.
fn rss_mib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024)
}

/// Free fraction of the root filesystem.
fn disk_free_fraction() -> Option<f64> {
    let stat = nix::sys::statvfs::statvfs("/").ok()?;
    let blocks = stat.blocks();
    if blocks == 0 {
        return None;
    }
    Some(stat.blocks_available() as f64 / blocks as f64)
}
