// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API-key scopes.
//!
//! A scope names one capability of the HTTP surface. Keys carry a set of
//! scopes; `admin` is a superset of everything.

use std::fmt;
use std::str::FromStr;

/// A single capability grantable to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Scope {
    /// Read environments.
    EnvRead,
    /// Create, delete, and expose environments.
    EnvWrite,
    /// Read deployments and poll jobs.
    DeployRead,
    /// Create and delete deployments.
    DeployWrite,
    /// Read service logs.
    LogsRead,
    /// Unconditional pass on every scope check.
    Admin,
}

impl Scope {
    /// All grantable scopes, in display order.
    pub const ALL: [Scope; 6] = [
        Scope::EnvRead,
        Scope::EnvWrite,
        Scope::DeployRead,
        Scope::DeployWrite,
        Scope::LogsRead,
        Scope::Admin,
    ];

    /// The stable string stored in the `scopes` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::EnvRead => "env.read",
            Scope::EnvWrite => "env.write",
            Scope::DeployRead => "deploy.read",
            Scope::DeployWrite => "deploy.write",
            Scope::LogsRead => "logs.read",
            Scope::Admin => "admin",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env.read" => Ok(Scope::EnvRead),
            "env.write" => Ok(Scope::EnvWrite),
            "deploy.read" => Ok(Scope::DeployRead),
            "deploy.write" => Ok(Scope::DeployWrite),
            "logs.read" => Ok(Scope::LogsRead),
            "admin" => Ok(Scope::Admin),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

/// Check a granted scope list (as stored) against a required set.
///
/// Holders of `admin` pass unconditionally; otherwise every required
/// scope must be present. Unknown strings in `granted` are ignored
/// rather than rejected so old rows survive scope renames.
pub fn check_scopes(granted: &[String], required: &[Scope]) -> bool {
    let granted: Vec<Scope> = granted.iter().filter_map(|s| s.parse().ok()).collect();
    if granted.contains(&Scope::Admin) {
        return true;
    }
    required.iter().all(|r| granted.contains(r))
}

/// Parse a stored scope list, dropping unknown entries.
pub fn parse_scopes(stored: &[String]) -> Vec<Scope> {
    stored.iter().filter_map(|s| s.parse().ok()).collect()
}

/// Render a scope set into its stored string form.
pub fn scope_strings(scopes: &[Scope]) -> Vec<String> {
    scopes.iter().map(|s| s.as_str().to_string()).collect()
}
