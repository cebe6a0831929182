// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Server - Multi-Tenant Docker Swarm Control Plane
//!
//! Users create isolated environments (one overlay network each),
//! deploy long-running workloads into them from a registry image or a
//! Git repository, and optionally expose them at a public HTTPS domain
//! through the shared reverse-proxy sidecar.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        HTTP surface (axum)                            │
//! │      authenticate → rate-limit → scope check → service call           │
//! └──────────────────────────────────────────────────────────────────────┘
//!        │                        │                         │
//!        ▼                        ▼                         ▼
//! ┌─────────────┐      ┌──────────────────┐      ┌────────────────────┐
//! │ Environment │      │    Deployment    │      │    Credentials     │
//! │   Service   │      │      Engine      │      │   (berth-core)     │
//! └──────┬──────┘      └────────┬─────────┘      └────────────────────┘
//!        │              enqueue │ DeployJob
//!        │                      ▼
//!        │             ┌──────────────────┐     ┌─────────────────────┐
//!        │             │   Worker pool    │────►│      EventBus       │
//!        │             │ (bounded, typed) │     │  └─► Notifier→chat  │
//!        │             └────────┬─────────┘     └─────────────────────┘
//!        │                      │
//!        ▼                      ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │              berth-docker (Engine API over the socket)               │
//! └──────────────────────────────────────────────────────────────────────┘
//!
//! At boot, before the listener opens, the RecoverySupervisor replays
//! every RUNNING row against the live Swarm and relaunches or fails it.
//! ```
//!
//! # Modules
//!
//! - [`chat`]: chat-command dispatcher (magic links, key management)
//! - [`config`]: env-var configuration
//! - [`deployments`]: the deployment engine and worker pool
//! - [`environments`]: environment lifecycle service
//! - [`error`]: the HTTP-facing error taxonomy
//! - [`http`]: routes, extractors, and JSON views
//! - [`naming`]: deterministic resource names and owner labels
//! - [`notifier`]: event fan-out to the chat channel
//! - [`proxy`]: reverse-proxy env-var injection
//! - [`rate_limit`]: per-credential budgets
//! - [`recovery`]: boot-time reconciliation
//! - [`runtime`]: the embeddable composed server

#![deny(missing_docs)]

pub mod chat;
pub mod config;
pub mod deployments;
pub mod environments;
pub mod error;
pub mod http;
pub mod naming;
pub mod notifier;
pub mod proxy;
pub mod rate_limit;
pub mod recovery;
pub mod runtime;

pub use config::Config;
pub use error::{Result, ServerError};
pub use runtime::ServerRuntime;
