// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Docker - Typed Docker Engine API Driver
//!
//! A thin, predictable wrapper over the Docker Engine API on the local
//! Unix socket. The driver owns the managed-label convention and all
//! Engine error normalization: 404 on removal is success, 409 on volume
//! creation is success, "already connected" on network attach is
//! success. Callers see typed results, never raw HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 berth-server (services)                   │
//! └──────────────────────────────────────────────────────────┘
//!                  │ Arc<dyn Driver>
//!        ┌─────────┴──────────┐
//!        ▼                    ▼
//! ┌──────────────┐     ┌─────────────┐
//! │ DockerDriver │     │ MockDriver  │  (tests)
//! └──────┬───────┘     └─────────────┘
//!        │ EngineTransport (hyper over UnixStream)
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │        Docker Engine (/var/run/docker.sock, Swarm)        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`build`]: synthetic Dockerfile rendering, tar build contexts, and
//!   the build-event stream state machine
//! - [`driver`]: the [`Driver`] trait and the Engine-backed implementation
//! - [`error`]: [`DriverError`] with Engine status normalization
//! - [`mock`]: in-memory driver for tests
//! - [`spec`]: serde types for the Engine API payloads this crate uses
//! - [`transport`]: HTTP/1.1 client over the Engine Unix socket

#![deny(missing_docs)]

pub mod build;
pub mod driver;
pub mod error;
pub mod mock;
pub mod spec;
pub mod transport;

pub use driver::{Driver, DockerDriver, ServiceLaunch, ServiceState, VolumeRemoval};
pub use error::{DriverError, Result};
pub use mock::MockDriver;

/// Label applied to every resource this process creates; removal
/// refuses to touch resources that lack it.
pub const MANAGED_LABEL: &str = "managed";

/// Value of the managed label.
pub const MANAGED_VALUE: &str = "true";
