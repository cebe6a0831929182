// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Core - Domain Model and Persistence
//!
//! This crate owns everything the berth control plane persists and the
//! credential layer that gates access to it. The server crate composes
//! these pieces with the Docker driver; nothing in here touches the
//! Docker Engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     berth-server (HTTP/chat)                     │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────────────┐
//! │  Credentials   │  │      Stores      │  │      EventBus        │
//! │  (magic links, │  │ users / keys /   │  │ (typed domain events │
//! │   API keys)    │  │ envs / deploys   │  │  fanned out async)   │
//! └────────────────┘  └──────────────────┘  └──────────────────────┘
//!          │                    │
//!          ▼                    ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          PostgreSQL                              │
//! │   users, api_keys, magic_links, environments, deployments,       │
//! │   services, deployment_versions, deployment_updates              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deployment Status State Machine
//!
//! ```text
//!                    ┌─────────┐
//!                    │ PENDING │
//!                    └────┬────┘
//!              git        │        registry
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//! ┌────────────────┐            ┌───────────────┐
//! │ BUILDING_IMAGE │            │ PULLING_IMAGE │
//! └───────┬────────┘            └───────┬───────┘
//!         └──────────────┬──────────────┘
//!                        ▼
//!              ┌──────────────────┐
//!              │ CREATING_VOLUMES │
//!              └────────┬─────────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │ STARTING_CONTAINERS │
//!            └──────────┬──────────┘
//!                       ▼
//!                  ┌─────────┐   delete   ┌─────────┐
//!                  │ RUNNING │ ─────────► │ STOPPED │
//!                  └─────────┘            └─────────┘
//!
//! Any pre-RUNNING state can fall into the FAILED sink. No state is
//! ever revisited; pollers of one job observe a strictly advancing
//! prefix of this order.
//! ```
//!
//! # Modules
//!
//! - [`credentials`]: magic-link issuance/redemption and API-key auth
//! - [`crypto`]: argon2id secret hashing and the encrypted-column envelope
//! - [`error`]: unified [`CoreError`] type
//! - [`events`]: typed domain event bus
//! - [`ids`]: opaque identifier and token generation
//! - [`migrations`]: idempotent schema application
//! - [`model`]: status enums and wire-stable value types
//! - [`scopes`]: API-key scope set and checks
//! - [`store`]: one persistence store per aggregate

#![deny(missing_docs)]

pub mod credentials;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ids;
pub mod migrations;
pub mod model;
pub mod scopes;
pub mod store;

pub use error::{CoreError, Result};
pub use events::EventBus;
