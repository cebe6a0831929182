// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed domain event bus.
//!
//! Services publish [`DomainEvent`]s; the notifier (and anything else)
//! subscribes and consumes on its own task. Dispatch is best-effort: a
//! publish with no live subscribers is dropped silently, and a slow
//! subscriber that lags the ring buffer loses the oldest events rather
//! than back-pressuring a deployment worker.

use tokio::sync::broadcast;

/// Coarse event family, used by subscribers that filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    /// Environment lifecycle events.
    Environment,
    /// Deployment lifecycle events.
    Deployment,
    /// Recovery supervisor outcomes.
    Recovery,
}

/// A domain event emitted by a service or worker.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DomainEvent {
    /// An environment reached `ACTIVE`.
    EnvironmentActive {
        /// Environment id.
        env_id: String,
        /// Owning user.
        user_id: String,
        /// Logical name.
        name: String,
    },
    /// An environment flipped to `ERROR`.
    EnvironmentError {
        /// Environment id.
        env_id: String,
        /// Owning user.
        user_id: String,
        /// Failure cause.
        message: String,
    },
    /// An environment finished cascade deletion.
    EnvironmentDeleted {
        /// Environment id.
        env_id: String,
        /// Owning user.
        user_id: String,
        /// Logical name.
        name: String,
    },
    /// An environment was exposed at a public domain.
    EnvironmentMadePublic {
        /// Environment id.
        env_id: String,
        /// Owning user.
        user_id: String,
        /// The public domain.
        domain: String,
    },
    /// A deployment worker started executing.
    DeploymentStarted {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
    },
    /// A deployment reached `RUNNING`.
    DeploymentSucceeded {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
    },
    /// A deployment fell into `FAILED`.
    DeploymentFailed {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
        /// Failure cause.
        message: String,
    },
    /// A running deployment was deleted.
    DeploymentStopped {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
    },
    /// The recovery supervisor relaunched a missing service.
    DeploymentRecovered {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
    },
    /// The recovery supervisor could not relaunch a missing service.
    DeploymentRecoveryFailed {
        /// Deployment id.
        deployment_id: String,
        /// Owning user.
        user_id: String,
        /// Public polling handle.
        job_id: String,
        /// Failure cause.
        message: String,
    },
}

impl DomainEvent {
    /// The coarse family this event belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::EnvironmentActive { .. }
            | DomainEvent::EnvironmentError { .. }
            | DomainEvent::EnvironmentDeleted { .. }
            | DomainEvent::EnvironmentMadePublic { .. } => EventKind::Environment,
            DomainEvent::DeploymentStarted { .. }
            | DomainEvent::DeploymentSucceeded { .. }
            | DomainEvent::DeploymentFailed { .. }
            | DomainEvent::DeploymentStopped { .. } => EventKind::Deployment,
            DomainEvent::DeploymentRecovered { .. }
            | DomainEvent::DeploymentRecoveryFailed { .. } => EventKind::Recovery,
        }
    }

    /// The user this event concerns.
    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::EnvironmentActive { user_id, .. }
            | DomainEvent::EnvironmentError { user_id, .. }
            | DomainEvent::EnvironmentDeleted { user_id, .. }
            | DomainEvent::EnvironmentMadePublic { user_id, .. }
            | DomainEvent::DeploymentStarted { user_id, .. }
            | DomainEvent::DeploymentSucceeded { user_id, .. }
            | DomainEvent::DeploymentFailed { user_id, .. }
            | DomainEvent::DeploymentStopped { user_id, .. }
            | DomainEvent::DeploymentRecovered { user_id, .. }
            | DomainEvent::DeploymentRecoveryFailed { user_id, .. } => user_id,
        }
    }

    /// Stable dotted event name, e.g. `deployment.recovery-failed`.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::EnvironmentActive { .. } => "environment.active",
            DomainEvent::EnvironmentError { .. } => "environment.error",
            DomainEvent::EnvironmentDeleted { .. } => "environment.deleted",
            DomainEvent::EnvironmentMadePublic { .. } => "environment.made_public",
            DomainEvent::DeploymentStarted { .. } => "deployment.started",
            DomainEvent::DeploymentSucceeded { .. } => "deployment.success",
            DomainEvent::DeploymentFailed { .. } => "deployment.failed",
            DomainEvent::DeploymentStopped { .. } => "deployment.stopped",
            DomainEvent::DeploymentRecovered { .. } => "deployment.recovered",
            DomainEvent::DeploymentRecoveryFailed { .. } => "deployment.recovery-failed",
        }
    }
}

/// In-process broadcast bus for [`DomainEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Create a bus with the given ring-buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Never fails; with no subscribers the event is
    /// dropped and logged at debug.
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::debug!(event = name, receivers, "Published domain event");
            }
            Err(_) => {
                tracing::debug!(event = name, "No subscribers for domain event");
            }
        }
    }

    /// Subscribe to the full event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}
