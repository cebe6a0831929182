// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Out-of-band notification delivery.
//!
//! The notifier subscribes to the event bus on its own task, looks up
//! each event's user, honors the per-user preference booleans, and
//! delivers a rendered line through the [`ChatSink`] seam. Sink
//! failures are logged and never propagate to the emitter; a lagged
//! subscription drops the oldest events rather than back-pressuring a
//! worker.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use berth_core::events::DomainEvent;
use berth_core::store::UserStore;
use berth_core::EventBus;

/// Delivery failure from a chat sink.
#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// The out-of-band delivery channel (chat bot transport).
///
/// The real transport lives outside this process; tests and local runs
/// use [`LogSink`].
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Deliver one message to a chat id.
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Sink that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ChatSink for LogSink {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        info!(chat_id, text, "Notification");
        Ok(())
    }
}

/// Event-bus consumer that fans events out to the chat channel.
pub struct Notifier {
    users: UserStore,
    sink: Arc<dyn ChatSink>,
}

impl Notifier {
    /// Build a notifier.
    pub fn new(users: UserStore, sink: Arc<dyn ChatSink>) -> Self {
        Self { users, sink }
    }

    /// Subscribe to the bus and consume until shutdown.
    pub fn spawn(self, bus: &EventBus, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => {
                        info!("Notifier shutting down");
                        break;
                    }

                    event = rx.recv() => match event {
                        Ok(event) => self.deliver(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notifier lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn deliver(&self, event: DomainEvent) {
        let user = match self.users.get(event.user_id()).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(user_id = event.user_id(), "Event for unknown user, skipping");
                return;
            }
            Err(e) => {
                warn!(error = %e, "User lookup failed for notification");
                return;
            }
        };

        if !user.wants(event.kind()) {
            debug!(
                user_id = %user.user_id,
                event = event.name(),
                "Notification suppressed by preference"
            );
            return;
        }

        let text = render(&event);
        if let Err(e) = self.sink.send(user.chat_id, &text).await {
            warn!(error = %e, event = event.name(), "Notification delivery failed");
        }
    }
}

/// Render an event as a chat line.
pub fn render(event: &DomainEvent) -> String {
    match event {
        DomainEvent::EnvironmentActive { name, .. } => {
            format!("Environment '{name}' is ready.")
        }
        DomainEvent::EnvironmentError { message, .. } => {
            format!("Environment operation failed: {message}")
        }
        DomainEvent::EnvironmentDeleted { name, .. } => {
            format!("Environment '{name}' was deleted.")
        }
        DomainEvent::EnvironmentMadePublic { domain, .. } => {
            format!("Environment is now public at https://{domain}")
        }
        DomainEvent::DeploymentStarted { job_id, .. } => {
            format!("Deployment {job_id} started.")
        }
        DomainEvent::DeploymentSucceeded { job_id, .. } => {
            format!("Deployment {job_id} is running.")
        }
        DomainEvent::DeploymentFailed {
            job_id, message, ..
        } => format!("Deployment {job_id} failed: {message}"),
        DomainEvent::DeploymentStopped { job_id, .. } => {
            format!("Deployment {job_id} was stopped.")
        }
        DomainEvent::DeploymentRecovered { job_id, .. } => {
            format!("Deployment {job_id} was recovered after a restart.")
        }
        DomainEvent::DeploymentRecoveryFailed {
            job_id, message, ..
        } => format!("Deployment {job_id} could not be recovered: {message}"),
        _ => event.name().to_string(),
    }
}
