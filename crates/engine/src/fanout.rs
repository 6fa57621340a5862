//! Fanout orchestrator: the notification pipeline.
//!
//! For each domain event:
//! 1. Validates the event (an empty message aborts the call)
//! 2. Resolves recipients (via `RecipientResolver`)
//! 3. Per recipient, concurrently: dedup admission (via `DedupGuard`),
//!    persistence (via `NotificationStore`), then live delivery
//!
//! A recipient's failure never stops the others and never rolls back
//! notifications already created; failures are collected in the report.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use casedesk_common::config::AppConfig;
use casedesk_common::types::{LivePayload, Notification};

use crate::delivery::{DeliveryOutcome, LiveDelivery};
use crate::directory::RecipientDirectory;
use crate::error::{EngineError, StoreError};
use crate::event::NotificationEvent;
use crate::guard::{DEFAULT_DEDUP_WINDOW, DedupGuard};
use crate::resolver::RecipientResolver;
use crate::store::NotificationStore;

/// Default per-recipient budget when the event carries no deadline.
const DEFAULT_RECIPIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub dedup_window: Duration,
    pub recipient_timeout: Duration,
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            recipient_timeout: Duration::from_millis(config.notify_timeout_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            recipient_timeout: DEFAULT_RECIPIENT_TIMEOUT,
        }
    }
}

/// What happened for one recipient.
#[derive(Debug)]
pub enum RecipientOutcome {
    /// Already notified under the same dedup key within the window.
    Suppressed,
    /// Persisted and pushed to `connections` live connections.
    Delivered {
        notification: Notification,
        connections: usize,
    },
    /// Persisted; the recipient had no live connection.
    Stored { notification: Notification },
    Failed(EngineError),
}

impl RecipientOutcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            RecipientOutcome::Delivered { notification, .. }
            | RecipientOutcome::Stored { notification } => Some(notification),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RecipientReport {
    pub recipient_id: i64,
    pub outcome: RecipientOutcome,
}

/// Aggregated result of one fanout call.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub outcomes: Vec<RecipientReport>,
}

impl FanoutReport {
    pub fn recipients(&self) -> usize {
        self.outcomes.len()
    }

    /// Notifications persisted by this call.
    pub fn created(&self) -> impl Iterator<Item = &Notification> {
        self.outcomes.iter().filter_map(|r| r.outcome.notification())
    }

    pub fn created_count(&self) -> usize {
        self.created().count()
    }

    pub fn delivered_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, RecipientOutcome::Delivered { .. }))
            .count()
    }

    pub fn suppressed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, RecipientOutcome::Suppressed))
            .count()
    }

    /// Per-recipient failures, by recipient.
    pub fn failures(&self) -> impl Iterator<Item = (i64, &EngineError)> {
        self.outcomes.iter().filter_map(|r| match &r.outcome {
            RecipientOutcome::Failed(e) => Some((r.recipient_id, e)),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }
}

/// Central orchestrator tying resolution, dedup, persistence and delivery.
pub struct FanoutOrchestrator {
    resolver: RecipientResolver,
    guard: Arc<DedupGuard>,
    store: Arc<dyn NotificationStore>,
    delivery: Arc<dyn LiveDelivery>,
    config: EngineConfig,
}

impl FanoutOrchestrator {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        store: Arc<dyn NotificationStore>,
        delivery: Arc<dyn LiveDelivery>,
        guard: Arc<DedupGuard>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver: RecipientResolver::new(directory),
            guard,
            store,
            delivery,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fan a domain event out to every resolved recipient.
    ///
    /// Returns `Err` only for whole-call failures: an invalid event or a
    /// failed recipient lookup. Everything per recipient lands in the report.
    pub async fn notify(&self, event: &NotificationEvent) -> Result<FanoutReport, EngineError> {
        event.validate()?;

        let recipients = self.resolver.resolve(event).await?;
        if recipients.is_empty() {
            tracing::debug!(event_kind = %event.kind, "No recipients, nothing to notify");
            return Ok(FanoutReport::default());
        }

        let started = Instant::now();
        let deadline = event
            .deadline
            .unwrap_or(started + self.config.recipient_timeout);
        let budget = deadline.saturating_duration_since(started);

        let tasks = recipients.into_iter().map(|recipient_id| async move {
            let outcome = match tokio::time::timeout_at(
                deadline,
                self.notify_recipient(event, recipient_id),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => RecipientOutcome::Failed(e),
                Err(_) => RecipientOutcome::Failed(EngineError::Timeout(budget)),
            };

            if let RecipientOutcome::Failed(e) = &outcome {
                tracing::warn!(
                    recipient_id,
                    event_kind = %event.kind,
                    error = %e,
                    "Notification failed for recipient"
                );
            }

            RecipientReport {
                recipient_id,
                outcome,
            }
        });

        let report = FanoutReport {
            outcomes: join_all(tasks).await,
        };

        tracing::info!(
            event_kind = %event.kind,
            actor_id = event.actor.id,
            dedup_key = ?event.dedup_key,
            recipients = report.recipients(),
            created = report.created_count(),
            suppressed = report.suppressed_count(),
            failed = report.failed_count(),
            "Fanout complete"
        );

        Ok(report)
    }

    async fn notify_recipient(
        &self,
        event: &NotificationEvent,
        recipient_id: i64,
    ) -> Result<RecipientOutcome, EngineError> {
        let new = event.notification_for(recipient_id);

        let notification = match new.effective_dedup_key() {
            Some(key) => {
                let Some(_permit) = self
                    .guard
                    .admit(self.store.as_ref(), recipient_id, key)
                    .await?
                else {
                    return Ok(RecipientOutcome::Suppressed);
                };

                match self
                    .store
                    .create_unless_recent(&new, self.guard.window())
                    .await
                {
                    Ok(notification) => notification,
                    Err(StoreError::Duplicate { .. }) => {
                        tracing::debug!(
                            recipient_id,
                            dedup_key = key,
                            "Notification suppressed by store"
                        );
                        return Ok(RecipientOutcome::Suppressed);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => self.store.create(&new).await?,
        };

        tracing::info!(
            notification_id = notification.id,
            recipient_id,
            event_kind = %event.kind,
            "Notification created"
        );

        let outcome = match self
            .delivery
            .send(recipient_id, LivePayload::from(&notification))
            .await
        {
            DeliveryOutcome::Delivered(connections) => RecipientOutcome::Delivered {
                notification,
                connections,
            },
            DeliveryOutcome::NoConnection => {
                tracing::debug!(recipient_id, "No live connection, delivery skipped");
                RecipientOutcome::Stored { notification }
            }
        };

        Ok(outcome)
    }
}
