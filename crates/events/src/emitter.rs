//! Event emitter: gateway events in, pending deliveries out.
//!
//! [`EventEmitter`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and, for every event whose instance has a webhook URL and a matching
//! subscription, snapshots the wire payload and URL into a new `pending`
//! delivery via the ledger, then hands it to the scheduler. It is the sole
//! writer of new delivery rows.

use std::sync::Arc;

use async_trait::async_trait;
use chatgate_core::types::DbId;
use chatgate_db::models::delivery::{NewDelivery, WebhookDeliveryRow};
use chatgate_db::models::instance::WebhookConfig;
use chatgate_db::repositories::InstanceRepo;
use chatgate_db::DbPool;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::bus::GatewayEvent;
use crate::ledger::{DeliveryLedger, LedgerError};
use crate::scheduler::{ScheduledDelivery, SchedulerHandle};

// ---------------------------------------------------------------------------
// InstanceDirectory
// ---------------------------------------------------------------------------

/// Looks up an instance's current webhook configuration.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// `None` when the instance does not exist or has no webhook URL set.
    async fn webhook_config(&self, instance_id: DbId)
        -> Result<Option<WebhookConfig>, LedgerError>;
}

/// Postgres-backed directory over [`InstanceRepo`].
pub struct PgDirectory {
    pool: DbPool,
}

impl PgDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceDirectory for PgDirectory {
    async fn webhook_config(
        &self,
        instance_id: DbId,
    ) -> Result<Option<WebhookConfig>, LedgerError> {
        let instance = InstanceRepo::find_by_id(&self.pool, instance_id).await?;
        Ok(instance.and_then(|i| i.webhook_config()))
    }
}

// ---------------------------------------------------------------------------
// EventEmitter
// ---------------------------------------------------------------------------

/// Background service converting [`GatewayEvent`]s into webhook deliveries.
pub struct EventEmitter {
    directory: Arc<dyn InstanceDirectory>,
    ledger: Arc<dyn DeliveryLedger>,
    scheduler: SchedulerHandle,
}

impl EventEmitter {
    pub fn new(
        directory: Arc<dyn InstanceDirectory>,
        ledger: Arc<dyn DeliveryLedger>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            directory,
            ledger,
            scheduler,
        }
    }

    /// Run the emitter loop.
    ///
    /// Consumes events from the bus until the channel is closed (i.e. the
    /// bus is dropped at shutdown).
    pub async fn run(self, mut receiver: broadcast::Receiver<GatewayEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event).await {
                        tracing::error!(
                            instance_id = event.instance_id,
                            kind = %event.kind,
                            error = %e,
                            "Failed to create webhook delivery for event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Event emitter lagged, some events produced no delivery"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, emitter shutting down");
                    break;
                }
            }
        }
    }

    /// Produce zero or one delivery for an event.
    ///
    /// Zero when the instance has no webhook URL or is not subscribed to
    /// the event kind (silent drop, traced at debug level). Returns the
    /// created row otherwise.
    pub async fn handle_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<Option<WebhookDeliveryRow>, LedgerError> {
        let Some(config) = self.directory.webhook_config(event.instance_id).await? else {
            tracing::debug!(
                instance_id = event.instance_id,
                kind = %event.kind,
                "Dropping event: no webhook configured"
            );
            return Ok(None);
        };

        if !config.subscribes_to(event.kind) {
            tracing::debug!(
                instance_id = event.instance_id,
                kind = %event.kind,
                "Dropping event: kind not subscribed"
            );
            return Ok(None);
        }

        // Wire format is fixed; `webhook_url` is snapshotted here so later
        // config edits cannot mutate this delivery.
        let payload = serde_json::json!({
            "event": event.kind.as_str(),
            "instance_id": event.instance_id,
            "timestamp": event.occurred_at.to_rfc3339(),
            "data": event.data,
        });

        let row = self
            .ledger
            .create(NewDelivery {
                instance_id: event.instance_id,
                event_type: event.kind.as_str().to_string(),
                payload,
                webhook_url: config.url,
                next_retry_at: Utc::now(),
            })
            .await?;

        tracing::debug!(
            delivery_id = row.id,
            instance_id = row.instance_id,
            kind = %event.kind,
            "Webhook delivery created"
        );

        self.scheduler.enqueue(ScheduledDelivery::from_row(&row));

        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerHandle;
    use crate::testing::{MemoryDirectory, MemoryLedger};
    use chatgate_core::EventKind;
    use chatgate_db::models::delivery::status;

    fn emitter_with(
        directory: MemoryDirectory,
        ledger: Arc<MemoryLedger>,
    ) -> (EventEmitter, tokio::sync::mpsc::UnboundedReceiver<ScheduledDelivery>) {
        let (handle, rx) = SchedulerHandle::for_tests();
        (
            EventEmitter::new(Arc::new(directory), ledger, handle),
            rx,
        )
    }

    #[tokio::test]
    async fn unsubscribed_kind_creates_no_delivery() {
        let directory =
            MemoryDirectory::with_config(1, "https://example.com/hook", &[EventKind::Message]);
        let ledger = Arc::new(MemoryLedger::default());
        let (emitter, _rx) = emitter_with(directory, Arc::clone(&ledger));

        let event = GatewayEvent::new(1, EventKind::MessageStatus, serde_json::json!({}));
        let created = emitter.handle_event(&event).await.unwrap();

        assert!(created.is_none());
        assert!(ledger.all().is_empty());
    }

    #[tokio::test]
    async fn subscribed_kind_creates_exactly_one_pending_delivery() {
        let directory =
            MemoryDirectory::with_config(1, "https://example.com/hook", &[EventKind::Message]);
        let ledger = Arc::new(MemoryLedger::default());
        let (emitter, mut rx) = emitter_with(directory, Arc::clone(&ledger));

        let event = GatewayEvent::new(1, EventKind::Message, serde_json::json!({"body": "hi"}));
        let row = emitter.handle_event(&event).await.unwrap().unwrap();

        assert_eq!(row.status, status::PENDING);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.webhook_url, "https://example.com/hook");
        assert_eq!(ledger.all().len(), 1);

        // The scheduler was handed the same delivery.
        let scheduled = rx.try_recv().expect("delivery should be enqueued");
        assert_eq!(scheduled.id, row.id);
    }

    #[tokio::test]
    async fn no_webhook_url_means_silent_drop() {
        let directory = MemoryDirectory::default();
        let ledger = Arc::new(MemoryLedger::default());
        let (emitter, _rx) = emitter_with(directory, Arc::clone(&ledger));

        let event = GatewayEvent::new(9, EventKind::Message, serde_json::json!({}));
        assert!(emitter.handle_event(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_uses_fixed_wire_shape() {
        let directory =
            MemoryDirectory::with_config(5, "https://example.com/hook", &[EventKind::QrUpdated]);
        let ledger = Arc::new(MemoryLedger::default());
        let (emitter, _rx) = emitter_with(directory, Arc::clone(&ledger));

        let event = GatewayEvent::new(5, EventKind::QrUpdated, serde_json::json!({"qr": "abc"}));
        let row = emitter.handle_event(&event).await.unwrap().unwrap();

        assert_eq!(row.payload["event"], "qr_updated");
        assert_eq!(row.payload["instance_id"], 5);
        assert_eq!(row.payload["data"]["qr"], "abc");
        assert!(row.payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn later_config_change_does_not_touch_existing_delivery() {
        let directory =
            MemoryDirectory::with_config(1, "https://old.example/hook", &[EventKind::Message]);
        let ledger = Arc::new(MemoryLedger::default());
        let (emitter, _rx) = emitter_with(directory.clone(), Arc::clone(&ledger));

        let event = GatewayEvent::new(1, EventKind::Message, serde_json::json!({}));
        let row = emitter.handle_event(&event).await.unwrap().unwrap();
        assert_eq!(row.webhook_url, "https://old.example/hook");

        directory.set_config(1, "https://new.example/hook", &[EventKind::Message]);

        // The stored delivery keeps the URL snapshotted at emission time.
        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.webhook_url, "https://old.example/hook");

        // New events pick up the new URL.
        let row2 = emitter.handle_event(&event).await.unwrap().unwrap();
        assert_eq!(row2.webhook_url, "https://new.example/hook");
    }
}
