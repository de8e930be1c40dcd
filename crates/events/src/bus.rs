//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`GatewayEvent`]s out to any number of subscribers;
//! the event emitter is the subscriber that turns them into webhook
//! deliveries. Shared via `Arc<EventBus>` across the application.

use chatgate_core::types::{DbId, Timestamp};
use chatgate_core::EventKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// GatewayEvent
// ---------------------------------------------------------------------------

/// A typed occurrence on a gateway instance.
///
/// Ephemeral: events are not persisted directly, they are the input to
/// delivery creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// The instance this event originated from.
    pub instance_id: DbId,

    /// Which of the four event kinds occurred.
    pub kind: EventKind,

    /// Free-form JSON payload specific to the event kind.
    pub data: serde_json::Value,

    /// When the event occurred (UTC, stamped at construction).
    pub occurred_at: Timestamp,
}

impl GatewayEvent {
    /// Create an event stamped with the current time.
    pub fn new(instance_id: DbId, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            instance_id,
            kind,
            data,
            occurred_at: Utc::now(),
        }
    }

    /// Shorthand for a `connection` status-change event.
    pub fn connection(instance_id: DbId, status: &str) -> Self {
        Self::new(
            instance_id,
            EventKind::Connection,
            serde_json::json!({ "status": status }),
        )
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`GatewayEvent`].
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: GatewayEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(GatewayEvent::new(
            42,
            EventKind::Message,
            serde_json::json!({"from": "+15550100", "body": "hi"}),
        ));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.instance_id, 42);
        assert_eq!(received.kind, EventKind::Message);
        assert_eq!(received.data["body"], "hi");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(GatewayEvent::connection(7, "starting"));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.kind, EventKind::Connection);
        assert_eq!(e2.data["status"], "starting");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(GatewayEvent::connection(1, "stopped"));
    }
}
