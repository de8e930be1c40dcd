//! Webhook delivery models and DTOs.

use chatgate_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Terminal-or-pending state of a delivery.
pub mod status {
    /// Queued or awaiting retry.
    pub const PENDING: &str = "pending";
    /// Accepted by the receiver (2xx).
    pub const DELIVERED: &str = "delivered";
    /// Retry budget exhausted; no further attempts.
    pub const FAILED: &str = "failed";
}

/// A row from the `webhook_deliveries` table.
///
/// `payload` and `webhook_url` are snapshots taken at emission time and
/// never change afterwards. `retry_count` and `status` are monotonic:
/// `retry_count` only increases and `status` only moves
/// `pending -> delivered | failed`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookDeliveryRow {
    pub id: DbId,
    pub instance_id: DbId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub webhook_url: String,
    pub status: String,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Insert payload for a new delivery (always starts `pending` with
/// `retry_count = 0`).
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub instance_id: DbId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub webhook_url: String,
    pub next_retry_at: Timestamp,
}
