//! Repository for the `webhook_deliveries` table.
//!
//! Rows are append-style: created once by the event emitter and mutated
//! only by the scheduler recording attempt outcomes. Nothing here deletes;
//! deliveries are retained for audit.

use chatgate_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::delivery::{status, NewDelivery, WebhookDeliveryRow};

const COLUMNS: &str = "\
    id, instance_id, event_type, payload, webhook_url, status, \
    response_status, response_body, retry_count, next_retry_at, \
    created_at, updated_at";

/// Provides create/record/list operations for webhook deliveries.
pub struct DeliveryRepo;

impl DeliveryRepo {
    /// Create a new delivery record (status `pending`, `retry_count` 0).
    pub async fn create(
        pool: &PgPool,
        new: &NewDelivery,
    ) -> Result<WebhookDeliveryRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhook_deliveries \
                 (instance_id, event_type, payload, webhook_url, status, next_retry_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WebhookDeliveryRow>(&query)
            .bind(new.instance_id)
            .bind(&new.event_type)
            .bind(&new.payload)
            .bind(&new.webhook_url)
            .bind(status::PENDING)
            .bind(new.next_retry_at)
            .fetch_one(pool)
            .await
    }

    /// Record the outcome of one delivery attempt in a single statement.
    ///
    /// Sets the new status, response data, post-increment retry count, and
    /// next retry time (NULL once terminal). The `retry_count <= $5` guard
    /// keeps the bookkeeping monotonic even if an outcome is replayed.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_attempt(
        pool: &PgPool,
        id: DbId,
        new_status: &str,
        response_status: Option<i32>,
        response_body: Option<&str>,
        retry_count: i32,
        next_retry_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = $2, response_status = $3, response_body = $4, \
                 retry_count = $5, next_retry_at = $6, updated_at = NOW() \
             WHERE id = $1 AND retry_count <= $5 AND status = $7",
        )
        .bind(id)
        .bind(new_status)
        .bind(response_status)
        .bind(response_body)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(status::PENDING)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// List deliveries for an instance, newest first.
    pub async fn list_for_instance(
        pool: &PgPool,
        instance_id: DbId,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM webhook_deliveries \
             WHERE instance_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, WebhookDeliveryRow>(&query)
            .bind(instance_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// List every non-terminal delivery, oldest scheduled first.
    ///
    /// Used on startup to rehydrate the scheduler's due set; past-due rows
    /// become immediately eligible.
    pub async fn list_pending(pool: &PgPool) -> Result<Vec<WebhookDeliveryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM webhook_deliveries \
             WHERE status = $1 \
             ORDER BY next_retry_at ASC, id ASC"
        );
        sqlx::query_as::<_, WebhookDeliveryRow>(&query)
            .bind(status::PENDING)
            .fetch_all(pool)
            .await
    }
}
