//! Delivery ledger: durable bookkeeping for every webhook attempt.
//!
//! [`DeliveryLedger`] is the single interface the emitter and scheduler
//! talk to, so a process restart can rehydrate the due set from persisted
//! `next_retry_at` values and tests can swap in an in-memory ledger.

use async_trait::async_trait;
use chatgate_core::types::{DbId, Timestamp};
use chatgate_db::models::delivery::{NewDelivery, WebhookDeliveryRow};
use chatgate_db::repositories::DeliveryRepo;
use chatgate_db::DbPool;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The persistence collaborator failed.
///
/// Fatal for the specific operation only; callers must treat the attempted
/// mutation as not-yet-committed and leave their in-memory bookkeeping
/// untouched.
#[derive(Debug, thiserror::Error)]
#[error("Storage unavailable: {0}")]
pub struct LedgerError(pub String);

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// AttemptRecord
// ---------------------------------------------------------------------------

/// The outcome of one delivery attempt, written to the ledger by the
/// scheduler (workers never write directly).
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// New delivery status: `pending` (will retry), `delivered`, or
    /// `failed`.
    pub status: &'static str,
    /// HTTP status of the attempt, if a response was received.
    pub response_status: Option<i32>,
    /// Response body (truncated), if a response was received.
    pub response_body: Option<String>,
    /// Post-increment attempt count.
    pub retry_count: i32,
    /// When to try again; `None` once terminal.
    pub next_retry_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// DeliveryLedger
// ---------------------------------------------------------------------------

/// Append-style record of delivery state.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Persist a new delivery (status `pending`, `retry_count` 0).
    async fn create(&self, new: NewDelivery) -> Result<WebhookDeliveryRow, LedgerError>;

    /// Record the outcome of one attempt.
    async fn record_attempt(&self, id: DbId, attempt: AttemptRecord) -> Result<(), LedgerError>;

    /// All non-terminal deliveries, for scheduler rehydration after a
    /// restart.
    async fn list_pending(&self) -> Result<Vec<WebhookDeliveryRow>, LedgerError>;
}

// ---------------------------------------------------------------------------
// PgLedger
// ---------------------------------------------------------------------------

/// Postgres-backed ledger delegating to [`DeliveryRepo`].
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLedger for PgLedger {
    async fn create(&self, new: NewDelivery) -> Result<WebhookDeliveryRow, LedgerError> {
        Ok(DeliveryRepo::create(&self.pool, &new).await?)
    }

    async fn record_attempt(&self, id: DbId, attempt: AttemptRecord) -> Result<(), LedgerError> {
        DeliveryRepo::record_attempt(
            &self.pool,
            id,
            attempt.status,
            attempt.response_status,
            attempt.response_body.as_deref(),
            attempt.retry_count,
            attempt.next_retry_at,
        )
        .await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<WebhookDeliveryRow>, LedgerError> {
        Ok(DeliveryRepo::list_pending(&self.pool).await?)
    }
}
