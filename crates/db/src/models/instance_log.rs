//! Instance log entry model.

use chatgate_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `instance_logs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InstanceLog {
    pub id: DbId,
    pub instance_id: DbId,
    /// `info`, `warn`, `error`, or `debug`.
    pub level: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}
