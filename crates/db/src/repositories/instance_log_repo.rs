//! Repository for the `instance_logs` table.

use chatgate_core::types::DbId;
use sqlx::PgPool;

use crate::models::instance_log::InstanceLog;

const COLUMNS: &str = "id, instance_id, level, message, metadata, created_at";

/// Provides insert/list operations for instance logs.
pub struct InstanceLogRepo;

impl InstanceLogRepo {
    /// Append a log entry for an instance.
    pub async fn insert(
        pool: &PgPool,
        instance_id: DbId,
        level: &str,
        message: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<InstanceLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO instance_logs (instance_id, level, message, metadata) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InstanceLog>(&query)
            .bind(instance_id)
            .bind(level)
            .bind(message)
            .bind(metadata)
            .fetch_one(pool)
            .await
    }

    /// List log entries for an instance, newest first.
    pub async fn list_for_instance(
        pool: &PgPool,
        instance_id: DbId,
        limit: i64,
    ) -> Result<Vec<InstanceLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM instance_logs \
             WHERE instance_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, InstanceLog>(&query)
            .bind(instance_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
