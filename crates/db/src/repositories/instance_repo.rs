//! Repository for the `instances` table.
//!
//! Lifecycle transitions go through [`InstanceRepo::try_transition`], a
//! single compare-and-swap UPDATE so that the status read-modify-write is
//! atomic per instance. Different instances are fully independent.

use chatgate_core::lifecycle::InstanceStatus;
use chatgate_core::types::DbId;
use sqlx::PgPool;

use crate::models::instance::Instance;

const COLUMNS: &str = "\
    id, user_id, instance_name, status, qr_code, phone_number, \
    webhook_url, webhook_events, api_key, container_id, last_seen, \
    created_at, updated_at";

/// Provides CRUD and lifecycle operations for gateway instances.
pub struct InstanceRepo;

impl InstanceRepo {
    /// Create a new instance in `creating` status with a fresh API key.
    pub async fn create(
        pool: &PgPool,
        user_id: DbId,
        instance_name: &str,
        api_key: &str,
    ) -> Result<Instance, sqlx::Error> {
        let query = format!(
            "INSERT INTO instances (user_id, instance_name, status, api_key) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Instance>(&query)
            .bind(user_id)
            .bind(instance_name)
            .bind(InstanceStatus::Creating.as_str())
            .bind(api_key)
            .fetch_one(pool)
            .await
    }

    /// Find an instance by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM instances WHERE id = $1");
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find an instance by ID, scoped to its owner.
    ///
    /// Returns `None` both when the instance does not exist and when it
    /// belongs to a different user; callers surface the two cases
    /// identically so ownership is never leaked.
    pub async fn find_for_user(
        pool: &PgPool,
        id: DbId,
        user_id: DbId,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM instances WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// List all instances owned by a user, newest first.
    pub async fn list_for_user(pool: &PgPool, user_id: DbId) -> Result<Vec<Instance>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM instances WHERE user_id = $1 ORDER BY created_at DESC");
        sqlx::query_as::<_, Instance>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Atomically transition an instance `from` -> `to`.
    ///
    /// The `status = $2` guard makes the read-modify-write a single atomic
    /// step: a concurrent control request that already moved the status
    /// causes this to return `None`, and the caller re-reads and re-applies
    /// the legality rules against the fresh status.
    pub async fn try_transition(
        pool: &PgPool,
        id: DbId,
        from: InstanceStatus,
        to: InstanceStatus,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!(
            "UPDATE instances \
             SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Unconditionally set an instance's status (restart path; legal from
    /// any state).
    pub async fn force_transition(
        pool: &PgPool,
        id: DbId,
        to: InstanceStatus,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!(
            "UPDATE instances \
             SET status = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .bind(to.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Record a successful handshake reported by the network connector:
    /// `starting -> running`, capturing the connected phone number.
    pub async fn set_connected(
        pool: &PgPool,
        id: DbId,
        phone_number: &str,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!(
            "UPDATE instances \
             SET status = $3, phone_number = $2, updated_at = NOW() \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .bind(phone_number)
            .bind(InstanceStatus::Running.as_str())
            .bind(InstanceStatus::Starting.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Update the webhook configuration.
    ///
    /// Deliveries already created keep the URL snapshotted at emission
    /// time; this only affects future emissions.
    pub async fn update_webhook_config(
        pool: &PgPool,
        id: DbId,
        user_id: DbId,
        webhook_url: Option<&str>,
        webhook_events: Option<&serde_json::Value>,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let query = format!(
            "UPDATE instances \
             SET webhook_url = $3, webhook_events = $4, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Instance>(&query)
            .bind(id)
            .bind(user_id)
            .bind(webhook_url)
            .bind(webhook_events)
            .fetch_optional(pool)
            .await
    }

    /// Store the latest pairing QR code.
    pub async fn set_qr_code(
        pool: &PgPool,
        id: DbId,
        qr_code: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET qr_code = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(qr_code)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Update `last_seen` after successful outbound activity.
    pub async fn touch_last_seen(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET last_seen = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
