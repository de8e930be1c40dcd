//! Messaging-gateway instance model and DTOs.

use chatgate_core::error::CoreError;
use chatgate_core::lifecycle::InstanceStatus;
use chatgate_core::types::{DbId, Timestamp};
use chatgate_core::EventKind;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `instances` table.
///
/// **Note:** `api_key` is never serialized in list/detail responses except
/// at creation time, where the handler copies it out explicitly.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Instance {
    pub id: DbId,
    pub user_id: DbId,
    pub instance_name: String,
    /// TEXT column; always one of the `InstanceStatus` wire names.
    pub status: String,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub webhook_url: Option<String>,
    /// JSONB array of subscribed event names, or NULL when unconfigured.
    pub webhook_events: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub container_id: Option<String>,
    pub last_seen: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Instance {
    /// Parse the stored status column.
    ///
    /// The CHECK constraint guarantees the value set; an out-of-set value
    /// means the schema and the enum have drifted and surfaces as an
    /// internal error.
    pub fn status(&self) -> Result<InstanceStatus, CoreError> {
        self.status.parse().map_err(|e| {
            CoreError::Internal(format!("Corrupt instance status in row {}: {e}", self.id))
        })
    }

    /// The instance's current webhook configuration, if any.
    pub fn webhook_config(&self) -> Option<WebhookConfig> {
        let url = self.webhook_url.clone()?;
        let events = self
            .webhook_events
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| s.parse::<EventKind>().ok())
                    .collect()
            })
            .unwrap_or_default();
        Some(WebhookConfig { url, events })
    }
}

/// The webhook configuration snapshot the event emitter reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    /// Subscribed event kinds. Empty set means nothing is delivered.
    pub events: Vec<EventKind>,
}

impl WebhookConfig {
    /// Whether this configuration subscribes to the given event kind.
    pub fn subscribes_to(&self, kind: EventKind) -> bool {
        self.events.contains(&kind)
    }
}

/// DTO for updating an instance's webhook configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWebhookConfig {
    pub webhook_url: Option<String>,
    pub webhook_events: Option<Vec<EventKind>>,
}
