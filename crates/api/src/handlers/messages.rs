//! Handler for the send-message gate.

use axum::extract::{Path, State};
use axum::Json;
use chatgate_core::error::CoreError;
use chatgate_core::types::DbId;
use chatgate_core::InstanceStatus;
use chatgate_db::repositories::InstanceRepo;
use rand::Rng;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body for `POST /instances/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Destination identifier on the external network.
    pub to: String,
    pub message: String,
}

/// POST /api/v1/instances/{id}/messages
///
/// Accept a message for sending. The instance must be `running` and have
/// a connected phone number; both checks fail with 409. On acceptance the
/// instance's `last_seen` is touched and a generated message id is
/// returned.
pub async fn send_message(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if body.to.trim().is_empty() || body.message.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "to and message must not be empty".into(),
        )));
    }

    let instance = InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    let status = instance.status()?;
    if status != InstanceStatus::Running {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Cannot send message: instance is {status}"
        ))));
    }
    if instance.phone_number.is_none() {
        return Err(AppError::Core(CoreError::Conflict(
            "Instance is not connected".into(),
        )));
    }

    InstanceRepo::touch_last_seen(&state.pool, id).await?;

    let message_id = generate_message_id();
    tracing::info!(instance_id = id, message_id = %message_id, "Message accepted");

    Ok(Json(serde_json::json!({
        "data": { "success": true, "message_id": message_id }
    })))
}

/// Opaque message id: `msg_<unix-millis>_<random base36 suffix>`.
fn generate_message_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| {
            let n = rng.random_range(0..36u32);
            char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("msg_{millis}_{suffix}")
}
