//! Handlers for the `/instances` resource: create, list, fetch, webhook
//! config, lifecycle control, and QR retrieval.
//!
//! All endpoints require authentication via [`AuthUser`], and every
//! instance-scoped read goes through `find_for_user` so a missing row and
//! a foreign row are indistinguishable to the caller.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chatgate_core::api_keys::generate_api_key;
use chatgate_core::error::CoreError;
use chatgate_core::lifecycle::next_status;
use chatgate_core::types::DbId;
use chatgate_core::{ControlAction, InstanceStatus};
use chatgate_db::models::instance::{Instance, UpdateWebhookConfig};
use chatgate_db::repositories::{InstanceLogRepo, InstanceRepo, UserRepo};
use chatgate_db::DbPool;
use chatgate_events::GatewayEvent;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// How many times a control request re-reads and re-applies the legality
/// rules after losing a status CAS race.
const TRANSITION_RETRIES: usize = 3;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body for `POST /instances`.
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub instance_name: String,
}

/// Body for `POST /instances/{id}/control`.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

/// Response body for `POST /instances`.
///
/// The creation response is the only place `api_key` leaves the service;
/// `Instance` itself serializes with the key skipped.
#[derive(Debug, Serialize)]
pub struct CreatedInstance {
    #[serde(flatten)]
    pub instance: Instance,
    pub api_key: String,
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// POST /api/v1/instances
///
/// Create a new instance in `creating` status with a freshly generated
/// API key.
pub async fn create_instance(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<CreatedInstance>>)> {
    let name = body.instance_name.trim();
    if name.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "instance_name must not be empty".into(),
        )));
    }

    // A valid token for a since-deleted user must not create orphan rows.
    UserRepo::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized("User no longer exists".into()))
        })?;

    let api_key = generate_api_key();
    let instance = InstanceRepo::create(&state.pool, auth.user_id, name, &api_key).await?;

    InstanceLogRepo::insert(&state.pool, instance.id, "info", "Instance created", None).await?;

    tracing::info!(
        instance_id = instance.id,
        user_id = auth.user_id,
        "Instance created"
    );

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedInstance { instance, api_key },
        }),
    ))
}

/// GET /api/v1/instances
///
/// List the authenticated user's instances, newest first.
pub async fn list_instances(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<Instance>>>> {
    let instances = InstanceRepo::list_for_user(&state.pool, auth.user_id).await?;
    Ok(Json(DataResponse { data: instances }))
}

/// GET /api/v1/instances/{id}
pub async fn get_instance(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let instance = InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;
    Ok(Json(DataResponse { data: instance }))
}

// ---------------------------------------------------------------------------
// Webhook configuration
// ---------------------------------------------------------------------------

/// PUT /api/v1/instances/{id}/config
///
/// Replace the instance's webhook configuration. Both fields are written
/// as provided (`null` clears). Deliveries already created keep their
/// snapshotted URL.
pub async fn update_config(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<UpdateWebhookConfig>,
) -> AppResult<Json<DataResponse<Instance>>> {
    if let Some(url) = body.webhook_url.as_deref() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::Core(CoreError::Validation(
                "webhook_url must be an http(s) URL".into(),
            )));
        }
    }

    let events_json = body
        .webhook_events
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::InternalError(format!("Failed to encode webhook_events: {e}")))?;

    let instance = InstanceRepo::update_webhook_config(
        &state.pool,
        id,
        auth.user_id,
        body.webhook_url.as_deref(),
        events_json.as_ref(),
    )
    .await?
    .ok_or_else(|| AppError::instance_not_found(id))?;

    tracing::info!(
        instance_id = id,
        has_url = instance.webhook_url.is_some(),
        "Webhook configuration updated"
    );

    Ok(Json(DataResponse { data: instance }))
}

// ---------------------------------------------------------------------------
// Lifecycle control
// ---------------------------------------------------------------------------

/// POST /api/v1/instances/{id}/control
///
/// Apply a `start` / `stop` / `restart` action through the lifecycle state
/// machine and publish the resulting `connection` event. Returns the
/// updated instance; illegal actions map to 409.
pub async fn control_instance(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ControlRequest>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let instance = InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    let updated = apply_action(&state.pool, instance, body.action).await?;
    let new_status = updated.status()?;

    InstanceLogRepo::insert(
        &state.pool,
        id,
        "info",
        &format!("Control action '{}' applied", body.action.as_str()),
        Some(&serde_json::json!({
            "action": body.action.as_str(),
            "status": new_status.as_str(),
        })),
    )
    .await?;

    state
        .event_bus
        .publish(GatewayEvent::connection(id, new_status.as_str()));

    tracing::info!(
        instance_id = id,
        action = body.action.as_str(),
        status = new_status.as_str(),
        "Instance control action applied"
    );

    Ok(Json(DataResponse { data: updated }))
}

/// Run one control action through the state machine.
///
/// `restart` is legal from any state and sets `starting` unconditionally.
/// `start`/`stop` use the compare-and-set transition; losing the race
/// re-reads the fresh status and re-applies the legality rules, so two
/// back-to-back requests behave as if applied sequentially.
async fn apply_action(
    pool: &DbPool,
    instance: Instance,
    action: ControlAction,
) -> AppResult<Instance> {
    if action == ControlAction::Restart {
        return InstanceRepo::force_transition(pool, instance.id, InstanceStatus::Starting)
            .await?
            .ok_or_else(|| AppError::instance_not_found(instance.id));
    }

    let mut current = instance;
    for _ in 0..TRANSITION_RETRIES {
        let status = current.status()?;
        let target = next_status(status, action)?;

        match InstanceRepo::try_transition(pool, current.id, status, target).await? {
            Some(updated) => return Ok(updated),
            None => {
                current = InstanceRepo::find_by_id(pool, current.id)
                    .await?
                    .ok_or_else(|| AppError::instance_not_found(current.id))?;
            }
        }
    }

    Err(AppError::Core(CoreError::Conflict(
        "Instance status is changing, retry the request".into(),
    )))
}

// ---------------------------------------------------------------------------
// QR code
// ---------------------------------------------------------------------------

/// GET /api/v1/instances/{id}/qr
///
/// The current pairing QR code, or `null` when none has been reported.
pub async fn get_qr_code(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    let instance = InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    Ok(Json(serde_json::json!({
        "data": { "qr_code": instance.qr_code }
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
