//! Inbound event recording: the seam between the external network
//! connector and the delivery pipeline.
//!
//! `POST /instances/{id}/events` publishes a [`GatewayEvent`] on the bus
//! (the emitter turns it into a webhook delivery if the instance is
//! subscribed). Two kinds additionally carry side effects on the instance
//! row: `connection` reports drive the externally-completed lifecycle
//! transitions, and `qr_updated` stores the latest pairing code.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chatgate_core::error::CoreError;
use chatgate_core::types::DbId;
use chatgate_core::{EventKind, InstanceStatus};
use chatgate_db::repositories::{InstanceLogRepo, InstanceRepo};
use chatgate_events::GatewayEvent;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body for `POST /instances/{id}/events`.
#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub event: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// POST /api/v1/instances/{id}/events
///
/// Record an event reported by the instance's network connector. Returns
/// 202: delivery happens asynchronously and its outcome is only visible
/// via the deliveries listing.
pub async fn record_event(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<RecordEventRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    match body.event {
        EventKind::Connection => apply_connection_report(&state, id, &body.data).await?,
        EventKind::QrUpdated => {
            let qr = body.data.get("qr").and_then(|v| v.as_str());
            InstanceRepo::set_qr_code(&state.pool, id, qr).await?;
        }
        EventKind::Message | EventKind::MessageStatus => {}
    }

    state
        .event_bus
        .publish(GatewayEvent::new(id, body.event, body.data));

    tracing::debug!(instance_id = id, kind = %body.event, "Inbound event recorded");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "data": { "recorded": true } })),
    ))
}

/// Apply a `connection` report's lifecycle side effect.
///
/// `connected` completes the external handshake: `starting -> running`
/// plus the reported phone number. A report for an instance that is not
/// `starting` is stale and ignored. `disconnected` stops the instance
/// from any state; `error` marks it failed. Other status strings carry no
/// side effect and flow through as plain events.
async fn apply_connection_report(
    state: &AppState,
    id: DbId,
    data: &serde_json::Value,
) -> AppResult<()> {
    let Some(reported) = data.get("status").and_then(|v| v.as_str()) else {
        return Ok(());
    };

    match reported {
        "connected" => {
            let phone = data
                .get("phone_number")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AppError::Core(CoreError::Validation(
                        "connected report requires phone_number".into(),
                    ))
                })?;

            match InstanceRepo::set_connected(&state.pool, id, phone).await? {
                Some(_) => {
                    InstanceLogRepo::insert(
                        &state.pool,
                        id,
                        "info",
                        "Connected to network",
                        Some(&serde_json::json!({ "phone_number": phone })),
                    )
                    .await?;
                }
                None => {
                    tracing::debug!(
                        instance_id = id,
                        "Stale connected report, instance is not starting"
                    );
                }
            }
        }
        "disconnected" => {
            InstanceRepo::force_transition(&state.pool, id, InstanceStatus::Stopped).await?;
            InstanceLogRepo::insert(&state.pool, id, "info", "Disconnected from network", None)
                .await?;
        }
        "error" => {
            InstanceRepo::force_transition(&state.pool, id, InstanceStatus::Error).await?;
            InstanceLogRepo::insert(&state.pool, id, "error", "Gateway reported an error", None)
                .await?;
        }
        _ => {}
    }

    Ok(())
}
