//! Handler for the webhook delivery listing.

use axum::extract::{Path, Query, State};
use axum::Json;
use chatgate_core::types::DbId;
use chatgate_db::models::delivery::WebhookDeliveryRow;
use chatgate_db::repositories::{DeliveryRepo, InstanceRepo};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/instances/{id}/deliveries?limit=
///
/// Delivery history for an instance, newest first. Pure read; delivery
/// state is only ever mutated by the scheduler.
pub async fn list_deliveries(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<Vec<WebhookDeliveryRow>>>> {
    InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    let deliveries = DeliveryRepo::list_for_instance(&state.pool, id, params.clamped()).await?;
    Ok(Json(DataResponse { data: deliveries }))
}
