//! Handler for the instance log listing.

use axum::extract::{Path, Query, State};
use axum::Json;
use chatgate_core::types::DbId;
use chatgate_db::models::instance_log::InstanceLog;
use chatgate_db::repositories::{InstanceLogRepo, InstanceRepo};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/instances/{id}/logs?limit=
///
/// Activity log for an instance, newest first.
pub async fn list_logs(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<DataResponse<Vec<InstanceLog>>>> {
    InstanceRepo::find_for_user(&state.pool, id, auth.user_id)
        .await?
        .ok_or_else(|| AppError::instance_not_found(id))?;

    let logs = InstanceLogRepo::list_for_instance(&state.pool, id, params.clamped()).await?;
    Ok(Json(DataResponse { data: logs }))
}
