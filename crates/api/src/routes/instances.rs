//! Route definitions for the `/instances` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{deliveries, events, instances, logs, messages};
use crate::state::AppState;

/// Routes mounted at `/instances`.
///
/// ```text
/// POST   /                    -> create_instance
/// GET    /                    -> list_instances
/// GET    /{id}                -> get_instance
/// PUT    /{id}/config         -> update_config
/// POST   /{id}/control        -> control_instance
/// GET    /{id}/qr             -> get_qr_code
/// POST   /{id}/messages       -> send_message
/// POST   /{id}/events         -> record_event
/// GET    /{id}/deliveries     -> list_deliveries
/// GET    /{id}/logs           -> list_logs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(instances::create_instance).get(instances::list_instances),
        )
        .route("/{id}", get(instances::get_instance))
        .route("/{id}/config", put(instances::update_config))
        .route("/{id}/control", post(instances::control_instance))
        .route("/{id}/qr", get(instances::get_qr_code))
        .route("/{id}/messages", post(messages::send_message))
        .route("/{id}/events", post(events::record_event))
        .route("/{id}/deliveries", get(deliveries::list_deliveries))
        .route("/{id}/logs", get(logs::list_logs))
}
