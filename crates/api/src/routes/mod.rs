pub mod health;
pub mod instances;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /instances                        create, list
/// /instances/{id}                   fetch
/// /instances/{id}/config            webhook configuration (PUT)
/// /instances/{id}/control           start / stop / restart (POST)
/// /instances/{id}/qr                current pairing QR (GET)
/// /instances/{id}/messages          send-message gate (POST)
/// /instances/{id}/events            inbound connector events (POST)
/// /instances/{id}/deliveries        webhook delivery history (GET)
/// /instances/{id}/logs              activity log (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/instances", instances::router())
}
