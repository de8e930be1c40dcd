use std::sync::Arc;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: chatgate_db::DbPool,
    /// Server configuration (read by middleware, auth, and handlers).
    pub config: Arc<ServerConfig>,
    /// Gateway event bus; handlers publish here, the emitter subscribes.
    pub event_bus: Arc<chatgate_events::EventBus>,
}
