use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatgate_api::config::ServerConfig;
use chatgate_api::router::build_app_router;
use chatgate_api::state::AppState;
use chatgate_events::{
    DeliveryScheduler, EventBus, EventEmitter, PgDirectory, PgLedger, WebhookClient,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatgate_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = chatgate_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    chatgate_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    chatgate_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Delivery scheduler ---
    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let transport = Arc::new(WebhookClient::new(Duration::from_secs(
        config.webhook_timeout_secs,
    )));
    let (mut scheduler, scheduler_handle) = DeliveryScheduler::new(
        ledger.clone(),
        transport,
        config.webhook_retry_policy.clone(),
        config.webhook_workers,
    );
    scheduler
        .rehydrate()
        .await
        .expect("Failed to rehydrate pending webhook deliveries");

    let scheduler_cancel = tokio_util::sync::CancellationToken::new();
    let scheduler_task = {
        let cancel = scheduler_cancel.clone();
        tokio::spawn(async move {
            scheduler.run(cancel).await;
        })
    };

    // --- Event emitter ---
    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let emitter = EventEmitter::new(directory, ledger, scheduler_handle);
    let emitter_task = tokio::spawn(emitter.run(event_bus.subscribe()));

    tracing::info!("Delivery services started (emitter, scheduler)");

    // --- App state / router ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        event_bus: Arc::clone(&event_bus),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let shutdown_grace = Duration::from_secs(config.shutdown_timeout_secs);

    // Stop the scheduler; its drain phase records the outcomes of attempts
    // already in flight.
    scheduler_cancel.cancel();
    let _ = tokio::time::timeout(shutdown_grace, scheduler_task).await;
    tracing::info!("Delivery scheduler stopped");

    // Drop the event bus sender to close the broadcast channel, which
    // signals the emitter to shut down.
    drop(event_bus);
    let _ = tokio::time::timeout(shutdown_grace, emitter_task).await;
    tracing::info!("Event emitter stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
