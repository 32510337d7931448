//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bus::SystemBus;
use crate::config::Config;
use crate::engine::{AdmissionGuard, TaskRegistry};

use super::{crashdump, dumps, tasks, update};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub bus: Arc<dyn SystemBus>,
    pub registry: Arc<TaskRegistry>,
    /// At most one firmware update in flight.
    pub update_guard: AdmissionGuard,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/redfish/v1/TaskService", get(tasks::task_service))
        .route("/redfish/v1/TaskService/Tasks", get(tasks::list_tasks))
        .route("/redfish/v1/TaskService/Tasks/:id", get(tasks::get_task))
        .route("/redfish/v1/TaskService/Tasks/:id/Monitor", get(tasks::task_monitor))
        .route(
            "/redfish/v1/Managers/bmc/LogServices/Dump/Actions/LogService.CollectDiagnosticData",
            post(dumps::collect_diagnostic_data),
        )
        .route(
            "/redfish/v1/Systems/system/LogServices/Crashdump/Actions/LogService.CollectDiagnosticData",
            post(crashdump::collect_crash_data),
        )
        .route(
            "/redfish/v1/UpdateService/Actions/UpdateService.SimpleUpdate",
            post(update::simple_update),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config, bus: Arc<dyn SystemBus>) -> anyhow::Result<()> {
    let registry = Arc::new(TaskRegistry::new(Arc::clone(&bus), config.task_history_capacity));
    let state = Arc::new(AppState {
        config: config.clone(),
        bus,
        registry: Arc::clone(&registry),
        update_guard: AdmissionGuard::new("firmware-update"),
    });

    let app = router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Every still-live task is forcibly cancelled and its subscription
    // and timer released before the process exits.
    registry.shutdown().await;
    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_tasks": state.registry.live_count().await,
    }))
}
