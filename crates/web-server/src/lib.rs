//! # Meridian Web Server
//!
//! The HTTP surface of the run service. Handlers only translate between HTTP
//! and `RunService` calls; all state lives in the run store and the artifact
//! directories.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use jobs::RunService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub service: RunService,
}

/// Builds the application router over a running service.
pub fn router(service: RunService) -> Router {
    let app_state = Arc::new(AppState { service });
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/ready", get(handlers::readiness))
        .route("/api/runs", post(handlers::submit_run).get(handlers::list_runs))
        .route("/api/runs/:run_id", get(handlers::get_run))
        .route("/api/runs/:run_id/cancel", post(handlers::cancel_run))
        .route("/api/runs/:run_id/summary", get(handlers::get_summary))
        .route("/api/runs/:run_id/artifacts", get(handlers::list_artifacts))
        .route("/api/runs/:run_id/artifacts/:name", get(handlers::download_artifact))
        .route("/api/runs/:run_id/trades", get(handlers::get_trades))
        .route("/api/runs/:run_id/metrics", get(handlers::get_daily_metrics))
        .with_state(app_state)
        .layer(cors)
        // This middleware will automatically log information about every incoming request.
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
}

/// Serves the router until the process is stopped.
pub async fn serve(service: RunService, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
