//! Route definitions for the InvHub HTTP API.
//!
//! All routes are mounted under `/api`. The router receives `AppState` and
//! passes it to all handlers via Axum's `State` extractor.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::middleware::compression::build_compression_layer;
use crate::middleware::cors::build_cors_layer;
use crate::state::AppState;

/// Build the complete Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(backup_routes())
        .merge(health_routes());

    let cors = build_cors_layer(&state.config.server.cors);

    Router::new()
        .nest("/api", api_routes)
        .layer(build_compression_layer())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum_middleware::from_fn(
            middleware::logging::request_logging,
        ))
        .with_state(state)
}

/// Admin snapshot management
fn backup_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/backups",
            get(handlers::backup::list_backups).post(handlers::backup::create_backup),
        )
        .route(
            "/admin/backups/{name}",
            get(handlers::backup::get_backup).delete(handlers::backup::delete_backup),
        )
        .route(
            "/admin/backups/{name}/download",
            get(handlers::backup::download_backup),
        )
        .route(
            "/admin/backups/{name}/verify",
            get(handlers::backup::verify_backup),
        )
        .route(
            "/admin/backups/{name}/restore",
            post(handlers::backup::restore_backup),
        )
}

/// Liveness probe
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health))
}
