use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::state::AppState;
use super::{handlers, ws};

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Client channels
        .route("/ws/glasses", get(ws::ws_glasses))
        .route("/ws/tpa", get(ws::ws_tpa))
        // Diagnostics
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:session_id", get(handlers::get_session))
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_transcript),
        )
        .route(
            "/sessions/:session_id/displays/:package_name",
            get(handlers::get_displays),
        )
        .route(
            "/sessions/:session_id/subscriptions/:package_name",
            get(handlers::get_subscriptions),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
