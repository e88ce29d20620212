//! API route definitions.

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Single-user local tool; any local page may talk to the API.
    let cors = CorsLayer::permissive();

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/device-status", get(handlers::device_status))
        .route("/device-events", get(handlers::device_events))
        .route("/refresh-device-scan", get(handlers::refresh_device_scan))
        .route(
            "/open-device-directory",
            get(handlers::open_device_directory),
        )
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
