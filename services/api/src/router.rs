//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application: the
//! call webhook, the media-stream WebSocket endpoint, and the OpenAPI document.

use crate::{handlers, models::StatusMessage, state::AppState, ws::ws_handler};

use axum::{Json, Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::root, handlers::incoming_call),
    components(schemas(StatusMessage)),
    tags(
        (name = "Call Bridge", description = "Connects phone calls to a realtime voice agent")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route(
            "/incoming-call",
            get(handlers::incoming_call).post(handlers::incoming_call),
        )
        .route("/media-stream", get(ws_handler))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
