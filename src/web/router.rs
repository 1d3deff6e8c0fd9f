//! Router configuration for the relay.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::StorageConfig;
use crate::file::UPLOADS_URL_PREFIX;

use super::ws::{chat_ws_handler, ChatWsState};

/// Create the main router.
///
/// - `GET /ws`: chat WebSocket
/// - `GET /health`: liveness probe
/// - `/uploads/*`: stored images
/// - everything else: the static web client
pub fn create_router(state: Arc<ChatWsState>, storage: &StorageConfig) -> Router {
    let ws_routes = Router::new()
        .route("/ws", get(chat_ws_handler))
        .with_state(state);

    Router::new()
        .merge(ws_routes)
        .merge(create_health_router())
        .nest_service(UPLOADS_URL_PREFIX, ServeDir::new(&storage.uploads_dir))
        .fallback_service(ServeDir::new(&storage.static_dir))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
