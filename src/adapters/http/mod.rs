pub mod routes;
pub mod state;
pub mod ws;

use axum::{routing::{get, post}, Router};
use std::path::Path;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::adapters::http::state::HttpState;
use crate::adapters::http::ws::ws_handler;

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/frame", get(routes::get_frame))
        .route("/api/reconnect", post(routes::request_reconnect))
        .route("/settings", post(routes::update_settings))
        .route("/settings/:receiver", get(routes::get_settings))
        .route("/object/:name", get(routes::get_object))
        .route("/objects", get(routes::get_objects))
        .route("/ws/stream", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router completo con los archivos estáticos de la interfaz como fallback.
pub fn router_with_static(state: HttpState, static_dir: &Path) -> Router {
    router(state).fallback_service(ServeDir::new(static_dir))
}
