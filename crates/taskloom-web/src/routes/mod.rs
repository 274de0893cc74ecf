//! Route definitions.

pub mod api;
pub mod ws;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(api::analyze))
        .route("/api/context", get(api::get_context))
        .route("/api/chat/context", post(api::chat_context))
        .route("/api/graph", get(api::get_graph))
        .route("/api/graph/reset", post(api::reset_graph))
        .route("/api/stats", get(api::get_stats))
        .route("/api/pipeline", get(api::get_pipeline_events))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
