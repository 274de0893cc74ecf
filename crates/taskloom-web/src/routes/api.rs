//! REST endpoints over the engine's capability API.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskloom_core::enrich::ContextDocument;
use taskloom_core::error::EngineError;
use taskloom_core::types::PageVisit;
use taskloom_engine::engine::{ChatContext, EngineStats, GraphView};
use taskloom_engine::telemetry::PipelineRun;

/// Engine errors mapped onto HTTP statuses.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Admission(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Analyze a page visit and return the published context document.
pub async fn analyze(
    State(state): State<AppState>,
    Json(visit): Json<PageVisit>,
) -> Result<Json<ContextDocument>, ApiError> {
    let document = state.engine.analyze(visit).await?;
    Ok(Json((*document).clone()))
}

/// Last published context document, or null.
pub async fn get_context(State(state): State<AppState>) -> Json<Option<ContextDocument>> {
    Json(state.engine.get_context().map(|doc| (*doc).clone()))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

/// Re-enrich the context against the current graph for a chat query.
pub async fn chat_context(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatContext> {
    Json(state.engine.chat_context(&request.query))
}

/// Full graph view.
pub async fn get_graph(State(state): State<AppState>) -> Json<GraphView> {
    Json(state.engine.get_graph())
}

/// Empty the graph and the cached context.
pub async fn reset_graph(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.reset_graph();
    Json(json!({ "ok": true }))
}

/// Engine counters.
pub async fn get_stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.get_stats())
}

#[derive(Debug, Serialize)]
pub struct PipelineEventsResponse {
    pub runs: Vec<PipelineRun>,
}

/// Recent pipeline runs with step telemetry.
pub async fn get_pipeline_events(State(state): State<AppState>) -> Json<PipelineEventsResponse> {
    Json(PipelineEventsResponse {
        runs: state.engine.get_pipeline_events(),
    })
}
