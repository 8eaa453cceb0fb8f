// Step execution callback endpoint
//
// POST /execute-step is the queue's delivery target. Responses steer the
// queue's retry behavior: 200 acknowledges (including stale duplicates
// and logic failures), 404 is terminal, 5xx asks for redelivery.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use runlet_core::{RuntimeError, StepTask};
use runlet_queue::WorkQueue;

use crate::AppState;

use super::ApiError;

/// GET /execute-step health response
#[derive(Debug, Serialize, ToSchema)]
pub struct StepHealthResponse {
    pub status: &'static str,
    pub queue_healthy: bool,
    pub pending: usize,
    pub dispatched: u64,
    pub failed: u64,
}

/// POST /execute-step - execute one queued step
#[utoipa::path(
    post,
    path = "/execute-step",
    responses(
        (status = 200, description = "Step summary"),
        (status = 400, description = "Missing session id"),
        (status = 404, description = "Unknown session"),
        (status = 500, description = "Executor fault; the queue retries")
    ),
    tag = "steps"
)]
pub async fn execute_step(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Validate the id before full deserialization so a missing id is a
    // 400 rather than an unprocessable body
    if body
        .get("sessionId")
        .and_then(|v| v.as_str())
        .is_none_or(str::is_empty)
    {
        return Err(RuntimeError::validation("sessionId is required").into());
    }

    let task: StepTask = serde_json::from_value(body)
        .map_err(|e| RuntimeError::validation(format!("invalid step task: {e}")))?;

    let summary = state.engine.execute_step(task).await?;
    Ok(Json(json!(summary)))
}

/// GET /execute-step - queue health check
#[utoipa::path(
    get,
    path = "/execute-step",
    responses((status = 200, description = "Queue health", body = StepHealthResponse)),
    tag = "steps"
)]
pub async fn step_health(State(state): State<AppState>) -> Json<StepHealthResponse> {
    let queue = state.coordinator.queue();
    let stats = queue.stats();
    Json(StepHealthResponse {
        status: "ok",
        queue_healthy: queue.health().await,
        pending: stats.pending,
        dispatched: stats.dispatched,
        failed: stats.failed,
    })
}
