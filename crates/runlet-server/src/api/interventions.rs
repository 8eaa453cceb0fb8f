// Human intervention routes

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use runlet_core::RuntimeError;

use crate::coordinator::{InterventionAction, InterventionInput, PendingIntervention};
use crate::AppState;

use super::ApiError;

/// Request body for POST /human-intervention
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterventionRequest {
    pub session_id: Option<String>,
    pub action: InterventionAction,
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
    pub reason: Option<String>,
}

/// Response for POST /human-intervention
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterventionResponse {
    pub task_id: String,
    pub status: &'static str,
}

/// Query parameters for GET /human-intervention
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListInterventionsQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Response for GET /human-intervention
#[derive(Debug, Serialize, ToSchema)]
pub struct ListInterventionsResponse {
    pub pending: Vec<PendingIntervention>,
}

/// POST /human-intervention - approve, reject, answer, or select
#[utoipa::path(
    post,
    path = "/human-intervention",
    request_body = InterventionRequest,
    responses(
        (status = 200, description = "Resume step scheduled", body = InterventionResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not waiting for human input")
    ),
    tag = "interventions"
)]
pub async fn process_intervention(
    State(state): State<AppState>,
    Json(request): Json<InterventionRequest>,
) -> Result<Json<InterventionResponse>, ApiError> {
    let session_id = request
        .session_id
        .ok_or_else(|| RuntimeError::validation("sessionId is required"))?;

    let task_id = state
        .coordinator
        .process_intervention(InterventionInput {
            session_id,
            action: request.action,
            data: request.data.unwrap_or(serde_json::Value::Null),
            reason: request.reason,
        })
        .await?;

    Ok(Json(InterventionResponse {
        task_id,
        status: "scheduled",
    }))
}

/// GET /human-intervention - list sessions awaiting input
#[utoipa::path(
    get,
    path = "/human-intervention",
    params(ListInterventionsQuery),
    responses(
        (status = 200, description = "Pending interventions", body = ListInterventionsResponse)
    ),
    tag = "interventions"
)]
pub async fn list_interventions(
    State(state): State<AppState>,
    Query(query): Query<ListInterventionsQuery>,
) -> Result<Json<ListInterventionsResponse>, ApiError> {
    let pending = state
        .coordinator
        .list_pending_interventions(query.session_id.as_deref(), query.user_id.as_deref())
        .await?;
    Ok(Json(ListInterventionsResponse { pending }))
}
