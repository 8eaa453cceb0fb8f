// Session lifecycle routes

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use runlet_core::{
    CostLimit, Message, MessageRole, ModelConfig, Priority, RuntimeError, StepContext,
};

use crate::coordinator::{CreateSessionInput, CreatedSession, SessionStatusView};
use crate::AppState;

use super::ApiError;

/// One starting message
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageInput {
    /// Defaults to "user"
    pub role: Option<MessageRole>,
    pub content: String,
}

impl From<MessageInput> for Message {
    fn from(input: MessageInput) -> Self {
        match input.role.unwrap_or(MessageRole::User) {
            MessageRole::System => Message::system(input.content),
            MessageRole::Assistant => Message::assistant(input.content),
            MessageRole::Tool => Message::tool(input.content, ""),
            MessageRole::User => Message::user(input.content),
        }
    }
}

/// Request body for POST /session
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageInput>,
    pub model_config: Option<ModelConfig>,
    #[schema(value_type = Option<Object>)]
    pub agent_config: Option<serde_json::Value>,
    pub user_id: Option<String>,
    pub max_steps: Option<u32>,
    pub cost_limit: Option<CostLimit>,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_auto_start() -> bool {
    true
}

/// Query parameters for GET /session
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionQuery {
    pub session_id: Option<String>,
    pub include_history: Option<bool>,
    pub history_limit: Option<usize>,
}

/// Query parameters for DELETE /session
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionQuery {
    pub session_id: Option<String>,
}

/// Response for DELETE /session
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteSessionResponse {
    pub deleted: bool,
}

/// Request body for POST /start
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub session_id: Option<String>,
    pub context: Option<StepContext>,
    pub priority: Option<Priority>,
    /// Delay in milliseconds before the step fires
    pub delay: Option<u64>,
}

/// Response for POST /start
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub task_id: String,
}

/// POST /session - create a session
#[utoipa::path(
    post,
    path = "/session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreatedSession),
        (status = 400, description = "Missing model or provider")
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreatedSession>, ApiError> {
    let created = state
        .coordinator
        .create_session(CreateSessionInput {
            session_id: request.session_id,
            messages: request.messages.into_iter().map(Message::from).collect(),
            model_config: request.model_config,
            agent_config: request.agent_config,
            user_id: request.user_id,
            max_steps: request.max_steps,
            cost_limit: request.cost_limit,
            auto_start: request.auto_start,
        })
        .await?;
    Ok(Json(created))
}

/// GET /session - status descriptor
#[utoipa::path(
    get,
    path = "/session",
    params(GetSessionQuery),
    responses(
        (status = 200, description = "Status descriptor", body = SessionStatusView),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Query(query): Query<GetSessionQuery>,
) -> Result<Json<SessionStatusView>, ApiError> {
    let session_id = query
        .session_id
        .ok_or_else(|| RuntimeError::validation("sessionId is required"))?;
    let view = state
        .coordinator
        .get_status(
            &session_id,
            query.include_history.unwrap_or(false),
            query.history_limit,
        )
        .await?;
    Ok(Json(view))
}

/// DELETE /session - delete a session
#[utoipa::path(
    delete,
    path = "/session",
    params(DeleteSessionQuery),
    responses(
        (status = 200, description = "Session deleted", body = DeleteSessionResponse),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Query(query): Query<DeleteSessionQuery>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let session_id = query
        .session_id
        .ok_or_else(|| RuntimeError::validation("sessionId is required"))?;
    let deleted = state.coordinator.delete_session(&session_id).await?;
    if !deleted {
        return Err(RuntimeError::not_found(format!("session {session_id}")).into());
    }
    Ok(Json(DeleteSessionResponse { deleted }))
}

/// POST /start - enqueue the next step explicitly
#[utoipa::path(
    post,
    path = "/start",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Step enqueued", body = StartSessionResponse),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let session_id = request
        .session_id
        .ok_or_else(|| RuntimeError::validation("sessionId is required"))?;
    let task_id = state
        .coordinator
        .start_session(
            &session_id,
            request.context,
            request.priority,
            request.delay.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(StartSessionResponse { task_id }))
}
