// Runlet server
//
// Public surface of the durable agent runtime: session CRUD, the step
// callback endpoint the queue posts to, human interventions, and the
// SSE event stream. Router construction is separate from main so tests
// can drive it in-process.

pub mod api;
pub mod coordinator;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;

use runlet_core::RuntimeConfig;
use runlet_engine::StepEngine;
use runlet_store::EventStream;

pub use coordinator::SessionCoordinator;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub engine: Arc<StepEngine>,
    pub stream: Arc<dyn EventStream>,
    pub config: RuntimeConfig,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        api::sessions::create_session,
        api::sessions::get_session,
        api::sessions::delete_session,
        api::sessions::start_session,
        api::steps::execute_step,
        api::steps::step_health,
        api::interventions::process_intervention,
        api::interventions::list_interventions,
        api::stream::stream_events,
    ),
    components(
        schemas(
            api::ErrorResponse,
            api::sessions::CreateSessionRequest,
            api::sessions::MessageInput,
            api::sessions::DeleteSessionResponse,
            api::sessions::StartSessionRequest,
            api::sessions::StartSessionResponse,
            api::steps::StepHealthResponse,
            api::interventions::InterventionRequest,
            api::interventions::InterventionResponse,
            api::interventions::ListInterventionsResponse,
            coordinator::CreatedSession,
            coordinator::InterventionAction,
            coordinator::SessionStats,
            coordinator::SessionStatusView,
            coordinator::PendingIntervention,
            // Domain types
            runlet_core::Session, runlet_core::SessionStatus,
            runlet_core::Message, runlet_core::MessageRole,
            runlet_core::ToolCall, runlet_core::FunctionCall,
            runlet_core::Cost, runlet_core::Usage,
            runlet_core::CostLimit, runlet_core::OnExceeded,
            runlet_core::HumanPrompt, runlet_core::HumanSelect,
            runlet_core::Interruption, runlet_core::ErrorInfo,
            runlet_core::SessionMetadata, runlet_core::ModelConfig,
            runlet_core::Event, runlet_core::EventType,
            runlet_core::StepContext, runlet_core::Phase,
            runlet_core::SessionSnapshot, runlet_core::StepRecord,
            runlet_core::StepTask, runlet_core::Priority,
        )
    ),
    tags(
        (name = "sessions", description = "Session lifecycle endpoints"),
        (name = "steps", description = "Queue callback endpoint"),
        (name = "interventions", description = "Human-in-the-loop endpoints"),
        (name = "events", description = "Event streaming endpoints (SSE)")
    ),
    info(
        title = "Runlet API",
        description = "Durable agent execution runtime",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

/// Build the public router
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/session",
            post(api::sessions::create_session)
                .get(api::sessions::get_session)
                .delete(api::sessions::delete_session),
        )
        .route("/start", post(api::sessions::start_session))
        .route(
            "/execute-step",
            post(api::steps::execute_step).get(api::steps::step_health),
        )
        .route(
            "/human-intervention",
            post(api::interventions::process_intervention)
                .get(api::interventions::list_interventions),
        )
        .route("/stream", get(api::stream::stream_events))
        .with_state(state)
}
