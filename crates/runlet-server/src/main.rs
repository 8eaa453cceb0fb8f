// Runlet API server
//
// Wiring order matters: store -> adapters -> engine -> queue -> engine
// gets the queue -> coordinator. Nothing is constructed at module load;
// every dependency is built here and injected.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use runlet_core::{ApprovalPolicy, PolicyRunner, RuntimeConfig};
use runlet_engine::{ScriptedModelAdapter, ScriptedToolHost, StepEngine};
use runlet_queue::{HttpQueue, HttpQueueConfig, TimerQueue, WorkQueue};
use runlet_server::{routes, ApiDoc, AppState, SessionCoordinator};
use runlet_store::{SessionStore, StorageBackend};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3_600);

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    dev_mode: bool,
}

/// State for the health endpoint
#[derive(Clone)]
struct HealthState {
    dev_mode: bool,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        dev_mode: state.dev_mode,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("runlet_server=debug,tower_http=debug")),
        )
        .init();

    tracing::info!("runlet-server starting...");

    let config = RuntimeConfig::from_env();

    // Storage backend from the required store URL
    let store_url =
        std::env::var("STORE_URL").context("STORE_URL environment variable required")?;
    let backend = Arc::new(
        StorageBackend::from_url(&store_url, config.clone())
            .await
            .context("failed to connect storage backend")?,
    );

    // Model and tool adapters: simulated providers for dev mode; real
    // providers are wired here in a full deployment
    let model = Arc::new(ScriptedModelAdapter::new());
    let tools = Arc::new(ScriptedToolHost::new());
    tracing::warn!("using simulated model/tool adapters");

    let approval = match std::env::var("APPROVAL_POLICY").as_deref() {
        Ok("always") => ApprovalPolicy::Always,
        _ => ApprovalPolicy::Never,
    };
    let runner = Arc::new(PolicyRunner::new(approval));

    let engine = StepEngine::new(
        backend.clone(),
        backend.clone(),
        model,
        tools,
        runner,
        config.clone(),
    );

    // Queue: HTTP dispatch when a callback is configured, otherwise the
    // in-process timer queue delivering straight to the engine
    let queue: Arc<dyn WorkQueue> = match std::env::var("QUEUE_CALLBACK_URL") {
        Ok(callback_url) if !callback_url.is_empty() => {
            let token = std::env::var("QUEUE_TOKEN").ok();
            tracing::info!(%callback_url, "using http dispatch queue");
            Arc::new(HttpQueue::new(HttpQueueConfig::new(callback_url, token))?)
        }
        _ => {
            tracing::info!("using in-process timer queue");
            Arc::new(TimerQueue::new(engine.clone()))
        }
    };
    engine.attach_queue(queue.clone());

    let coordinator = Arc::new(SessionCoordinator::new(
        backend.clone(),
        backend.clone(),
        queue,
        config.clone(),
    ));

    // Periodic TTL sweep
    let cleanup_store = backend.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            match cleanup_store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "expired sessions cleaned up"),
                Err(err) => tracing::warn!(error = %err, "session cleanup failed"),
            }
        }
    });

    let health_state = HealthState {
        dev_mode: backend.is_dev_mode(),
    };

    let state = AppState {
        coordinator,
        engine,
        stream: backend,
        config,
    };

    let mut app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // CORS only when origins are configured; the SSE route carries its
    // own permissive headers
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    if !cors_origins.is_empty() {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app = app.layer(CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins)));
    }

    let app = app.layer(TraceLayer::new_for_http());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
