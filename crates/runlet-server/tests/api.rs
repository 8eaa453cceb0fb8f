// Router-level API tests against the in-memory backend, scripted
// adapters, and the in-process queue.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use runlet_core::{ApprovalPolicy, PolicyRunner, RuntimeConfig};
use runlet_engine::{ModelChunk, ModelUsage, ScriptedModelAdapter, ScriptedToolHost, StepEngine};
use runlet_queue::{TimerQueue, WorkQueue};
use runlet_server::{routes, AppState, SessionCoordinator};
use runlet_store::{EventStream, MemoryStore, SessionStore};

struct TestApp {
    router: Router,
    adapter: Arc<ScriptedModelAdapter>,
    queue: Arc<TimerQueue>,
}

fn test_app(approval: ApprovalPolicy) -> TestApp {
    let config = RuntimeConfig::default();
    let store = Arc::new(MemoryStore::new(config.clone()));
    let adapter = Arc::new(ScriptedModelAdapter::new());
    let tools = Arc::new(
        ScriptedToolHost::new().with_result("calc", json!({"ok": true, "v": 4})),
    );

    let engine = StepEngine::new(
        store.clone() as Arc<dyn SessionStore>,
        store.clone() as Arc<dyn EventStream>,
        adapter.clone(),
        tools,
        Arc::new(PolicyRunner::new(approval)),
        config.clone(),
    );
    let queue = Arc::new(TimerQueue::new(engine.clone()));
    engine.attach_queue(queue.clone());

    let coordinator = Arc::new(SessionCoordinator::new(
        store.clone() as Arc<dyn SessionStore>,
        store.clone() as Arc<dyn EventStream>,
        queue.clone(),
        config.clone(),
    ));

    let state = AppState {
        coordinator,
        engine,
        stream: store as Arc<dyn EventStream>,
        config,
    };

    TestApp {
        router: routes(state),
        adapter,
        queue,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "messages": [{"content": "hi"}],
        "modelConfig": {"model": "sim-1", "provider": "sim"},
    })
}

#[tokio::test(start_paused = true)]
async fn create_session_requires_model_and_provider() {
    let app = test_app(ApprovalPolicy::Never);

    let (status, body) = send(
        &app,
        Method::POST,
        "/session",
        Some(json!({"messages": [{"content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("model_config"));

    let (status, _) = send(
        &app,
        Method::POST,
        "/session",
        Some(json!({
            "messages": [{"content": "hi"}],
            "modelConfig": {"model": "", "provider": "sim"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn auto_start_queues_exactly_one_task() {
    let app = test_app(ApprovalPolicy::Never);
    app.adapter.push_text_turn(&["hi"], ModelUsage::default());

    let (status, body) = send(&app, Method::POST, "/session", Some(create_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["autoStarted"], true);
    assert!(body["sessionId"].as_str().is_some());

    // Exactly one task queued with the first step before returning
    assert_eq!(app.queue.stats().pending, 1);
}

#[tokio::test(start_paused = true)]
async fn session_runs_to_completion_over_http() {
    let app = test_app(ApprovalPolicy::Never);
    app.adapter.push_text_turn(&["hel", "lo"], ModelUsage::default());

    let (_, created) = send(&app, Method::POST, "/session", Some(create_body())).await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();

    app.queue.drain().await;

    let (status, view) = send(
        &app,
        Method::GET,
        &format!("/session?sessionId={session_id}&includeHistory=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["current_state"]["status"], "done");
    assert_eq!(view["isCompleted"], true);
    assert_eq!(view["isActive"], false);
    assert_eq!(view["needsHumanInput"], false);
    assert_eq!(view["stats"]["step_count"], 2);
    assert!(!view["execution_history"].as_array().unwrap().is_empty());
    assert!(!view["recent_events"].as_array().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn get_session_handles_missing_and_unknown() {
    let app = test_app(ApprovalPolicy::Never);

    let (status, _) = send(&app, Method::GET, "/session", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/session?sessionId=ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn execute_step_validates_and_routes() {
    let app = test_app(ApprovalPolicy::Never);

    let (status, _) = send(&app, Method::POST, "/execute-step", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/execute-step",
        Some(json!({"sessionId": "ghost", "stepIndex": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, health) = send(&app, Method::GET, "/execute-step", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["queue_healthy"], true);
}

#[tokio::test(start_paused = true)]
async fn intervention_on_non_waiting_session_conflicts() {
    let app = test_app(ApprovalPolicy::Never);
    app.adapter.push_text_turn(&["hi"], ModelUsage::default());

    let (_, created) = send(&app, Method::POST, "/session", Some(create_body())).await;
    let session_id = created["sessionId"].as_str().unwrap();

    let (status, _) = send(
        &app,
        Method::POST,
        "/human-intervention",
        Some(json!({
            "sessionId": session_id,
            "action": "reject",
            "reason": "no",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn approval_flow_over_http() {
    let app = test_app(ApprovalPolicy::Always);
    app.adapter.push_turn(vec![ModelChunk::ToolCalls(vec![
        runlet_core::ToolCall::new("t1", "calc", "{\"x\":2}"),
    ])]);
    app.adapter.push_text_turn(&["4"], ModelUsage::default());

    let (_, created) = send(&app, Method::POST, "/session", Some(create_body())).await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    app.queue.drain().await;

    // Session paused; listing shows the pending approval
    let (_, view) = send(
        &app,
        Method::GET,
        &format!("/session?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(view["needsHumanInput"], true);

    let (status, pending) = send(
        &app,
        Method::GET,
        &format!("/human-intervention?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["pending"][0]["kind"], "approve");

    // Approving an unknown call id is a validation error
    let (status, _) = send(
        &app,
        Method::POST,
        "/human-intervention",
        Some(json!({
            "sessionId": session_id,
            "action": "approve",
            "data": {"approvedToolCall": {"id": "zz", "type": "function",
                     "function": {"name": "calc", "arguments": "{}"}}},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/human-intervention",
        Some(json!({
            "sessionId": session_id,
            "action": "approve",
            "data": {"approvedToolCall": {"id": "t1", "type": "function",
                     "function": {"name": "calc", "arguments": "{\"x\":2}"}}},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    app.queue.drain().await;

    let (_, view) = send(
        &app,
        Method::GET,
        &format!("/session?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(view["current_state"]["status"], "done");
}

#[tokio::test(start_paused = true)]
async fn delete_session_then_404() {
    let app = test_app(ApprovalPolicy::Never);
    app.adapter.push_text_turn(&["hi"], ModelUsage::default());

    let (_, created) = send(&app, Method::POST, "/session", Some(create_body())).await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    app.queue.drain().await;

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/session?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/session?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// S6: replay over SSE. connected first, then every historical event
// with id > 0 in chronological order, no repeats.
#[tokio::test(start_paused = true)]
async fn sse_replay_delivers_history_in_order() {
    let app = test_app(ApprovalPolicy::Never);
    app.adapter.push_text_turn(&["hel", "lo"], ModelUsage::default());

    let (_, created) = send(&app, Method::POST, "/session", Some(create_body())).await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    app.queue.drain().await;

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!(
            "/stream?sessionId={session_id}&lastEventId=0&includeHistory=true"
        ))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache, no-transform"
    );
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    // 1 connected frame + 9 events from the happy path
    let expected_frames = 10;
    let mut body = response.into_body().into_data_stream();
    let mut buffer = String::new();
    while buffer.matches("\n\n").count() < expected_frames {
        use futures::StreamExt;
        let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
            .await
            .expect("stream stalled")
            .expect("stream ended early")
            .unwrap();
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    let frames: Vec<Value> = buffer
        .split("\n\n")
        .filter(|f| !f.is_empty())
        .take(expected_frames)
        .map(|f| {
            let data = f.strip_prefix("data: ").expect("frame must start with data: ");
            serde_json::from_str(data).unwrap()
        })
        .collect();

    assert_eq!(frames[0]["type"], "connected");
    assert_eq!(frames[0]["sessionId"], session_id.as_str());
    assert_eq!(frames[0]["lastEventId"], "0");

    let event_frames = &frames[1..];
    assert_eq!(event_frames.len(), 9);
    assert_eq!(event_frames[0]["type"], "step_start");
    assert_eq!(event_frames[8]["type"], "done");

    // Monotonic ids, no duplicates
    let ids: Vec<u64> = event_frames
        .iter()
        .map(|f| f["id"].as_u64().unwrap())
        .collect();
    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}
