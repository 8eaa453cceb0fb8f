// Event streaming route (SSE)
//
// Frame format: `data: ` + compact JSON + two newlines. First frame is
// the connected marker; with includeHistory the stored tail follows in
// chronological order (filtered to events newer than lastEventId), then
// the live tail. A heartbeat frame goes out every 30 seconds of quiet.
// Dropping the response cancels the poll loop.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderName};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use utoipa::IntoParams;

use runlet_core::{Event, RuntimeError};
use runlet_store::EventStream;

use crate::AppState;

use super::ApiError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MIN_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 10_000;
const READ_BATCH: usize = 256;

/// Query parameters for GET /stream
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub session_id: Option<String>,
    pub last_event_id: Option<String>,
    pub include_history: Option<bool>,
}

struct StreamState {
    events: Arc<dyn EventStream>,
    session_id: String,
    watermark: u64,
    backoff_ms: u64,
    history: VecDeque<Event>,
    last_heartbeat: Instant,
    closed: bool,
}

fn frame(value: &serde_json::Value) -> Result<SseEvent, Infallible> {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().data(json))
}

fn event_frame(event: &Event) -> Result<SseEvent, Infallible> {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().data(json))
}

/// GET /stream - server-sent events for one session
#[utoipa::path(
    get,
    path = "/stream",
    params(StreamQuery),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Session not found")
    ),
    tag = "events"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = query
        .session_id
        .ok_or_else(|| RuntimeError::validation("sessionId is required"))?;

    // Verify the session exists before holding a stream open
    state.coordinator.get_status(&session_id, false, None).await?;

    let last_event_id_raw = query.last_event_id.unwrap_or_else(|| "0".to_string());
    let last_event_id: u64 = last_event_id_raw.parse().unwrap_or(0);

    // History tail, chronological, strictly newer than the client's
    // last seen id
    let history: VecDeque<Event> = if query.include_history.unwrap_or(false) {
        let mut tail = state
            .stream
            .history(&session_id, state.config.history_limit)
            .await
            .map_err(|e| RuntimeError::store(e.to_string()))?;
        tail.reverse();
        tail.into_iter()
            .filter(|e| e.timestamp > last_event_id as i64)
            .collect()
    } else {
        VecDeque::new()
    };

    tracing::info!(
        %session_id,
        last_event_id,
        history_len = history.len(),
        "starting event stream"
    );

    let connected = json!({
        "lastEventId": last_event_id_raw,
        "sessionId": session_id,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "type": "connected",
    });

    let initial = StreamState {
        events: state.stream.clone(),
        session_id,
        watermark: last_event_id,
        backoff_ms: MIN_BACKOFF_MS,
        history,
        last_heartbeat: Instant::now(),
        closed: false,
    };

    let connected_frame = frame(&connected);
    let live = stream::unfold(initial, move |mut st| async move {
        if st.closed {
            return None;
        }

        // Drain the replay slice before reading live
        if !st.history.is_empty() {
            let frames: Vec<_> = st.history.drain(..).collect();
            for event in &frames {
                st.watermark = st.watermark.max(event.id);
            }
            let frames: Vec<_> = frames.iter().map(event_frame).collect();
            return Some((stream::iter(frames), st));
        }

        match st
            .events
            .read_after(&st.session_id, st.watermark, READ_BATCH)
            .await
        {
            Ok(events) if !events.is_empty() => {
                st.watermark = events.last().map(|e| e.id).unwrap_or(st.watermark);
                st.backoff_ms = MIN_BACKOFF_MS;
                st.last_heartbeat = Instant::now();
                let frames: Vec<_> = events.iter().map(event_frame).collect();
                Some((stream::iter(frames), st))
            }
            Ok(_) => {
                if st.last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                    st.last_heartbeat = Instant::now();
                    let heartbeat = json!({
                        "sessionId": st.session_id,
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                        "type": "heartbeat",
                    });
                    return Some((stream::iter(vec![frame(&heartbeat)]), st));
                }

                let until_heartbeat =
                    HEARTBEAT_INTERVAL.saturating_sub(st.last_heartbeat.elapsed());
                let sleep = Duration::from_millis(st.backoff_ms).min(until_heartbeat);
                tokio::time::sleep(sleep).await;
                st.backoff_ms = (st.backoff_ms * 2).min(MAX_BACKOFF_MS);
                Some((stream::iter(vec![]), st))
            }
            Err(err) => {
                tracing::error!(session_id = %st.session_id, error = %err, "event stream failed");
                let fatal = json!({
                    "type": "error",
                    "data": {
                        "phase": "stream_subscription",
                        "error": err.to_string(),
                    },
                });
                st.closed = true;
                Some((stream::iter(vec![frame(&fatal)]), st))
            }
        }
    })
    .flatten();

    let frames: std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>> =
        Box::pin(stream::iter(vec![connected_frame]).chain(live));

    let headers = [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, "GET"),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Cache-Control, Last-Event-ID",
        ),
    ];

    Ok((headers, Sse::new(frames)))
}
