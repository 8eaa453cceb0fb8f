// Session event protocol
//
// Events are the observable record of a session's execution. They are
// appended to a bounded per-session log and never mutated. The stream
// assigns ids on publish; within a session ids are strictly monotonic.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    Heartbeat,
    StepStart,
    StepComplete,
    StreamStart,
    StreamChunk,
    StreamEnd,
    ToolStart,
    ToolComplete,
    HumanApprovalRequest,
    Error,
    Done,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Connected => "connected",
            EventType::Heartbeat => "heartbeat",
            EventType::StepStart => "step_start",
            EventType::StepComplete => "step_complete",
            EventType::StreamStart => "stream_start",
            EventType::StreamChunk => "stream_chunk",
            EventType::StreamEnd => "stream_end",
            EventType::ToolStart => "tool_start",
            EventType::ToolComplete => "tool_complete",
            EventType::HumanApprovalRequest => "human_approval_request",
            EventType::Error => "error",
            EventType::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// An immutable record in a session's event log.
///
/// `id` is 0 until the stream assigns it on publish. Assigned ids are
/// millisecond-based and strictly increasing within a session, so id
/// order and timestamp order agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Stream-assigned id, monotonic within the session
    #[serde(default)]
    pub id: u64,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub step_index: u32,

    pub session_id: String,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    pub data: serde_json::Value,
}

impl Event {
    /// Create an event ready to publish. The stream assigns the id.
    pub fn new(
        event_type: EventType,
        session_id: impl Into<String>,
        step_index: u32,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            event_type,
            step_index,
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serde_names() {
        let json = serde_json::to_string(&EventType::HumanApprovalRequest).unwrap();
        assert_eq!(json, "\"human_approval_request\"");
        assert_eq!(EventType::StreamChunk.to_string(), "stream_chunk");
    }

    #[test]
    fn test_event_round_trip() {
        let event = Event::new(
            EventType::StepStart,
            "s1",
            3,
            serde_json::json!({"phase": "llm_result"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step_start\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
