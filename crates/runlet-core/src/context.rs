// Step context
//
// The context is the value handed from step N to step N+1 through the
// queue. It is never persisted on its own; each queued task carries it
// by value, which keeps steps free of shared mutable state.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::message::{Message, ToolCall};
use crate::session::{Session, SessionStatus};

/// Which kind of result the previous step produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    UserInput,
    LlmResult,
    ToolResult,
    HumanInput,
    ErrorRecovery,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::UserInput => "user_input",
            Phase::LlmResult => "llm_result",
            Phase::ToolResult => "tool_result",
            Phase::HumanInput => "human_input",
            Phase::ErrorRecovery => "error_recovery",
        };
        write!(f, "{s}")
    }
}

/// Compact view of the session at context-creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SessionSnapshot {
    pub step_count: u32,
    pub message_count: usize,
    pub event_count: usize,
    pub status: SessionStatus,
}

impl SessionSnapshot {
    pub fn of(session: &Session, event_count: usize) -> Self {
        Self {
            step_count: session.step_count,
            message_count: session.messages.len(),
            event_count,
            status: session.status,
        }
    }
}

/// The phase-tagged argument passed between steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StepContext {
    pub phase: Phase,

    /// Phase-specific payload
    pub payload: serde_json::Value,

    pub session: SessionSnapshot,
}

impl StepContext {
    /// Context for the first step of a session
    pub fn user_input(message: &Message, session: &Session) -> Self {
        Self {
            phase: Phase::UserInput,
            payload: serde_json::json!({ "message": message }),
            session: SessionSnapshot::of(session, 0),
        }
    }

    /// Context after an LLM step
    pub fn llm_result(
        result: &str,
        tool_calls: &[ToolCall],
        session: &Session,
        event_count: usize,
    ) -> Self {
        Self {
            phase: Phase::LlmResult,
            payload: serde_json::json!({
                "result": result,
                "tool_calls": tool_calls,
                "has_tool_calls": !tool_calls.is_empty(),
            }),
            session: SessionSnapshot::of(session, event_count),
        }
    }

    /// Context after a tool step
    pub fn tool_result(
        result: &serde_json::Value,
        tool_call_id: &str,
        session: &Session,
        event_count: usize,
    ) -> Self {
        Self {
            phase: Phase::ToolResult,
            payload: serde_json::json!({
                "result": result,
                "tool_call_id": tool_call_id,
            }),
            session: SessionSnapshot::of(session, event_count),
        }
    }

    /// Context after a human intervention was applied
    pub fn human_input(payload: serde_json::Value, session: &Session) -> Self {
        Self {
            phase: Phase::HumanInput,
            payload,
            session: SessionSnapshot::of(session, 0),
        }
    }

    /// Tool calls carried in an llm_result payload, if any
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.payload
            .get("tool_calls")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Whether the payload was marked as already approved by a human
    pub fn is_approved(&self) -> bool {
        self.payload
            .get("approved")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_result_context() {
        let session = Session::new("s1", vec![Message::user("hi")]);
        let calls = vec![ToolCall::new("t1", "calc", "{\"x\":2}")];
        let ctx = StepContext::llm_result("", &calls, &session, 4);

        assert_eq!(ctx.phase, Phase::LlmResult);
        assert_eq!(ctx.payload["has_tool_calls"], true);
        assert_eq!(ctx.tool_calls(), calls);
        assert!(!ctx.is_approved());
        assert_eq!(ctx.session.event_count, 4);
    }

    #[test]
    fn test_context_round_trip() {
        let session = Session::new("s1", vec![]);
        let ctx = StepContext::human_input(serde_json::json!({"response": "yes"}), &session);
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: StepContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
