// Queued step tasks and step history records
//
// A StepTask is the serialized body the queue delivers back to the step
// endpoint. A StepRecord is the per-step history entry the store keeps
// (bounded at the 200 most recent).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::context::StepContext;
use crate::event::Event;
use crate::message::ToolCall;
use crate::session::SessionStatus;

/// Queue priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// The serialized body of one step dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StepTask {
    pub session_id: String,

    pub step_index: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<StepContext>,

    #[serde(default)]
    pub priority: Priority,

    /// Human intervention payloads, at most one set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_tool_call: Option<ToolCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_input: Option<serde_json::Value>,

    #[serde(default)]
    pub force_complete: bool,
}

impl StepTask {
    /// A plain step dispatch with no intervention payload
    pub fn new(session_id: impl Into<String>, step_index: u32, context: Option<StepContext>) -> Self {
        Self {
            session_id: session_id.into(),
            step_index,
            context,
            priority: Priority::Normal,
            approved_tool_call: None,
            rejection_reason: None,
            human_input: None,
            force_complete: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether any intervention payload is attached
    pub fn has_intervention(&self) -> bool {
        self.approved_tool_call.is_some()
            || self.rejection_reason.is_some()
            || self.human_input.is_some()
    }
}

/// One entry in the bounded step history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StepRecord {
    pub step_index: u32,

    pub execution_time_ms: u64,

    pub timestamp: DateTime<Utc>,

    /// Session status after the step
    pub status: SessionStatus,

    /// Cost added by this step
    pub cost_delta: f64,

    /// Events the step produced, in publish order
    pub events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_camel_case_wire_format() {
        let task = StepTask::new("s1", 2, None).with_priority(Priority::High);
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(json.contains("\"stepIndex\":2"));
        assert!(json.contains("\"priority\":\"high\""));
        assert!(!json.contains("approvedToolCall"));

        let parsed: StepTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_has_intervention() {
        let mut task = StepTask::new("s1", 0, None);
        assert!(!task.has_intervention());
        task.rejection_reason = Some("no".to_string());
        assert!(task.has_intervention());
    }
}
