// Session state
//
// Session is the single durable blob the step engine loads, mutates, and
// saves on every step. Status transitions are driven exclusively by the
// step engine and the human-intervention handlers.
//
// Invariants:
// - status = waiting_for_human_input iff exactly one pending_* field is set
// - step_count strictly increases on each successful step save
// - cost.total never decreases
// - messages are append-only outside of human-intervention rewrites

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::message::{Message, ToolCall};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    WaitingForHumanInput,
    Done,
    Error,
    Interrupted,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::WaitingForHumanInput => write!(f, "waiting_for_human_input"),
            SessionStatus::Done => write!(f, "done"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => SessionStatus::Running,
            "waiting_for_human_input" => SessionStatus::WaitingForHumanInput,
            "done" => SessionStatus::Done,
            "error" => SessionStatus::Error,
            "interrupted" => SessionStatus::Interrupted,
            _ => SessionStatus::Idle,
        }
    }
}

/// Accumulated cost counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Cost {
    pub total: f64,
    pub currency: String,
}

impl Default for Cost {
    fn default() -> Self {
        Self {
            total: 0.0,
            currency: "USD".to_string(),
        }
    }
}

/// Accumulated token usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// What to do when the cost limit is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum OnExceeded {
    Stop,
    Interrupt,
    Continue,
}

/// Per-session spend ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CostLimit {
    pub max_total_cost: f64,
    pub currency: String,
    pub on_exceeded: OnExceeded,
}

/// Pending free-form input request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HumanPrompt {
    pub prompt: String,
}

/// Pending selection request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HumanSelect {
    pub prompt: String,
    pub options: Vec<String>,
}

/// Why and when a session was interrupted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Interruption {
    pub reason: String,
    pub can_resume: bool,
    pub interrupted_at: DateTime<Utc>,
}

/// Last error recorded on the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Durable per-session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Session {
    pub id: String,

    pub status: SessionStatus,

    pub step_count: u32,

    pub messages: Vec<Message>,

    #[serde(default)]
    pub cost: Cost,

    #[serde(default)]
    pub usage: Usage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<CostLimit>,

    pub last_modified: DateTime<Utc>,

    /// Tool calls awaiting human approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tools_calling: Option<Vec<ToolCall>>,

    /// Free-form input awaited from a human
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_human_prompt: Option<HumanPrompt>,

    /// Selection awaited from a human
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_human_select: Option<HumanSelect>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Session {
    /// Create a fresh idle session with the given starting messages
    pub fn new(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Idle,
            step_count: 0,
            messages,
            cost: Cost::default(),
            usage: Usage::default(),
            max_steps: None,
            cost_limit: None,
            last_modified: Utc::now(),
            pending_tools_calling: None,
            pending_human_prompt: None,
            pending_human_select: None,
            interruption: None,
            error: None,
        }
    }

    /// Terminal states accept no further steps
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Done | SessionStatus::Error)
    }

    /// Number of pending_* fields currently set; must be 1 exactly when
    /// status is waiting_for_human_input
    pub fn pending_intervention_count(&self) -> usize {
        [
            self.pending_tools_calling.is_some(),
            self.pending_human_prompt.is_some(),
            self.pending_human_select.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    /// Clear every pending intervention field
    pub fn clear_pending(&mut self) {
        self.pending_tools_calling = None;
        self.pending_human_prompt = None;
        self.pending_human_select = None;
    }

    /// Refresh the modification timestamp
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Record an error and move to the error status
    pub fn fail(&mut self, message: impl Into<String>, phase: Option<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(ErrorInfo {
            message: message.into(),
            phase,
        });
        self.touch();
    }

    /// Mark interrupted with the given reason
    pub fn interrupt(&mut self, reason: impl Into<String>, can_resume: bool) {
        self.status = SessionStatus::Interrupted;
        self.interruption = Some(Interruption {
            reason: reason.into(),
            can_resume,
            interrupted_at: Utc::now(),
        });
        self.touch();
    }

    /// Whether the cost ceiling has been reached
    pub fn cost_exceeded(&self) -> bool {
        self.cost_limit
            .as_ref()
            .is_some_and(|limit| self.cost.total >= limit.max_total_cost)
    }
}
