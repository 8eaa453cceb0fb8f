// Session coordinator
//
// Thin orchestration over the store, the event stream, and the work
// queue: create sessions, accept human interventions, report status,
// and delete. State transitions during steps belong to the engine; the
// coordinator only validates and enqueues.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use runlet_core::{
    CostLimit, CreateMetadata, Event, EventType, Message, ModelConfig, Priority, Result,
    RuntimeConfig, RuntimeError, Session, SessionMetadata, SessionStatus, StepContext, StepRecord,
    StepTask, ToolCall, Usage,
};
use runlet_queue::{StepParams, WorkQueue};
use runlet_store::{EventStream, SessionStore, StoreError};

const AUTO_START_DELAY: Duration = Duration::from_millis(500);

fn store_err(err: StoreError) -> RuntimeError {
    RuntimeError::store(err.to_string())
}

/// Input for creating a session
#[derive(Debug, Clone, Default)]
pub struct CreateSessionInput {
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
    pub model_config: Option<ModelConfig>,
    pub agent_config: Option<serde_json::Value>,
    pub user_id: Option<String>,
    pub max_steps: Option<u32>,
    pub cost_limit: Option<CostLimit>,
    pub auto_start: bool,
}

/// Descriptor returned on creation
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub message_count: usize,
    pub auto_started: bool,
}

/// Human intervention kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterventionAction {
    Approve,
    Reject,
    Input,
    Select,
}

/// Input for processing an intervention
#[derive(Debug, Clone)]
pub struct InterventionInput {
    pub session_id: String,
    pub action: InterventionAction,
    pub data: serde_json::Value,
    pub reason: Option<String>,
}

/// Aggregate counters for the status view
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStats {
    pub step_count: u32,
    pub message_count: usize,
    pub total_cost: f64,
    pub usage: Usage,
}

/// Status descriptor for GET /session
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStatusView {
    pub current_state: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
    pub stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_history: Option<Vec<StepRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_events: Option<Vec<Event>>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "isCompleted")]
    pub is_completed: bool,
    #[serde(rename = "hasError")]
    pub has_error: bool,
    #[serde(rename = "needsHumanInput")]
    pub needs_human_input: bool,
}

/// One session awaiting human input
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntervention {
    pub session_id: String,
    pub kind: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub since: chrono::DateTime<chrono::Utc>,
}

/// Public surface over the runtime
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    stream: Arc<dyn EventStream>,
    queue: Arc<dyn WorkQueue>,
    config: RuntimeConfig,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        stream: Arc<dyn EventStream>,
        queue: Arc<dyn WorkQueue>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            stream,
            queue,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Create a session and, by default, enqueue its first step.
    pub async fn create_session(&self, input: CreateSessionInput) -> Result<CreatedSession> {
        let model_config = input
            .model_config
            .ok_or_else(|| RuntimeError::validation("model_config is required"))?;
        if model_config.model.is_empty() || model_config.provider.is_empty() {
            return Err(RuntimeError::validation(
                "model_config.model and model_config.provider are required",
            ));
        }

        let session_id = input
            .session_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut session = Session::new(&session_id, input.messages);
        session.max_steps = input.max_steps;
        session.cost_limit = input.cost_limit;

        self.store
            .save_state(&session_id, &session)
            .await
            .map_err(store_err)?;
        self.store
            .create_metadata(
                &session_id,
                CreateMetadata {
                    user_id: input.user_id,
                    model_config: Some(model_config),
                    agent_config: input.agent_config,
                },
            )
            .await
            .map_err(store_err)?;

        let mut auto_started = false;
        if input.auto_start {
            let context = session
                .messages
                .iter()
                .rev()
                .find(|m| m.role == runlet_core::MessageRole::User)
                .map(|message| StepContext::user_input(message, &session));

            let task = StepTask::new(&session_id, 0, context).with_priority(Priority::High);
            self.queue
                .schedule_next_step(StepParams::new(task).with_delay(AUTO_START_DELAY))
                .await
                .map_err(|e| RuntimeError::executor(e.to_string()))?;
            auto_started = true;
        }

        tracing::info!(%session_id, auto_started, "session created");

        Ok(CreatedSession {
            session_id,
            status: session.status,
            message_count: session.messages.len(),
            auto_started,
        })
    }

    /// Enqueue a step explicitly (POST /start).
    pub async fn start_session(
        &self,
        session_id: &str,
        context: Option<StepContext>,
        priority: Option<Priority>,
        delay: Option<Duration>,
    ) -> Result<String> {
        let state = self.load(session_id).await?;

        let task = StepTask::new(session_id, state.step_count, context)
            .with_priority(priority.unwrap_or(Priority::High));
        let mut params = StepParams::new(task);
        params.delay_override = Some(delay.unwrap_or(AUTO_START_DELAY));

        self.queue
            .schedule_next_step(params)
            .await
            .map_err(|e| RuntimeError::executor(e.to_string()))
    }

    /// Validate and enqueue a human intervention.
    pub async fn process_intervention(&self, input: InterventionInput) -> Result<String> {
        let state = self.load(&input.session_id).await?;

        if state.status != SessionStatus::WaitingForHumanInput {
            return Err(RuntimeError::conflict(format!(
                "session {} is not waiting for human input (status: {})",
                input.session_id, state.status
            )));
        }

        let mut task = StepTask::new(&input.session_id, state.step_count, None);

        match input.action {
            InterventionAction::Approve => {
                let pending = state.pending_tools_calling.as_deref().ok_or_else(|| {
                    RuntimeError::validation("session has no pending tool calls to approve")
                })?;
                let approved: ToolCall = serde_json::from_value(
                    input
                        .data
                        .get("approvedToolCall")
                        .cloned()
                        .ok_or_else(|| RuntimeError::validation("approvedToolCall is required"))?,
                )?;
                if !pending.iter().any(|c| c.id == approved.id) {
                    return Err(RuntimeError::validation(format!(
                        "tool call {} is not pending approval",
                        approved.id
                    )));
                }
                task.approved_tool_call = Some(approved);
            }
            InterventionAction::Reject => {
                let reason = input
                    .reason
                    .or_else(|| {
                        input
                            .data
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "rejected".to_string());
                task.rejection_reason = Some(reason);
            }
            InterventionAction::Input => {
                if state.pending_human_prompt.is_none() {
                    return Err(RuntimeError::validation(
                        "session has no pending input prompt",
                    ));
                }
                task.human_input = Some(input.data);
            }
            InterventionAction::Select => {
                let select = state.pending_human_select.as_ref().ok_or_else(|| {
                    RuntimeError::validation("session has no pending selection")
                })?;

                let selections: Vec<String> = match input.data.get("selections") {
                    Some(value) => serde_json::from_value(value.clone())?,
                    None => input
                        .data
                        .get("selection")
                        .and_then(|v| v.as_str())
                        .map(|s| vec![s.to_string()])
                        .ok_or_else(|| {
                            RuntimeError::validation("selection or selections is required")
                        })?,
                };

                for choice in &selections {
                    if !select.options.contains(choice) {
                        return Err(RuntimeError::validation(format!(
                            "selection {choice:?} is not one of the offered options"
                        )));
                    }
                }

                task.human_input = Some(json!({ "response": selections.join(", ") }));
            }
        }

        self.queue
            .schedule_immediate(task)
            .await
            .map_err(|e| RuntimeError::executor(e.to_string()))
    }

    /// Status descriptor for a session.
    pub async fn get_status(
        &self,
        session_id: &str,
        include_history: bool,
        history_limit: Option<usize>,
    ) -> Result<SessionStatusView> {
        let state = self.load(session_id).await?;
        let metadata = self
            .store
            .get_metadata(session_id)
            .await
            .map_err(store_err)?;

        let (execution_history, recent_events) = if include_history {
            let limit = history_limit.unwrap_or(self.config.history_limit);
            let history = self
                .store
                .get_history(session_id, limit)
                .await
                .map_err(store_err)?;
            let events = self
                .stream
                .history(session_id, self.config.history_limit)
                .await
                .map_err(store_err)?;
            (Some(history), Some(events))
        } else {
            (None, None)
        };

        let cost_stopped = state.cost_exceeded()
            && state
                .cost_limit
                .as_ref()
                .is_some_and(|l| l.on_exceeded == runlet_core::OnExceeded::Stop);
        let steps_exhausted = state
            .max_steps
            .is_some_and(|max| state.step_count >= max);
        let is_active = matches!(state.status, SessionStatus::Idle | SessionStatus::Running)
            && !cost_stopped
            && !steps_exhausted;

        let stats = SessionStats {
            step_count: state.step_count,
            message_count: state.messages.len(),
            total_cost: state.cost.total,
            usage: state.usage,
        };

        Ok(SessionStatusView {
            is_active,
            is_completed: state.status == SessionStatus::Done,
            has_error: state.status == SessionStatus::Error || state.error.is_some(),
            needs_human_input: state.status == SessionStatus::WaitingForHumanInput,
            stats,
            metadata,
            execution_history,
            recent_events,
            current_state: state,
        })
    }

    /// Sessions awaiting human input, by session or by user.
    pub async fn list_pending_interventions(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<PendingIntervention>> {
        let mut candidates: Vec<String> = match session_id {
            Some(id) => vec![id.to_string()],
            None => self
                .store
                .list_active(user_id)
                .await
                .map_err(store_err)?
                .into_iter()
                .filter(|meta| meta.status == SessionStatus::WaitingForHumanInput)
                .map(|meta| meta.session_id)
                .collect(),
        };
        candidates.dedup();

        let mut pending = Vec::new();
        for id in candidates {
            let Some(state) = self.store.load_state(&id).await.map_err(store_err)? else {
                continue;
            };
            if state.status != SessionStatus::WaitingForHumanInput {
                continue;
            }
            let (kind, payload) = if let Some(calls) = &state.pending_tools_calling {
                ("approve", json!({ "tool_calls": calls }))
            } else if let Some(prompt) = &state.pending_human_prompt {
                ("prompt", json!({ "prompt": prompt }))
            } else if let Some(select) = &state.pending_human_select {
                ("select", json!({ "select": select }))
            } else {
                continue;
            };
            pending.push(PendingIntervention {
                session_id: id,
                kind: kind.to_string(),
                payload,
                since: state.last_modified,
            });
        }

        Ok(pending)
    }

    /// Delete a session, interrupting it first when it is still running.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let Some(mut state) = self
            .store
            .load_state(session_id)
            .await
            .map_err(store_err)?
        else {
            return Ok(false);
        };

        if state.status == SessionStatus::Running {
            state.interrupt("deleted by user", false);
            self.store
                .save_state(session_id, &state)
                .await
                .map_err(store_err)?;
            self.stream
                .publish(
                    session_id,
                    Event::new(
                        EventType::Error,
                        session_id,
                        state.step_count,
                        json!({"phase": "deletion", "error": "session deleted by user"}),
                    ),
                )
                .await
                .map_err(store_err)?;
        }

        let deleted = self
            .store
            .delete_session(session_id)
            .await
            .map_err(store_err)?;
        self.stream.cleanup(session_id).await.map_err(store_err)?;

        tracing::info!(%session_id, "session deleted");
        Ok(deleted)
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        self.store
            .load_state(session_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| RuntimeError::not_found(format!("session {session_id}")))
    }
}
