// Step engine: the per-step driver
//
// Invoked once per queue callback. Load -> (intervention) -> decide ->
// execute -> persist -> step_complete -> maybe enqueue the next step.
//
// At-least-once delivery is handled by the staleness guard: a task whose
// step_index is behind the persisted step_count is acknowledged without
// re-execution. Executor faults propagate so the queue retries; logic
// faults move the session to error and are not retried.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use runlet_core::{
    CreateMetadata, Event, EventType, Instruction, Message, MessageRole, OnExceeded, Phase,
    Result, RuntimeConfig, RuntimeError, Runner, Session, SessionMetadata, SessionSnapshot,
    SessionStatus, StepContext, StepRecord, StepTask,
};
use runlet_queue::{QueueError, StepParams, TaskDispatcher, WorkQueue};
use runlet_store::{EventStream, SessionStore};

use crate::executors::{store_err, EventSink, Executors, StepOutcome};

/// Structured response for one step dispatch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub session_id: String,
    pub step_index: u32,
    pub status: SessionStatus,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub execution_time_ms: u64,
    pub has_next_context: bool,
    pub next_step_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepSummary {
    fn skipped(session_id: &str, step_index: u32, status: SessionStatus, reason: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_index,
            status,
            executed: false,
            skipped_reason: Some(reason.to_string()),
            execution_time_ms: 0,
            has_next_context: false,
            next_step_scheduled: false,
            error: None,
        }
    }
}

/// The per-step driver
pub struct StepEngine {
    store: Arc<dyn SessionStore>,
    stream: Arc<dyn EventStream>,
    runner: Arc<dyn Runner>,
    executors: Executors,
    queue: OnceLock<Arc<dyn WorkQueue>>,
    config: RuntimeConfig,
}

impl StepEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        stream: Arc<dyn EventStream>,
        model: Arc<dyn crate::adapters::ModelAdapter>,
        tools: Arc<dyn crate::adapters::ToolHost>,
        runner: Arc<dyn Runner>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        let executors = Executors::new(stream.clone(), model, tools);
        Arc::new(Self {
            store,
            stream,
            runner,
            executors,
            queue: OnceLock::new(),
            config,
        })
    }

    /// Wire in the queue after construction; breaks the engine <-> queue
    /// construction cycle for the in-process queue.
    pub fn attach_queue(&self, queue: Arc<dyn WorkQueue>) {
        let _ = self.queue.set(queue);
    }

    pub fn queue(&self) -> Option<&Arc<dyn WorkQueue>> {
        self.queue.get()
    }

    /// Execute one queued step task.
    pub async fn execute_step(&self, task: StepTask) -> Result<StepSummary> {
        let started = Instant::now();
        let session_id = task.session_id.clone();
        let step_index = task.step_index;

        // 1. Load state and metadata
        let state = self
            .store
            .load_state(&session_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| RuntimeError::not_found(format!("session {session_id}")))?;

        let meta = self
            .store
            .get_metadata(&session_id)
            .await
            .map_err(store_err)?
            .unwrap_or_else(|| SessionMetadata::create(&session_id, CreateMetadata::default()));

        // Deletion marks the session interrupted; dispatched tasks cannot
        // be recalled, so they abort here
        if state.status == SessionStatus::Interrupted {
            return Ok(StepSummary::skipped(
                &session_id,
                step_index,
                state.status,
                "interrupted",
            ));
        }

        if state.is_terminal() {
            return Ok(StepSummary::skipped(
                &session_id,
                step_index,
                state.status,
                "terminal",
            ));
        }

        // At-least-once duplicate: acknowledge without re-executing
        if step_index < state.step_count {
            return Ok(StepSummary::skipped(
                &session_id,
                step_index,
                state.status,
                "stale",
            ));
        }

        let mut sink = EventSink::new(&*self.stream, &session_id, step_index);

        // 2. step_start
        sink.publish(EventType::StepStart, json!({ "step_index": step_index }))
            .await?;

        // 3. Human-intervention branch
        let (state, context, rejection) = self.apply_intervention(&task, state);

        // 4. Decide
        let context = context.unwrap_or_else(|| default_context(&state));
        let instruction = if let Some(reason) = rejection {
            Instruction::finish_with_detail("rejected", reason)
        } else {
            match self.runner.decide(&context, &state) {
                Ok(instruction) => instruction,
                Err(err) => {
                    sink.publish(
                        EventType::Error,
                        json!({"phase": "runner", "error": err.to_string()}),
                    )
                    .await?;
                    return self
                        .fail_step(sink, state, step_index, started, err.to_string())
                        .await;
                }
            }
        };

        tracing::info!(
            %session_id,
            step_index,
            instruction = instruction.name(),
            phase = %context.phase,
            "executing step"
        );

        // 5. Execute under the soft wall-clock budget
        let execution = tokio::time::timeout(
            self.config.step_budget,
            self.executors
                .execute(&instruction, state.clone(), &meta, step_index),
        )
        .await;

        let outcome = match execution {
            Err(_elapsed) => {
                let message = format!(
                    "step exceeded {}ms budget",
                    self.config.step_budget.as_millis()
                );
                sink.publish(
                    EventType::Error,
                    json!({"phase": "step_budget", "error": message}),
                )
                .await?;
                return self.fail_step(sink, state, step_index, started, message).await;
            }
            Ok(Err(RuntimeError::Logic(message))) => {
                // The executor already published its error event
                return self.fail_step(sink, state, step_index, started, message).await;
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(outcome)) => outcome,
        };

        // 6. Persist the whole step as one commit
        let mut state = outcome.state.clone();
        state.step_count += 1;
        state.touch();

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let mut events = sink.into_events();
        events.extend(outcome.events.iter().cloned());

        let record = StepRecord {
            step_index,
            execution_time_ms,
            timestamp: Utc::now(),
            status: state.status,
            cost_delta: outcome.cost_delta,
            events,
        };

        self.store
            .save_step_result(&session_id, &state, &record)
            .await
            .map_err(store_err)?;

        // 7. step_complete, then the terminal done event last
        let mut complete_data = json!({
            "status": state.status,
            "total_steps": state.step_count,
            "execution_time": execution_time_ms,
            "has_next_context": outcome.next_context.is_some(),
        });
        if let Some((reason, detail)) = &outcome.finish_reason {
            complete_data["reason"] = json!(reason);
            if let Some(detail) = detail {
                complete_data["reason_detail"] = json!(detail);
            }
        }
        self.publish(EventType::StepComplete, &session_id, step_index, complete_data)
            .await?;

        if let Some((reason, detail)) = &outcome.finish_reason {
            self.publish(
                EventType::Done,
                &session_id,
                step_index,
                json!({"reason": reason, "reason_detail": detail}),
            )
            .await?;
        }

        // 8. Continue?
        let next_step_scheduled = self
            .maybe_schedule_next(&task, &state, &outcome)
            .await;

        // 9. Summary
        Ok(StepSummary {
            session_id,
            step_index,
            status: state.status,
            executed: true,
            skipped_reason: None,
            execution_time_ms,
            has_next_context: outcome.next_context.is_some(),
            next_step_scheduled,
            error: None,
        })
    }

    /// Apply any intervention payload carried by the task. Returns the
    /// (possibly rewritten) state, the synthesized context, and the
    /// rejection reason when the session was rejected.
    fn apply_intervention(
        &self,
        task: &StepTask,
        mut state: Session,
    ) -> (Session, Option<StepContext>, Option<String>) {
        if state.status != SessionStatus::WaitingForHumanInput || !task.has_intervention() {
            return (state, task.context.clone(), None);
        }

        if let Some(reason) = &task.rejection_reason {
            return (state, task.context.clone(), Some(reason.clone()));
        }

        if let Some(approved) = &task.approved_tool_call {
            let mut calls = state.pending_tools_calling.take().unwrap_or_default();
            match calls.iter_mut().find(|c| c.id == approved.id) {
                Some(existing) => *existing = approved.clone(),
                None => calls.push(approved.clone()),
            }
            state.clear_pending();
            state.status = SessionStatus::Running;
            state.touch();

            let context = StepContext {
                phase: Phase::LlmResult,
                payload: json!({
                    "result": "",
                    "tool_calls": [approved],
                    "has_tool_calls": true,
                    "approved": true,
                }),
                session: SessionSnapshot::of(&state, 0),
            };
            return (state, Some(context), None);
        }

        if let Some(input) = &task.human_input {
            state.clear_pending();
            state.status = SessionStatus::Running;

            let text = input
                .get("response")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| input.to_string());

            // A payload answering a tool call becomes a tool message;
            // prompt and select answers become user messages
            match input.get("tool_call_id").and_then(|v| v.as_str()) {
                Some(tool_call_id) => state.messages.push(Message::tool(text, tool_call_id)),
                None => state.messages.push(Message::user(text)),
            }
            state.touch();

            let context = StepContext::human_input(input.clone(), &state);
            return (state, Some(context), None);
        }

        (state, task.context.clone(), None)
    }

    /// Logic-failure path: move the session to error, persist the step,
    /// and acknowledge so the queue does not retry.
    async fn fail_step(
        &self,
        sink: EventSink<'_>,
        mut state: Session,
        step_index: u32,
        started: Instant,
        message: String,
    ) -> Result<StepSummary> {
        let session_id = state.id.clone();
        state.fail(&message, None);
        state.step_count += 1;

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let record = StepRecord {
            step_index,
            execution_time_ms,
            timestamp: Utc::now(),
            status: state.status,
            cost_delta: 0.0,
            events: sink.into_events(),
        };

        self.store
            .save_step_result(&session_id, &state, &record)
            .await
            .map_err(store_err)?;

        self.publish(
            EventType::StepComplete,
            &session_id,
            step_index,
            json!({
                "status": state.status,
                "total_steps": state.step_count,
                "execution_time": execution_time_ms,
                "has_next_context": false,
            }),
        )
        .await?;

        Ok(StepSummary {
            session_id,
            step_index,
            status: state.status,
            executed: true,
            skipped_reason: None,
            execution_time_ms,
            has_next_context: false,
            next_step_scheduled: false,
            error: Some(message),
        })
    }

    async fn publish(
        &self,
        event_type: EventType,
        session_id: &str,
        step_index: u32,
        data: serde_json::Value,
    ) -> Result<u64> {
        self.stream
            .publish(
                session_id,
                Event::new(event_type, session_id, step_index, data),
            )
            .await
            .map_err(store_err)
    }

    /// Schedule the next step iff every continuation condition holds.
    async fn maybe_schedule_next(
        &self,
        task: &StepTask,
        state: &Session,
        outcome: &StepOutcome,
    ) -> bool {
        let active = !matches!(
            state.status,
            SessionStatus::Done
                | SessionStatus::WaitingForHumanInput
                | SessionStatus::Error
                | SessionStatus::Interrupted
        );
        let under_step_limit = state.max_steps.is_none_or(|max| state.step_count < max);
        let under_cost_limit = state.cost_limit.as_ref().is_none_or(|limit| {
            state.cost.total < limit.max_total_cost || limit.on_exceeded != OnExceeded::Stop
        });

        if !(active
            && under_step_limit
            && under_cost_limit
            && outcome.next_context.is_some()
            && !task.force_complete)
        {
            return false;
        }

        let Some(queue) = self.queue.get() else {
            tracing::warn!(session_id = %state.id, "no queue attached; session will stall");
            return false;
        };

        let next_task = StepTask::new(&state.id, state.step_count, outcome.next_context.clone());
        let params = StepParams {
            task: next_task,
            has_tool_calls: outcome.had_tool_results(),
            has_errors: outcome.had_errors(),
            delay_override: None,
        };

        match queue.schedule_next_step(params).await {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(
                    session_id = %state.id,
                    error = %err,
                    "failed to schedule next step"
                );
                false
            }
        }
    }
}

/// First dispatch or missing context: treat the latest user message as
/// fresh input.
fn default_context(state: &Session) -> StepContext {
    let message = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .cloned()
        .unwrap_or_else(|| Message::user(""));
    StepContext::user_input(&message, state)
}

#[async_trait::async_trait]
impl TaskDispatcher for StepEngine {
    async fn dispatch(&self, task: StepTask) -> std::result::Result<(), QueueError> {
        match self.execute_step(task).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_retryable() => Err(QueueError::Unavailable(err.to_string())),
            Err(err) => {
                // Non-retryable: acknowledge so the queue stops redelivering
                tracing::error!(error = %err, "step failed terminally");
                Ok(())
            }
        }
    }
}
