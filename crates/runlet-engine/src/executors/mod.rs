// Instruction executors
//
// An executor takes (instruction, state) and produces the events, the new
// state, and optionally the context for the next step. The human and
// finish executors halt continuation by returning no next context.
//
// Stream events are published live as they are produced; the returned
// event list carries the same events with their assigned ids for the
// step record.

mod finish;
mod human;
mod llm;
mod tool;

use std::sync::Arc;

use runlet_core::{
    Event, EventType, Instruction, Result, RuntimeError, Session, SessionMetadata, StepContext,
};
use runlet_store::{EventStream, StoreError};

/// Result of executing one instruction
#[derive(Debug)]
pub struct StepOutcome {
    pub state: Session,

    /// Events published during execution, in order, with assigned ids
    pub events: Vec<Event>,

    /// Absent for halting instructions
    pub next_context: Option<StepContext>,

    /// Cost added by this step
    pub cost_delta: f64,

    /// Set by the finish executor; the engine publishes the terminal
    /// done event after step_complete
    pub finish_reason: Option<(String, Option<String>)>,
}

impl StepOutcome {
    /// An outcome that stops the loop
    pub fn halt(state: Session, events: Vec<Event>) -> Self {
        Self {
            state,
            events,
            next_context: None,
            cost_delta: 0.0,
            finish_reason: None,
        }
    }

    /// Whether any error event was produced
    pub fn had_errors(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.event_type == EventType::Error)
    }

    /// Whether a tool result was produced
    pub fn had_tool_results(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.event_type == EventType::ToolComplete)
    }
}

pub(crate) fn store_err(err: StoreError) -> RuntimeError {
    RuntimeError::store(err.to_string())
}

/// Publishes events live and keeps them (with assigned ids) for the
/// step record
pub(crate) struct EventSink<'a> {
    stream: &'a dyn EventStream,
    session_id: String,
    step_index: u32,
    events: Vec<Event>,
}

impl<'a> EventSink<'a> {
    pub(crate) fn new(stream: &'a dyn EventStream, session_id: &str, step_index: u32) -> Self {
        Self {
            stream,
            session_id: session_id.to_string(),
            step_index,
            events: Vec::new(),
        }
    }

    pub(crate) async fn publish(
        &mut self,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<u64> {
        let mut event = Event::new(event_type, &self.session_id, self.step_index, data);
        let assigned = self
            .stream
            .publish(&self.session_id, event.clone())
            .await
            .map_err(store_err)?;
        event.id = assigned;
        self.events.push(event);
        Ok(assigned)
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Executor lookup keyed by instruction kind
pub struct Executors {
    pub(crate) stream: Arc<dyn EventStream>,
    pub(crate) model: Arc<dyn crate::adapters::ModelAdapter>,
    pub(crate) tools: Arc<dyn crate::adapters::ToolHost>,
}

impl Executors {
    pub fn new(
        stream: Arc<dyn EventStream>,
        model: Arc<dyn crate::adapters::ModelAdapter>,
        tools: Arc<dyn crate::adapters::ToolHost>,
    ) -> Self {
        Self {
            stream,
            model,
            tools,
        }
    }

    /// Dispatch to the executor matching the instruction
    pub async fn execute(
        &self,
        instruction: &Instruction,
        state: Session,
        meta: &SessionMetadata,
        step_index: u32,
    ) -> Result<StepOutcome> {
        match instruction {
            Instruction::CallLlm => self.execute_llm(state, meta, step_index).await,
            Instruction::CallTool { tool_call } => {
                self.execute_tool(tool_call, state, step_index).await
            }
            Instruction::RequestHumanApprove { .. }
            | Instruction::RequestHumanPrompt { .. }
            | Instruction::RequestHumanSelect { .. } => {
                self.execute_human(instruction, state, step_index).await
            }
            Instruction::Finish {
                reason,
                reason_detail,
            } => {
                self.execute_finish(reason, reason_detail.as_deref(), state)
                    .await
            }
        }
    }
}
