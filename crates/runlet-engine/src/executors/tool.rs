// Tool executor
//
// Parses the call's raw argument string, dispatches to the tool host,
// and appends the stringified result as a tool message correlated by
// tool_call_id. Host faults leave the state unchanged and hand the
// engine an error_recovery context instead of failing the step.

use std::time::Instant;

use serde_json::json;

use crate::adapters::ToolHost;

use runlet_core::{
    EventType, Message, Phase, Result, RuntimeError, Session, SessionSnapshot, SessionStatus,
    StepContext, ToolCall,
};

use super::{EventSink, Executors, StepOutcome};

impl Executors {
    pub(crate) async fn execute_tool(
        &self,
        tool_call: &ToolCall,
        mut state: Session,
        step_index: u32,
    ) -> Result<StepOutcome> {
        let mut sink = EventSink::new(&*self.stream, &state.id, step_index);

        sink.publish(EventType::ToolStart, json!({ "toolCall": tool_call }))
            .await?;

        let arguments: serde_json::Value = match serde_json::from_str(&tool_call.function.arguments)
        {
            Ok(value) => value,
            Err(err) => {
                sink.publish(
                    EventType::Error,
                    json!({
                        "phase": "tool_arguments",
                        "error": err.to_string(),
                        "tool_call_id": tool_call.id,
                    }),
                )
                .await?;
                // Retrying replays the same malformed arguments
                return Err(RuntimeError::logic(format!(
                    "malformed arguments for tool {}: {err}",
                    tool_call.function.name
                )));
            }
        };

        let started = Instant::now();
        match self
            .tools
            .dispatch(&tool_call.function.name, arguments)
            .await
        {
            Ok(result) => {
                let execution_time_ms = started.elapsed().as_millis() as u64;
                let rendered = serde_json::to_string(&result)?;

                state.messages.push(Message::tool(rendered, &tool_call.id));
                state.status = SessionStatus::Running;
                state.touch();

                sink.publish(
                    EventType::ToolComplete,
                    json!({
                        "tool_call_id": tool_call.id,
                        "tool_name": tool_call.function.name,
                        "execution_time_ms": execution_time_ms,
                        "result": result,
                    }),
                )
                .await?;

                let next = StepContext::tool_result(&result, &tool_call.id, &state, sink.len());

                Ok(StepOutcome {
                    state,
                    events: sink.into_events(),
                    next_context: Some(next),
                    cost_delta: 0.0,
                    finish_reason: None,
                })
            }
            Err(err) => {
                sink.publish(
                    EventType::Error,
                    json!({
                        "phase": "tool_execution",
                        "error": err.to_string(),
                        "tool_call_id": tool_call.id,
                    }),
                )
                .await?;

                // State unchanged; the engine decides whether to retry
                // or recover from the error_recovery context
                let next = StepContext {
                    phase: Phase::ErrorRecovery,
                    payload: json!({
                        "error": err.to_string(),
                        "tool_call_id": tool_call.id,
                    }),
                    session: SessionSnapshot::of(&state, sink.len()),
                };

                Ok(StepOutcome {
                    state,
                    events: sink.into_events(),
                    next_context: Some(next),
                    cost_delta: 0.0,
                    finish_reason: None,
                })
            }
        }
    }
}
