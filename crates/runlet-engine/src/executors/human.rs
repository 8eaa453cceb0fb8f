// Human-in-the-loop executors
//
// All three variants park the session in waiting_for_human_input with
// exactly one pending_* field set, publish a human_approval_request
// event describing what is awaited, and halt continuation.

use serde_json::json;

use runlet_core::{EventType, Instruction, Result, RuntimeError, Session, SessionStatus};

use super::{EventSink, Executors, StepOutcome};

impl Executors {
    pub(crate) async fn execute_human(
        &self,
        instruction: &Instruction,
        mut state: Session,
        step_index: u32,
    ) -> Result<StepOutcome> {
        let mut sink = EventSink::new(&*self.stream, &state.id, step_index);

        state.clear_pending();
        state.status = SessionStatus::WaitingForHumanInput;

        match instruction {
            Instruction::RequestHumanApprove { tool_calls } => {
                state.pending_tools_calling = Some(tool_calls.clone());
                sink.publish(
                    EventType::HumanApprovalRequest,
                    json!({"kind": "approve", "tool_calls": tool_calls}),
                )
                .await?;
                // Mirror the calls as a stream chunk so UIs can render
                // them inline with the transcript
                sink.publish(
                    EventType::StreamChunk,
                    json!({
                        "chunk_type": "tool_calls",
                        "content": "",
                        "tool_calls": tool_calls,
                    }),
                )
                .await?;
            }
            Instruction::RequestHumanPrompt { prompt } => {
                state.pending_human_prompt = Some(prompt.clone());
                sink.publish(
                    EventType::HumanApprovalRequest,
                    json!({"kind": "prompt", "prompt": prompt}),
                )
                .await?;
            }
            Instruction::RequestHumanSelect { select } => {
                state.pending_human_select = Some(select.clone());
                sink.publish(
                    EventType::HumanApprovalRequest,
                    json!({"kind": "select", "select": select}),
                )
                .await?;
            }
            other => {
                return Err(RuntimeError::logic(format!(
                    "not a human instruction: {}",
                    other.name()
                )))
            }
        }

        state.touch();
        Ok(StepOutcome::halt(state, sink.into_events()))
    }
}
