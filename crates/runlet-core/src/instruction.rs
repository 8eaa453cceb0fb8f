// Instructions and the runner
//
// An instruction is the runner's decision of what the next step does.
// The halting variants (the human requests and finish) are executed by
// executors that return no next context, which is what stops the loop.
//
// The runner is a pure function of (context, session); the shipped
// PolicyRunner implements the default decision table with a configurable
// approval policy for tool calls.

use serde::{Deserialize, Serialize};

use crate::context::{Phase, StepContext};
use crate::error::{Result, RuntimeError};
use crate::message::ToolCall;
use crate::session::{HumanPrompt, HumanSelect, Session};

/// What the next step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    CallLlm,

    CallTool {
        tool_call: ToolCall,
    },

    RequestHumanApprove {
        tool_calls: Vec<ToolCall>,
    },

    RequestHumanPrompt {
        prompt: HumanPrompt,
    },

    RequestHumanSelect {
        select: HumanSelect,
    },

    Finish {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason_detail: Option<String>,
    },
}

impl Instruction {
    pub fn finish(reason: impl Into<String>) -> Self {
        Instruction::Finish {
            reason: reason.into(),
            reason_detail: None,
        }
    }

    pub fn finish_with_detail(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Instruction::Finish {
            reason: reason.into(),
            reason_detail: Some(detail.into()),
        }
    }

    /// Instruction name used in events and logs
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::CallLlm => "call_llm",
            Instruction::CallTool { .. } => "call_tool",
            Instruction::RequestHumanApprove { .. } => "request_human_approve",
            Instruction::RequestHumanPrompt { .. } => "request_human_prompt",
            Instruction::RequestHumanSelect { .. } => "request_human_select",
            Instruction::Finish { .. } => "finish",
        }
    }
}

/// Decides the next instruction from the previous step's context.
///
/// Implementations must be pure: same (context, session) in, same
/// instruction out. Side effects belong in executors.
pub trait Runner: Send + Sync {
    fn decide(&self, context: &StepContext, session: &Session) -> Result<Instruction>;
}

/// When tool calls require human approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPolicy {
    /// Execute tool calls directly
    #[default]
    Never,
    /// Every tool call pauses for approval
    Always,
}

/// Default decision table:
/// user_input -> call_llm; llm_result with tool calls -> approval or the
/// first tool call; tool_result -> call_llm; anything else -> finish.
#[derive(Debug, Clone, Default)]
pub struct PolicyRunner {
    pub approval: ApprovalPolicy,
}

impl PolicyRunner {
    pub fn new(approval: ApprovalPolicy) -> Self {
        Self { approval }
    }
}

impl Runner for PolicyRunner {
    fn decide(&self, context: &StepContext, _session: &Session) -> Result<Instruction> {
        match context.phase {
            Phase::UserInput | Phase::HumanInput => Ok(Instruction::CallLlm),
            Phase::LlmResult => {
                let tool_calls = context.tool_calls();
                if tool_calls.is_empty() {
                    return Ok(Instruction::finish("completed"));
                }
                // An approved payload must not loop back into approval
                if self.approval == ApprovalPolicy::Always && !context.is_approved() {
                    Ok(Instruction::RequestHumanApprove { tool_calls })
                } else {
                    let tool_call = tool_calls.into_iter().next().ok_or_else(|| {
                        RuntimeError::logic("llm_result payload had no tool calls")
                    })?;
                    Ok(Instruction::CallTool { tool_call })
                }
            }
            Phase::ToolResult => Ok(Instruction::CallLlm),
            Phase::ErrorRecovery => Ok(Instruction::finish("error_recovery")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn context(phase: Phase, payload: serde_json::Value) -> (StepContext, Session) {
        let session = Session::new("s1", vec![Message::user("hi")]);
        let ctx = StepContext {
            phase,
            payload,
            session: crate::context::SessionSnapshot::of(&session, 0),
        };
        (ctx, session)
    }

    #[test]
    fn test_user_input_calls_llm() {
        let runner = PolicyRunner::default();
        let (ctx, session) = context(Phase::UserInput, serde_json::json!({}));
        assert_eq!(runner.decide(&ctx, &session).unwrap(), Instruction::CallLlm);
    }

    #[test]
    fn test_llm_result_without_tools_finishes() {
        let runner = PolicyRunner::default();
        let (ctx, session) = context(
            Phase::LlmResult,
            serde_json::json!({"result": "hello", "tool_calls": [], "has_tool_calls": false}),
        );
        assert!(matches!(
            runner.decide(&ctx, &session).unwrap(),
            Instruction::Finish { .. }
        ));
    }

    #[test]
    fn test_llm_result_with_tools_dispatches_first_call() {
        let runner = PolicyRunner::default();
        let calls = vec![ToolCall::new("t1", "calc", "{\"x\":2}")];
        let (ctx, session) = context(
            Phase::LlmResult,
            serde_json::json!({"result": "", "tool_calls": calls, "has_tool_calls": true}),
        );
        match runner.decide(&ctx, &session).unwrap() {
            Instruction::CallTool { tool_call } => assert_eq!(tool_call.id, "t1"),
            other => panic!("expected CallTool, got {other:?}"),
        }
    }

    #[test]
    fn test_approval_policy_pauses_then_resumes() {
        let runner = PolicyRunner::new(ApprovalPolicy::Always);
        let calls = vec![ToolCall::new("t1", "calc", "{\"x\":2}")];

        let (ctx, session) = context(
            Phase::LlmResult,
            serde_json::json!({"result": "", "tool_calls": calls, "has_tool_calls": true}),
        );
        assert!(matches!(
            runner.decide(&ctx, &session).unwrap(),
            Instruction::RequestHumanApprove { .. }
        ));

        // Same payload marked approved goes straight to the tool
        let (approved_ctx, session) = context(
            Phase::LlmResult,
            serde_json::json!({
                "result": "",
                "tool_calls": vec![ToolCall::new("t1", "calc", "{\"x\":2}")],
                "has_tool_calls": true,
                "approved": true,
            }),
        );
        assert!(matches!(
            runner.decide(&approved_ctx, &session).unwrap(),
            Instruction::CallTool { .. }
        ));
    }

    #[test]
    fn test_tool_result_calls_llm() {
        let runner = PolicyRunner::default();
        let (ctx, session) = context(Phase::ToolResult, serde_json::json!({"result": {"v": 4}}));
        assert_eq!(runner.decide(&ctx, &session).unwrap(), Instruction::CallLlm);
    }
}
