// Runlet core domain types
//
// This crate defines the data model shared by every other crate in the
// workspace: sessions, messages, events, step contexts, instructions, and
// the runner that decides what a step does.
//
// Key design decisions:
// - All types are serde-serializable; state crosses process boundaries
//   through the store and the work queue, never through shared memory
// - Instructions are a tagged enum; the halting variants (finish, human
//   requests) produce no next context by construction
// - The runner is a pure function of (context, session) so it can be
//   replayed and unit-tested without any backend

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod instruction;
pub mod message;
pub mod metadata;
pub mod session;
pub mod task;

pub use config::RuntimeConfig;
pub use context::{Phase, SessionSnapshot, StepContext};
pub use error::{Result, RuntimeError};
pub use event::{Event, EventType};
pub use instruction::{ApprovalPolicy, Instruction, PolicyRunner, Runner};
pub use message::{FunctionCall, Message, MessageRole, ToolCall};
pub use metadata::{CreateMetadata, ModelConfig, SessionMetadata};
pub use session::{
    Cost, CostLimit, ErrorInfo, HumanPrompt, HumanSelect, Interruption, OnExceeded, Session,
    SessionStatus, Usage,
};
pub use task::{Priority, StepRecord, StepTask};
