// Adapter seams for model and tool execution
//
// Model invocation is abstracted as a streaming chunk producer; tool
// implementations live behind ToolHost. Concrete providers are wired in
// by the embedding application, scripted versions live in sim.rs.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use runlet_core::{Message, Result, ToolCall};

/// Request for one model invocation
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub provider: String,
    pub temperature: Option<f32>,
}

/// Usage and cost reported when a stream completes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
}

/// One chunk from the model stream
#[derive(Debug, Clone)]
pub enum ModelChunk {
    /// Incremental text content
    Text(String),
    /// Tool calls requested by the model
    ToolCalls(Vec<ToolCall>),
    /// Incremental reasoning content
    Reasoning(String),
    /// Generated image reference
    Image(String),
    /// Stream completed
    Done(ModelUsage),
}

/// Streaming chunk producer returned by the adapter
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ModelChunk>> + Send>>;

/// Seam to the configured model provider
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn stream_chat(&self, request: ModelRequest) -> Result<ChunkStream>;
}

/// Seam to the external tool host
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Execute one tool call with already-parsed arguments
    async fn dispatch(&self, name: &str, arguments: serde_json::Value)
        -> Result<serde_json::Value>;
}
