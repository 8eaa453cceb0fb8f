// Scripted adapters for dev mode and tests
//
// ScriptedModelAdapter plays back queued turns of chunks, one turn per
// stream_chat call. ScriptedToolHost answers tool calls from a fixed
// table and records what it was asked to run.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use runlet_core::{Result, RuntimeError};

use crate::adapters::{ChunkStream, ModelAdapter, ModelChunk, ModelRequest, ModelUsage, ToolHost};

/// Model adapter that streams pre-scripted turns
#[derive(Default)]
pub struct ScriptedModelAdapter {
    turns: Mutex<VecDeque<Vec<ModelChunk>>>,
}

impl ScriptedModelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the chunks for the next stream_chat call. A Done chunk is
    /// appended automatically when the turn does not end with one.
    pub fn push_turn(&self, mut chunks: Vec<ModelChunk>) {
        if !matches!(chunks.last(), Some(ModelChunk::Done(_))) {
            chunks.push(ModelChunk::Done(ModelUsage::default()));
        }
        self.turns.lock().push_back(chunks);
    }

    /// Convenience: a turn that streams the given text deltas
    pub fn push_text_turn(&self, deltas: &[&str], usage: ModelUsage) {
        let mut chunks: Vec<ModelChunk> = deltas
            .iter()
            .map(|d| ModelChunk::Text(d.to_string()))
            .collect();
        chunks.push(ModelChunk::Done(usage));
        self.turns.lock().push_back(chunks);
    }
}

#[async_trait]
impl ModelAdapter for ScriptedModelAdapter {
    async fn stream_chat(&self, _request: ModelRequest) -> Result<ChunkStream> {
        let chunks = self.turns.lock().pop_front().unwrap_or_else(|| {
            vec![
                ModelChunk::Text("(no scripted turn)".to_string()),
                ModelChunk::Done(ModelUsage::default()),
            ]
        });
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }
}

/// Recorded tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool host answering from a fixed name -> result table
#[derive(Default)]
pub struct ScriptedToolHost {
    results: Mutex<HashMap<String, serde_json::Value>>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedToolHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, name: impl Into<String>, result: serde_json::Value) -> Self {
        self.results.lock().insert(name.into(), result);
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl ToolHost for ScriptedToolHost {
    async fn dispatch(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.invocations.lock().push(ToolInvocation {
            name: name.to_string(),
            arguments,
        });
        self.results
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::executor(format!("unknown tool: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_adapter_plays_turns_in_order() {
        let adapter = ScriptedModelAdapter::new();
        adapter.push_text_turn(&["hel", "lo"], ModelUsage::default());

        let request = ModelRequest {
            messages: vec![],
            model: "sim".to_string(),
            provider: "sim".to_string(),
            temperature: None,
        };

        let mut stream = adapter.stream_chat(request).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let ModelChunk::Text(delta) = chunk.unwrap() {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_tool_host_records_invocations() {
        let host = ScriptedToolHost::new().with_result("calc", serde_json::json!({"v": 4}));

        let result = host
            .dispatch("calc", serde_json::json!({"x": 2}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"v": 4}));
        assert_eq!(host.invocations().len(), 1);

        assert!(host.dispatch("nope", serde_json::json!({})).await.is_err());
    }
}
