// LLM executor
//
// Consumes the adapter's chunk stream, publishing a stream_chunk event
// per chunk with both the delta and the running accumulation, then a
// stream_end with the final result. The assistant message is appended to
// state and the next context carries the llm_result phase.

use futures::StreamExt;
use serde_json::json;

use runlet_core::{
    EventType, Message, Result, RuntimeError, Session, SessionMetadata, StepContext, ToolCall,
    Usage,
};

use crate::adapters::{ModelAdapter, ModelChunk, ModelRequest, ModelUsage};

use super::{EventSink, Executors, StepOutcome};

impl Executors {
    pub(crate) async fn execute_llm(
        &self,
        mut state: Session,
        meta: &SessionMetadata,
        step_index: u32,
    ) -> Result<StepOutcome> {
        let mut sink = EventSink::new(&*self.stream, &state.id, step_index);

        sink.publish(
            EventType::StreamStart,
            json!({
                "model": meta.model_config.model,
                "provider": meta.model_config.provider,
            }),
        )
        .await?;

        let request = ModelRequest {
            messages: state.messages.clone(),
            model: meta.model_config.model.clone(),
            provider: meta.model_config.provider.clone(),
            temperature: meta.model_config.temperature,
        };

        let mut chunks = match self.model.stream_chat(request).await {
            Ok(stream) => stream,
            Err(err) => {
                sink.publish(
                    EventType::Error,
                    json!({"phase": "llm_call", "error": err.to_string()}),
                )
                .await?;
                return Err(RuntimeError::executor(err.to_string()));
            }
        };

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut image_list: Vec<String> = Vec::new();
        let mut usage = ModelUsage::default();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(ModelChunk::Text(delta)) => {
                    content.push_str(&delta);
                    sink.publish(
                        EventType::StreamChunk,
                        json!({
                            "chunk_type": "text",
                            "content": delta,
                            "full_content": content,
                        }),
                    )
                    .await?;
                }
                Ok(ModelChunk::ToolCalls(calls)) => {
                    tool_calls.extend(calls);
                    sink.publish(
                        EventType::StreamChunk,
                        json!({
                            "chunk_type": "tool_calls",
                            "content": "",
                            "full_content": content,
                            "tool_calls": tool_calls,
                        }),
                    )
                    .await?;
                }
                Ok(ModelChunk::Reasoning(delta)) => {
                    reasoning.push_str(&delta);
                    sink.publish(
                        EventType::StreamChunk,
                        json!({
                            "chunk_type": "reasoning",
                            "content": delta,
                            "full_content": reasoning,
                        }),
                    )
                    .await?;
                }
                Ok(ModelChunk::Image(url)) => {
                    image_list.push(url.clone());
                    sink.publish(
                        EventType::StreamChunk,
                        json!({
                            "chunk_type": "image",
                            "content": url,
                            "full_content": content,
                        }),
                    )
                    .await?;
                }
                Ok(ModelChunk::Done(reported)) => {
                    usage = reported;
                }
                Err(err) => {
                    sink.publish(
                        EventType::Error,
                        json!({"phase": "llm_stream", "error": err.to_string()}),
                    )
                    .await?;
                    return Err(RuntimeError::executor(err.to_string()));
                }
            }
        }

        sink.publish(
            EventType::StreamEnd,
            json!({
                "final_content": content,
                "tool_calls": tool_calls,
                "reasoning": reasoning,
                "grounding": serde_json::Value::Null,
                "image_list": image_list,
            }),
        )
        .await?;

        if tool_calls.is_empty() {
            state.messages.push(Message::assistant(&content));
        } else {
            state
                .messages
                .push(Message::assistant_with_tools(&content, tool_calls.clone()));
        }

        state.usage.add(&Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
        state.cost.total += usage.cost;
        state.status = runlet_core::SessionStatus::Running;
        state.touch();

        let next = StepContext::llm_result(&content, &tool_calls, &state, sink.len());

        Ok(StepOutcome {
            state,
            events: sink.into_events(),
            next_context: Some(next),
            cost_delta: usage.cost,
            finish_reason: None,
        })
    }
}
