// Session metadata
//
// Companion record to the state blob, kept field-addressable for listing
// and statistics. The store denormalizes status, total_cost, total_steps
// and last_active_at into it on every write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::session::SessionStatus;

/// Model selection for a session; model and provider are required
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ModelConfig {
    pub model: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Metadata companion record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SessionMetadata {
    pub session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub last_active_at: DateTime<Utc>,

    /// Denormalized from the state blob
    pub status: SessionStatus,

    pub total_cost: f64,

    pub total_steps: u32,

    pub model_config: ModelConfig,

    /// Opaque agent configuration blob
    #[serde(default)]
    pub agent_config: serde_json::Value,
}

/// Input for creating fresh metadata
#[derive(Debug, Clone, Default)]
pub struct CreateMetadata {
    pub user_id: Option<String>,
    pub model_config: Option<ModelConfig>,
    pub agent_config: Option<serde_json::Value>,
}

impl SessionMetadata {
    pub fn create(session_id: impl Into<String>, input: CreateMetadata) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: input.user_id,
            created_at: now,
            last_active_at: now,
            status: SessionStatus::Idle,
            total_cost: 0.0,
            total_steps: 0,
            model_config: input.model_config.unwrap_or(ModelConfig {
                model: String::new(),
                provider: String::new(),
                temperature: None,
            }),
            agent_config: input.agent_config.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_metadata_defaults() {
        let meta = SessionMetadata::create(
            "s1",
            CreateMetadata {
                user_id: Some("u1".to_string()),
                model_config: Some(ModelConfig {
                    model: "gpt-4o".to_string(),
                    provider: "openai".to_string(),
                    temperature: None,
                }),
                agent_config: None,
            },
        );
        assert_eq!(meta.status, SessionStatus::Idle);
        assert_eq!(meta.total_steps, 0);
        assert_eq!(meta.total_cost, 0.0);
        assert_eq!(meta.user_id.as_deref(), Some("u1"));
    }
}
