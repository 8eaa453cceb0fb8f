// SessionStore trait definition
//
// Three logical keyspaces per session: the state blob, the bounded step
// history (newest first, capped at 200), and the metadata record. All
// TTLs are refreshed together on every write; expiry is enforced lazily
// at read time and by cleanup_expired scans.

use async_trait::async_trait;

use runlet_core::{CreateMetadata, Session, SessionMetadata, StepRecord};

/// Most recent step records retained per session
pub const STEP_HISTORY_LIMIT: usize = 200;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session not found (or expired)
    #[error("session not found: {0}")]
    NotFound(String),

    /// Backend fault
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Durable per-session state, step history, and metadata.
///
/// Writes to a single session are serialized by the queue guarantee that
/// at most one step per session is in flight; the store itself provides
/// no cross-session transactions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Replace the state blob, refresh TTLs, and denormalize status,
    /// total_cost, total_steps, and last_active_at into the metadata.
    async fn save_state(&self, id: &str, state: &Session) -> Result<(), StoreError>;

    /// Load the state blob. `None` when missing or expired.
    async fn load_state(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// One logical commit: overwrite the state blob, prepend the step
    /// record (trimming history to the cap), refresh TTLs, and update the
    /// denormalized metadata.
    ///
    /// Idempotent when `record.step_index` is at or below the stored
    /// step count: replaying the same record does not duplicate history.
    /// Partial failures raise and the caller retries.
    async fn save_step_result(
        &self,
        id: &str,
        state: &Session,
        record: &StepRecord,
    ) -> Result<(), StoreError>;

    /// Initialize fresh metadata: status idle, zero counters, TTL set.
    async fn create_metadata(&self, id: &str, input: CreateMetadata) -> Result<(), StoreError>;

    async fn get_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError>;

    /// Non-expired sessions, most recently active first, optionally
    /// filtered by user.
    async fn list_active(&self, user_id: Option<&str>) -> Result<Vec<SessionMetadata>, StoreError>;

    /// Most recent step records, newest first.
    async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<StepRecord>, StoreError>;

    /// Delete all three keyspaces for the session.
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete sessions whose last activity is older than the TTL.
    /// Returns the number of sessions removed.
    async fn cleanup_expired(&self) -> Result<usize, StoreError>;
}
