// Error taxonomy for the runtime
//
// Kinds map one-to-one onto the HTTP statuses the server surfaces:
// validation -> 400, not-found -> 404, conflict -> 409,
// store-unavailable -> 503, executor -> 500 (queue retries),
// logic -> 200 to the queue (no retry) after the session moves to error.

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while driving a session
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Bad or missing parameters
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown session or resource
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid in the session's current status
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient backend fault
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Executor fault; the queue will retry the step
    #[error("executor fault: {0}")]
    Executor(String),

    /// Runner produced an invalid instruction; not retried
    #[error("logic error: {0}")]
    Logic(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RuntimeError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RuntimeError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        RuntimeError::Conflict(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        RuntimeError::StoreUnavailable(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        RuntimeError::Executor(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        RuntimeError::Logic(msg.into())
    }

    /// Whether the queue should retry the step that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::StoreUnavailable(_) | RuntimeError::Executor(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RuntimeError::executor("model timeout").is_retryable());
        assert!(RuntimeError::store("connection reset").is_retryable());
        assert!(!RuntimeError::logic("bad instruction").is_retryable());
        assert!(!RuntimeError::not_found("s1").is_retryable());
    }
}
