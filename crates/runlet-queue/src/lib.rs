// Work queue for delayed step dispatch
//
// The queue's only job: after schedule() returns, the task will
// eventually (at-least-once) result in a callback to the step endpoint
// with the serialized task body. Idempotency is the executor's problem.
//
// Two implementations selected by configuration: TimerQueue hands tasks
// to an in-process dispatcher (dev mode), HttpQueue posts them to the
// configured callback URL with bounded retry (production).

pub mod http;
pub mod timer;

use std::time::Duration;

use async_trait::async_trait;

use runlet_core::{Priority, StepTask};

pub use http::{HttpQueue, HttpQueueConfig};
pub use timer::TimerQueue;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Delivery failed after all attempts
    #[error("dispatch failed after {attempts} attempts: {message}")]
    DispatchFailed { attempts: u32, message: String },

    /// Task could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue is shutting down or misconfigured
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Inputs to the delay policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayInput {
    pub priority: Priority,
    pub step_index: u32,
    /// Previous step emitted tool results
    pub has_tool_calls: bool,
    /// Previous step emitted errors
    pub has_errors: bool,
}

/// Pure delay policy.
///
/// Base by priority (high 200ms, normal 1s, low 5s), +1s after tool
/// results, plus a capped backoff of min(step_index * 1s, 10s) after
/// errors.
pub fn calculate_delay(input: &DelayInput) -> Duration {
    let mut millis: u64 = match input.priority {
        Priority::High => 200,
        Priority::Normal => 1_000,
        Priority::Low => 5_000,
    };

    if input.has_tool_calls {
        millis += 1_000;
    }

    if input.has_errors {
        millis += (u64::from(input.step_index) * 1_000).min(10_000);
    }

    Duration::from_millis(millis)
}

/// One schedule request
#[derive(Debug, Clone)]
pub struct StepParams {
    pub task: StepTask,
    pub has_tool_calls: bool,
    pub has_errors: bool,
    /// Overrides the computed delay when set
    pub delay_override: Option<Duration>,
}

impl StepParams {
    pub fn new(task: StepTask) -> Self {
        Self {
            task,
            has_tool_calls: false,
            has_errors: false,
            delay_override: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_override = Some(delay);
        self
    }

    /// The effective delay for this request
    pub fn delay(&self) -> Duration {
        self.delay_override.unwrap_or_else(|| {
            calculate_delay(&DelayInput {
                priority: self.task.priority,
                step_index: self.task.step_index,
                has_tool_calls: self.has_tool_calls,
                has_errors: self.has_errors,
            })
        })
    }
}

/// Counters exposed by queue implementations
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub dispatched: u64,
    pub failed: u64,
}

/// Receives tasks from the in-process queue.
///
/// The step engine implements this; tests substitute a recorder.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: StepTask) -> Result<(), QueueError>;
}

/// At-least-once delayed dispatch of step tasks
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Schedule a step with the policy-computed (or overridden) delay.
    /// Returns the task id.
    async fn schedule_next_step(&self, params: StepParams) -> Result<String, QueueError>;

    /// Schedule at elevated priority with a ~100ms delay; used to resume
    /// after human intervention.
    async fn schedule_immediate(&self, task: StepTask) -> Result<String, QueueError> {
        let mut task = task;
        task.priority = Priority::High;
        self.schedule_next_step(
            StepParams::new(task).with_delay(Duration::from_millis(100)),
        )
        .await
    }

    async fn schedule_batch(&self, params: Vec<StepParams>) -> Result<Vec<String>, QueueError> {
        let mut ids = Vec::with_capacity(params.len());
        for p in params {
            ids.push(self.schedule_next_step(p).await?);
        }
        Ok(ids)
    }

    /// Best-effort cancellation; may be a no-op for backends that cannot
    /// recall dispatched work.
    async fn cancel(&self, task_id: &str) -> Result<bool, QueueError>;

    fn stats(&self) -> QueueStats;

    async fn health(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay_ms(input: DelayInput) -> u64 {
        calculate_delay(&input).as_millis() as u64
    }

    #[test]
    fn test_base_delays_by_priority() {
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::High,
                ..Default::default()
            }),
            200
        );
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::Normal,
                ..Default::default()
            }),
            1_000
        );
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::Low,
                ..Default::default()
            }),
            5_000
        );
    }

    #[test]
    fn test_tool_results_add_a_second() {
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::Normal,
                has_tool_calls: true,
                ..Default::default()
            }),
            2_000
        );
    }

    #[test]
    fn test_error_backoff_scales_with_step_index() {
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::Normal,
                has_errors: true,
                step_index: 3,
                ..Default::default()
            }),
            4_000
        );
    }

    #[test]
    fn test_error_backoff_is_capped() {
        assert_eq!(
            delay_ms(DelayInput {
                priority: Priority::Normal,
                has_errors: true,
                step_index: 20,
                ..Default::default()
            }),
            11_000
        );
    }

    #[test]
    fn test_delay_override_wins() {
        let task = StepTask::new("s1", 5, None);
        let params = StepParams::new(task).with_delay(Duration::from_millis(500));
        assert_eq!(params.delay(), Duration::from_millis(500));
    }
}
