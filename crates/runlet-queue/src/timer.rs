// In-process timer queue for development
//
// Each schedule spawns a sleep-then-dispatch task. Delivery goes straight
// to the injected TaskDispatcher (the step engine in a single-process
// deployment). Retries match the HTTP queue: up to 3 attempts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{QueueError, QueueStats, StepParams, TaskDispatcher, WorkQueue};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Timer-based in-process queue
pub struct TimerQueue {
    dispatcher: Arc<dyn TaskDispatcher>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    dispatched: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl TimerQueue {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            dispatcher,
            pending: Arc::new(Mutex::new(HashMap::new())),
            dispatched: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait until no timers remain; test helper
    pub async fn drain(&self) {
        loop {
            let is_empty = self
                .pending
                .lock()
                .map(|pending| pending.is_empty())
                .unwrap_or(true);
            if is_empty {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl WorkQueue for TimerQueue {
    async fn schedule_next_step(&self, params: StepParams) -> Result<String, QueueError> {
        let task_id = Uuid::now_v7().to_string();
        let delay = params.delay();
        let task = params.task;

        tracing::debug!(
            session_id = %task.session_id,
            step_index = task.step_index,
            delay_ms = delay.as_millis() as u64,
            "scheduling step"
        );

        let dispatcher = self.dispatcher.clone();
        let pending = self.pending.clone();
        let dispatched = self.dispatched.clone();
        let failed = self.failed.clone();
        let handle_id = task_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut delivered = false;
            for attempt in 1..=MAX_ATTEMPTS {
                match dispatcher.dispatch(task.clone()).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %task.session_id,
                            step_index = task.step_index,
                            attempt,
                            error = %err,
                            "step dispatch attempt failed"
                        );
                        if attempt < MAX_ATTEMPTS {
                            tokio::time::sleep(RETRY_DELAY).await;
                        }
                    }
                }
            }

            if delivered {
                dispatched.fetch_add(1, Ordering::Relaxed);
            } else {
                failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    session_id = %task.session_id,
                    step_index = task.step_index,
                    "step dispatch exhausted retries"
                );
            }

            if let Ok(mut pending) = pending.lock() {
                pending.remove(&handle_id);
            }
        });

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(task_id.clone(), handle);
        }

        Ok(task_id)
    }

    async fn cancel(&self, task_id: &str) -> Result<bool, QueueError> {
        let handle = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(task_id));
        if let Some(handle) = handle {
            handle.abort();
            return Ok(true);
        }
        Ok(false)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.lock().map(|p| p.len()).unwrap_or(0),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use runlet_core::StepTask;

    /// Records dispatched tasks; fails the first `fail_first` attempts
    struct Recorder {
        tasks: PlMutex<Vec<StepTask>>,
        fail_first: PlMutex<u32>,
    }

    impl Recorder {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                tasks: PlMutex::new(Vec::new()),
                fail_first: PlMutex::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl TaskDispatcher for Recorder {
        async fn dispatch(&self, task: StepTask) -> Result<(), QueueError> {
            let mut remaining = self.fail_first.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(QueueError::Unavailable("induced".to_string()));
            }
            drop(remaining);
            self.tasks.lock().push(task);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_schedule_delivers_task() {
        let recorder = Recorder::new(0);
        let queue = TimerQueue::new(recorder.clone());

        queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 0, None))
                    .with_delay(Duration::from_millis(10)),
            )
            .await
            .unwrap();

        queue.drain().await;
        let tasks = recorder.tasks.lock();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].session_id, "s1");
        assert_eq!(queue.stats().dispatched, 1);
    }

    #[tokio::test]
    async fn test_dispatch_retries_then_succeeds() {
        let recorder = Recorder::new(2);
        let queue = TimerQueue::new(recorder.clone());

        queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 0, None))
                    .with_delay(Duration::from_millis(1)),
            )
            .await
            .unwrap();

        queue.drain().await;
        assert_eq!(recorder.tasks.lock().len(), 1);
        assert_eq!(queue.stats().dispatched, 1);
        assert_eq!(queue.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_counts_as_failed() {
        let recorder = Recorder::new(u32::MAX);
        let queue = TimerQueue::new(recorder.clone());

        queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 0, None))
                    .with_delay(Duration::from_millis(1)),
            )
            .await
            .unwrap();

        queue.drain().await;
        assert!(recorder.tasks.lock().is_empty());
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let recorder = Recorder::new(0);
        let queue = TimerQueue::new(recorder.clone());

        let task_id = queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 0, None))
                    .with_delay(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert!(queue.cancel(&task_id).await.unwrap());
        assert!(recorder.tasks.lock().is_empty());
        assert!(!queue.cancel("unknown").await.unwrap());
    }
}
