// HTTP dispatch queue for production
//
// Posts the serialized task body to the step-callback URL after the
// computed delay. Up to 3 delivery attempts on transport errors or
// non-2xx responses, with jittered backoff between attempts. Already
// dispatched tasks cannot be recalled, so cancel only covers tasks
// still waiting out their delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use uuid::Uuid;

use runlet_core::StepTask;

use crate::{QueueError, QueueStats, StepParams, WorkQueue};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Configuration for the HTTP queue
#[derive(Debug, Clone)]
pub struct HttpQueueConfig {
    /// Step-callback endpoint the task body is posted to
    pub callback_url: String,

    /// Bearer token attached to every delivery
    pub token: Option<String>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl HttpQueueConfig {
    pub fn new(callback_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
            token,
            request_timeout: Duration::from_secs(150),
        }
    }
}

/// Delayed HTTP dispatcher
pub struct HttpQueue {
    client: reqwest::Client,
    config: HttpQueueConfig,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    dispatched: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl HttpQueue {
    pub fn new(config: HttpQueueConfig) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            dispatched: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn deliver(
        client: &reqwest::Client,
        config: &HttpQueueConfig,
        task: &StepTask,
    ) -> Result<(), QueueError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = client.post(&config.callback_url).json(task);
            if let Some(token) = &config.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    // Unknown session is terminal; redelivery cannot help
                    tracing::warn!(
                        session_id = %task.session_id,
                        step_index = task.step_index,
                        "step callback returned 404, dropping task"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    last_error = format!("callback returned {}", response.status());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }

            tracing::warn!(
                session_id = %task.session_id,
                step_index = task.step_index,
                attempt,
                error = %last_error,
                "step delivery attempt failed"
            );

            if attempt < MAX_ATTEMPTS {
                let jitter = rand::thread_rng().gen_range(0..250);
                tokio::time::sleep(RETRY_BASE_DELAY * attempt + Duration::from_millis(jitter))
                    .await;
            }
        }

        Err(QueueError::DispatchFailed {
            attempts: MAX_ATTEMPTS,
            message: last_error,
        })
    }
}

#[async_trait]
impl WorkQueue for HttpQueue {
    async fn schedule_next_step(&self, params: StepParams) -> Result<String, QueueError> {
        let task_id = Uuid::now_v7().to_string();
        let delay = params.delay();
        let task = params.task;

        tracing::debug!(
            session_id = %task.session_id,
            step_index = task.step_index,
            delay_ms = delay.as_millis() as u64,
            callback = %self.config.callback_url,
            "scheduling step over http"
        );

        let client = self.client.clone();
        let config = self.config.clone();
        let pending = self.pending.clone();
        let dispatched = self.dispatched.clone();
        let failed = self.failed.clone();
        let handle_id = task_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            match Self::deliver(&client, &config, &task).await {
                Ok(()) => {
                    dispatched.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        session_id = %task.session_id,
                        step_index = task.step_index,
                        error = %err,
                        "step delivery exhausted retries"
                    );
                }
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
        !self.config.callback_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::AtomicU32;

    async fn spawn_callback_server(
        fail_first: u32,
    ) -> (String, Arc<Mutex<Vec<StepTask>>>, JoinHandle<()>) {
        let received: Arc<Mutex<Vec<StepTask>>> = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(AtomicU32::new(fail_first));

        let received_clone = received.clone();
        let app = Router::new().route(
            "/execute-step",
            post(move |Json(task): Json<StepTask>| {
                let received = received_clone.clone();
                let failures = failures.clone();
                async move {
                    if failures
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                    {
                        return axum::http::StatusCode::INTERNAL_SERVER_ERROR;
                    }
                    received.lock().unwrap().push(task);
                    axum::http::StatusCode::OK
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/execute-step"), received, server)
    }

    #[tokio::test]
    async fn test_delivers_task_body_to_callback() {
        let (url, received, _server) = spawn_callback_server(0).await;
        let queue = HttpQueue::new(HttpQueueConfig::new(url, Some("secret".to_string()))).unwrap();

        queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 3, None))
                    .with_delay(Duration::from_millis(5)),
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let tasks = received.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].session_id, "s1");
        assert_eq!(tasks[0].step_index, 3);
    }

    #[tokio::test]
    async fn test_retries_on_non_2xx() {
        let (url, received, _server) = spawn_callback_server(2).await;
        let queue = HttpQueue::new(HttpQueueConfig::new(url, None)).unwrap();

        queue
            .schedule_next_step(
                StepParams::new(StepTask::new("s1", 0, None))
                    .with_delay(Duration::from_millis(1)),
            )
            .await
            .unwrap();

        for _ in 0..500 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(queue.stats().dispatched, 1);
    }
}
