// EventStream trait definition
//
// Append-only per-session log with three essential capabilities: append,
// range-read backward, and subscribe-live-from-id. Subscription is
// poll-based with exponential backoff (100ms -> 10s, reset on delivery)
// so both backends share one implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use runlet_core::Event;

use crate::state::StoreError;

const MIN_POLL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(10);

/// Callback invoked with each ordered batch of events
pub type EventBatchHandler<'a> = &'a mut (dyn FnMut(Vec<Event>) + Send);

/// Append-only, bounded, replayable event log per session
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Canonicalize, assign the next monotonic id, append (evicting the
    /// oldest past the max length), refresh the log TTL, and return the
    /// assigned id.
    async fn publish(&self, id: &str, event: Event) -> Result<u64, StoreError>;

    /// Reverse-chronological slice of the log tail.
    async fn history(&self, id: &str, count: usize) -> Result<Vec<Event>, StoreError>;

    /// Events with id strictly greater than `from_id`, oldest first.
    async fn read_after(
        &self,
        id: &str,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    /// Delete the log.
    async fn cleanup(&self, id: &str) -> Result<(), StoreError>;

    /// Deliver every event with id strictly greater than `from_id` to the
    /// handler, in id order, in batches, until the cancel token fires.
    /// Returns without error on cancellation.
    async fn subscribe(
        &self,
        id: &str,
        from_id: u64,
        handler: EventBatchHandler<'_>,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        let mut watermark = from_id;
        let mut backoff = MIN_POLL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let batch = self.read_after(id, watermark, 256).await?;
            if batch.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
                continue;
            }

            watermark = batch.last().map(|e| e.id).unwrap_or(watermark);
            handler(batch);
            backoff = MIN_POLL_BACKOFF;
        }
    }
}

/// Assign the next id for a session log: millisecond-based, strictly
/// greater than the previous id.
pub(crate) fn next_event_id(last_id: u64) -> u64 {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    now_ms.max(last_id + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_event_id_is_strictly_monotonic() {
        let first = next_event_id(0);
        let second = next_event_id(first);
        assert!(second > first);

        // A last id far in the future still advances by one
        let future = first + 1_000_000;
        assert_eq!(next_event_id(future), future + 1);
    }
}
