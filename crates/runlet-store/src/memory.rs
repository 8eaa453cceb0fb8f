// In-memory storage implementation for dev mode and tests
// Decision: Use parking_lot for thread-safe access
//
// Keyspaces are separate maps, mirroring the production layout. Expiry is
// lazy on reads; cleanup_expired performs the actual removal.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

use runlet_core::{
    CreateMetadata, Event, RuntimeConfig, Session, SessionMetadata, StepRecord,
};

use crate::state::{SessionStore, StoreError, STEP_HISTORY_LIMIT};
use crate::stream::{next_event_id, EventStream};

struct EventLog {
    events: VecDeque<Event>,
    last_id: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory store; all data is lost on restart
pub struct MemoryStore {
    states: RwLock<HashMap<String, (Session, DateTime<Utc>)>>,
    steps: RwLock<HashMap<String, (Vec<StepRecord>, DateTime<Utc>)>>,
    metas: RwLock<HashMap<String, (SessionMetadata, DateTime<Utc>)>>,
    logs: RwLock<HashMap<String, EventLog>>,
    config: RuntimeConfig,
}

impl MemoryStore {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            metas: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn session_deadline(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.session_ttl).unwrap_or_default()
    }

    fn event_deadline(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.event_ttl).unwrap_or_default()
    }

    /// Refresh the TTL on all three session keyspaces
    fn refresh_ttls(&self, id: &str) {
        let deadline = self.session_deadline();
        if let Some(entry) = self.states.write().get_mut(id) {
            entry.1 = deadline;
        }
        if let Some(entry) = self.steps.write().get_mut(id) {
            entry.1 = deadline;
        }
        if let Some(entry) = self.metas.write().get_mut(id) {
            entry.1 = deadline;
        }
    }

    fn denormalize_meta(&self, id: &str, state: &Session) {
        if let Some((meta, _)) = self.metas.write().get_mut(id) {
            meta.status = state.status;
            meta.total_cost = state.cost.total;
            meta.total_steps = state.step_count;
            meta.last_active_at = Utc::now();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_state(&self, id: &str, state: &Session) -> Result<(), StoreError> {
        self.states
            .write()
            .insert(id.to_string(), (state.clone(), self.session_deadline()));
        self.refresh_ttls(id);
        self.denormalize_meta(id, state);
        Ok(())
    }

    async fn load_state(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let states = self.states.read();
        Ok(states
            .get(id)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(state, _)| state.clone()))
    }

    async fn save_step_result(
        &self,
        id: &str,
        state: &Session,
        record: &StepRecord,
    ) -> Result<(), StoreError> {
        let deadline = self.session_deadline();

        self.states
            .write()
            .insert(id.to_string(), (state.clone(), deadline));

        {
            let mut steps = self.steps.write();
            let (history, expires_at) = steps
                .entry(id.to_string())
                .or_insert_with(|| (Vec::new(), deadline));
            // Replaying the same step must not duplicate its entry
            history.retain(|r| r.step_index != record.step_index);
            history.insert(0, record.clone());
            history.truncate(STEP_HISTORY_LIMIT);
            *expires_at = deadline;
        }

        self.refresh_ttls(id);
        self.denormalize_meta(id, state);
        Ok(())
    }

    async fn create_metadata(&self, id: &str, input: CreateMetadata) -> Result<(), StoreError> {
        let meta = SessionMetadata::create(id, input);
        self.metas
            .write()
            .insert(id.to_string(), (meta, self.session_deadline()));
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        let metas = self.metas.read();
        Ok(metas
            .get(id)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(meta, _)| meta.clone()))
    }

    async fn list_active(&self, user_id: Option<&str>) -> Result<Vec<SessionMetadata>, StoreError> {
        let now = Utc::now();
        let metas = self.metas.read();
        let mut result: Vec<_> = metas
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(meta, _)| meta.clone())
            .filter(|meta| user_id.is_none_or(|u| meta.user_id.as_deref() == Some(u)))
            .collect();
        result.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(result)
    }

    async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<StepRecord>, StoreError> {
        let steps = self.steps.read();
        Ok(steps
            .get(id)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(history, _)| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let had_state = self.states.write().remove(id).is_some();
        let had_meta = self.metas.write().remove(id).is_some();
        self.steps.write().remove(id);
        self.logs.write().remove(id);
        Ok(had_state || had_meta)
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .metas
            .read()
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.states.write().remove(id);
            self.steps.write().remove(id);
            self.metas.write().remove(id);
            self.logs.write().remove(id);
        }

        // Expired event logs may outlive their session keys
        self.logs.write().retain(|_, log| log.expires_at > now);

        Ok(expired.len())
    }
}

#[async_trait]
impl EventStream for MemoryStore {
    async fn publish(&self, id: &str, mut event: Event) -> Result<u64, StoreError> {
        let deadline = self.event_deadline();
        let max_len = self.config.event_max_len;

        let mut logs = self.logs.write();
        let log = logs.entry(id.to_string()).or_insert_with(|| EventLog {
            events: VecDeque::new(),
            last_id: 0,
            expires_at: deadline,
        });

        let assigned = next_event_id(log.last_id);
        event.id = assigned;
        log.last_id = assigned;
        log.events.push_back(event);
        while log.events.len() > max_len {
            log.events.pop_front();
        }
        log.expires_at = deadline;

        Ok(assigned)
    }

    async fn history(&self, id: &str, count: usize) -> Result<Vec<Event>, StoreError> {
        let logs = self.logs.read();
        Ok(logs
            .get(id)
            .filter(|log| log.expires_at > Utc::now())
            .map(|log| log.events.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn read_after(
        &self,
        id: &str,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let logs = self.logs.read();
        Ok(logs
            .get(id)
            .filter(|log| log.expires_at > Utc::now())
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| e.id > from_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cleanup(&self, id: &str) -> Result<(), StoreError> {
        self.logs.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlet_core::{EventType, Message, ModelConfig, SessionStatus};
    use tokio_util::sync::CancellationToken;

    fn meta_input() -> CreateMetadata {
        CreateMetadata {
            user_id: Some("u1".to_string()),
            model_config: Some(ModelConfig {
                model: "gpt-4o".to_string(),
                provider: "openai".to_string(),
                temperature: None,
            }),
            agent_config: None,
        }
    }

    fn record(step_index: u32, status: SessionStatus) -> StepRecord {
        StepRecord {
            step_index,
            execution_time_ms: 5,
            timestamp: Utc::now(),
            status,
            cost_delta: 0.001,
            events: vec![],
        }
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let store = MemoryStore::default();
        let session = Session::new("s1", vec![Message::user("hi")]);

        store.save_state("s1", &session).await.unwrap();
        let loaded = store.load_state("s1").await.unwrap().unwrap();
        assert_eq!(loaded, session);

        assert!(store.load_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_step_result_denormalizes_meta() {
        let store = MemoryStore::default();
        store.create_metadata("s1", meta_input()).await.unwrap();

        let mut session = Session::new("s1", vec![]);
        session.status = SessionStatus::Running;
        session.step_count = 1;
        session.cost.total = 0.002;

        store
            .save_step_result("s1", &session, &record(0, SessionStatus::Running))
            .await
            .unwrap();

        let meta = store.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.status, SessionStatus::Running);
        assert_eq!(meta.total_steps, 1);
        assert_eq!(meta.total_cost, 0.002);
    }

    #[tokio::test]
    async fn test_step_result_replay_is_idempotent() {
        let store = MemoryStore::default();
        let mut session = Session::new("s1", vec![]);
        session.step_count = 1;

        store
            .save_step_result("s1", &session, &record(0, SessionStatus::Running))
            .await
            .unwrap();
        store
            .save_step_result("s1", &session, &record(0, SessionStatus::Running))
            .await
            .unwrap();

        let history = store.get_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(store.load_state("s1").await.unwrap().unwrap(), session);
    }

    #[tokio::test]
    async fn test_history_is_capped_newest_first() {
        let store = MemoryStore::default();
        let session = Session::new("s1", vec![]);

        for i in 0..(STEP_HISTORY_LIMIT as u32 + 10) {
            store
                .save_step_result("s1", &session, &record(i, SessionStatus::Running))
                .await
                .unwrap();
        }

        let history = store.get_history("s1", usize::MAX).await.unwrap();
        assert_eq!(history.len(), STEP_HISTORY_LIMIT);
        assert_eq!(history[0].step_index, STEP_HISTORY_LIMIT as u32 + 9);
    }

    #[tokio::test]
    async fn test_list_active_filters_by_user() {
        let store = MemoryStore::default();
        store.create_metadata("s1", meta_input()).await.unwrap();
        store
            .create_metadata("s2", CreateMetadata::default())
            .await
            .unwrap();

        let all = store.list_active(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let mine = store.list_active(Some("u1")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].session_id, "s1");
    }

    #[tokio::test]
    async fn test_delete_session_removes_everything() {
        let store = MemoryStore::default();
        let session = Session::new("s1", vec![]);
        store.create_metadata("s1", meta_input()).await.unwrap();
        store.save_state("s1", &session).await.unwrap();
        store
            .publish("s1", Event::new(EventType::StepStart, "s1", 0, serde_json::json!({})))
            .await
            .unwrap();

        assert!(store.delete_session("s1").await.unwrap());
        assert!(store.load_state("s1").await.unwrap().is_none());
        assert!(store.get_metadata("s1").await.unwrap().is_none());
        assert!(store.history("s1", 10).await.unwrap().is_empty());
        assert!(!store.delete_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_assigns_monotonic_ids_and_caps_log() {
        let mut config = RuntimeConfig::default();
        config.event_max_len = 5;
        let store = MemoryStore::new(config);

        let mut last = 0;
        for i in 0..10u32 {
            let id = store
                .publish(
                    "s1",
                    Event::new(EventType::StreamChunk, "s1", i, serde_json::json!({"i": i})),
                )
                .await
                .unwrap();
            assert!(id > last);
            last = id;
        }

        let history = store.history("s1", 100).await.unwrap();
        assert_eq!(history.len(), 5);
        // Newest first
        assert!(history[0].id > history[4].id);
    }

    #[tokio::test]
    async fn test_read_after_returns_strictly_newer() {
        let store = MemoryStore::default();
        let first = store
            .publish("s1", Event::new(EventType::StepStart, "s1", 0, serde_json::json!({})))
            .await
            .unwrap();
        let second = store
            .publish("s1", Event::new(EventType::StepComplete, "s1", 0, serde_json::json!({})))
            .await
            .unwrap();

        let events = store.read_after("s1", first, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, second);

        assert!(store.read_after("s1", second, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_in_order_and_cancels() {
        let store = std::sync::Arc::new(MemoryStore::default());
        let cancel = CancellationToken::new();

        let mut published = Vec::new();
        for i in 0..3u32 {
            let id = store
                .publish(
                    "s1",
                    Event::new(EventType::StreamChunk, "s1", i, serde_json::json!({"i": i})),
                )
                .await
                .unwrap();
            published.push(id);
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sub_store = store.clone();
        let sub_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut handler = move |batch: Vec<Event>| {
                for event in batch {
                    let _ = tx.send(event.id);
                }
            };
            sub_store
                .subscribe("s1", 0, &mut handler, sub_cancel)
                .await
        });

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, published);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_stale_sessions() {
        let mut config = RuntimeConfig::default();
        config.session_ttl = std::time::Duration::from_secs(0);
        config.event_ttl = std::time::Duration::from_secs(0);
        let store = MemoryStore::new(config);

        store
            .create_metadata("s1", CreateMetadata::default())
            .await
            .unwrap();
        store
            .save_state("s1", &Session::new("s1", vec![]))
            .await
            .unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_metadata("s1").await.unwrap().is_none());
    }
}
