// PostgreSQL storage implementation with sqlx
//
// Four tables: session_state, session_steps, session_meta, session_events.
// save_step_result runs in a transaction so the whole batch is one logical
// commit. TTLs are expires_at columns refreshed on every write; reads
// filter on them and cleanup_expired deletes past them.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use runlet_core::{
    CreateMetadata, Event, ModelConfig, RuntimeConfig, Session, SessionMetadata, SessionStatus,
    StepRecord,
};

use crate::state::{SessionStore, StoreError, STEP_HISTORY_LIMIT};
use crate::stream::{next_event_id, EventStream};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS session_state (
        session_id TEXT PRIMARY KEY,
        state JSONB NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_steps (
        session_id TEXT NOT NULL,
        step_index BIGINT NOT NULL,
        record JSONB NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (session_id, step_index)
    )",
    "CREATE TABLE IF NOT EXISTS session_meta (
        session_id TEXT PRIMARY KEY,
        user_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        last_active_at TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        total_cost DOUBLE PRECISION NOT NULL,
        total_steps BIGINT NOT NULL,
        model_config JSONB NOT NULL,
        agent_config JSONB NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_events (
        session_id TEXT NOT NULL,
        event_id BIGINT NOT NULL,
        event JSONB NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (session_id, event_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_session_meta_last_active
        ON session_meta (last_active_at)",
];

/// PostgreSQL-backed store
pub struct PostgresStore {
    pool: PgPool,
    config: RuntimeConfig,
}

impl PostgresStore {
    /// Connect and run idempotent schema migration
    pub async fn connect(url: &str, config: RuntimeConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        let store = Self { pool, config };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn session_deadline(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.session_ttl).unwrap_or_default()
    }

    fn event_deadline(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.event_ttl).unwrap_or_default()
    }

    fn row_to_metadata(row: &sqlx::postgres::PgRow) -> Result<SessionMetadata, StoreError> {
        let status: String = row.try_get("status")?;
        let model_config: serde_json::Value = row.try_get("model_config")?;
        let model_config: ModelConfig = serde_json::from_value(model_config)?;
        Ok(SessionMetadata {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            last_active_at: row.try_get("last_active_at")?,
            status: SessionStatus::from(status.as_str()),
            total_cost: row.try_get("total_cost")?,
            total_steps: row.try_get::<i64, _>("total_steps")? as u32,
            model_config,
            agent_config: row.try_get("agent_config")?,
        })
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn save_state(&self, id: &str, state: &Session) -> Result<(), StoreError> {
        let deadline = self.session_deadline();
        let blob = serde_json::to_value(state)?;

        sqlx::query(
            "INSERT INTO session_state (session_id, state, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (session_id)
             DO UPDATE SET state = EXCLUDED.state, expires_at = EXCLUDED.expires_at",
        )
        .bind(id)
        .bind(&blob)
        .bind(deadline)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE session_steps SET expires_at = $2 WHERE session_id = $1")
            .bind(id)
            .bind(deadline)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "UPDATE session_meta
             SET status = $2, total_cost = $3, total_steps = $4,
                 last_active_at = now(), expires_at = $5
             WHERE session_id = $1",
        )
        .bind(id)
        .bind(state.status.to_string())
        .bind(state.cost.total)
        .bind(state.step_count as i64)
        .bind(deadline)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_state(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT state FROM session_state WHERE session_id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let blob: serde_json::Value = row.try_get("state")?;
                Ok(Some(serde_json::from_value(blob)?))
            }
            None => Ok(None),
        }
    }

    async fn save_step_result(
        &self,
        id: &str,
        state: &Session,
        record: &StepRecord,
    ) -> Result<(), StoreError> {
        let deadline = self.session_deadline();
        let state_blob = serde_json::to_value(state)?;
        let record_blob = serde_json::to_value(record)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO session_state (session_id, state, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (session_id)
             DO UPDATE SET state = EXCLUDED.state, expires_at = EXCLUDED.expires_at",
        )
        .bind(id)
        .bind(&state_blob)
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        // Upsert keyed on step_index keeps replays from duplicating history
        sqlx::query(
            "INSERT INTO session_steps (session_id, step_index, record, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (session_id, step_index)
             DO UPDATE SET record = EXCLUDED.record, expires_at = EXCLUDED.expires_at",
        )
        .bind(id)
        .bind(record.step_index as i64)
        .bind(&record_blob)
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM session_steps
             WHERE session_id = $1 AND step_index <= $2 - $3",
        )
        .bind(id)
        .bind(record.step_index as i64)
        .bind(STEP_HISTORY_LIMIT as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE session_steps SET expires_at = $2 WHERE session_id = $1")
            .bind(id)
            .bind(deadline)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE session_meta
             SET status = $2, total_cost = $3, total_steps = $4,
                 last_active_at = now(), expires_at = $5
             WHERE session_id = $1",
        )
        .bind(id)
        .bind(state.status.to_string())
        .bind(state.cost.total)
        .bind(state.step_count as i64)
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_metadata(&self, id: &str, input: CreateMetadata) -> Result<(), StoreError> {
        let meta = SessionMetadata::create(id, input);
        sqlx::query(
            "INSERT INTO session_meta
                 (session_id, user_id, created_at, last_active_at, status,
                  total_cost, total_steps, model_config, agent_config, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&meta.session_id)
        .bind(&meta.user_id)
        .bind(meta.created_at)
        .bind(meta.last_active_at)
        .bind(meta.status.to_string())
        .bind(meta.total_cost)
        .bind(meta.total_steps as i64)
        .bind(serde_json::to_value(&meta.model_config)?)
        .bind(&meta.agent_config)
        .bind(self.session_deadline())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, user_id, created_at, last_active_at, status,
                    total_cost, total_steps, model_config, agent_config
             FROM session_meta WHERE session_id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_metadata).transpose()
    }

    async fn list_active(&self, user_id: Option<&str>) -> Result<Vec<SessionMetadata>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, user_id, created_at, last_active_at, status,
                    total_cost, total_steps, model_config, agent_config
             FROM session_meta
             WHERE expires_at > now() AND ($1::text IS NULL OR user_id = $1)
             ORDER BY last_active_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_metadata).collect()
    }

    async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM session_steps
             WHERE session_id = $1 AND expires_at > now()
             ORDER BY step_index DESC LIMIT $2",
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: serde_json::Value = row.try_get("record")?;
                Ok(serde_json::from_value(blob)?)
            })
            .collect()
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut deleted = 0;
        for table in ["session_state", "session_steps", "session_meta", "session_events"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE session_id = $1"))
                .bind(id)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted > 0)
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let rows = sqlx::query(
            "DELETE FROM session_meta WHERE expires_at <= now() RETURNING session_id",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let id: String = row.try_get("session_id")?;
            for table in ["session_state", "session_steps", "session_events"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE session_id = $1"))
                    .bind(&id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        // Event logs expire on their own shorter TTL
        sqlx::query("DELETE FROM session_events WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;

        Ok(rows.len())
    }
}

#[async_trait]
impl EventStream for PostgresStore {
    async fn publish(&self, id: &str, mut event: Event) -> Result<u64, StoreError> {
        let deadline = self.event_deadline();

        let row = sqlx::query(
            "SELECT COALESCE(MAX(event_id), 0) AS last_id
             FROM session_events WHERE session_id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let last_id: i64 = row.try_get("last_id")?;

        let assigned = next_event_id(last_id.max(0) as u64);
        event.id = assigned;

        sqlx::query(
            "INSERT INTO session_events (session_id, event_id, event, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(assigned as i64)
        .bind(serde_json::to_value(&event)?)
        .bind(deadline)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM session_events
             WHERE session_id = $1 AND event_id NOT IN (
                 SELECT event_id FROM session_events
                 WHERE session_id = $1
                 ORDER BY event_id DESC LIMIT $2
             )",
        )
        .bind(id)
        .bind(self.config.event_max_len as i64)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE session_events SET expires_at = $2 WHERE session_id = $1")
            .bind(id)
            .bind(deadline)
            .execute(&self.pool)
            .await?;

        Ok(assigned)
    }

    async fn history(&self, id: &str, count: usize) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            "SELECT event FROM session_events
             WHERE session_id = $1 AND expires_at > now()
             ORDER BY event_id DESC LIMIT $2",
        )
        .bind(id)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: serde_json::Value = row.try_get("event")?;
                Ok(serde_json::from_value(blob)?)
            })
            .collect()
    }

    async fn read_after(
        &self,
        id: &str,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            "SELECT event FROM session_events
             WHERE session_id = $1 AND event_id > $2 AND expires_at > now()
             ORDER BY event_id ASC LIMIT $3",
        )
        .bind(id)
        .bind(from_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: serde_json::Value = row.try_get("event")?;
                Ok(serde_json::from_value(blob)?)
            })
            .collect()
    }

    async fn cleanup(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_events WHERE session_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
