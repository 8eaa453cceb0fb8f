// Storage backend selection
// Decision: Use enum dispatch for simplicity over trait objects
//
// The store URL picks the backend: "memory:" runs everything in-process
// (dev mode), anything else is treated as a PostgreSQL connection URL.

use async_trait::async_trait;

use runlet_core::{CreateMetadata, Event, RuntimeConfig, Session, SessionMetadata, StepRecord};

use crate::memory::MemoryStore;
use crate::postgres::PostgresStore;
use crate::state::{SessionStore, StoreError};
use crate::stream::EventStream;

/// Storage backend that is either PostgreSQL or in-memory
pub enum StorageBackend {
    Postgres(PostgresStore),
    Memory(MemoryStore),
}

impl StorageBackend {
    /// Select a backend from the store URL
    pub async fn from_url(url: &str, config: RuntimeConfig) -> Result<Self, StoreError> {
        if url.starts_with("memory") {
            tracing::info!("using in-memory storage backend (dev mode)");
            Ok(Self::Memory(MemoryStore::new(config)))
        } else {
            tracing::info!("using postgres storage backend");
            Ok(Self::Postgres(PostgresStore::connect(url, config).await?))
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}

#[async_trait]
impl SessionStore for StorageBackend {
    async fn save_state(&self, id: &str, state: &Session) -> Result<(), StoreError> {
        match self {
            Self::Postgres(db) => db.save_state(id, state).await,
            Self::Memory(db) => db.save_state(id, state).await,
        }
    }

    async fn load_state(&self, id: &str) -> Result<Option<Session>, StoreError> {
        match self {
            Self::Postgres(db) => db.load_state(id).await,
            Self::Memory(db) => db.load_state(id).await,
        }
    }

    async fn save_step_result(
        &self,
        id: &str,
        state: &Session,
        record: &StepRecord,
    ) -> Result<(), StoreError> {
        match self {
            Self::Postgres(db) => db.save_step_result(id, state, record).await,
            Self::Memory(db) => db.save_step_result(id, state, record).await,
        }
    }

    async fn create_metadata(&self, id: &str, input: CreateMetadata) -> Result<(), StoreError> {
        match self {
            Self::Postgres(db) => db.create_metadata(id, input).await,
            Self::Memory(db) => db.create_metadata(id, input).await,
        }
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        match self {
            Self::Postgres(db) => db.get_metadata(id).await,
            Self::Memory(db) => db.get_metadata(id).await,
        }
    }

    async fn list_active(&self, user_id: Option<&str>) -> Result<Vec<SessionMetadata>, StoreError> {
        match self {
            Self::Postgres(db) => db.list_active(user_id).await,
            Self::Memory(db) => db.list_active(user_id).await,
        }
    }

    async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<StepRecord>, StoreError> {
        match self {
            Self::Postgres(db) => db.get_history(id, limit).await,
            Self::Memory(db) => db.get_history(id, limit).await,
        }
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(db) => db.delete_session(id).await,
            Self::Memory(db) => db.delete_session(id).await,
        }
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        match self {
            Self::Postgres(db) => db.cleanup_expired().await,
            Self::Memory(db) => db.cleanup_expired().await,
        }
    }
}

#[async_trait]
impl EventStream for StorageBackend {
    async fn publish(&self, id: &str, event: Event) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(db) => db.publish(id, event).await,
            Self::Memory(db) => db.publish(id, event).await,
        }
    }

    async fn history(&self, id: &str, count: usize) -> Result<Vec<Event>, StoreError> {
        match self {
            Self::Postgres(db) => db.history(id, count).await,
            Self::Memory(db) => db.history(id, count).await,
        }
    }

    async fn read_after(
        &self,
        id: &str,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        match self {
            Self::Postgres(db) => db.read_after(id, from_id, limit).await,
            Self::Memory(db) => db.read_after(id, from_id, limit).await,
        }
    }

    async fn cleanup(&self, id: &str) -> Result<(), StoreError> {
        match self {
            Self::Postgres(db) => db.cleanup(id).await,
            Self::Memory(db) => db.cleanup(id).await,
        }
    }
}
