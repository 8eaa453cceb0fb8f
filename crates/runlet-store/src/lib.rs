// Storage backends for session state and event streams
//
// Two traits, two backends:
// - SessionStore: the durable per-session blob, bounded step history, and
//   field-addressable metadata (state / steps / meta keyspaces)
// - EventStream: the bounded, replayable, per-session event log
//
// MemoryStore serves dev mode and tests; PostgresStore is the production
// backend. StorageBackend selects one from the store URL with enum
// dispatch.

pub mod backend;
pub mod memory;
pub mod postgres;
pub mod state;
pub mod stream;

pub use backend::StorageBackend;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use state::{SessionStore, StoreError};
pub use stream::{EventBatchHandler, EventStream};
