//! concord-store - snapshot persistence for CRDTs.
//!
//! A [`StateStore`] keeps one snapshot per CRDT id, saved atomically per
//! key. Snapshots are the serde form produced by
//! [`Crdt::snapshot`](concord_core::Crdt::snapshot), so a store never needs
//! to understand variant internals.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use concord_core::Crdt;
use serde_json::Value;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Errors raised by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was closed; every later call fails with this.
    #[error("store is closed")]
    Closed,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CRDT ids double as storage keys and must stay path-safe.
    #[error("invalid CRDT id for storage: `{0}`")]
    InvalidId(String),

    #[error(transparent)]
    Snapshot(#[from] concord_core::CrdtError),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Aggregate statistics about a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_crdts: usize,
    pub size_in_bytes: Option<u64>,
}

/// Per-CRDT snapshot persistence.
///
/// Implementations must make `save` atomic per key: a reader observes
/// either the previous snapshot or the new one, never a torn write.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Serialise the CRDT's snapshot and store it under its id.
    async fn save(&self, crdt: &Crdt) -> StoreResult<()>;

    /// Load the snapshot stored under `id`, if any.
    async fn load(&self, id: &str) -> StoreResult<Option<Value>>;

    /// Whether a snapshot is stored under `id`.
    async fn has(&self, id: &str) -> StoreResult<bool>;

    /// All stored CRDT ids.
    async fn list_ids(&self) -> StoreResult<Vec<String>>;

    /// Delete the snapshot under `id`; returns whether anything was removed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;

    /// Delete every stored snapshot.
    async fn clear(&self) -> StoreResult<()>;

    /// Aggregate statistics.
    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Close the store. Idempotent; all later calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
