//! In-memory snapshot store.

use crate::{StateStore, StoreError, StoreResult, StoreStats};
use async_trait::async_trait;
use concord_core::Crdt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// Snapshot store backed by a map; the default for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    snapshots: BTreeMap<String, Value>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, crdt: &Crdt) -> StoreResult<()> {
        let snapshot = crdt.snapshot()?;
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed);
        }
        state.snapshots.insert(crdt.id().to_string(), snapshot);
        Ok(())
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Value>> {
        let state = self.state.read();
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state.snapshots.get(id).cloned())
    }

    async fn has(&self, id: &str) -> StoreResult<bool> {
        let state = self.state.read();
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state.snapshots.contains_key(id))
    }

    async fn list_ids(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read();
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state.snapshots.keys().cloned().collect())
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state.snapshots.remove(id).is_some())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed);
        }
        state.snapshots.clear();
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.state.read();
        if state.closed {
            return Err(StoreError::Closed);
        }
        let size: usize = state
            .snapshots
            .values()
            .map(|v| v.to_string().len())
            .sum();
        Ok(StoreStats {
            total_crdts: state.snapshots.len(),
            size_in_bytes: Some(size as u64),
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.state.write().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::CrdtType;

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = MemoryStore::new();
        let crdt = Crdt::new(CrdtType::GCounter, "c1");
        store.save(&crdt).await.unwrap();

        let snapshot = store.load("c1").await.unwrap().unwrap();
        let back = Crdt::from_snapshot(snapshot).unwrap();
        assert_eq!(back, crdt);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_list_remove() {
        let store = MemoryStore::new();
        store.save(&Crdt::new(CrdtType::GSet, "s1")).await.unwrap();
        store.save(&Crdt::new(CrdtType::GSet, "s2")).await.unwrap();

        assert!(store.has("s1").await.unwrap());
        assert_eq!(store.list_ids().await.unwrap(), vec!["s1", "s2"]);
        assert!(store.remove("s1").await.unwrap());
        assert!(!store.remove("s1").await.unwrap());
        assert!(!store.has("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        store.save(&Crdt::new(CrdtType::GSet, "s1")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_crdts, 1);
        assert!(stats.size_in_bytes.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.load("x").await.unwrap_err(),
            StoreError::Closed
        ));
        assert!(matches!(
            store.save(&Crdt::new(CrdtType::GSet, "s")).await.unwrap_err(),
            StoreError::Closed
        ));
    }
}
