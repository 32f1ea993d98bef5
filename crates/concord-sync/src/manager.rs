//! The CRDT manager: registry, operation routing, and inbound dispatch.
//!
//! A local operation is applied to local state, then persisted, then
//! published, so an observer of the broadcast can assume the origin has
//! already integrated it. Inbound envelopes are processed in arrival order
//! by a background task; a bad envelope is logged and dropped, never fatal.
//! Locks are never held across an await: state is mutated under the
//! registry lock, cloned out, and persisted afterwards.

use crate::config::ManagerConfig;
use crate::envelope::GossipPayload;
use crate::error::ManagerError;
use crate::events::{OpSource, OperationEvent, SyncEvent, SyncKind, UpdateEvent};
use crate::transport::{GossipTransport, InboundEnvelope};
use concord_core::{Crdt, CrdtError, Operation};
use concord_store::StateStore;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Manager lifecycle; `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Unstarted,
    Initialised,
    Closed,
}

/// Introspection snapshot of a manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerStats {
    pub node_id: String,
    pub registered: usize,
    pub lifecycle: Lifecycle,
}

struct Inner<T, S> {
    config: ManagerConfig,
    transport: T,
    store: S,
    registry: RwLock<BTreeMap<String, Crdt>>,
    lifecycle: RwLock<Lifecycle>,
    updates: broadcast::Sender<UpdateEvent>,
    operations: broadcast::Sender<OperationEvent>,
    syncs: broadcast::Sender<SyncEvent>,
}

/// Coordinates a set of CRDTs over a gossip transport and a state store.
pub struct CrdtManager<T: GossipTransport, S: StateStore + 'static> {
    inner: Arc<Inner<T, S>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T: GossipTransport, S: StateStore + 'static> CrdtManager<T, S> {
    pub fn new(config: ManagerConfig, transport: T, store: S) -> Self {
        let (updates, _) = broadcast::channel(config.event_capacity);
        let (operations, _) = broadcast::channel(config.event_capacity);
        let (syncs, _) = broadcast::channel(config.event_capacity);
        CrdtManager {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                registry: RwLock::new(BTreeMap::new()),
                lifecycle: RwLock::new(Lifecycle::Unstarted),
                updates,
                operations,
                syncs,
            }),
            listener: Mutex::new(None),
        }
    }

    /// The local replica id.
    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.read()
    }

    /// Start the inbound dispatch task. A second call is a no-op; a call
    /// after `close` fails.
    pub fn init(&self) -> Result<(), ManagerError> {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            match *lifecycle {
                Lifecycle::Closed => return Err(ManagerError::AlreadyClosed),
                Lifecycle::Initialised => return Ok(()),
                Lifecycle::Unstarted => *lifecycle = Lifecycle::Initialised,
            }
        }

        let mut rx = self.inner.transport.subscribe();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let from = envelope.node_id.clone();
                if let Err(e) = inner.dispatch(envelope).await {
                    warn!(from = %from, error = %e, "dropping gossip envelope");
                }
            }
        });
        *self.listener.lock() = Some(handle);
        debug!(node_id = %self.inner.config.node_id, "manager initialised");
        Ok(())
    }

    /// Add a CRDT to the registry, persist its snapshot, and announce it.
    pub async fn register(&self, crdt: Crdt) -> Result<(), ManagerError> {
        self.inner.ensure_open()?;
        let id = crdt.id().to_string();
        if self.inner.registry.read().contains_key(&id) {
            return Err(ManagerError::DuplicateId(id));
        }
        self.inner.store.save(&crdt).await?;
        {
            let mut registry = self.inner.registry.write();
            if registry.contains_key(&id) {
                return Err(ManagerError::DuplicateId(id));
            }
            registry.insert(id.clone(), crdt);
        }
        let _ = self.inner.updates.send(UpdateEvent::Registered { crdt_id: id });
        Ok(())
    }

    /// Detach a CRDT without deleting its persisted state.
    pub fn unregister(&self, id: &str) -> Result<bool, ManagerError> {
        self.inner.ensure_open()?;
        let removed = self.inner.registry.write().remove(id).is_some();
        if removed {
            let _ = self.inner.updates.send(UpdateEvent::Unregistered {
                crdt_id: id.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Crdt> {
        self.inner.registry.read().get(id).cloned()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.inner.registry.read().keys().cloned().collect()
    }

    pub fn list_all(&self) -> Vec<Crdt> {
        self.inner.registry.read().values().cloned().collect()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            node_id: self.inner.config.node_id.clone(),
            registered: self.inner.registry.read().len(),
            lifecycle: self.lifecycle(),
        }
    }

    /// Perform a named operation on a registered CRDT: build the record,
    /// apply it locally, persist, publish, then emit events.
    pub async fn perform_operation(
        &self,
        id: &str,
        operation: &str,
        data: Map<String, Value>,
    ) -> Result<Operation, ManagerError> {
        self.inner.ensure_open()?;
        let (op, touched) = {
            let mut registry = self.inner.registry.write();
            let crdt = registry
                .get_mut(id)
                .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
            let timestamp = (self.inner.config.clock)();
            let op = crdt
                .create_op(operation, data, &self.inner.config.node_id, timestamp)
                .map_err(|source| ManagerError::OperationFailed {
                    crdt_id: id.to_string(),
                    operation: operation.to_string(),
                    source,
                })?;
            crdt.apply_op(&op)
                .map_err(|source| ManagerError::OperationFailed {
                    crdt_id: id.to_string(),
                    operation: operation.to_string(),
                    source,
                })?;
            (op, crdt.clone())
        };

        self.inner.store.save(&touched).await?;

        let payload = serde_json::to_value(GossipPayload::CrdtOperation {
            operation: op.clone(),
        })
        .map_err(CrdtError::from)?;
        self.inner.transport.publish(payload).await?;

        let _ = self.inner.operations.send(OperationEvent {
            operation: op.clone(),
            source: OpSource::Local,
        });
        let _ = self.inner.updates.send(UpdateEvent::OperationApplied {
            crdt_id: id.to_string(),
            operation: op.operation.clone(),
            source: OpSource::Local,
        });
        debug!(crdt_id = %id, operation = %op.operation, "applied local operation");
        Ok(op)
    }

    /// Publish snapshots of every registered CRDT, addressed to one peer.
    pub async fn sync_with(&self, peer_id: &str) -> Result<usize, ManagerError> {
        self.inner.ensure_open()?;
        let states = self.inner.collect_states()?;
        let count = states.len();
        let payload = GossipPayload::CrdtSync {
            target_peer: Some(peer_id.to_string()),
            states,
        };
        self.inner
            .transport
            .publish(serde_json::to_value(&payload).map_err(CrdtError::from)?)
            .await?;
        let _ = self.inner.syncs.send(SyncEvent {
            kind: SyncKind::Sent,
            peer: Some(peer_id.to_string()),
            count,
        });
        Ok(count)
    }

    /// Publish snapshots of every registered CRDT to all peers.
    pub async fn force_sync(&self) -> Result<usize, ManagerError> {
        self.inner.ensure_open()?;
        let states = self.inner.collect_states()?;
        let count = states.len();
        let payload = GossipPayload::CrdtForceSync { states };
        self.inner
            .transport
            .publish(serde_json::to_value(&payload).map_err(CrdtError::from)?)
            .await?;
        let _ = self.inner.syncs.send(SyncEvent {
            kind: SyncKind::Broadcast,
            peer: None,
            count,
        });
        Ok(count)
    }

    /// Load a persisted snapshot and register the reconstructed CRDT.
    /// Returns false when nothing is stored under `id` or it is already
    /// registered.
    pub async fn restore(&self, id: &str) -> Result<bool, ManagerError> {
        self.inner.ensure_open()?;
        if self.inner.registry.read().contains_key(id) {
            return Ok(false);
        }
        let Some(snapshot) = self.inner.store.load(id).await? else {
            return Ok(false);
        };
        let crdt = Crdt::from_snapshot(snapshot)?;
        {
            let mut registry = self.inner.registry.write();
            if registry.contains_key(id) {
                return Ok(false);
            }
            registry.insert(id.to_string(), crdt);
        }
        let _ = self.inner.updates.send(UpdateEvent::Registered {
            crdt_id: id.to_string(),
        });
        Ok(true)
    }

    /// Restore every snapshot the store knows; returns how many were
    /// newly registered.
    pub async fn restore_all(&self) -> Result<usize, ManagerError> {
        self.inner.ensure_open()?;
        let mut restored = 0;
        for id in self.inner.store.list_ids().await? {
            if self.restore(&id).await? {
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Stop the inbound task and close the store. Idempotent.
    pub async fn close(&self) -> Result<(), ManagerError> {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            if *lifecycle == Lifecycle::Closed {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closed;
        }
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.inner.store.close().await?;
        debug!(node_id = %self.inner.config.node_id, "manager closed");
        Ok(())
    }

    /// Registry and state changes.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.updates.subscribe()
    }

    /// Every applied operation, local and remote.
    pub fn subscribe_operations(&self) -> broadcast::Receiver<OperationEvent> {
        self.inner.operations.subscribe()
    }

    /// Every sync publication and reception.
    pub fn subscribe_syncs(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.syncs.subscribe()
    }
}

impl<T: GossipTransport, S: StateStore> Inner<T, S> {
    fn ensure_open(&self) -> Result<(), ManagerError> {
        match *self.lifecycle.read() {
            Lifecycle::Unstarted => Err(ManagerError::NotInitialised),
            Lifecycle::Closed => Err(ManagerError::AlreadyClosed),
            Lifecycle::Initialised => Ok(()),
        }
    }

    fn collect_states(&self) -> Result<BTreeMap<String, Value>, ManagerError> {
        let registry = self.registry.read();
        let mut states = BTreeMap::new();
        for (id, crdt) in registry.iter() {
            states.insert(id.clone(), crdt.snapshot()?);
        }
        Ok(states)
    }

    async fn dispatch(&self, envelope: InboundEnvelope) -> Result<(), ManagerError> {
        let payload: GossipPayload =
            serde_json::from_value(envelope.payload).map_err(CrdtError::from)?;
        match payload {
            GossipPayload::CrdtOperation { operation } => {
                self.apply_remote_operation(envelope.node_id, operation).await
            }
            GossipPayload::CrdtSync {
                target_peer,
                states,
            } => {
                if let Some(target) = &target_peer {
                    if target != &self.config.node_id {
                        debug!(target = %target, "sync addressed elsewhere, dropping");
                        return Ok(());
                    }
                }
                self.merge_states(envelope.node_id, states, SyncKind::Received)
                    .await
            }
            GossipPayload::CrdtForceSync { states } => {
                self.merge_states(envelope.node_id, states, SyncKind::ForcedReceived)
                    .await
            }
        }
    }

    async fn apply_remote_operation(
        &self,
        from: String,
        operation: Operation,
    ) -> Result<(), ManagerError> {
        let touched = {
            let mut registry = self.registry.write();
            match registry.get_mut(&operation.crdt_id) {
                Some(crdt) => {
                    crdt.apply_op(&operation)
                        .map_err(|source| ManagerError::OperationFailed {
                            crdt_id: operation.crdt_id.clone(),
                            operation: operation.operation.clone(),
                            source,
                        })?;
                    Some(crdt.clone())
                }
                None => None,
            }
        };
        let Some(crdt) = touched else {
            debug!(crdt_id = %operation.crdt_id, "remote operation for unknown CRDT, dropping");
            return Ok(());
        };

        self.store.save(&crdt).await?;
        let _ = self.updates.send(UpdateEvent::OperationApplied {
            crdt_id: operation.crdt_id.clone(),
            operation: operation.operation.clone(),
            source: OpSource::Remote,
        });
        let _ = self.operations.send(OperationEvent {
            operation,
            source: OpSource::Remote,
        });
        debug!(from = %from, "applied remote operation");
        Ok(())
    }

    async fn merge_states(
        &self,
        from: String,
        states: BTreeMap<String, Value>,
        kind: SyncKind,
    ) -> Result<(), ManagerError> {
        let touched = {
            let mut registry = self.registry.write();
            let mut touched = Vec::new();
            for (id, snapshot) in &states {
                let Some(crdt) = registry.get_mut(id) else {
                    continue;
                };
                // One unmergeable snapshot must not poison the rest of
                // the bag.
                match crdt.merge_snapshot(snapshot) {
                    Ok(()) => touched.push(crdt.clone()),
                    Err(e) => warn!(crdt_id = %id, error = %e, "skipping snapshot"),
                }
            }
            touched
        };

        for crdt in &touched {
            self.store.save(crdt).await?;
            let _ = self.updates.send(UpdateEvent::Merged {
                crdt_id: crdt.id().to_string(),
                from_peer: from.clone(),
            });
        }
        let _ = self.syncs.send(SyncEvent {
            kind,
            peer: Some(from),
            count: touched.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryGossip;
    use concord_core::CrdtType;
    use concord_store::MemoryStore;
    use serde_json::json;

    fn frozen_clock() -> u64 {
        1_000
    }

    fn manager(node: &str) -> CrdtManager<MemoryGossip, MemoryStore> {
        let config = ManagerConfig::builder(node).clock(frozen_clock).build();
        CrdtManager::new(config, MemoryGossip::new(node), MemoryStore::new())
    }

    fn amount(n: i64) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("amount".to_string(), json!(n));
        data
    }

    #[tokio::test]
    async fn test_lifecycle_gating() {
        let m = manager("a");
        assert_eq!(m.lifecycle(), Lifecycle::Unstarted);
        assert!(matches!(
            m.register(Crdt::new(CrdtType::GCounter, "c")).await,
            Err(ManagerError::NotInitialised)
        ));

        m.init().unwrap();
        m.init().unwrap();
        assert_eq!(m.lifecycle(), Lifecycle::Initialised);

        m.close().await.unwrap();
        m.close().await.unwrap();
        assert_eq!(m.lifecycle(), Lifecycle::Closed);
        assert!(matches!(
            m.register(Crdt::new(CrdtType::GCounter, "c")).await,
            Err(ManagerError::AlreadyClosed)
        ));
        assert!(matches!(m.init(), Err(ManagerError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let m = manager("a");
        m.init().unwrap();
        let mut updates = m.subscribe_updates();

        m.register(Crdt::new(CrdtType::GCounter, "c")).await.unwrap();
        assert!(matches!(
            m.register(Crdt::new(CrdtType::GSet, "c")).await,
            Err(ManagerError::DuplicateId(_))
        ));

        assert_eq!(m.list_ids(), vec!["c"]);
        assert!(m.get_by_id("c").is_some());
        assert_eq!(
            updates.recv().await.unwrap(),
            UpdateEvent::Registered {
                crdt_id: "c".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unregister_keeps_persisted_state() {
        let m = manager("a");
        m.init().unwrap();
        m.register(Crdt::new(CrdtType::GCounter, "c")).await.unwrap();

        assert!(m.unregister("c").unwrap());
        assert!(!m.unregister("c").unwrap());
        assert!(m.get_by_id("c").is_none());

        // The snapshot survives and can be restored.
        assert!(m.restore("c").await.unwrap());
        assert!(m.get_by_id("c").is_some());
    }

    #[tokio::test]
    async fn test_perform_operation_applies_and_persists() {
        let m = manager("a");
        m.init().unwrap();
        m.register(Crdt::new(CrdtType::GCounter, "c")).await.unwrap();
        let mut ops = m.subscribe_operations();

        let op = m.perform_operation("c", "increment", amount(3)).await.unwrap();
        assert_eq!(op.node_id, "a");
        assert_eq!(op.timestamp, 1_000);
        assert_eq!(m.get_by_id("c").unwrap().value(), json!(3));

        let event = ops.recv().await.unwrap();
        assert_eq!(event.source, OpSource::Local);
        assert_eq!(event.operation, op);
    }

    #[tokio::test]
    async fn test_perform_operation_unknown_id() {
        let m = manager("a");
        m.init().unwrap();
        assert!(matches!(
            m.perform_operation("ghost", "increment", Map::new()).await,
            Err(ManagerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_perform_operation_wraps_cause() {
        let m = manager("a");
        m.init().unwrap();
        m.register(Crdt::new(CrdtType::GCounter, "c")).await.unwrap();

        let err = m
            .perform_operation("c", "increment", amount(-1))
            .await
            .unwrap_err();
        match err {
            ManagerError::OperationFailed { crdt_id, source, .. } => {
                assert_eq!(crdt_id, "c");
                assert!(matches!(source, CrdtError::InvalidPayload(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The failed op left no trace.
        assert_eq!(m.get_by_id("c").unwrap().value(), json!(0));
    }

    #[tokio::test]
    async fn test_restore_all() {
        let store = MemoryStore::new();
        store.save(&Crdt::new(CrdtType::GSet, "s1")).await.unwrap();
        store.save(&Crdt::new(CrdtType::EnableWinsFlag, "f1")).await.unwrap();

        let config = ManagerConfig::builder("a").clock(frozen_clock).build();
        let m = CrdtManager::new(config, MemoryGossip::new("a"), store);
        m.init().unwrap();

        assert_eq!(m.restore_all().await.unwrap(), 2);
        assert_eq!(m.restore_all().await.unwrap(), 0);
        assert_eq!(m.stats().registered, 2);
        assert_eq!(
            m.get_by_id("f1").unwrap().crdt_type(),
            CrdtType::EnableWinsFlag
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let m = manager("a");
        m.init().unwrap();
        m.register(Crdt::new(CrdtType::GCounter, "c")).await.unwrap();
        let stats = m.stats();
        assert_eq!(stats.node_id, "a");
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.lifecycle, Lifecycle::Initialised);
    }
}
