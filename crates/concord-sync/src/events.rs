//! Events fanned out on the manager's broadcast streams.

use concord_core::Operation;

/// Where an applied operation originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpSource {
    Local,
    Remote,
}

/// Registry and state changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateEvent {
    Registered { crdt_id: String },
    Unregistered { crdt_id: String },
    OperationApplied {
        crdt_id: String,
        operation: String,
        source: OpSource,
    },
    Merged { crdt_id: String, from_peer: String },
}

/// Every applied operation, local and remote.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationEvent {
    pub operation: Operation,
    pub source: OpSource,
}

/// Direction and addressing of a sync exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    /// Snapshots published to a single peer.
    Sent,
    /// Snapshots published to every peer.
    Broadcast,
    /// Snapshots received via an addressed sync.
    Received,
    /// Snapshots received via a force sync.
    ForcedReceived,
}

/// Every sync publication and reception.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind: SyncKind,
    /// The addressed or originating peer, when there is one.
    pub peer: Option<String>,
    /// Number of snapshots carried.
    pub count: usize,
}
