//! concord-sync - keeps CRDT replicas convergent over a gossip transport.
//!
//! The [`CrdtManager`] owns a registry of CRDTs, routes local operations
//! through them (apply, persist, publish, in that order), dispatches
//! inbound gossip envelopes, and fans events out on broadcast streams.
//! The transport itself is behind the [`GossipTransport`] contract; an
//! in-memory mesh implementation is provided for tests and simulation.

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod manager;
pub mod transport;

pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use envelope::GossipPayload;
pub use error::ManagerError;
pub use events::{OpSource, OperationEvent, SyncEvent, SyncKind, UpdateEvent};
pub use manager::{CrdtManager, Lifecycle, ManagerStats};
pub use transport::{create_mesh, GossipTransport, InboundEnvelope, MemoryGossip, TransportError};
