//! concord-core - Conflict-free Replicated Data Types
//!
//! The CRDT family at the heart of Concord: counters, sets, registers,
//! maps, a sequence, and a flag. Every type is state-based: it produces a
//! self-describing snapshot and merges snapshots from other replicas with
//! a join that is commutative, associative, and idempotent, so replicas
//! converge regardless of delivery order.
//!
//! The [`Crdt`] sum type is the polymorphic surface consumed by the
//! coordination layer: apply an [`Operation`], take a snapshot, merge a
//! remote snapshot, validate invariants.

pub mod clock;
pub mod crdt;
pub mod error;
pub mod flag;
pub mod gcounter;
pub mod gset;
pub mod lwwmap;
pub mod lwwreg;
pub mod mvreg;
pub mod op;
pub mod ormap;
pub mod orset;
pub mod pncounter;
pub mod rga;
pub mod scalar;
pub mod uid;

pub use clock::VectorClock;
pub use crdt::{Crdt, CrdtType};
pub use error::{CrdtError, CrdtResult};
pub use flag::EwFlag;
pub use gcounter::GCounter;
pub use gset::GSet;
pub use lwwmap::{LWWMap, Stamp};
pub use lwwreg::LWWRegister;
pub use mvreg::MVRegister;
pub use op::Operation;
pub use ormap::{CrdtFactory, ORMap};
pub use orset::ORSet;
pub use pncounter::PNCounter;
pub use rga::{RgaArray, RgaNode};
pub use scalar::ScalarValue;
pub use uid::UidGen;
