//! The polymorphic CRDT surface.
//!
//! [`Crdt`] is a closed sum over the ten variants, internally tagged with
//! `type`, so its serde form is exactly the snapshot wire format: a
//! string-keyed map carrying `type`, `id`, and the variant state. The
//! coordination layer speaks only to this surface.

use crate::error::{CrdtError, CrdtResult};
use crate::flag::EwFlag;
use crate::gcounter::GCounter;
use crate::gset::GSet;
use crate::lwwmap::LWWMap;
use crate::lwwreg::LWWRegister;
use crate::mvreg::MVRegister;
use crate::op::Operation;
use crate::ormap::ORMap;
use crate::orset::ORSet;
use crate::pncounter::PNCounter;
use crate::rga::RgaArray;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Variant tag, matching the `type` field of every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CrdtType {
    GCounter,
    PNCounter,
    GSet,
    ORSet,
    LWWRegister,
    MVRegister,
    LWWMap,
    ORMap,
    RGAArray,
    EnableWinsFlag,
}

impl CrdtType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrdtType::GCounter => "GCounter",
            CrdtType::PNCounter => "PNCounter",
            CrdtType::GSet => "GSet",
            CrdtType::ORSet => "ORSet",
            CrdtType::LWWRegister => "LWWRegister",
            CrdtType::MVRegister => "MVRegister",
            CrdtType::LWWMap => "LWWMap",
            CrdtType::ORMap => "ORMap",
            CrdtType::RGAArray => "RGAArray",
            CrdtType::EnableWinsFlag => "EnableWinsFlag",
        }
    }
}

impl fmt::Display for CrdtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrdtType {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GCounter" => Ok(CrdtType::GCounter),
            "PNCounter" => Ok(CrdtType::PNCounter),
            "GSet" => Ok(CrdtType::GSet),
            "ORSet" => Ok(CrdtType::ORSet),
            "LWWRegister" => Ok(CrdtType::LWWRegister),
            "MVRegister" => Ok(CrdtType::MVRegister),
            "LWWMap" => Ok(CrdtType::LWWMap),
            "ORMap" => Ok(CrdtType::ORMap),
            "RGAArray" => Ok(CrdtType::RGAArray),
            "EnableWinsFlag" => Ok(CrdtType::EnableWinsFlag),
            other => Err(CrdtError::InvalidPayload(format!(
                "unknown CRDT type `{}`",
                other
            ))),
        }
    }
}

/// A CRDT of any variant. The serde representation is the snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Crdt {
    GCounter(GCounter),
    PNCounter(PNCounter),
    GSet(GSet),
    ORSet(ORSet),
    LWWRegister(LWWRegister),
    MVRegister(MVRegister),
    LWWMap(LWWMap),
    ORMap(ORMap),
    RGAArray(RgaArray),
    EnableWinsFlag(EwFlag),
}

impl Crdt {
    /// Empty CRDT of the given variant.
    pub fn new(crdt_type: CrdtType, id: impl Into<String>) -> Self {
        match crdt_type {
            CrdtType::GCounter => Crdt::GCounter(GCounter::new(id)),
            CrdtType::PNCounter => Crdt::PNCounter(PNCounter::new(id)),
            CrdtType::GSet => Crdt::GSet(GSet::new(id)),
            CrdtType::ORSet => Crdt::ORSet(ORSet::new(id)),
            CrdtType::LWWRegister => Crdt::LWWRegister(LWWRegister::new(id)),
            CrdtType::MVRegister => Crdt::MVRegister(MVRegister::new(id)),
            CrdtType::LWWMap => Crdt::LWWMap(LWWMap::new(id)),
            CrdtType::ORMap => Crdt::ORMap(ORMap::new(id)),
            CrdtType::RGAArray => Crdt::RGAArray(RgaArray::new(id)),
            CrdtType::EnableWinsFlag => Crdt::EnableWinsFlag(EwFlag::new(id)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Crdt::GCounter(c) => c.id(),
            Crdt::PNCounter(c) => c.id(),
            Crdt::GSet(c) => c.id(),
            Crdt::ORSet(c) => c.id(),
            Crdt::LWWRegister(c) => c.id(),
            Crdt::MVRegister(c) => c.id(),
            Crdt::LWWMap(c) => c.id(),
            Crdt::ORMap(c) => c.id(),
            Crdt::RGAArray(c) => c.id(),
            Crdt::EnableWinsFlag(c) => c.id(),
        }
    }

    pub fn crdt_type(&self) -> CrdtType {
        match self {
            Crdt::GCounter(_) => CrdtType::GCounter,
            Crdt::PNCounter(_) => CrdtType::PNCounter,
            Crdt::GSet(_) => CrdtType::GSet,
            Crdt::ORSet(_) => CrdtType::ORSet,
            Crdt::LWWRegister(_) => CrdtType::LWWRegister,
            Crdt::MVRegister(_) => CrdtType::MVRegister,
            Crdt::LWWMap(_) => CrdtType::LWWMap,
            Crdt::ORMap(_) => CrdtType::ORMap,
            Crdt::RGAArray(_) => CrdtType::RGAArray,
            Crdt::EnableWinsFlag(_) => CrdtType::EnableWinsFlag,
        }
    }

    /// Apply a locally originated or remote operation.
    pub fn apply_op(&mut self, op: &Operation) -> CrdtResult<()> {
        match self {
            Crdt::GCounter(c) => c.apply(op),
            Crdt::PNCounter(c) => c.apply(op),
            Crdt::GSet(c) => c.apply(op),
            Crdt::ORSet(c) => c.apply(op),
            Crdt::LWWRegister(c) => c.apply(op),
            Crdt::MVRegister(c) => c.apply(op),
            Crdt::LWWMap(c) => c.apply(op),
            Crdt::ORMap(c) => c.apply(op),
            Crdt::RGAArray(c) => c.apply(op),
            Crdt::EnableWinsFlag(c) => c.apply(op),
        }
    }

    /// Build an operation record for a named operation, filling variant
    /// defaults (generated tags and UIDs land in the record so local apply
    /// and remote replay see identical data).
    pub fn create_op(
        &mut self,
        name: &str,
        data: Map<String, Value>,
        origin: &str,
        timestamp: u64,
    ) -> CrdtResult<Operation> {
        match self {
            Crdt::GCounter(c) => c.create_op(name, data, origin, timestamp),
            Crdt::PNCounter(c) => c.create_op(name, data, origin, timestamp),
            Crdt::GSet(c) => c.create_op(name, data, origin, timestamp),
            Crdt::ORSet(c) => c.create_op(name, data, origin, timestamp),
            Crdt::LWWRegister(c) => c.create_op(name, data, origin, timestamp),
            Crdt::MVRegister(c) => c.create_op(name, data, origin, timestamp),
            Crdt::LWWMap(c) => c.create_op(name, data, origin, timestamp),
            Crdt::ORMap(c) => c.create_op(name, data, origin, timestamp),
            Crdt::RGAArray(c) => c.create_op(name, data, origin, timestamp),
            Crdt::EnableWinsFlag(c) => c.create_op(name, data, origin, timestamp),
        }
    }

    /// Self-describing state map, suitable for persistence and transmission.
    pub fn snapshot(&self) -> CrdtResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a CRDT from a snapshot. Together with [`Crdt::snapshot`]
    /// this round-trips every variant.
    pub fn from_snapshot(snapshot: Value) -> CrdtResult<Crdt> {
        Ok(serde_json::from_value(snapshot)?)
    }

    /// Join another replica's state. Fails with `StateTypeMismatch` when
    /// the other side's `type` or `id` differs; total otherwise.
    pub fn merge(&mut self, other: &Crdt) -> CrdtResult<()> {
        if self.crdt_type() != other.crdt_type() || self.id() != other.id() {
            return Err(CrdtError::StateTypeMismatch {
                expected: format!("{}/{}", self.crdt_type(), self.id()),
                found: format!("{}/{}", other.crdt_type(), other.id()),
            });
        }
        match (self, other) {
            (Crdt::GCounter(a), Crdt::GCounter(b)) => a.merge(b),
            (Crdt::PNCounter(a), Crdt::PNCounter(b)) => a.merge(b),
            (Crdt::GSet(a), Crdt::GSet(b)) => a.merge(b),
            (Crdt::ORSet(a), Crdt::ORSet(b)) => a.merge(b),
            (Crdt::LWWRegister(a), Crdt::LWWRegister(b)) => a.merge(b),
            (Crdt::MVRegister(a), Crdt::MVRegister(b)) => a.merge(b),
            (Crdt::LWWMap(a), Crdt::LWWMap(b)) => a.merge(b),
            (Crdt::ORMap(a), Crdt::ORMap(b)) => return a.merge(b),
            (Crdt::RGAArray(a), Crdt::RGAArray(b)) => a.merge(b),
            (Crdt::EnableWinsFlag(a), Crdt::EnableWinsFlag(b)) => a.merge(b),
            _ => unreachable!("variant equality checked above"),
        }
        Ok(())
    }

    /// Join a remote snapshot.
    pub fn merge_snapshot(&mut self, snapshot: &Value) -> CrdtResult<()> {
        let other = Crdt::from_snapshot(snapshot.clone())?;
        self.merge(&other)
    }

    /// Return to the empty state, keeping `id` and `type`.
    pub fn reset(&mut self) {
        match self {
            Crdt::GCounter(c) => c.reset(),
            Crdt::PNCounter(c) => c.reset(),
            Crdt::GSet(c) => c.reset(),
            Crdt::ORSet(c) => c.reset(),
            Crdt::LWWRegister(c) => c.reset(),
            Crdt::MVRegister(c) => c.reset(),
            Crdt::LWWMap(c) => c.reset(),
            Crdt::ORMap(c) => c.reset(),
            Crdt::RGAArray(c) => c.reset(),
            Crdt::EnableWinsFlag(c) => c.reset(),
        }
    }

    /// Check the variant's structural invariants. Advisory; not called on
    /// the apply/merge path.
    pub fn validate(&self) -> CrdtResult<()> {
        match self {
            Crdt::GCounter(c) => c.validate(),
            Crdt::PNCounter(c) => c.validate(),
            Crdt::GSet(c) => c.validate(),
            Crdt::ORSet(c) => c.validate(),
            Crdt::LWWRegister(c) => c.validate(),
            Crdt::MVRegister(c) => c.validate(),
            Crdt::LWWMap(c) => c.validate(),
            Crdt::ORMap(c) => c.validate(),
            Crdt::RGAArray(c) => c.validate(),
            Crdt::EnableWinsFlag(c) => c.validate(),
        }
    }

    /// Uniform read view of the current value.
    pub fn value(&self) -> Value {
        match self {
            Crdt::GCounter(c) => c.value_json(),
            Crdt::PNCounter(c) => c.value_json(),
            Crdt::GSet(c) => c.value_json(),
            Crdt::ORSet(c) => c.value_json(),
            Crdt::LWWRegister(c) => c.value_json(),
            Crdt::MVRegister(c) => c.value_json(),
            Crdt::LWWMap(c) => c.value_json(),
            Crdt::ORMap(c) => c.value_json(),
            Crdt::RGAArray(c) => c.value_json(),
            Crdt::EnableWinsFlag(c) => c.value_json(),
        }
    }
}
