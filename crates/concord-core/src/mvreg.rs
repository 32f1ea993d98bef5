//! Multi-value register CRDT.
//!
//! Keeps every write whose vector clock is not dominated by another, so
//! concurrent writes coexist until a caller resolves them. The stored set
//! is always an antichain: no entry's clock dominates another's.

use crate::clock::VectorClock;
use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use crate::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MVRegister {
    id: String,
    #[serde(with = "crate::scalar::pairs")]
    values: BTreeMap<ScalarValue, VectorClock>,
}

impl MVRegister {
    pub fn new(id: impl Into<String>) -> Self {
        MVRegister {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write a value under a vector clock.
    ///
    /// Entries dominated by the incoming clock are dropped; if any stored
    /// clock dominates the incoming one, the write is discarded instead.
    pub fn set(&mut self, value: ScalarValue, clock: VectorClock) {
        if self.values.values().any(|stored| stored.dominates(&clock)) {
            return;
        }
        let mut clock = clock;
        if let Some(existing) = self.values.get(&value) {
            // The same value written concurrently on two replicas collapses
            // to one entry under the join of both clocks, so replay order
            // cannot matter.
            clock.merge(existing);
        }
        self.values.retain(|_, stored| !clock.dominates(stored));
        self.values.insert(value, clock);
    }

    /// Drop a specific concurrent value.
    pub fn remove(&mut self, value: &ScalarValue) {
        self.values.remove(value);
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// The current concurrent values.
    pub fn read(&self) -> Vec<&ScalarValue> {
        self.values.keys().collect()
    }

    /// Current values with their clocks.
    pub fn read_with_clocks(&self) -> Vec<(&ScalarValue, &VectorClock)> {
        self.values.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Collapse the concurrent set to one picked value under a clock that
    /// strictly dominates every predecessor.
    pub fn resolve<F>(&self, node_id: &str, pick: F) -> MVRegister
    where
        F: FnOnce(&[ScalarValue]) -> Option<ScalarValue>,
    {
        let candidates: Vec<ScalarValue> = self.values.keys().cloned().collect();
        let mut resolved = MVRegister::new(self.id.clone());
        if let Some(choice) = pick(&candidates) {
            let mut clock = VectorClock::new();
            for stored in self.values.values() {
                clock.merge(stored);
            }
            clock.increment(node_id);
            resolved.values.insert(choice, clock);
        }
        resolved
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "set" => {
                let value = ScalarValue::from_json(op.require("value")?);
                let clock: BTreeMap<String, u64> =
                    serde_json::from_value(op.require("vectorClock")?.clone()).map_err(|_| {
                        CrdtError::InvalidPayload(
                            "field `vectorClock` must map replica ids to non-negative integers"
                                .into(),
                        )
                    })?;
                self.set(value, VectorClock::from(clock));
                Ok(())
            }
            "remove" => {
                let value = ScalarValue::from_json(op.require("value")?);
                self.remove(&value);
                Ok(())
            }
            "clear" => {
                self.clear();
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "MVRegister",
                operation: other.to_string(),
            }),
        }
    }

    pub(crate) fn create_op(
        &mut self,
        name: &str,
        data: Map<String, Value>,
        origin: &str,
        timestamp: u64,
    ) -> CrdtResult<Operation> {
        match name {
            "set" | "remove" | "clear" => {
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "MVRegister",
                operation: other.to_string(),
            }),
        }
    }

    /// Replays every entry of the other replica through the write rule.
    pub(crate) fn merge(&mut self, other: &Self) {
        for (value, clock) in &other.values {
            self.set(value.clone(), clock.clone());
        }
    }

    pub(crate) fn reset(&mut self) {
        self.values.clear();
    }

    /// The residual set must be an antichain.
    pub(crate) fn validate(&self) -> CrdtResult<()> {
        let entries: Vec<_> = self.values.iter().collect();
        for (i, (_, a)) in entries.iter().enumerate() {
            for (_, b) in entries.iter().skip(i + 1) {
                if a.dominates(b) || b.dominates(a) {
                    return Err(CrdtError::InvariantViolated(
                        "stored clocks are not an antichain".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::Array(self.values.keys().map(ScalarValue::to_json).collect())
    }
}
