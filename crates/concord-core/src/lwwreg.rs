//! Last-write-wins register CRDT.
//!
//! Keeps the value with the highest timestamp; ties break on the
//! lexicographically greater replica id. Concurrency is silently resolved
//! by that rule; callers that need to observe conflicts should use the
//! multi-value register instead.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LWWRegister {
    id: String,
    value: Value,
    /// 0 means the register has never been set.
    timestamp: u64,
    node_id: String,
}

impl LWWRegister {
    pub fn new(id: impl Into<String>) -> Self {
        LWWRegister {
            id: id.into(),
            value: Value::Null,
            timestamp: 0,
            node_id: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current value, if the register has ever been set.
    pub fn get(&self) -> Option<&Value> {
        if self.timestamp == 0 {
            None
        } else {
            Some(&self.value)
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Apply a write; it lands only when `(timestamp, node_id)` outranks the
    /// stored pair. A full stamp tie falls back to the canonical encoding of
    /// the values so replay order can never matter.
    pub fn set(&mut self, value: Value, timestamp: u64, node_id: &str) {
        let incoming = (timestamp, node_id);
        let stored = (self.timestamp, self.node_id.as_str());
        let wins = incoming > stored
            || (incoming == stored && canonical(&value) > canonical(&self.value));
        if wins {
            self.value = value;
            self.timestamp = timestamp;
            self.node_id = node_id.to_string();
        }
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "set" => {
                let value = op.require("value")?.clone();
                let timestamp = op.opt_u64("timestamp")?.unwrap_or(op.timestamp);
                self.set(value, timestamp, &op.node_id);
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "LWWRegister",
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
            "set" => Ok(Operation::new(&self.id, name, data, origin, timestamp)),
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "LWWRegister",
                operation: other.to_string(),
            }),
        }
    }

    /// Merging replays the other replica's write through the update rule.
    pub(crate) fn merge(&mut self, other: &Self) {
        if other.timestamp > 0 {
            self.set(other.value.clone(), other.timestamp, &other.node_id);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.value = Value::Null;
        self.timestamp = 0;
        self.node_id.clear();
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        if self.timestamp == 0 && !self.value.is_null() {
            return Err(CrdtError::InvariantViolated(
                "unset register carries a value".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        self.get().cloned().unwrap_or(Value::Null)
    }
}

fn canonical(value: &Value) -> String {
    value.to_string()
}
