//! Grow-only counter CRDT.
//!
//! One non-negative count per replica; the merge takes the pointwise
//! maximum over the union of replica keys, so per-replica counts never
//! move backwards. Value is the sum of all counts.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    id: String,
    counters: BTreeMap<String, u64>,
}

impl GCounter {
    /// Create a new counter at zero.
    pub fn new(id: impl Into<String>) -> Self {
        GCounter {
            id: id.into(),
            counters: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add `amount` to this replica's count. Zero is a no-op.
    pub fn increment(&mut self, node_id: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        let entry = self.counters.entry(node_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Sum of all per-replica counts.
    pub fn value(&self) -> u64 {
        self.counters.values().sum()
    }

    /// This replica's contribution.
    pub fn count_for(&self, node_id: &str) -> u64 {
        self.counters.get(node_id).copied().unwrap_or(0)
    }

    /// All per-replica counts.
    pub fn counters(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "increment" => {
                let amount = parse_amount(op)?;
                self.increment(&op.node_id, amount);
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "GCounter",
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
            "increment" => Ok(Operation::new(&self.id, name, data, origin, timestamp)),
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "GCounter",
                operation: other.to_string(),
            }),
        }
    }

    /// Pointwise maximum over the union of replica keys.
    pub(crate) fn merge(&mut self, other: &Self) {
        for (node, &count) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.counters.clear();
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        // Counts are u64; non-negativity is structural.
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::from(self.value())
    }
}

/// Amount defaults to 1; zero is allowed (no-op); negative or non-integer
/// amounts are rejected.
fn parse_amount(op: &Operation) -> CrdtResult<u64> {
    match op.data.get("amount") {
        None | Some(Value::Null) => Ok(1),
        Some(v) => v
            .as_i64()
            .filter(|a| *a >= 0)
            .map(|a| a as u64)
            .or_else(|| v.as_u64())
            .ok_or_else(|| {
                CrdtError::InvalidPayload("increment amount must be a non-negative integer".into())
            }),
    }
}
