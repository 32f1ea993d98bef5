//! Positive-negative counter CRDT.
//!
//! Two per-replica maps, one for increments and one for decrements; each
//! merges by pointwise maximum independently. Value is the increment sum
//! minus the decrement sum.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter {
    id: String,
    increments: BTreeMap<String, u64>,
    decrements: BTreeMap<String, u64>,
}

impl PNCounter {
    pub fn new(id: impl Into<String>) -> Self {
        PNCounter {
            id: id.into(),
            increments: BTreeMap::new(),
            decrements: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn increment(&mut self, node_id: &str, amount: u64) {
        let entry = self.increments.entry(node_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn decrement(&mut self, node_id: &str, amount: u64) {
        let entry = self.decrements.entry(node_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Increment sum minus decrement sum.
    pub fn value(&self) -> i64 {
        let p: u64 = self.increments.values().sum();
        let n: u64 = self.decrements.values().sum();
        (p as i64).saturating_sub(n as i64)
    }

    pub fn total_increments(&self) -> u64 {
        self.increments.values().sum()
    }

    pub fn total_decrements(&self) -> u64 {
        self.decrements.values().sum()
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        let amount = parse_amount(op)?;
        match op.operation.as_str() {
            "increment" => {
                self.increment(&op.node_id, amount);
                Ok(())
            }
            "decrement" => {
                self.decrement(&op.node_id, amount);
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "PNCounter",
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
            "increment" | "decrement" => Ok(Operation::new(&self.id, name, data, origin, timestamp)),
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "PNCounter",
                operation: other.to_string(),
            }),
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        for (node, &count) in &other.increments {
            let entry = self.increments.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        for (node, &count) in &other.decrements {
            let entry = self.decrements.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.increments.clear();
        self.decrements.clear();
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::from(self.value())
    }
}

/// Amount defaults to 1; zero and negative amounts are rejected.
fn parse_amount(op: &Operation) -> CrdtResult<u64> {
    match op.data.get("amount") {
        None | Some(Value::Null) => Ok(1),
        Some(v) => v
            .as_i64()
            .filter(|a| *a > 0)
            .map(|a| a as u64)
            .or_else(|| v.as_u64().filter(|a| *a > 0))
            .ok_or_else(|| {
                CrdtError::InvalidPayload("counter amount must be a positive integer".into())
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(name: &str, n: i64, node: &str) -> Operation {
        let mut data = Map::new();
        data.insert("amount".to_string(), json!(n));
        Operation::new("pn1", name, data, node, 1_000)
    }

    #[test]
    fn test_increment_decrement() {
        let mut c = PNCounter::new("pn1");
        c.increment("a", 10);
        c.decrement("a", 2);
        assert_eq!(c.value(), 8);
    }

    #[test]
    fn test_value_can_go_negative() {
        let mut c = PNCounter::new("pn1");
        c.decrement("a", 3);
        assert_eq!(c.value(), -3);
    }

    #[test]
    fn test_apply_rejects_non_positive() {
        let mut c = PNCounter::new("pn1");
        assert!(matches!(
            c.apply(&op("increment", 0, "a")).unwrap_err(),
            CrdtError::InvalidPayload(_)
        ));
        assert!(matches!(
            c.apply(&op("decrement", -1, "a")).unwrap_err(),
            CrdtError::InvalidPayload(_)
        ));
    }

    #[test]
    fn test_merge_convergence() {
        let mut a = PNCounter::new("pn1");
        a.increment("a", 10);
        a.decrement("a", 2);

        let mut b = PNCounter::new("pn1");
        b.increment("b", 5);
        b.decrement("b", 8);

        let mut b_copy = b.clone();
        b_copy.merge(&a);
        a.merge(&b);

        assert_eq!(a, b_copy);
        assert_eq!(a.value(), 5);
        assert_eq!(a.total_increments(), 15);
        assert_eq!(a.total_decrements(), 10);
    }

    #[test]
    fn test_merge_commutative() {
        let mut a = PNCounter::new("pn1");
        a.increment("a", 1);
        let mut b = PNCounter::new("pn1");
        b.decrement("b", 2);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut c = PNCounter::new("pn1");
        c.increment("a", 100);
        c.decrement("b", 25);

        let encoded = serde_json::to_string(&c).unwrap();
        let decoded: PNCounter = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, c);
    }
}
