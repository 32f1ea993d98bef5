//! Last-write-wins map CRDT.
//!
//! Every key carries an add stamp and a remove stamp, each a
//! `(timestamp, node_id)` pair compared like the LWW register. A key is
//! present while its add stamp strictly outranks its remove stamp.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A write stamp. The derived ordering compares timestamps first and
/// breaks ties on the lexicographically greater node id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub timestamp: u64,
    pub node_id: String,
}

impl Stamp {
    pub fn new(timestamp: u64, node_id: impl Into<String>) -> Self {
        Stamp {
            timestamp,
            node_id: node_id.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MapEntry {
    value: Option<Value>,
    added: Option<Stamp>,
    removed: Option<Stamp>,
}

impl MapEntry {
    /// Present while the add stamp strictly outranks the remove stamp.
    /// Equal stamps (same timestamp, same node) leave the key absent,
    /// since neither side outranks the other.
    fn is_present(&self) -> bool {
        match (&self.added, &self.removed) {
            (Some(added), Some(removed)) => added > removed,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWMap {
    id: String,
    entries: BTreeMap<String, MapEntry>,
}

impl LWWMap {
    pub fn new(id: impl Into<String>) -> Self {
        LWWMap {
            id: id.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write a value; it lands only when the stamp outranks the stored add
    /// stamp, replacing value and stamp together. A full stamp tie falls
    /// back to the canonical encoding of the values so replay order can
    /// never matter.
    pub fn put(&mut self, key: &str, value: Value, stamp: Stamp) {
        let entry = self.entries.entry(key.to_string()).or_default();
        let wins = match &entry.added {
            None => true,
            Some(added) if stamp > *added => true,
            Some(added) => {
                stamp == *added
                    && entry
                        .value
                        .as_ref()
                        .is_none_or(|stored| value.to_string() > stored.to_string())
            }
        };
        if wins {
            entry.value = Some(value);
            entry.added = Some(stamp);
        }
    }

    /// Record a removal; it lands only when the stamp outranks the stored
    /// remove stamp.
    pub fn remove(&mut self, key: &str, stamp: Stamp) {
        let entry = self.entries.entry(key.to_string()).or_default();
        if entry.removed.as_ref().is_none_or(|removed| stamp > *removed) {
            entry.removed = Some(stamp);
        }
    }

    /// Remove every currently present key at one stamp.
    pub fn clear(&mut self, stamp: Stamp) {
        let present: Vec<String> = self.keys().map(str::to_string).collect();
        for key in present {
            self.remove(&key, stamp.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|e| e.is_present())
            .and_then(|e| e.value.as_ref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(MapEntry::is_present)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_present())
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "put" => {
                let key = op.str_field("key")?.to_string();
                let value = op.require("value")?.clone();
                let ts = op.opt_u64("timestamp")?.unwrap_or(op.timestamp);
                self.put(&key, value, Stamp::new(ts, &op.node_id));
                Ok(())
            }
            "remove" => {
                let key = op.str_field("key")?.to_string();
                let ts = op.opt_u64("timestamp")?.unwrap_or(op.timestamp);
                self.remove(&key, Stamp::new(ts, &op.node_id));
                Ok(())
            }
            "clear" => {
                self.clear(Stamp::new(op.timestamp, &op.node_id));
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "LWWMap",
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
            "put" | "remove" | "clear" => {
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "LWWMap",
                operation: other.to_string(),
            }),
        }
    }

    /// Replays the other replica's stamps for every key through the same
    /// precedence rules.
    pub(crate) fn merge(&mut self, other: &Self) {
        for (key, entry) in &other.entries {
            if let (Some(value), Some(added)) = (&entry.value, &entry.added) {
                self.put(key, value.clone(), added.clone());
            }
            if let Some(removed) = &entry.removed {
                self.remove(key, removed.clone());
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        for (key, entry) in &self.entries {
            if entry.added.is_some() && entry.value.is_none() {
                return Err(CrdtError::InvariantViolated(format!(
                    "key `{}` has an add stamp but no value",
                    key
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        let mut out = Map::new();
        for (key, entry) in &self.entries {
            if entry.is_present() {
                if let Some(value) = &entry.value {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "a"));
        assert_eq!(m.get("k"), Some(&json!(1)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_newer_put_wins() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!("old"), Stamp::new(100, "a"));
        m.put("k", json!("new"), Stamp::new(200, "b"));
        m.put("k", json!("stale"), Stamp::new(150, "c"));
        assert_eq!(m.get("k"), Some(&json!("new")));
    }

    #[test]
    fn test_put_tie_breaks_on_node_id() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!("from-a"), Stamp::new(100, "a"));
        m.put("k", json!("from-b"), Stamp::new(100, "b"));
        assert_eq!(m.get("k"), Some(&json!("from-b")));
    }

    #[test]
    fn test_remove_hides_key() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "a"));
        m.remove("k", Stamp::new(200, "a"));
        assert!(!m.contains_key("k"));
        assert!(m.get("k").is_none());
    }

    #[test]
    fn test_put_after_remove_restores() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "a"));
        m.remove("k", Stamp::new(200, "a"));
        m.put("k", json!(2), Stamp::new(300, "a"));
        assert_eq!(m.get("k"), Some(&json!(2)));
    }

    #[test]
    fn test_add_wins_tie_against_remove() {
        // Same timestamp: the add from the greater node id wins.
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "b"));
        m.remove("k", Stamp::new(100, "a"));
        assert!(m.contains_key("k"));

        // The remove from the greater node id wins instead.
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "a"));
        m.remove("k", Stamp::new(100, "b"));
        assert!(!m.contains_key("k"));
    }

    #[test]
    fn test_equal_stamp_same_node_is_absent() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!(1), Stamp::new(100, "a"));
        m.remove("k", Stamp::new(100, "a"));
        assert!(!m.contains_key("k"));
    }

    #[test]
    fn test_clear_removes_present_keys() {
        let mut m = LWWMap::new("m1");
        m.put("k1", json!(1), Stamp::new(100, "a"));
        m.put("k2", json!(2), Stamp::new(100, "a"));
        m.clear(Stamp::new(200, "a"));
        assert!(m.is_empty());

        // A later put still lands.
        m.put("k1", json!(3), Stamp::new(300, "a"));
        assert_eq!(m.get("k1"), Some(&json!(3)));
    }

    #[test]
    fn test_merge_commutative() {
        let mut a = LWWMap::new("m1");
        a.put("k", json!("a"), Stamp::new(100, "a"));
        a.put("only-a", json!(1), Stamp::new(50, "a"));

        let mut b = LWWMap::new("m1");
        b.put("k", json!("b"), Stamp::new(100, "b"));
        b.remove("only-a", Stamp::new(60, "b"));

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.get("k"), Some(&json!("b")));
        assert!(!ab.contains_key("only-a"));
    }

    #[test]
    fn test_remove_before_put_arrives() {
        // A removal can be recorded for a key with no add yet; the late
        // add only shows through if it outranks the removal.
        let mut m = LWWMap::new("m1");
        m.remove("k", Stamp::new(200, "a"));
        m.put("k", json!(1), Stamp::new(100, "b"));
        assert!(!m.contains_key("k"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut m = LWWMap::new("m1");
        m.put("k", json!({"nested": true}), Stamp::new(100, "a"));
        m.remove("gone", Stamp::new(50, "a"));

        let encoded = serde_json::to_string(&m).unwrap();
        let decoded: LWWMap = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, m);
    }
}
