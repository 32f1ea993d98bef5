//! Observed-remove set CRDT (add-wins).
//!
//! Each add records a unique tag under the element; a remove tombstones
//! only the tags the remover has observed. An element is present while it
//! has at least one non-removed tag, so a concurrent add always survives a
//! remove that never saw it.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use crate::scalar::ScalarValue;
use crate::uid::UidGen;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ORSet {
    id: String,
    /// Every tag ever observed per element, removed ones included.
    #[serde(with = "crate::scalar::pairs")]
    entries: BTreeMap<ScalarValue, BTreeSet<String>>,
    /// Tombstoned tags.
    removed: BTreeSet<String>,
    #[serde(skip, default)]
    uids: UidGen,
}

impl PartialEq for ORSet {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.entries == other.entries && self.removed == other.removed
    }
}

impl Eq for ORSet {}

impl ORSet {
    pub fn new(id: impl Into<String>) -> Self {
        ORSet {
            id: id.into(),
            entries: BTreeMap::new(),
            removed: BTreeSet::new(),
            uids: UidGen::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record an add of `element` under `tag`.
    pub fn add(&mut self, element: ScalarValue, tag: String) {
        self.entries.entry(element).or_default().insert(tag);
    }

    /// Tombstone a single tag.
    pub fn remove_tag(&mut self, tag: String) {
        self.removed.insert(tag);
    }

    /// Tombstone every currently live tag of `element`.
    pub fn remove(&mut self, element: &ScalarValue) {
        if let Some(tags) = self.entries.get(element) {
            let live: Vec<String> = tags
                .iter()
                .filter(|t| !self.removed.contains(*t))
                .cloned()
                .collect();
            self.removed.extend(live);
        }
    }

    /// An element is present while it has at least one non-removed tag.
    pub fn contains(&self, element: &ScalarValue) -> bool {
        self.entries
            .get(element)
            .is_some_and(|tags| tags.iter().any(|t| !self.removed.contains(t)))
    }

    /// Present elements.
    pub fn elements(&self) -> Vec<&ScalarValue> {
        self.entries
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| !self.removed.contains(t)))
            .map(|(e, _)| e)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tags recorded for an element, removed ones included.
    pub fn tags(&self, element: &ScalarValue) -> Option<&BTreeSet<String>> {
        self.entries.get(element)
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "add" => {
                let element = ScalarValue::from_json(op.require("element")?);
                let tag = match op.opt_str("tag")? {
                    Some(tag) => tag.to_string(),
                    None => self.uids.uid(&op.node_id, op.timestamp),
                };
                self.add(element, tag);
                Ok(())
            }
            "remove" => {
                let element = ScalarValue::from_json(op.require("element")?);
                match op.opt_str("tag")? {
                    Some(tag) => self.remove_tag(tag.to_string()),
                    None => self.remove(&element),
                }
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "ORSet",
                operation: other.to_string(),
            }),
        }
    }

    /// `add` without an explicit tag gets one generated here, so the record
    /// carries the same tag to every replica.
    pub(crate) fn create_op(
        &mut self,
        name: &str,
        mut data: Map<String, Value>,
        origin: &str,
        timestamp: u64,
    ) -> CrdtResult<Operation> {
        match name {
            "add" => {
                if !data.contains_key("tag") {
                    let tag = self.uids.uid(origin, timestamp);
                    data.insert("tag".to_string(), Value::String(tag));
                }
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            "remove" => Ok(Operation::new(&self.id, name, data, origin, timestamp)),
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "ORSet",
                operation: other.to_string(),
            }),
        }
    }

    /// Union of per-element tag sets and of removed tags.
    pub(crate) fn merge(&mut self, other: &Self) {
        for (element, tags) in &other.entries {
            self.entries
                .entry(element.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        self.removed.extend(other.removed.iter().cloned());
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.removed.clear();
    }

    /// Every removed tag must have been observed as an add somewhere.
    pub(crate) fn validate(&self) -> CrdtResult<()> {
        for tag in &self.removed {
            let observed = self.entries.values().any(|tags| tags.contains(tag));
            if !observed {
                return Err(CrdtError::InvariantViolated(format!(
                    "removed tag `{}` matches no recorded add",
                    tag
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::Array(self.elements().iter().map(|e| e.to_json()).collect())
    }
}
