//! Observed-remove map CRDT.
//!
//! Key membership works exactly like the OR-Set; each live key additionally
//! owns an inner CRDT, merged recursively. Inner CRDTs are built through a
//! factory so a replica can choose which variants it is willing to host.

use crate::crdt::{Crdt, CrdtType};
use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use crate::uid::UidGen;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Builds an inner CRDT from an id and a variant tag.
pub type CrdtFactory = fn(String, CrdtType) -> Crdt;

fn default_factory(id: String, crdt_type: CrdtType) -> Crdt {
    Crdt::new(crdt_type, id)
}

fn default_factory_opt() -> Option<CrdtFactory> {
    Some(default_factory)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ORMap {
    id: String,
    /// Every add tag ever observed per key, removed ones included.
    entries: BTreeMap<String, BTreeSet<String>>,
    /// Tombstoned tags.
    removed: BTreeSet<String>,
    /// Inner CRDTs for keys this replica can host.
    values: BTreeMap<String, Crdt>,
    #[serde(skip, default = "default_factory_opt")]
    factory: Option<CrdtFactory>,
    #[serde(skip, default)]
    uids: UidGen,
}

impl PartialEq for ORMap {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.entries == other.entries
            && self.removed == other.removed
            && self.values == other.values
    }
}

impl ORMap {
    pub fn new(id: impl Into<String>) -> Self {
        ORMap {
            id: id.into(),
            entries: BTreeMap::new(),
            removed: BTreeSet::new(),
            values: BTreeMap::new(),
            factory: Some(default_factory),
            uids: UidGen::new(),
        }
    }

    /// A map that cannot construct inner CRDTs; `add` fails and merges
    /// skip inner values.
    pub fn without_factory(id: impl Into<String>) -> Self {
        let mut map = Self::new(id);
        map.factory = None;
        map
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn live(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|tags| tags.iter().any(|t| !self.removed.contains(t)))
    }

    /// Record a key under a tag, constructing the inner CRDT when absent.
    pub fn add(
        &mut self,
        key: &str,
        crdt_type: CrdtType,
        crdt_id: &str,
        tag: String,
    ) -> CrdtResult<()> {
        let factory = self
            .factory
            .ok_or_else(|| CrdtError::FactoryMissing(key.to_string()))?;
        self.entries
            .entry(key.to_string())
            .or_default()
            .insert(tag);
        self.values
            .entry(key.to_string())
            .or_insert_with(|| factory(crdt_id.to_string(), crdt_type));
        Ok(())
    }

    /// Tombstone a single tag.
    pub fn remove_tag(&mut self, tag: String) {
        self.removed.insert(tag);
    }

    /// Tombstone every currently live tag of `key`.
    pub fn remove(&mut self, key: &str) {
        if let Some(tags) = self.entries.get(key) {
            let live: Vec<String> = tags
                .iter()
                .filter(|t| !self.removed.contains(*t))
                .cloned()
                .collect();
            self.removed.extend(live);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.live(key)
    }

    /// Live keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|k| self.live(k))
            .collect()
    }

    /// The inner CRDT of a live key.
    pub fn get(&self, key: &str) -> Option<&Crdt> {
        if self.live(key) {
            self.values.get(key)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "add" => {
                let key = op.str_field("key")?.to_string();
                let crdt_type: CrdtType = op
                    .str_field("crdtType")?
                    .parse()
                    .map_err(|_| CrdtError::InvalidPayload("unknown `crdtType`".into()))?;
                let crdt_id = op.str_field("crdtId")?.to_string();
                let tag = match op.opt_str("tag")? {
                    Some(tag) => tag.to_string(),
                    None => self.uids.uid(&op.node_id, op.timestamp),
                };
                self.add(&key, crdt_type, &crdt_id, tag)
            }
            "remove" => {
                let key = op.str_field("key")?.to_string();
                match op.opt_str("tag")? {
                    Some(tag) => self.remove_tag(tag.to_string()),
                    None => self.remove(&key),
                }
                Ok(())
            }
            "updateValue" => {
                let key = op.str_field("key")?.to_string();
                let inner_op: Operation =
                    serde_json::from_value(op.require("valueOperation")?.clone()).map_err(
                        |_| {
                            CrdtError::InvalidPayload(
                                "field `valueOperation` must be an operation record".into(),
                            )
                        },
                    )?;
                // Forwarded only while the key is present; an update racing
                // ahead of its add is dropped, the add's state arrives by
                // merge instead.
                if self.live(key.as_str()) {
                    if let Some(inner) = self.values.get_mut(&key) {
                        inner.apply_op(&inner_op)?;
                    }
                }
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "ORMap",
                operation: other.to_string(),
            }),
        }
    }

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
            "remove" | "updateValue" => {
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "ORMap",
                operation: other.to_string(),
            }),
        }
    }

    /// Union of key tags and removed tags; inner CRDTs merge recursively.
    /// Without a factory, unknown keys keep their tags but carry no value.
    pub(crate) fn merge(&mut self, other: &Self) -> CrdtResult<()> {
        for (key, tags) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        self.removed.extend(other.removed.iter().cloned());

        for (key, theirs) in &other.values {
            match self.values.entry(key.clone()) {
                Entry::Occupied(mut mine) => mine.get_mut().merge(theirs)?,
                Entry::Vacant(slot) => {
                    if let Some(factory) = self.factory {
                        let mut fresh = factory(theirs.id().to_string(), theirs.crdt_type());
                        fresh.merge(theirs)?;
                        slot.insert(fresh);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.removed.clear();
        self.values.clear();
    }

    /// Value entries must correspond to known keys, and inner CRDTs must
    /// themselves be valid.
    pub(crate) fn validate(&self) -> CrdtResult<()> {
        for key in self.values.keys() {
            if !self.entries.contains_key(key) {
                return Err(CrdtError::InvariantViolated(format!(
                    "value entry `{}` has no recorded add",
                    key
                )));
            }
        }
        for inner in self.values.values() {
            inner.validate()?;
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        let mut out = Map::new();
        for key in self.keys() {
            if let Some(inner) = self.values.get(key) {
                out.insert(key.to_string(), inner.value());
            }
        }
        Value::Object(out)
    }
}
