//! Replicated growable array CRDT.
//!
//! An ordered sequence with tombstones. Every element carries a UID from
//! [`UidGen`](crate::uid::UidGen). A locally inserted element is placed
//! immediately after its `index`-th visible predecessor, so single-replica
//! edits land where the caller asked. Merges and replays of UID-carrying
//! records resort the list into total UID order, so any two replicas that
//! have reconciled the same element set render the same visible sequence.
//! Deletion sets a tombstone bit that merges by OR.
//!
//! Concurrent inserts at the same visible index therefore interleave in
//! UID order once reconciled, rather than staying anchored to a neighbour.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use crate::scalar::ScalarValue;
use crate::uid::UidGen;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One sequence element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RgaNode {
    pub uid: String,
    pub value: ScalarValue,
    pub node_id: String,
    pub timestamp: u64,
    pub deleted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RgaArray {
    id: String,
    /// Physical order, tombstones included. Local inserts anchor to their
    /// predecessor; merges and remote replays restore total UID order.
    elements: Vec<RgaNode>,
    #[serde(skip, default)]
    uids: UidGen,
}

impl PartialEq for RgaArray {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.elements == other.elements
    }
}

impl Eq for RgaArray {}

impl RgaArray {
    pub fn new(id: impl Into<String>) -> Self {
        RgaArray {
            id: id.into(),
            elements: Vec::new(),
            uids: UidGen::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of visible (non-tombstoned) elements.
    pub fn len(&self) -> usize {
        self.elements.iter().filter(|n| !n.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total element count, tombstones included.
    pub fn physical_len(&self) -> usize {
        self.elements.len()
    }

    /// Visible elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &ScalarValue> {
        self.elements
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| &n.value)
    }

    pub fn to_vec(&self) -> Vec<ScalarValue> {
        self.iter().cloned().collect()
    }

    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.iter().nth(index)
    }

    /// Concatenation of visible text elements.
    pub fn as_text(&self) -> String {
        self.iter().filter_map(|v| v.as_text()).collect()
    }

    fn uid_at(&self, index: usize) -> Option<String> {
        self.elements
            .iter()
            .filter(|n| !n.deleted)
            .nth(index)
            .map(|n| n.uid.clone())
    }

    fn position_of(&self, uid: &str) -> Option<usize> {
        self.elements.iter().position(|n| n.uid == uid)
    }

    /// Physical slot immediately after the `index`-th visible predecessor,
    /// or the start of the list for `index` 0.
    fn slot_after_predecessor(&self, index: usize) -> usize {
        if index == 0 {
            return 0;
        }
        let mut seen = 0;
        for (pos, node) in self.elements.iter().enumerate() {
            if !node.deleted {
                seen += 1;
                if seen == index {
                    return pos + 1;
                }
            }
        }
        self.elements.len()
    }

    /// Record an externally-sourced node. A duplicate UID ORs the
    /// tombstone bit; tombstoned nodes drop their value. Callers restore
    /// total order afterwards with [`RgaArray::resort`].
    fn integrate(&mut self, node: RgaNode) {
        match self.position_of(&node.uid) {
            Some(pos) => {
                let existing = &mut self.elements[pos];
                if node.deleted {
                    existing.deleted = true;
                }
                if existing.deleted {
                    existing.value = ScalarValue::Null;
                }
            }
            None => self.elements.push(node),
        }
    }

    /// Restore total UID order, as every merge and remote replay must.
    fn resort(&mut self) {
        self.elements.sort_by(|a, b| a.uid.cmp(&b.uid));
    }

    /// Insert a value at a visible index, generating a UID unless one is
    /// supplied. The element lands immediately after its `index`-th visible
    /// predecessor; a later merge may reorder it by UID.
    pub fn insert(
        &mut self,
        index: usize,
        value: ScalarValue,
        uid: Option<String>,
        node_id: &str,
        timestamp: u64,
    ) -> CrdtResult<String> {
        let len = self.len();
        if index > len {
            return Err(CrdtError::OutOfRange { index, len });
        }
        let uid = uid.unwrap_or_else(|| self.uids.uid(node_id, timestamp));
        if self.position_of(&uid).is_some() {
            // Already integrated; inserts are idempotent per UID.
            return Ok(uid);
        }
        let slot = self.slot_after_predecessor(index);
        self.elements.insert(
            slot,
            RgaNode {
                uid: uid.clone(),
                value,
                node_id: node_id.to_string(),
                timestamp,
                deleted: false,
            },
        );
        Ok(uid)
    }

    /// Tombstone the element with the given UID, dropping its value.
    pub fn delete_uid(&mut self, uid: &str) -> bool {
        match self.position_of(uid) {
            Some(pos) => {
                self.elements[pos].deleted = true;
                self.elements[pos].value = ScalarValue::Null;
                true
            }
            None => false,
        }
    }

    /// A delete can outrun its insert through the gossip layer; record a
    /// tombstone placeholder so the late insert cannot resurrect it.
    fn tombstone(&mut self, uid: &str, node_id: &str, timestamp: u64) {
        if !self.delete_uid(uid) {
            self.integrate(RgaNode {
                uid: uid.to_string(),
                value: ScalarValue::Null,
                node_id: node_id.to_string(),
                timestamp,
                deleted: true,
            });
        }
    }

    /// Tombstone the element at a visible index.
    pub fn delete(&mut self, index: usize) -> CrdtResult<()> {
        let uid = self.uid_at(index).ok_or(CrdtError::OutOfRange {
            index,
            len: self.len(),
        })?;
        self.delete_uid(&uid);
        Ok(())
    }

    /// Insert each character of `text` in order starting at `pos`.
    pub fn insert_text(
        &mut self,
        pos: usize,
        text: &str,
        node_id: &str,
        timestamp: u64,
    ) -> CrdtResult<Vec<String>> {
        let len = self.len();
        if pos > len {
            return Err(CrdtError::OutOfRange { index: pos, len });
        }
        let mut inserted = Vec::new();
        for (offset, c) in text.chars().enumerate() {
            let uid = self.insert(
                pos + offset,
                ScalarValue::from_char(c),
                None,
                node_id,
                timestamp,
            )?;
            inserted.push(uid);
        }
        Ok(inserted)
    }

    /// Tombstone the visible range `[start, end)`, iterating from the end
    /// so earlier indices stay stable.
    pub fn delete_range(&mut self, start: usize, end: usize) -> CrdtResult<()> {
        let len = self.len();
        if start > end || end > len {
            return Err(CrdtError::OutOfRange { index: end, len });
        }
        for index in (start..end).rev() {
            self.delete(index)?;
        }
        Ok(())
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "insert" => {
                let value = ScalarValue::from_json(op.require("element")?);
                match op.opt_str("uid")? {
                    // A record that already carries a UID is a replay; the
                    // index was validated at the origin and total UID order
                    // must hold across replicas.
                    Some(uid) => {
                        self.integrate(RgaNode {
                            uid: uid.to_string(),
                            value,
                            node_id: op.node_id.clone(),
                            timestamp: op.timestamp,
                            deleted: false,
                        });
                        self.resort();
                    }
                    None => {
                        let index = op.usize_field("index")?;
                        self.insert(index, value, None, &op.node_id, op.timestamp)?;
                    }
                }
                Ok(())
            }
            "delete" => {
                if let Some(uid) = op.opt_str("uid")? {
                    self.tombstone(uid, &op.node_id, op.timestamp);
                    self.resort();
                    Ok(())
                } else {
                    self.delete(op.usize_field("index")?)
                }
            }
            "insertText" => {
                let text = op.str_field("text")?.to_string();
                match op.data.get("uids") {
                    Some(uids) => {
                        let uids: Vec<String> =
                            serde_json::from_value(uids.clone()).map_err(|_| {
                                CrdtError::InvalidPayload(
                                    "field `uids` must be an array of strings".into(),
                                )
                            })?;
                        if uids.len() != text.chars().count() {
                            return Err(CrdtError::InvalidPayload(
                                "`uids` length must match `text` length".into(),
                            ));
                        }
                        for (c, uid) in text.chars().zip(uids) {
                            self.integrate(RgaNode {
                                uid,
                                value: ScalarValue::from_char(c),
                                node_id: op.node_id.clone(),
                                timestamp: op.timestamp,
                                deleted: false,
                            });
                        }
                        self.resort();
                        Ok(())
                    }
                    None => {
                        let pos = op.usize_field("index")?;
                        self.insert_text(pos, &text, &op.node_id, op.timestamp)?;
                        Ok(())
                    }
                }
            }
            "deleteRange" => {
                match op.data.get("uids") {
                    Some(uids) => {
                        let uids: Vec<String> =
                            serde_json::from_value(uids.clone()).map_err(|_| {
                                CrdtError::InvalidPayload(
                                    "field `uids` must be an array of strings".into(),
                                )
                            })?;
                        for uid in &uids {
                            self.tombstone(uid, &op.node_id, op.timestamp);
                        }
                        self.resort();
                        Ok(())
                    }
                    None => {
                        let start = op.usize_field("start")?;
                        let end = op.usize_field("end")?;
                        self.delete_range(start, end)
                    }
                }
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "RGAArray",
                operation: other.to_string(),
            }),
        }
    }

    /// Fills generated UIDs into the record so every replica integrates the
    /// same elements. Index arguments are validated here, at the origin.
    pub(crate) fn create_op(
        &mut self,
        name: &str,
        mut data: Map<String, Value>,
        origin: &str,
        timestamp: u64,
    ) -> CrdtResult<Operation> {
        match name {
            "insert" => {
                if !data.contains_key("uid") {
                    let index = data
                        .get("index")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload(
                                "field `index` must be a non-negative integer".into(),
                            )
                        })? as usize;
                    let len = self.len();
                    if index > len {
                        return Err(CrdtError::OutOfRange { index, len });
                    }
                    let uid = self.uids.uid(origin, timestamp);
                    data.insert("uid".to_string(), Value::String(uid));
                }
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            "delete" => {
                if !data.contains_key("uid") {
                    let index = data
                        .get("index")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload(
                                "field `index` must be a non-negative integer".into(),
                            )
                        })? as usize;
                    let uid = self.uid_at(index).ok_or(CrdtError::OutOfRange {
                        index,
                        len: self.len(),
                    })?;
                    data.insert("uid".to_string(), Value::String(uid));
                }
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            "insertText" => {
                if !data.contains_key("uids") {
                    let text = data
                        .get("text")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload("field `text` must be a string".into())
                        })?;
                    let pos = data
                        .get("index")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload(
                                "field `index` must be a non-negative integer".into(),
                            )
                        })? as usize;
                    let len = self.len();
                    if pos > len {
                        return Err(CrdtError::OutOfRange { index: pos, len });
                    }
                    let uids: Vec<Value> = text
                        .chars()
                        .map(|_| Value::String(self.uids.uid(origin, timestamp)))
                        .collect();
                    data.insert("uids".to_string(), Value::Array(uids));
                }
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            "deleteRange" => {
                if !data.contains_key("uids") {
                    let start = data
                        .get("start")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload(
                                "field `start` must be a non-negative integer".into(),
                            )
                        })? as usize;
                    let end = data
                        .get("end")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            CrdtError::InvalidPayload(
                                "field `end` must be a non-negative integer".into(),
                            )
                        })? as usize;
                    let len = self.len();
                    if start > end || end > len {
                        return Err(CrdtError::OutOfRange { index: end, len });
                    }
                    let uids: Vec<Value> = (start..end)
                        .filter_map(|i| self.uid_at(i))
                        .map(Value::String)
                        .collect();
                    data.insert("uids".to_string(), Value::Array(uids));
                }
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "RGAArray",
                operation: other.to_string(),
            }),
        }
    }

    /// Union by UID; tombstone bits OR together. After the union the list
    /// is resorted into total UID order.
    pub(crate) fn merge(&mut self, other: &Self) {
        for node in &other.elements {
            self.integrate(node.clone());
        }
        self.resort();
    }

    pub(crate) fn reset(&mut self) {
        self.elements.clear();
    }

    /// Every UID must appear exactly once. Physical order is free to
    /// differ from UID order until the next merge resorts it.
    pub(crate) fn validate(&self) -> CrdtResult<()> {
        let mut seen = BTreeSet::new();
        for node in &self.elements {
            if !seen.insert(node.uid.as_str()) {
                return Err(CrdtError::InvariantViolated(format!(
                    "duplicate element uid `{}`",
                    node.uid
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::Array(self.iter().map(ScalarValue::to_json).collect())
    }
}
