//! Grow-only set CRDT.
//!
//! Elements can only be added, never removed; the merge is set union.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use crate::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet {
    id: String,
    elements: BTreeSet<ScalarValue>,
}

impl GSet {
    pub fn new(id: impl Into<String>) -> Self {
        GSet {
            id: id.into(),
            elements: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add(&mut self, element: ScalarValue) {
        self.elements.insert(element);
    }

    pub fn contains(&self, element: &ScalarValue) -> bool {
        self.elements.contains(element)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScalarValue> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "add" => {
                let element = ScalarValue::from_json(op.require("element")?);
                self.add(element);
                Ok(())
            }
            "addAll" => {
                let elements = op.require("elements")?.as_array().ok_or_else(|| {
                    CrdtError::InvalidPayload("field `elements` must be an array".into())
                })?;
                for element in elements {
                    self.add(ScalarValue::from_json(element));
                }
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "GSet",
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
            "add" | "addAll" => Ok(Operation::new(&self.id, name, data, origin, timestamp)),
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "GSet",
                operation: other.to_string(),
            }),
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.elements.extend(other.elements.iter().cloned());
    }

    pub(crate) fn reset(&mut self) {
        self.elements.clear();
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::Array(self.elements.iter().map(ScalarValue::to_json).collect())
    }
}
