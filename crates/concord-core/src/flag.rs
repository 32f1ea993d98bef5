//! Enable-wins flag CRDT.
//!
//! A single boolean whose merge is logical OR: a disable cannot erase a
//! concurrent enable it never observed. Degenerate one-bit form of the
//! observed-remove set.

use crate::error::{CrdtError, CrdtResult};
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EwFlag {
    id: String,
    value: bool,
}

impl EwFlag {
    pub fn new(id: impl Into<String>) -> Self {
        EwFlag {
            id: id.into(),
            value: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn enable(&mut self) {
        self.value = true;
    }

    pub fn disable(&mut self) {
        self.value = false;
    }

    pub fn toggle(&mut self) {
        self.value = !self.value;
    }

    pub fn set(&mut self, value: bool) {
        self.value = value;
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> CrdtResult<()> {
        match op.operation.as_str() {
            "enable" => {
                self.enable();
                Ok(())
            }
            "disable" => {
                self.disable();
                Ok(())
            }
            "toggle" => {
                self.toggle();
                Ok(())
            }
            "set" => {
                let value = op.require("value")?.as_bool().ok_or_else(|| {
                    CrdtError::InvalidPayload("field `value` must be a boolean".into())
                })?;
                self.set(value);
                Ok(())
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "EnableWinsFlag",
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
            "enable" | "disable" | "toggle" | "set" => {
                Ok(Operation::new(&self.id, name, data, origin, timestamp))
            }
            other => Err(CrdtError::UnknownOperation {
                crdt_type: "EnableWinsFlag",
                operation: other.to_string(),
            }),
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.value = self.value || other.value;
    }

    pub(crate) fn reset(&mut self) {
        self.value = false;
    }

    pub(crate) fn validate(&self) -> CrdtResult<()> {
        Ok(())
    }

    pub(crate) fn value_json(&self) -> Value {
        Value::Bool(self.value)
    }
}
