//! Replicable operation records.
//!
//! An [`Operation`] describes one local change in a form that can be applied
//! locally, broadcast, and replayed on remote replicas. Convergence never
//! depends on the operation id; it exists so transports can de-duplicate.

use crate::error::{CrdtError, CrdtResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A replicable description of a single CRDT operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Target CRDT id.
    pub crdt_id: String,
    /// Operation name, dispatched by the variant.
    pub operation: String,
    /// String-keyed JSON payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Originating replica.
    pub node_id: String,
    /// Wall-clock milliseconds at the origin.
    pub timestamp: u64,
    /// Unique within the originating replica.
    pub operation_id: String,
}

impl Operation {
    /// Build an operation record, deriving the operation id from the
    /// replica id and timestamp.
    pub fn new(
        crdt_id: impl Into<String>,
        operation: impl Into<String>,
        data: Map<String, Value>,
        node_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let node_id = node_id.into();
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let operation_id = format!("{}_{}_{:06}", node_id, timestamp, suffix);
        Operation {
            crdt_id: crdt_id.into(),
            operation: operation.into(),
            data,
            node_id,
            timestamp,
            operation_id,
        }
    }

    /// Required payload field.
    pub fn require(&self, field: &str) -> CrdtResult<&Value> {
        self.data
            .get(field)
            .ok_or_else(|| CrdtError::InvalidPayload(format!("missing field `{}`", field)))
    }

    /// Required string field.
    pub fn str_field(&self, field: &str) -> CrdtResult<&str> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| CrdtError::InvalidPayload(format!("field `{}` must be a string", field)))
    }

    /// Optional string field; present-but-wrong-type is an error.
    pub fn opt_str(&self, field: &str) -> CrdtResult<Option<&str>> {
        match self.data.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| {
                CrdtError::InvalidPayload(format!("field `{}` must be a string", field))
            }),
        }
    }

    /// Required unsigned integer field.
    pub fn u64_field(&self, field: &str) -> CrdtResult<u64> {
        self.require(field)?.as_u64().ok_or_else(|| {
            CrdtError::InvalidPayload(format!("field `{}` must be a non-negative integer", field))
        })
    }

    /// Optional unsigned integer field.
    pub fn opt_u64(&self, field: &str) -> CrdtResult<Option<u64>> {
        match self.data.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                CrdtError::InvalidPayload(format!(
                    "field `{}` must be a non-negative integer",
                    field
                ))
            }),
        }
    }

    /// Required index field.
    pub fn usize_field(&self, field: &str) -> CrdtResult<usize> {
        Ok(self.u64_field(field)? as usize)
    }

    /// Optional index field.
    pub fn opt_usize(&self, field: &str) -> CrdtResult<Option<usize>> {
        Ok(self.opt_u64(field)?.map(|v| v as usize))
    }
}
