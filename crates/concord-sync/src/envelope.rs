//! Gossip envelope wire formats.

use concord_core::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payloads exchanged between replicas, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipPayload {
    /// A single remote operation.
    CrdtOperation { operation: Operation },

    /// A bag of snapshots addressed to one peer (or to everyone when
    /// `target_peer` is absent).
    CrdtSync {
        #[serde(
            rename = "targetPeer",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_peer: Option<String>,
        states: BTreeMap<String, Value>,
    },

    /// A bag of snapshots for all peers, bypassing addressing.
    CrdtForceSync { states: BTreeMap<String, Value> },
}

impl GossipPayload {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GossipPayload::CrdtOperation { .. } => "crdt_operation",
            GossipPayload::CrdtSync { .. } => "crdt_sync",
            GossipPayload::CrdtForceSync { .. } => "crdt_force_sync",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_operation_envelope_wire_shape() {
        let op = Operation::new("c1", "increment", Map::new(), "node-a", 1_000);
        let payload = GossipPayload::CrdtOperation { operation: op };
        let wire = serde_json::to_value(&payload).unwrap();

        assert_eq!(wire.get("type"), Some(&json!("crdt_operation")));
        assert!(wire.get("operation").and_then(|o| o.get("crdtId")).is_some());

        let back: GossipPayload = serde_json::from_value(wire).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_sync_envelope_wire_shape() {
        let mut states = BTreeMap::new();
        states.insert("c1".to_string(), json!({"type": "GCounter", "id": "c1"}));
        let payload = GossipPayload::CrdtSync {
            target_peer: Some("node-b".to_string()),
            states,
        };
        let wire = serde_json::to_value(&payload).unwrap();

        assert_eq!(wire.get("type"), Some(&json!("crdt_sync")));
        assert_eq!(wire.get("targetPeer"), Some(&json!("node-b")));

        let back: GossipPayload = serde_json::from_value(wire).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_sync_without_target_omits_field() {
        let payload = GossipPayload::CrdtSync {
            target_peer: None,
            states: BTreeMap::new(),
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert!(wire.get("targetPeer").is_none());
    }

    #[test]
    fn test_force_sync_tag() {
        let payload = GossipPayload::CrdtForceSync {
            states: BTreeMap::new(),
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire.get("type"), Some(&json!("crdt_force_sync")));
        assert_eq!(payload.kind(), "crdt_force_sync");
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let wire = json!({"type": "crdt_mystery"});
        assert!(serde_json::from_value::<GossipPayload>(wire).is_err());
    }
}
