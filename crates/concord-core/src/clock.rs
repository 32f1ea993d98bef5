//! Vector clocks for causal ordering.
//!
//! Used by the multi-value register to decide whether one write supersedes
//! another or the two are concurrent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from replica id to a non-negative logical timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VectorClock {
    clock: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// The component for a replica; absent replicas count as 0.
    pub fn get(&self, node_id: &str) -> u64 {
        self.clock.get(node_id).copied().unwrap_or(0)
    }

    /// Set the component for a replica.
    pub fn set(&mut self, node_id: &str, value: u64) {
        self.clock.insert(node_id.to_string(), value);
    }

    /// Advance this replica's component by one.
    pub fn increment(&mut self, node_id: &str) {
        *self.clock.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Pointwise maximum with another clock.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &t) in &other.clock {
            let entry = self.clock.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(t);
        }
    }

    /// True when this clock is at least `other` everywhere and strictly
    /// greater somewhere.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        let mut strictly_greater = false;
        for node in self.clock.keys().chain(other.clock.keys()) {
            let mine = self.get(node);
            let theirs = other.get(node);
            if mine < theirs {
                return false;
            }
            if mine > theirs {
                strictly_greater = true;
            }
        }
        strictly_greater
    }

    /// Neither clock dominates the other.
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// The tracked components.
    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.clock
    }

    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }
}

impl From<BTreeMap<String, u64>> for VectorClock {
    fn from(clock: BTreeMap<String, u64>) -> Self {
        VectorClock { clock }
    }
}
