//! Manager configuration.

use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Configuration for a [`CrdtManager`](crate::CrdtManager).
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// The local replica id, used as operation origin and sync address.
    pub node_id: String,
    /// Capacity of each broadcast event stream; lagging subscribers lose
    /// the oldest events.
    pub event_capacity: usize,
    /// Millisecond clock; injectable so tests can pin timestamps.
    pub clock: fn() -> u64,
}

impl ManagerConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        ManagerConfig {
            node_id: node_id.into(),
            event_capacity: 128,
            clock: wall_clock_ms,
        }
    }

    pub fn builder(node_id: impl Into<String>) -> ManagerConfigBuilder {
        ManagerConfigBuilder {
            config: ManagerConfig::new(node_id),
        }
    }
}

/// Builder for [`ManagerConfig`].
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn clock(mut self, clock: fn() -> u64) -> Self {
        self.config.clock = clock;
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::new("node-a");
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.event_capacity, 128);
        assert!((config.clock)() > 0);
    }

    #[test]
    fn test_builder() {
        fn frozen() -> u64 {
            42
        }
        let config = ManagerConfig::builder("node-a")
            .event_capacity(8)
            .clock(frozen)
            .build();
        assert_eq!(config.event_capacity, 8);
        assert_eq!((config.clock)(), 42);
    }
}
