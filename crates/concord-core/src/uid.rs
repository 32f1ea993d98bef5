//! Replica-scoped UID and tag generation.
//!
//! Tags for observed-remove types and sequence element UIDs share one string
//! scheme: `"<node>_<epoch-ms>_<suffix>"` with the millisecond count
//! zero-padded to 13 digits and the suffix to 6, so lexicographic order on
//! the strings is a total order. Within a single millisecond the suffix
//! increments, so one replica never repeats and never reorders its own UIDs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates unique, lexicographically ordered tags and UIDs for one replica.
#[derive(Clone, Debug)]
pub struct UidGen {
    rng: StdRng,
    last_ms: u64,
    last_suffix: u32,
}

impl UidGen {
    /// Entropy-seeded generator.
    pub fn new() -> Self {
        UidGen {
            rng: StdRng::from_entropy(),
            last_ms: 0,
            last_suffix: 0,
        }
    }

    /// Deterministic generator for tests.
    pub fn from_seed(seed: u64) -> Self {
        UidGen {
            rng: StdRng::seed_from_u64(seed),
            last_ms: 0,
            last_suffix: 0,
        }
    }

    /// Produce the next UID for `node` at wall-clock `ts_ms`.
    pub fn uid(&mut self, node: &str, ts_ms: u64) -> String {
        let suffix = if ts_ms == self.last_ms {
            self.last_suffix.saturating_add(1).min(999_999)
        } else {
            // Leave headroom so in-millisecond increments stay in 6 digits.
            self.rng.gen_range(0..900_000)
        };
        self.last_ms = ts_ms;
        self.last_suffix = suffix;
        format!("{}_{:013}_{:06}", node, ts_ms, suffix)
    }
}

impl Default for UidGen {
    fn default() -> Self {
        Self::new()
    }
}
