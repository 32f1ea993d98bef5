//! Error types for CRDT operations.

use thiserror::Error;

/// Errors raised by the CRDT surface.
#[derive(Debug, Error)]
pub enum CrdtError {
    /// Operation name not recognised by this CRDT type.
    #[error("unknown operation `{operation}` for {crdt_type}")]
    UnknownOperation {
        crdt_type: &'static str,
        operation: String,
    },

    /// Operation payload is missing a field or carries the wrong type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Snapshot `type` or `id` does not match the target CRDT.
    #[error("state type mismatch: expected {expected}, found {found}")]
    StateTypeMismatch { expected: String, found: String },

    /// A structural invariant does not hold.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// OR-Map mutation that needs an inner-CRDT factory, with none configured.
    #[error("no CRDT factory configured (key `{0}`)")]
    FactoryMissing(String),

    /// Sequence index outside the visible range.
    #[error("index {index} out of range (length {len})")]
    OutOfRange { index: usize, len: usize },

    /// Snapshot could not be encoded or decoded.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CrdtError::UnknownOperation {
            crdt_type: "GCounter",
            operation: "explode".to_string(),
        };
        assert_eq!(err.to_string(), "unknown operation `explode` for GCounter");

        let err = CrdtError::OutOfRange { index: 7, len: 3 };
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("3"));
    }
}
