//! Error types for the coordination layer.

use concord_core::CrdtError;
use concord_store::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the manager API.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("manager is not initialised")]
    NotInitialised,

    #[error("manager is closed")]
    AlreadyClosed,

    #[error("CRDT id already registered: `{0}`")]
    DuplicateId(String),

    #[error("CRDT not found: `{0}`")]
    NotFound(String),

    /// A local operation failed; the original cause is preserved.
    #[error("operation `{operation}` failed on `{crdt_id}`")]
    OperationFailed {
        crdt_id: String,
        operation: String,
        #[source]
        source: CrdtError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Crdt(#[from] CrdtError),
}
