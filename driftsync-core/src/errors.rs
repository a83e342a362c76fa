/*
    errors.rs - Error types for the sync core

    One taxonomy for everything the engine can surface:
    - Transient I/O (retried internally, surfaced only past the retry ceiling)
    - Corrupt change sets (skipped and flagged, cycle continues)
    - Sequence gaps (fatal for the cycle, never skipped)
    - Authentication (parks the owning operation until a password arrives)
    - Registration rollback failures
*/

use crate::model::{ClientId, DocumentId, SeqNumber};
use thiserror::Error;

/// Errors that can occur in the sync core
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient network/file hiccup, eligible for retry
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Malformed or checksum-failing change set
    #[error("Corrupt change set {seq} from client {client}: {reason}")]
    CorruptChangeSet { client: ClientId, seq: SeqNumber, reason: String },

    /// An expected change set is missing from the medium
    #[error("Sequence gap for client {client}: expected set {expected}, found {found}")]
    SequenceGap { client: ClientId, expected: SeqNumber, found: SeqNumber },

    /// A credential is required before the operation can continue
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Remote structure creation failed; created artifacts were rolled back
    #[error("Registration failed: {0}")]
    FatalRegistration(String),

    /// The operation was cancelled at a suspension point
    #[error("Operation cancelled")]
    Cancelled,

    /// Retry ceiling exceeded for a transient failure
    #[error("Step '{step}' failed after {attempts} attempts: {last}")]
    RetryExhausted { step: String, attempts: u32, last: String },

    /// Applied-mark regression attempt (marks are strictly non-decreasing)
    #[error("Mark regression for peer {peer}: {current} -> {attempted}")]
    MarkRegression { peer: ClientId, current: SeqNumber, attempted: SeqNumber },

    /// Local storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Encryption/decryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The document has been tombstoned by a peer
    #[error("Document {0} has been deleted")]
    DocumentDeleted(DocumentId),

    /// Operation attempted from an illegal state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// True for failure classes the orchestrator may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo(_))
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
