/*
    transport.rs - Shared-medium transport seam

    The only primitives the protocol asks of the medium: list, read,
    atomic write, delete, and an optional change notification. Backends
    (local folder, cloud-synced folder, hosted API) implement this trait;
    the core never touches the medium directly.
*/

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by a transport backend
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The path does not exist on the medium
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failure; the orchestrator may retry
    #[error("Transient transport error: {0}")]
    Transient(String),

    /// Non-retryable backend failure
    #[error("Transport error: {0}")]
    Backend(String),

    /// The backend does not support change notifications
    #[error("Change notifications not supported by this backend")]
    WatchUnsupported,
}

pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for crate::errors::SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(path) => crate::errors::SyncError::NotFound(path),
            TransportError::Transient(msg) => crate::errors::SyncError::TransientIo(msg),
            TransportError::Backend(msg) => crate::errors::SyncError::Storage(msg),
            TransportError::WatchUnsupported => {
                crate::errors::SyncError::InvalidState("watch unsupported".to_string())
            }
        }
    }
}

/// A change detected on a watched path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// The watched path that changed
    pub path: String,
}

/// File-like access to the shared medium
///
/// `write` must be atomic: the content is visible at `path` only after the
/// whole write succeeds, never partially.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Names of entries directly under `path` (empty if the directory is
    /// missing)
    async fn list(&self, path: &str) -> TransportResult<Vec<String>>;

    /// Read the full contents of a file
    async fn read(&self, path: &str) -> TransportResult<Vec<u8>>;

    /// Atomically write a file, creating parent directories as needed
    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()>;

    /// Create a directory (and any missing parents); idempotent
    async fn create_dir(&self, path: &str) -> TransportResult<()>;

    /// Delete a file or directory tree; deleting a missing path is not an
    /// error
    async fn delete(&self, path: &str) -> TransportResult<()>;

    /// True if the path exists
    async fn exists(&self, path: &str) -> TransportResult<bool>;

    /// Subscribe to change notifications under `path`
    ///
    /// Backends without native notification support may return
    /// `WatchUnsupported`; callers fall back to manual sync.
    async fn watch(&self, _path: &str) -> TransportResult<broadcast::Receiver<RemoteChange>> {
        Err(TransportError::WatchUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: crate::errors::SyncError = TransportError::Transient("flaky".to_string()).into();
        assert!(err.is_transient());

        let err: crate::errors::SyncError = TransportError::NotFound("x".to_string()).into();
        assert!(matches!(err, crate::errors::SyncError::NotFound(_)));
    }
}
