/*
    folder.rs - Local/cloud-synced folder transport

    Backend for any medium that presents as a directory tree: a shared
    network folder, a cloud-synced directory, a USB drive. Writes go to a
    temporary sibling and are committed by atomic rename. Watch is
    implemented by polling directory listings and hashing the result, which
    is the strongest signal a dumb folder can give.
*/

use super::transport::{RemoteChange, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, warn};

fn map_io(path: &str, err: std::io::Error) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::NotFound => TransportError::NotFound(path.to_string()),
        // Folder syncers surface sharing violations and interrupted
        // transfers as transient conditions worth retrying
        std::io::ErrorKind::PermissionDenied
        | std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::WouldBlock => TransportError::Transient(err.to_string()),
        _ => TransportError::Backend(err.to_string()),
    }
}

/// Transport over a local directory tree
pub struct FolderTransport {
    root: PathBuf,
    poll_interval: Duration,
}

impl FolderTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FolderTransport { root: root.into(), poll_interval: Duration::from_secs(5) }
    }

    /// Override the watch polling interval (mainly for tests)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Fingerprint of a directory tree: names and modification times
    async fn fingerprint(root: &Path) -> u64 {
        let mut hasher = crc32fast::Hasher::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                hasher.update(entry.file_name().to_string_lossy().as_bytes());
                if let Ok(meta) = entry.metadata().await {
                    if let Ok(modified) = meta.modified() {
                        if let Ok(age) = modified.duration_since(std::time::UNIX_EPOCH) {
                            hasher.update(&age.as_millis().to_le_bytes());
                        }
                    }
                    if meta.is_dir() {
                        stack.push(entry.path());
                    }
                }
            }
        }
        hasher.finalize() as u64
    }
}

#[async_trait]
impl Transport for FolderTransport {
    async fn list(&self, path: &str) -> TransportResult<Vec<String>> {
        let full = self.resolve(path);
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(path, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            // Skip uncommitted temporaries and folder-syncer droppings
            if name.ends_with(".tmp") || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        fs::read(self.resolve(path)).await.map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(|e| map_io(path, e))?;
        }

        let temp = full.with_extension("tmp");
        fs::write(&temp, bytes).await.map_err(|e| map_io(path, e))?;
        fs::rename(&temp, &full).await.map_err(|e| map_io(path, e))?;
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> TransportResult<()> {
        fs::create_dir_all(self.resolve(path)).await.map_err(|e| map_io(path, e))
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        let full = self.resolve(path);
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(map_io(path, e)),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_file(&full).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> TransportResult<bool> {
        Ok(fs::metadata(self.resolve(path)).await.is_ok())
    }

    async fn watch(&self, path: &str) -> TransportResult<broadcast::Receiver<RemoteChange>> {
        let (tx, rx) = broadcast::channel(16);
        let watched = self.resolve(path);
        let reported = path.to_string();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last = FolderTransport::fingerprint(&watched).await;
            loop {
                tokio::time::sleep(interval).await;
                let current = FolderTransport::fingerprint(&watched).await;
                if current != last {
                    last = current;
                    debug!(path = %reported, "remote change detected");
                    if tx.send(RemoteChange { path: reported.clone() }).is_err() {
                        // All receivers dropped; stop polling
                        break;
                    }
                }
            }
            warn!(path = %reported, "folder watch stopped");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());

        transport.write("a/b/file", b"hello").await.unwrap();
        assert_eq!(transport.read("a/b/file").await.unwrap(), b"hello");
        assert!(transport.exists("a/b/file").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_skips_temporaries() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());

        transport.write("d/1.changeset", b"x").await.unwrap();
        std::fs::write(dir.path().join("d/2.tmp"), b"y").unwrap();
        std::fs::write(dir.path().join("d/.DS_Store"), b"z").unwrap();

        assert_eq!(transport.list("d").await.unwrap(), vec!["1.changeset".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());
        assert!(transport.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());
        let err = transport.read("missing").await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());
        transport.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_directory_tree() {
        let dir = TempDir::new().unwrap();
        let transport = FolderTransport::new(dir.path());
        transport.write("t/a", b"1").await.unwrap();
        transport.write("t/b/c", b"2").await.unwrap();

        transport.delete("t").await.unwrap();
        assert!(!transport.exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_detects_change() {
        let dir = TempDir::new().unwrap();
        let transport =
            FolderTransport::new(dir.path()).with_poll_interval(Duration::from_millis(20));
        transport.write("w/seed", b"0").await.unwrap();

        let mut rx = transport.watch("w").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.write("w/new", b"1").await.unwrap();

        let change =
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, "w");
    }
}
