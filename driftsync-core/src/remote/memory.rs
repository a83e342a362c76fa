/*
    memory.rs - In-memory transport for tests

    A HashMap-backed medium shared by any number of simulated clients.
    Supports injecting a number of transient failures to exercise the
    orchestrator's retry path, and change notification via broadcast.
*/

use super::transport::{RemoteChange, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct MediumState {
    files: BTreeMap<String, Vec<u8>>,
    /// Directories created implicitly by writes or explicitly by markers
    dirs: BTreeMap<String, ()>,
}

/// Shared in-memory medium
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MediumState>>,
    /// Remaining transient failures to inject (shared across clones)
    faults: Arc<AtomicU32>,
    notify: broadcast::Sender<RemoteChange>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        MemoryTransport {
            state: Arc::new(Mutex::new(MediumState::default())),
            faults: Arc::new(AtomicU32::new(0)),
            notify,
        }
    }

    /// Make the next `count` operations fail with a transient error
    pub fn inject_transient_failures(&self, count: u32) {
        self.faults.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> TransportResult<()> {
        let remaining = self.faults.load(Ordering::SeqCst);
        if remaining > 0 {
            self.faults.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Transient("injected failure".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> TransportResult<std::sync::MutexGuard<'_, MediumState>> {
        self.state.lock().map_err(|_| TransportError::Backend("medium lock poisoned".to_string()))
    }

    /// Number of stored files (for assertions)
    pub fn file_count(&self) -> usize {
        self.state.lock().map(|s| s.files.len()).unwrap_or(0)
    }

    fn record_dirs(state: &mut MediumState, path: &str) {
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            state.dirs.insert(prefix.clone(), ());
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn list(&self, path: &str) -> TransportResult<Vec<String>> {
        self.maybe_fail()?;
        let state = self.lock()?;
        let prefix = format!("{}/", path);
        let mut names: Vec<String> = state
            .files
            .keys()
            .chain(state.dirs.keys())
            .filter_map(|p| p.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        self.maybe_fail()?;
        let state = self.lock()?;
        state.files.get(path).cloned().ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TransportResult<()> {
        self.maybe_fail()?;
        {
            let mut state = self.lock()?;
            if let Some((parent, _)) = path.rsplit_once('/') {
                Self::record_dirs(&mut state, parent);
            }
            state.files.insert(path.to_string(), bytes.to_vec());
        }
        let _ = self.notify.send(RemoteChange { path: path.to_string() });
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> TransportResult<()> {
        self.maybe_fail()?;
        let mut state = self.lock()?;
        Self::record_dirs(&mut state, path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        self.maybe_fail()?;
        let mut state = self.lock()?;
        let prefix = format!("{}/", path);
        state.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        state.dirs.retain(|p, _| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    async fn exists(&self, path: &str) -> TransportResult<bool> {
        self.maybe_fail()?;
        let state = self.lock()?;
        let prefix = format!("{}/", path);
        Ok(state.files.contains_key(path)
            || state.dirs.contains_key(path)
            || state.files.keys().any(|p| p.starts_with(&prefix)))
    }

    async fn watch(&self, path: &str) -> TransportResult<broadcast::Receiver<RemoteChange>> {
        // Receivers filter by prefix themselves; the medium is small
        let _ = path;
        Ok(self.notify.subscribe())
    }
}
