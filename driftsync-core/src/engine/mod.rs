/*
    engine - Synchronization engine

    The caller-facing surface of the crate. A SyncManager is built from an
    explicit SyncContext (no global state), registers the client and its
    documents, and drives per-document sync cycles, whole-store transfers,
    vacuum, and the auto-sync watch loop.

    Concurrency model: client registration runs on a serialized lane and
    gates everything else; per-document work holds that document's
    advisory lock, so a sync cycle and a document deletion never overlap.
*/

mod cycle;
mod vacuum;
mod watch;
mod whole_store;

pub use cycle::{CyclePhase, CycleReport};
pub use vacuum::VacuumOutcome;
pub use watch::{SyncNeeded, SyncWatcher};
pub use whole_store::SnapshotFrame;

use crate::changeset::{AppliedMarks, ChangeSetStore, OriginLedger};
use crate::config::SyncConfig;
use crate::conflict::ConflictPolicy;
use crate::errors::{SyncError, SyncResult};
use crate::graph::ObjectStore;
use crate::model::{ClientId, ClientInfo, DocumentId, DocumentInfo};
use crate::registry::{RegisteredClient, Registry};
use crate::remote::{CryptoManager, RemoteLayout, Transport};
use crate::task::{CancelToken, Operation, ProgressChannel, ProgressEvent, TaskLanes};
use crate::tracker::ChangeTracker;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Everything the engine needs, supplied explicitly by the caller
pub struct SyncContext {
    /// Application-wide identifier; the root directory on the medium
    pub app_id: String,

    /// This client's identity and registration record
    pub client: ClientInfo,

    /// Access to the shared medium
    pub transport: Arc<dyn Transport>,

    /// Engine, retry, storage and logging settings
    pub config: SyncConfig,

    /// Conflict resolution policy shared by all clients of the app
    pub policy: ConflictPolicy,
}

/// Per-document sync state owned by the engine
pub(crate) struct DocumentSession {
    pub(crate) doc: DocumentId,
    pub(crate) client: ClientId,
    pub(crate) layout: RemoteLayout,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) graph: Arc<dyn ObjectStore>,
    pub(crate) store: ChangeSetStore,
    pub(crate) tracker: ChangeTracker,
    pub(crate) marks: AppliedMarks,
    pub(crate) marks_path: PathBuf,
    pub(crate) origins: OriginLedger,
    pub(crate) origins_path: PathBuf,
    pub(crate) policy: ConflictPolicy,
}

impl DocumentSession {
    fn open(
        doc: DocumentId,
        client: ClientId,
        layout: RemoteLayout,
        transport: Arc<dyn Transport>,
        graph: Arc<dyn ObjectStore>,
        data_dir: &PathBuf,
        policy: ConflictPolicy,
    ) -> SyncResult<Self> {
        let doc_dir = data_dir.join(doc.as_str());
        let store = ChangeSetStore::open(doc_dir.join("changesets"), client.clone())?;

        let marks_path = doc_dir.join("marks.bin");
        let marks = match std::fs::read(&marks_path) {
            Ok(bytes) => AppliedMarks::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppliedMarks::new(),
            Err(e) => return Err(e.into()),
        };

        let origins_path = doc_dir.join("origins.bin");
        let origins = match std::fs::read(&origins_path) {
            Ok(bytes) => OriginLedger::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OriginLedger::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(DocumentSession {
            doc,
            client: client.clone(),
            layout,
            transport,
            graph,
            tracker: ChangeTracker::new(client),
            store,
            marks,
            marks_path,
            origins,
            origins_path,
            policy,
        })
    }

    /// Persist the applied marks next to the local change set store
    pub(crate) fn save_marks(&self) -> SyncResult<()> {
        let bytes = self.marks.to_bytes()?;
        let tmp = self.marks_path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.marks_path)?;
        Ok(())
    }

    /// Persist the committed-write ledger next to the applied marks
    pub(crate) fn save_origins(&self) -> SyncResult<()> {
        let bytes = self.origins.to_bytes()?;
        let tmp = self.origins_path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.origins_path)?;
        Ok(())
    }

    /// Encrypt an outgoing medium payload when encryption is enabled
    pub(crate) fn seal_payload(
        &self,
        bytes: Vec<u8>,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<Vec<u8>> {
        match crypto {
            Some(crypto) => crypto.encrypt(&bytes),
            None => Ok(bytes),
        }
    }

    /// Decrypt an incoming medium payload when encryption is enabled
    pub(crate) fn open_payload(
        &self,
        bytes: Vec<u8>,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<Vec<u8>> {
        match crypto {
            Some(crypto) => crypto.decrypt(&bytes),
            None => Ok(bytes),
        }
    }
}

/// Drives synchronization for one client across its documents
pub struct SyncManager {
    client: ClientInfo,
    layout: RemoteLayout,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    policy: ConflictPolicy,
    registry: Arc<Registry>,
    lanes: Arc<TaskLanes>,
    progress: ProgressChannel,
    crypto: Arc<Mutex<Option<Arc<CryptoManager>>>>,
    sessions: StdMutex<HashMap<DocumentId, Arc<Mutex<DocumentSession>>>>,
    pending_password: StdMutex<Option<tokio::sync::oneshot::Sender<String>>>,
}

impl SyncManager {
    pub fn new(ctx: SyncContext) -> Self {
        let layout = RemoteLayout::new(ctx.app_id);
        let registry = Arc::new(Registry::new(layout.clone(), ctx.transport.clone()));
        SyncManager {
            client: ctx.client,
            layout,
            transport: ctx.transport,
            config: ctx.config,
            policy: ctx.policy,
            registry,
            lanes: Arc::new(TaskLanes::new()),
            progress: ProgressChannel::new(),
            crypto: Arc::new(Mutex::new(None)),
            sessions: StdMutex::new(HashMap::new()),
            pending_password: StdMutex::new(None),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client.client_id
    }

    /// Observe progress events emitted by engine operations
    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    fn operation(&self, name: &str, cancel: CancelToken) -> Operation {
        Operation::new(name, self.config.retry.clone(), cancel, self.progress.clone())
    }

    /// Register this client with the application
    ///
    /// Runs on the serialized registration lane; until it succeeds once,
    /// every document operation waits. A password opts the application
    /// into encryption (first client) or unlocks it (later clients); a
    /// wrong password surfaces as AuthenticationRequired so the caller
    /// can re-prompt and call again.
    ///
    /// Registering against an encrypted application without a password
    /// does not fail: the operation pauses (emitting a Paused progress
    /// event) until provide_password supplies one or the token cancels.
    pub async fn register(
        &self,
        password: Option<&str>,
        cancel: CancelToken,
    ) -> SyncResult<()> {
        let _guard = self.lanes.registration_guard().await;
        if self.lanes.is_registered() {
            return Ok(());
        }

        let mut op = self.operation("register", cancel);
        let registry = self.registry.clone();
        let info = self.client.clone();

        let mut password = password.map(str::to_string);
        if password.is_none() {
            let encrypted = op
                .run_step("check encryption", || registry.encryption_enabled())
                .await?;
            if encrypted {
                let (tx, rx) = tokio::sync::oneshot::channel();
                self.park_for_password(tx)?;
                password =
                    Some(op.await_input("encryption password required", rx).await?);
            }
        }

        let registration = op
            .run_step("register client", || {
                registry.register_client(&info, password.as_deref())
            })
            .await?;
        op.complete();

        if let Some(crypto) = registration.crypto {
            *self.crypto.lock().await = Some(Arc::new(crypto));
        }
        self.lanes.mark_registered();
        info!(client = %self.client.client_id, "client registration complete");
        Ok(())
    }

    fn park_for_password(
        &self,
        sender: tokio::sync::oneshot::Sender<String>,
    ) -> SyncResult<()> {
        let mut slot = self
            .pending_password
            .lock()
            .map_err(|_| SyncError::InvalidState("password slot poisoned".to_string()))?;
        *slot = Some(sender);
        Ok(())
    }

    /// Resume a registration paused for an encryption password
    pub fn provide_password(&self, password: &str) -> SyncResult<()> {
        let mut slot = self
            .pending_password
            .lock()
            .map_err(|_| SyncError::InvalidState("password slot poisoned".to_string()))?;
        let sender = slot.take().ok_or_else(|| {
            SyncError::InvalidState("no operation is waiting for a password".to_string())
        })?;
        sender.send(password.to_string()).map_err(|_| {
            SyncError::InvalidState("the paused operation has gone away".to_string())
        })
    }

    /// Register a document and attach the object graph it synchronizes
    pub async fn register_document(
        &self,
        info: &DocumentInfo,
        graph: Arc<dyn ObjectStore>,
        cancel: CancelToken,
    ) -> SyncResult<()> {
        let guard = self.lanes.document_guard(&info.document_id).await;

        let mut op = self.operation("register document", cancel);
        let registry = self.registry.clone();
        let client = self.client.client_id.clone();
        op.run_step("register document", || registry.register_document(info, &client))
            .await?;
        op.complete();

        let session = DocumentSession::open(
            info.document_id.clone(),
            self.client.client_id.clone(),
            self.layout.clone(),
            self.transport.clone(),
            graph,
            &self.config.storage.data_dir,
            self.policy,
        )?;

        self.insert_session(session)?;
        drop(guard);
        Ok(())
    }

    fn insert_session(&self, session: DocumentSession) -> SyncResult<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| SyncError::InvalidState("session table poisoned".to_string()))?;
        sessions.insert(session.doc.clone(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    fn session(&self, doc: &DocumentId) -> SyncResult<Arc<Mutex<DocumentSession>>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| SyncError::InvalidState("session table poisoned".to_string()))?;
        sessions
            .get(doc)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("document {} is not registered", doc)))
    }

    fn remove_session(&self, doc: &DocumentId) -> SyncResult<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| SyncError::InvalidState("session table poisoned".to_string()))?;
        sessions.remove(doc);
        Ok(())
    }

    /// Access the tracker for recording local mutations against a document
    pub async fn with_tracker<R>(
        &self,
        doc: &DocumentId,
        f: impl FnOnce(&mut ChangeTracker) -> R,
    ) -> SyncResult<R> {
        let session = self.session(doc)?;
        let mut session = session.lock().await;
        Ok(f(&mut session.tracker))
    }

    /// Run one full sync cycle for the document
    pub async fn synchronize(
        &self,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<CycleReport> {
        let guard = self.lanes.document_guard(doc).await;
        let session = self.session(doc)?;
        let crypto = self.crypto.lock().await.clone();

        let mut op = self.operation("synchronize", cancel);
        let report = {
            let session = session.clone();
            let registry = self.registry.clone();
            let config = self.config.sync.clone();
            op.run_step("sync cycle", || {
                let session = session.clone();
                let registry = registry.clone();
                let crypto = crypto.clone();
                let config = config.clone();
                async move {
                    let mut session = session.lock().await;
                    session.run_cycle(crypto.as_deref(), &registry, &config).await
                }
            })
            .await?
        };
        op.complete();

        if self.config.sync.auto_vacuum {
            let mut session = session.lock().await;
            match session.vacuum(crypto.as_deref(), &self.registry, &self.config.sync).await {
                Ok(VacuumOutcome::Vacuumed { removed_remote, removed_local, cutoff }) => {
                    info!(document = %doc, removed_remote, removed_local, cutoff = %cutoff, "vacuumed superseded sets");
                }
                Ok(VacuumOutcome::Unsafe { reason }) => {
                    tracing::debug!(document = %doc, reason, "vacuum deferred");
                }
                Err(e) => warn!(document = %doc, error = %e, "vacuum failed"),
            }
        }

        drop(guard);
        Ok(report)
    }

    /// Remove superseded sets from this client's lane, if safe
    pub async fn vacuum(
        &self,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<VacuumOutcome> {
        let guard = self.lanes.document_guard(doc).await;
        let session = self.session(doc)?;
        let crypto = self.crypto.lock().await.clone();

        let mut op = self.operation("vacuum", cancel);
        let outcome = op
            .run_step("vacuum", || {
                let session = session.clone();
                let crypto = crypto.clone();
                let registry = self.registry.clone();
                let config = self.config.sync.clone();
                async move {
                    let mut session = session.lock().await;
                    session.vacuum(crypto.as_deref(), &registry, &config).await
                }
            })
            .await?;
        op.complete();
        drop(guard);
        Ok(outcome)
    }

    /// Upload this client's whole store, with a cutoff at its latest set
    pub async fn upload_whole_store(
        &self,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<()> {
        let guard = self.lanes.document_guard(doc).await;
        let session = self.session(doc)?;
        let crypto = self.crypto.lock().await.clone();

        let mut op = self.operation("upload whole store", cancel);
        op.run_step("upload snapshot", || {
            let session = session.clone();
            let crypto = crypto.clone();
            async move {
                let session = session.lock().await;
                session.upload_whole_store(crypto.as_deref()).await
            }
        })
        .await?;
        op.complete();
        drop(guard);
        Ok(())
    }

    /// Replace local state with the freshest peer snapshot, then sync
    ///
    /// Bootstrap path for new clients and recovery path when a peer's
    /// backlog exceeds the configured threshold.
    pub async fn request_download(
        &self,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<CycleReport> {
        {
            let guard = self.lanes.document_guard(doc).await;
            let session = self.session(doc)?;
            let crypto = self.crypto.lock().await.clone();

            let mut op = self.operation("download whole store", cancel.clone());
            op.run_step("download snapshot", || {
                let session = session.clone();
                let crypto = crypto.clone();
                async move {
                    let mut session = session.lock().await;
                    session.download_whole_store(crypto.as_deref()).await
                }
            })
            .await?;
            op.complete();
            drop(guard);
        }

        // Replay anything newer than the snapshot's cutoff
        self.synchronize(doc, cancel).await
    }

    /// Documents previously synchronized by any client of the application
    pub async fn request_previously_synchronized_documents(
        &self,
        cancel: CancelToken,
    ) -> SyncResult<Vec<DocumentInfo>> {
        let mut op = self.operation("list documents", cancel);
        let registry = self.registry.clone();
        let docs = op.run_step("list documents", || registry.list_documents()).await?;
        op.complete();
        Ok(docs)
    }

    /// Clients registered with the application
    pub async fn request_client_list(
        &self,
        include_documents: bool,
        cancel: CancelToken,
    ) -> SyncResult<Vec<RegisteredClient>> {
        let mut op = self.operation("list clients", cancel);
        let registry = self.registry.clone();
        let clients = op
            .run_step("list clients", || registry.list_clients(include_documents))
            .await?;
        op.complete();
        Ok(clients)
    }

    /// Tombstone and remove a document from the medium
    pub async fn delete_document(
        &self,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<()> {
        let guard = self.lanes.document_guard(doc).await;

        let mut op = self.operation("delete document", cancel);
        let registry = self.registry.clone();
        let client = self.client.client_id.clone();
        op.run_step("delete document", || registry.delete_document(doc, &client)).await?;
        op.complete();

        self.remove_session(doc)?;
        drop(guard);
        Ok(())
    }

    /// Start an auto-sync loop that synchronizes whenever peers publish
    ///
    /// Returns immediately; the loop stops when the token is cancelled.
    /// Transports without native notifications surface WatchUnsupported
    /// from the underlying subscription; callers fall back to manual or
    /// interval-driven sync.
    pub async fn enable_auto_sync(
        self: &Arc<Self>,
        doc: &DocumentId,
        cancel: CancelToken,
    ) -> SyncResult<()> {
        // Fail fast if the session is missing or the backend cannot watch
        self.session(doc)?;
        let watcher = SyncWatcher::new(
            self.transport.clone(),
            self.layout.clone(),
            doc.clone(),
            self.client.client_id.clone(),
        );
        let mut needed = watcher.subscribe().await?;

        let manager = self.clone();
        let doc = doc.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = needed.recv() => match event {
                        Some(SyncNeeded { .. }) => {
                            if let Err(e) = manager.synchronize(&doc, cancel.clone()).await {
                                warn!(document = %doc, error = %e, "auto-sync cycle failed");
                            }
                        }
                        None => break,
                    },
                }
            }
            info!(document = %doc, "auto-sync loop stopped");
        });
        Ok(())
    }
}
