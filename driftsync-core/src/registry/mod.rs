/*
    registry.rs - Client and document registration

    Registration creates the on-medium structure a client needs before any
    sync cycle can run. Both client and document registration are
    idempotent: the first registrant creates, later registrants observe.
    If first-time creation fails partway, everything this call created is
    deleted and the failure surfaces as FatalRegistration.

    Encryption is decided by the first client to register: supplying a
    password writes Encryption/{salt, test}; every later client must
    present a password that decrypts the test blob before registration
    completes.
*/

use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, ClientInfo, DocumentId, DocumentInfo, RecentSync, Timestamp};
use crate::remote::{CryptoManager, RemoteLayout, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a completed client registration established
#[derive(Debug)]
pub struct Registration {
    /// True if this call created the client record (first registration)
    pub created: bool,

    /// Cipher for medium payloads, present when encryption is enabled
    pub crypto: Option<CryptoManager>,
}

/// A client known to the registry
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub info: ClientInfo,

    /// Documents the client participates in (populated on request)
    pub documents: Vec<DocumentId>,
}

/// Tombstone left behind when a document is deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTombstone {
    pub document_id: DocumentId,
    pub deleted_by: ClientId,
    pub deleted_at: Timestamp,
}

/// Registry operations over the shared medium
pub struct Registry {
    layout: RemoteLayout,
    transport: Arc<dyn Transport>,
}

impl Registry {
    pub fn new(layout: RemoteLayout, transport: Arc<dyn Transport>) -> Self {
        Registry { layout, transport }
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// True once the client's device record exists on the medium
    pub async fn is_client_registered(&self, client: &ClientId) -> SyncResult<bool> {
        Ok(self.transport.exists(&self.layout.device_info(client)).await?)
    }

    /// True once any client has enabled encryption for the application
    pub async fn encryption_enabled(&self) -> SyncResult<bool> {
        Ok(self.transport.exists(&self.layout.encryption_salt()).await?)
    }

    /// Register this client with the application's shared structure
    ///
    /// Idempotent: if the device record already exists the call only
    /// validates encryption access. A password on first registration
    /// enables encryption for the whole application; an enabled
    /// application demands a valid password from every registrant.
    pub async fn register_client(
        &self,
        info: &ClientInfo,
        password: Option<&str>,
    ) -> SyncResult<Registration> {
        let mut created_paths: Vec<String> = Vec::new();
        match self.register_client_inner(info, password, &mut created_paths).await {
            Ok(registration) => Ok(registration),
            // Transient failures propagate unrolled: registration is
            // idempotent, so a retry resumes where this attempt stopped.
            // A paused-for-password error likewise keeps the structure.
            Err(err)
                if err.is_transient()
                    || matches!(
                        err,
                        SyncError::AuthenticationRequired(_) | SyncError::Cancelled
                    ) =>
            {
                Err(err)
            }
            Err(err) => {
                for path in created_paths.iter().rev() {
                    if let Err(e) = self.transport.delete(path).await {
                        warn!(path = %path, error = %e, "registration rollback delete failed");
                    }
                }
                Err(SyncError::FatalRegistration(err.to_string()))
            }
        }
    }

    async fn register_client_inner(
        &self,
        info: &ClientInfo,
        password: Option<&str>,
        created: &mut Vec<String>,
    ) -> SyncResult<Registration> {
        for dir in self.layout.global_dirs() {
            if !self.transport.exists(&dir).await? {
                self.transport.create_dir(&dir).await?;
                created.push(dir);
            }
        }

        let crypto = self.establish_encryption(password, created).await?;

        let info_path = self.layout.device_info(&info.client_id);
        if self.transport.exists(&info_path).await? {
            debug!(client = %info.client_id, "client already registered");
            return Ok(Registration { created: false, crypto });
        }

        let dir = self.layout.client_device_dir(&info.client_id);
        self.transport.create_dir(&dir).await?;
        created.push(dir);

        // Device info is plain JSON so the user_info blob stays free-form
        self.transport.write(&info_path, &serde_json::to_vec(info)?).await?;
        created.push(info_path);

        info!(client = %info.client_id, "registered client");
        Ok(Registration { created: true, crypto })
    }

    /// Resolve the application's encryption state against the password
    async fn establish_encryption(
        &self,
        password: Option<&str>,
        created: &mut Vec<String>,
    ) -> SyncResult<Option<CryptoManager>> {
        let salt_path = self.layout.encryption_salt();
        if self.transport.exists(&salt_path).await? {
            let password = password.ok_or_else(|| {
                SyncError::AuthenticationRequired(
                    "application is encrypted; password required".to_string(),
                )
            })?;
            let salt = self.transport.read(&salt_path).await?;
            let crypto = CryptoManager::from_password(password, &salt)?;
            let blob = self.transport.read(&self.layout.encryption_test()).await?;
            crypto.verify_test_blob(&blob)?;
            return Ok(Some(crypto));
        }

        let Some(password) = password else {
            return Ok(None);
        };

        let dir = self.layout.encryption_dir();
        if !self.transport.exists(&dir).await? {
            self.transport.create_dir(&dir).await?;
            created.push(dir);
        }

        let salt = CryptoManager::generate_salt();
        let crypto = CryptoManager::from_password(password, &salt)?;
        self.transport.write(&salt_path, &salt).await?;
        created.push(salt_path);

        let test_path = self.layout.encryption_test();
        self.transport.write(&test_path, &crypto.make_test_blob()?).await?;
        created.push(test_path);

        info!("enabled encryption for application");
        Ok(Some(crypto))
    }

    /// Register a document and this client's lanes inside it
    ///
    /// Re-registering a document another client tombstoned is refused so a
    /// deleted document cannot be resurrected by accident.
    pub async fn register_document(
        &self,
        doc_info: &DocumentInfo,
        client: &ClientId,
    ) -> SyncResult<()> {
        let doc = &doc_info.document_id;
        if self.transport.exists(&self.layout.deleted_document(doc)).await? {
            return Err(SyncError::DocumentDeleted(doc.clone()));
        }

        let first = !self.transport.exists(&self.layout.document_dir(doc)).await?;
        for dir in self.layout.document_dirs(doc) {
            self.transport.create_dir(&dir).await?;
        }
        if first {
            self.transport
                .write(&self.layout.document_info(doc), &serde_json::to_vec(doc_info)?)
                .await?;
        }

        self.transport.create_dir(&self.layout.client_sync_changes_dir(doc, client)).await?;
        self.transport.create_dir(&self.layout.client_sync_commands_dir(doc, client)).await?;
        self.transport.create_dir(&self.layout.client_whole_store_dir(doc, client)).await?;

        info!(document = %doc, client = %client, first, "registered document");
        Ok(())
    }

    /// All clients registered with the application
    pub async fn list_clients(&self, include_documents: bool) -> SyncResult<Vec<RegisteredClient>> {
        let mut out = Vec::new();
        let mut names = self.transport.list(&self.layout.client_devices_dir()).await?;
        names.sort();

        let documents = if include_documents { self.list_documents().await? } else { Vec::new() };

        for name in names {
            let client = ClientId::new(name);
            let bytes = match self.transport.read(&self.layout.device_info(&client)).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(client = %client, error = %e, "skipping client without device info");
                    continue;
                }
            };
            let info: ClientInfo = serde_json::from_slice(&bytes)?;

            let mut docs = Vec::new();
            if include_documents {
                for doc_info in &documents {
                    let doc = &doc_info.document_id;
                    let lane = self.layout.client_sync_changes_dir(doc, &client);
                    if self.transport.exists(&lane).await? {
                        docs.push(doc.clone());
                    }
                }
            }
            out.push(RegisteredClient { info, documents: docs });
        }
        Ok(out)
    }

    /// Documents any client has previously synchronized
    pub async fn list_documents(&self) -> SyncResult<Vec<DocumentInfo>> {
        let mut out = Vec::new();
        let mut names = self.transport.list(&self.layout.documents_dir()).await?;
        names.sort();

        for name in names {
            let doc = DocumentId::new(name);
            match self.transport.read(&self.layout.document_info(&doc)).await {
                Ok(bytes) => out.push(serde_json::from_slice(&bytes)?),
                Err(e) => {
                    warn!(document = %doc, error = %e, "skipping document without info record");
                }
            }
        }
        Ok(out)
    }

    /// Tombstone a document, then remove its tree
    ///
    /// The tombstone lands before any deletion so a crash between the two
    /// steps still leaves the document marked deleted. Callers hold the
    /// document's exclusive lock so deletion never races a sync cycle.
    pub async fn delete_document(&self, doc: &DocumentId, client: &ClientId) -> SyncResult<()> {
        let tombstone = DocumentTombstone {
            document_id: doc.clone(),
            deleted_by: client.clone(),
            deleted_at: Timestamp::now(),
        };
        self.transport
            .write(&self.layout.deleted_document(doc), &serde_json::to_vec(&tombstone)?)
            .await?;
        self.transport.delete(&self.layout.document_dir(doc)).await?;

        info!(document = %doc, client = %client, "deleted document");
        Ok(())
    }

    /// Record that this client just completed a sync cycle of the document
    pub async fn touch_recent_sync(&self, doc: &DocumentId, client: &ClientId) -> SyncResult<()> {
        let record = RecentSync::new(client.clone());
        self.transport
            .write(&self.layout.recent_sync(doc, client), &serde_json::to_vec(&record)?)
            .await?;
        Ok(())
    }

    /// Clients whose freshness record for the document is older than the
    /// horizon
    ///
    /// A client with no freshness record at all is never reported departed;
    /// it may simply not have completed a first cycle yet.
    pub async fn departed_clients(
        &self,
        doc: &DocumentId,
        horizon: Duration,
    ) -> SyncResult<Vec<ClientId>> {
        let now = Timestamp::now();
        let mut departed = Vec::new();
        for name in self.transport.list(&self.layout.recent_syncs_dir(doc)).await? {
            let client = ClientId::new(name);
            let bytes = match self.transport.read(&self.layout.recent_sync(doc, &client)).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let record: RecentSync = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if record.synced_at.age_at(now) > horizon.as_millis() as u64 {
                departed.push(client);
            }
        }
        departed.sort();
        Ok(departed)
    }

    /// Clients with a sync-changes lane in the document
    pub async fn document_participants(&self, doc: &DocumentId) -> SyncResult<Vec<ClientId>> {
        let mut names = self.transport.list(&self.layout.sync_changes_dir(doc)).await?;
        names.sort();
        Ok(names.into_iter().map(ClientId::new).collect())
    }
}
