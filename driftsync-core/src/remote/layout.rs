/*
    layout.rs - Shared-medium directory layout

    The wire format of the protocol. All paths are relative to a root
    identified by the application-wide identifier:

        Information/DeletedDocuments/<docId>
        Encryption/{salt, test}
        ClientDevices/<clientId>/deviceInfo
        Documents/<docId>/
            documentInfo
            SyncChanges/<clientId>/<seq>.changeset
            SyncCommands/<clientId>/
            WholeStore/<clientId>/{store.snapshot, appliedMarks.snapshot}
            RecentSyncs/<clientId>
*/

use crate::model::{ClientId, DocumentId, SeqNumber};

pub const DEVICE_INFO_FILE: &str = "deviceInfo";
pub const DOCUMENT_INFO_FILE: &str = "documentInfo";
pub const STORE_SNAPSHOT_FILE: &str = "store.snapshot";
pub const APPLIED_MARKS_FILE: &str = "appliedMarks.snapshot";
pub const SALT_FILE: &str = "salt";
pub const TEST_FILE: &str = "test";

/// Path builders for everything the protocol stores on the medium
#[derive(Debug, Clone)]
pub struct RemoteLayout {
    app_id: String,
}

impl RemoteLayout {
    pub fn new(app_id: impl Into<String>) -> Self {
        RemoteLayout { app_id: app_id.into() }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn root(&self) -> String {
        self.app_id.clone()
    }

    pub fn information_dir(&self) -> String {
        format!("{}/Information", self.app_id)
    }

    pub fn deleted_documents_dir(&self) -> String {
        format!("{}/Information/DeletedDocuments", self.app_id)
    }

    pub fn deleted_document(&self, doc: &DocumentId) -> String {
        format!("{}/{}", self.deleted_documents_dir(), doc)
    }

    pub fn encryption_dir(&self) -> String {
        format!("{}/Encryption", self.app_id)
    }

    pub fn encryption_salt(&self) -> String {
        format!("{}/{}", self.encryption_dir(), SALT_FILE)
    }

    pub fn encryption_test(&self) -> String {
        format!("{}/{}", self.encryption_dir(), TEST_FILE)
    }

    pub fn client_devices_dir(&self) -> String {
        format!("{}/ClientDevices", self.app_id)
    }

    pub fn client_device_dir(&self, client: &ClientId) -> String {
        format!("{}/{}", self.client_devices_dir(), client)
    }

    pub fn device_info(&self, client: &ClientId) -> String {
        format!("{}/{}", self.client_device_dir(client), DEVICE_INFO_FILE)
    }

    pub fn documents_dir(&self) -> String {
        format!("{}/Documents", self.app_id)
    }

    pub fn document_dir(&self, doc: &DocumentId) -> String {
        format!("{}/{}", self.documents_dir(), doc)
    }

    pub fn document_info(&self, doc: &DocumentId) -> String {
        format!("{}/{}", self.document_dir(doc), DOCUMENT_INFO_FILE)
    }

    pub fn sync_changes_dir(&self, doc: &DocumentId) -> String {
        format!("{}/SyncChanges", self.document_dir(doc))
    }

    pub fn client_sync_changes_dir(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.sync_changes_dir(doc), client)
    }

    pub fn changeset(&self, doc: &DocumentId, client: &ClientId, seq: SeqNumber) -> String {
        format!("{}/{}.changeset", self.client_sync_changes_dir(doc, client), seq.as_u64())
    }

    pub fn sync_commands_dir(&self, doc: &DocumentId) -> String {
        format!("{}/SyncCommands", self.document_dir(doc))
    }

    pub fn client_sync_commands_dir(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.sync_commands_dir(doc), client)
    }

    pub fn whole_store_dir(&self, doc: &DocumentId) -> String {
        format!("{}/WholeStore", self.document_dir(doc))
    }

    pub fn client_whole_store_dir(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.whole_store_dir(doc), client)
    }

    pub fn store_snapshot(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.client_whole_store_dir(doc, client), STORE_SNAPSHOT_FILE)
    }

    pub fn applied_marks(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.client_whole_store_dir(doc, client), APPLIED_MARKS_FILE)
    }

    pub fn recent_syncs_dir(&self, doc: &DocumentId) -> String {
        format!("{}/RecentSyncs", self.document_dir(doc))
    }

    pub fn recent_sync(&self, doc: &DocumentId, client: &ClientId) -> String {
        format!("{}/{}", self.recent_syncs_dir(doc), client)
    }

    /// Directories created once per application registration
    pub fn global_dirs(&self) -> Vec<String> {
        vec![
            self.root(),
            self.information_dir(),
            self.deleted_documents_dir(),
            self.client_devices_dir(),
            self.documents_dir(),
        ]
    }

    /// Directories created once per document registration
    pub fn document_dirs(&self, doc: &DocumentId) -> Vec<String> {
        vec![
            self.document_dir(doc),
            self.sync_changes_dir(doc),
            self.sync_commands_dir(doc),
            self.whole_store_dir(doc),
            self.recent_syncs_dir(doc),
        ]
    }
}
