/*
    device.rs - Registry records for clients and documents

    ClientInfo is written once at registration (description may be updated
    later); DocumentInfo is created when any client first registers the
    document and tombstoned rather than removed on deletion.
*/

use super::types::{ClientId, DocumentId, Timestamp};
use serde::{Deserialize, Serialize};

/// Information a client publishes about itself at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Unique client identifier
    pub client_id: ClientId,

    /// Human-readable description, e.g. the machine name
    pub description: String,

    /// When this client first registered
    pub registered_at: Timestamp,

    /// Free-form application data carried with the client record
    pub user_info: serde_json::Value,
}

impl ClientInfo {
    pub fn new(client_id: ClientId, description: String, user_info: serde_json::Value) -> Self {
        ClientInfo { client_id, description, registered_at: Timestamp::now(), user_info }
    }
}

/// Information about a synchronized document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Unique document identifier
    pub document_id: DocumentId,

    /// Logical container path supplied by the registering application
    pub container_path: String,

    /// When the document was first registered by any client
    pub created_at: Timestamp,
}

impl DocumentInfo {
    pub fn new(document_id: DocumentId, container_path: String) -> Self {
        DocumentInfo { document_id, container_path, created_at: Timestamp::now() }
    }
}

/// Freshness record a client publishes after every successful sync cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSync {
    /// The client that completed the cycle
    pub client_id: ClientId,

    /// When the cycle completed
    pub synced_at: Timestamp,
}

impl RecentSync {
    pub fn new(client_id: ClientId) -> Self {
        RecentSync { client_id, synced_at: Timestamp::now() }
    }
}
