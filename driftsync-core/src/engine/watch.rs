/*
    watch.rs - Change notifications for auto-sync

    Adapts Transport::watch into SyncNeeded events: a notification for a
    peer's sync-changes lane means new sets may be waiting. The forwarding
    loop resubscribes after broadcast lag, so a slow consumer misses
    nothing worse than an extra sync.
*/

use crate::model::{ClientId, DocumentId};
use crate::remote::{RemoteLayout, Transport};
use crate::errors::SyncResult;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A hint that peers may have published new sets for a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNeeded {
    pub document: DocumentId,
}

/// Adapts transport change notifications into sync hints
pub struct SyncWatcher {
    transport: Arc<dyn Transport>,
    layout: RemoteLayout,
    doc: DocumentId,
    client: ClientId,
}

impl SyncWatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        layout: RemoteLayout,
        doc: DocumentId,
        client: ClientId,
    ) -> Self {
        SyncWatcher { transport, layout, doc, client }
    }

    /// Start watching; the returned channel yields one hint per burst of
    /// remote activity and closes when the transport subscription ends
    pub async fn subscribe(self) -> SyncResult<mpsc::Receiver<SyncNeeded>> {
        let watch_dir = self.layout.sync_changes_dir(&self.doc);
        let mut changes = self.transport.watch(&watch_dir).await?;
        let (tx, rx) = mpsc::channel(16);

        let own_lane = self.layout.client_sync_changes_dir(&self.doc, &self.client);
        let doc = self.doc.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        // Only peer sync-changes lanes are news; marks,
                        // freshness records and our own uploads are not
                        if !change.path.starts_with(&watch_dir)
                            || change.path.starts_with(&own_lane)
                        {
                            continue;
                        }
                        debug!(document = %doc, path = %change.path, "remote change detected");
                        if tx.send(SyncNeeded { document: doc.clone() }).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Dropped notifications collapse into one hint
                        warn!(document = %doc, missed, "watch lagged; resubscribing");
                        match transport.watch(&watch_dir).await {
                            Ok(fresh) => changes = fresh,
                            Err(e) => {
                                warn!(document = %doc, error = %e, "resubscribe failed");
                                break;
                            }
                        }
                        if tx.send(SyncNeeded { document: doc.clone() }).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(document = %doc, "watch loop ended");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_peer_write_produces_hint() {
        let medium = MemoryTransport::new();
        let layout = RemoteLayout::new("app");
        let doc = DocumentId::new("d1".to_string());
        let me = ClientId::new("me".to_string());

        let watcher =
            SyncWatcher::new(Arc::new(medium.clone()), layout, doc.clone(), me);
        let mut hints = watcher.subscribe().await.unwrap();

        medium
            .write("app/Documents/d1/SyncChanges/peer/1.changeset", b"x")
            .await
            .unwrap();

        let hint = tokio::time::timeout(Duration::from_secs(1), hints.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hint.document, doc);
    }

    #[tokio::test]
    async fn test_own_write_is_filtered() {
        let medium = MemoryTransport::new();
        let layout = RemoteLayout::new("app");
        let doc = DocumentId::new("d1".to_string());
        let me = ClientId::new("me".to_string());

        let watcher =
            SyncWatcher::new(Arc::new(medium.clone()), layout, doc.clone(), me);
        let mut hints = watcher.subscribe().await.unwrap();

        medium
            .write("app/Documents/d1/SyncChanges/me/1.changeset", b"x")
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(200), hints.recv()).await;
        assert!(result.is_err());
    }
}
