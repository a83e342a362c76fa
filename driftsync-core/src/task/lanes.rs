/*
    lanes.rs - Task scheduling lanes

    Two lanes:
    - registration: strictly serialized; every other lane is gated until
      its first task completes successfully
    - general: concurrent across documents, mutually exclusive per
      document (a sync cycle and a vacuum never overlap on one document)

    Per-document exclusivity is an in-process advisory lock keyed by
    document id.
*/

use crate::model::DocumentId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard, OwnedMutexGuard};

/// Lane coordinator shared by every operation in one context
pub struct TaskLanes {
    registration: Mutex<()>,
    registered_tx: watch::Sender<bool>,
    registered_rx: watch::Receiver<bool>,
    doc_locks: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl TaskLanes {
    pub fn new() -> Self {
        let (registered_tx, registered_rx) = watch::channel(false);
        TaskLanes {
            registration: Mutex::new(()),
            registered_tx,
            registered_rx,
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the serialized registration lane
    pub async fn registration_guard(&self) -> MutexGuard<'_, ()> {
        self.registration.lock().await
    }

    /// Open the general lane; called once after the first successful
    /// registration
    pub fn mark_registered(&self) {
        let _ = self.registered_tx.send(true);
    }

    pub fn is_registered(&self) -> bool {
        *self.registered_rx.borrow()
    }

    /// Wait until registration has completed at least once
    pub async fn wait_registered(&self) {
        let mut rx = self.registered_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Acquire the per-document advisory lock on the general lane
    ///
    /// Blocks until registration has opened the lane, then until no other
    /// task holds this document.
    pub async fn document_guard(&self, doc: &DocumentId) -> OwnedMutexGuard<()> {
        self.wait_registered().await;
        let lock = {
            let mut locks = self.doc_locks.lock().await;
            locks.entry(doc.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

impl Default for TaskLanes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_general_lane_gated_until_registered() {
        let lanes = Arc::new(TaskLanes::new());
        let doc = DocumentId::new("d1".to_string());

        let entered = Arc::new(AtomicU32::new(0));
        let entered2 = entered.clone();
        let lanes2 = lanes.clone();
        let doc2 = doc.clone();
        let task = tokio::spawn(async move {
            let _guard = lanes2.document_guard(&doc2).await;
            entered2.store(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        lanes.mark_registered();
        task.await.unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_document_exclusivity() {
        let lanes = Arc::new(TaskLanes::new());
        lanes.mark_registered();
        let doc = DocumentId::new("d1".to_string());

        let guard = lanes.document_guard(&doc).await;

        let lanes2 = lanes.clone();
        let doc2 = doc.clone();
        let second = tokio::spawn(async move {
            let _guard = lanes2.document_guard(&doc2).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(guard);
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_documents_run_concurrently() {
        let lanes = Arc::new(TaskLanes::new());
        lanes.mark_registered();

        let _a = lanes.document_guard(&DocumentId::new("a".to_string())).await;
        // Must not block
        let acquired = tokio::time::timeout(
            Duration::from_millis(200),
            lanes.document_guard(&DocumentId::new("b".to_string())),
        )
        .await;
        assert!(acquired.is_ok());
    }
}
