/*
    whole_store.rs - Whole-store upload and download

    A whole-store snapshot is a serialized image of the full object graph
    with a blake3 integrity hash and a cutoff: the uploader's own highest
    sealed sequence number at upload time. The uploader's applied marks
    go out alongside it, so a downloader knows exactly which sets the
    snapshot already contains and replays only what is newer.

    This is how a new client bootstraps, and how an existing client
    recovers when a peer's backlog is too deep to replay set by set.
*/

use super::DocumentSession;
use crate::changeset::AppliedMarks;
use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, SeqNumber, Timestamp};
use crate::remote::{CryptoManager, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// On-medium framing of a whole-store snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFrame {
    /// blake3 hash of `graph` followed by `origins`
    pub hash: [u8; 32],

    /// The uploader's highest sealed sequence number at upload time
    pub cutoff: SeqNumber,

    /// When the snapshot was taken
    pub taken_at: Timestamp,

    /// Serialized object graph
    pub graph: Vec<u8>,

    /// Serialized committed-write ledger matching the graph
    pub origins: Vec<u8>,
}

impl SnapshotFrame {
    pub fn new(graph: Vec<u8>, origins: Vec<u8>, cutoff: SeqNumber) -> Self {
        let hash = Self::content_hash(&graph, &origins);
        SnapshotFrame { hash, cutoff, taken_at: Timestamp::now(), graph, origins }
    }

    fn content_hash(graph: &[u8], origins: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(graph);
        hasher.update(origins);
        *hasher.finalize().as_bytes()
    }

    /// Verify the integrity hash against the carried bytes
    pub fn verify(&self) -> SyncResult<()> {
        if Self::content_hash(&self.graph, &self.origins) != self.hash {
            return Err(SyncError::Storage("whole-store snapshot hash mismatch".to_string()));
        }
        Ok(())
    }
}

impl DocumentSession {
    /// Upload this client's whole store with its applied marks
    ///
    /// The marks file lands after the snapshot; a reader pairs the two by
    /// directory, and a half-finished upload leaves the previous pair
    /// readable because each write is atomic.
    pub(crate) async fn upload_whole_store(
        &self,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<()> {
        let graph = self.graph.current_graph_snapshot().await?;
        let frame = SnapshotFrame::new(graph, self.origins.to_bytes()?, self.store.highest_seq());
        let payload = self.seal_payload(bincode::serialize(&frame)?, crypto)?;

        let path = self.layout.store_snapshot(&self.doc, &self.client);
        self.transport.write(&path, &payload).await?;
        self.publish_marks(crypto).await?;

        info!(
            document = %self.doc,
            cutoff = %frame.cutoff,
            bytes = frame.graph.len(),
            hash = %hex::encode(&frame.hash[..8]),
            "uploaded whole store"
        );
        Ok(())
    }

    /// Replace the local graph and marks with the freshest peer snapshot
    ///
    /// Picks the uploader whose snapshot was taken most recently. After
    /// this, a normal cycle replays every set newer than the adopted
    /// marks.
    pub(crate) async fn download_whole_store(
        &mut self,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<()> {
        let (uploader, frame) = self.freshest_snapshot(crypto).await?;
        frame.verify()?;

        let marks_path = self.layout.applied_marks(&self.doc, &uploader);
        let marks_bytes = self.open_payload(self.transport.read(&marks_path).await?, crypto)?;
        let mut marks = AppliedMarks::from_bytes(&marks_bytes)?;

        // The snapshot contains the uploader's own sets up to its cutoff
        marks.advance(uploader.clone(), frame.cutoff)?;

        self.graph.load_snapshot(&frame.graph).await?;
        self.origins = crate::changeset::OriginLedger::from_bytes(&frame.origins)?;
        self.save_origins()?;
        self.marks = marks;
        self.save_marks()?;

        info!(
            document = %self.doc,
            uploader = %uploader,
            cutoff = %frame.cutoff,
            "adopted whole store"
        );
        Ok(())
    }

    /// Find the most recently taken snapshot across uploaders
    async fn freshest_snapshot(
        &self,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<(ClientId, SnapshotFrame)> {
        let dir = self.layout.whole_store_dir(&self.doc);
        let mut names = self.transport.list(&dir).await?;
        names.sort();

        let mut best: Option<(ClientId, SnapshotFrame)> = None;
        for name in names {
            let uploader = ClientId::new(name);
            if uploader == self.client {
                continue;
            }
            let path = self.layout.store_snapshot(&self.doc, &uploader);
            let bytes = match self.transport.read(&path).await {
                Ok(bytes) => bytes,
                Err(TransportError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let bytes = self.open_payload(bytes, crypto)?;
            let frame: SnapshotFrame = bincode::deserialize(&bytes)?;
            debug!(uploader = %uploader, taken_at = %frame.taken_at, "found snapshot");

            let newer = match &best {
                None => true,
                Some((_, current)) => frame.taken_at > current.taken_at,
            };
            if newer {
                best = Some((uploader, frame));
            }
        }

        best.ok_or_else(|| {
            SyncError::NotFound(format!("no whole-store snapshot for document {}", self.doc))
        })
    }
}
