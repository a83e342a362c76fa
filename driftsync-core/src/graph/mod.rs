/*
    graph - Object store seam and reference implementation

    The local object-persistence engine is an external collaborator; the
    core only needs the three operations below. MemoryGraph is the
    in-process reference implementation used by the CLI and tests.
*/

mod memory;

pub use memory::{GraphObject, MemoryGraph};

use crate::changeset::ChangeRecord;
use crate::errors::SyncResult;
use async_trait::async_trait;

/// The persistence engine the sync core applies changes into
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Apply one resolved change record to the graph
    async fn apply_record(&self, record: &ChangeRecord) -> SyncResult<()>;

    /// Serialize the full current graph
    async fn current_graph_snapshot(&self) -> SyncResult<Vec<u8>>;

    /// Replace the graph with a previously serialized snapshot
    async fn load_snapshot(&self, bytes: &[u8]) -> SyncResult<()>;
}
