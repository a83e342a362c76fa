/*
    memory.rs - In-memory object graph

    Reference ObjectStore implementation: objects with ordered attribute
    maps and named relationship sets. Deletes leave a tombstone so a
    late-arriving update to a deleted object is ignored rather than
    resurrecting it.
*/

use super::ObjectStore;
use crate::changeset::{AttributeValue, ChangeKind, ChangeRecord, RelationshipDelta};
use crate::errors::SyncResult;
use crate::model::ObjectId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// Convert poison errors into SyncError
fn handle_poison<T>(_err: PoisonError<T>) -> crate::errors::SyncError {
    crate::errors::SyncError::Storage(
        "Lock poisoned: a thread panicked while holding the lock".to_string(),
    )
}

/// One object in the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphObject {
    pub attributes: BTreeMap<String, AttributeValue>,
    pub relationships: BTreeMap<String, BTreeSet<ObjectId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct GraphState {
    objects: BTreeMap<ObjectId, GraphObject>,
    tombstones: BTreeSet<ObjectId>,
}

impl GraphState {
    fn apply(&mut self, record: &ChangeRecord) {
        match record.kind {
            ChangeKind::Delete => {
                self.objects.remove(&record.object_id);
                self.tombstones.insert(record.object_id.clone());
            }
            ChangeKind::Insert | ChangeKind::Update => {
                if self.tombstones.contains(&record.object_id) {
                    trace!(object = %record.object_id, "ignoring edit to deleted object");
                    return;
                }
                let object = self.objects.entry(record.object_id.clone()).or_default();
                for (name, value) in &record.attributes {
                    object.attributes.insert(name.clone(), value.clone());
                }
                for (name, deltas) in &record.relationships {
                    let targets = object.relationships.entry(name.clone()).or_default();
                    for delta in deltas {
                        match delta {
                            RelationshipDelta::Add(target) => {
                                targets.insert(target.clone());
                            }
                            RelationshipDelta::Remove(target) => {
                                targets.remove(target);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Thread-safe in-memory graph
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        MemoryGraph { state: RwLock::new(GraphState::default()) }
    }

    /// Read a copy of an object, if it exists and is not deleted
    pub fn get(&self, id: &ObjectId) -> Option<GraphObject> {
        self.state.read().ok().and_then(|s| s.objects.get(id).cloned())
    }

    /// Read one attribute of an object
    pub fn attribute(&self, id: &ObjectId, name: &str) -> Option<AttributeValue> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.objects.get(id).and_then(|o| o.attributes.get(name).cloned()))
    }

    /// Relationship targets for (object, relationship)
    pub fn related(&self, id: &ObjectId, relationship: &str) -> BTreeSet<ObjectId> {
        self.state
            .read()
            .ok()
            .and_then(|s| {
                s.objects.get(id).and_then(|o| o.relationships.get(relationship).cloned())
            })
            .unwrap_or_default()
    }

    /// True if the object was deleted
    pub fn is_deleted(&self, id: &ObjectId) -> bool {
        self.state.read().map(|s| s.tombstones.contains(id)).unwrap_or(false)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryGraph {
    async fn apply_record(&self, record: &ChangeRecord) -> SyncResult<()> {
        self.state.write().map_err(handle_poison)?.apply(record);
        Ok(())
    }

    async fn current_graph_snapshot(&self) -> SyncResult<Vec<u8>> {
        let state = self.state.read().map_err(handle_poison)?;
        Ok(bincode::serialize(&*state)?)
    }

    async fn load_snapshot(&self, bytes: &[u8]) -> SyncResult<()> {
        let loaded: GraphState = bincode::deserialize(bytes)?;
        *self.state.write().map_err(handle_poison)? = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClientId;

    fn obj(id: &str) -> ObjectId {
        ObjectId::new(id.to_string())
    }

    fn cid() -> ClientId {
        ClientId::new("c1".to_string())
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let graph = MemoryGraph::new();

        let mut attrs = BTreeMap::new();
        attrs.insert("title".to_string(), AttributeValue::Text("hello".to_string()));
        graph.apply_record(&ChangeRecord::insert(obj("o1"), cid(), attrs)).await.unwrap();
        assert_eq!(
            graph.attribute(&obj("o1"), "title"),
            Some(AttributeValue::Text("hello".to_string()))
        );

        graph.apply_record(&ChangeRecord::delete(obj("o1"), cid())).await.unwrap();
        assert!(graph.get(&obj("o1")).is_none());
        assert!(graph.is_deleted(&obj("o1")));
    }

    #[tokio::test]
    async fn test_update_after_delete_ignored() {
        let graph = MemoryGraph::new();
        graph.apply_record(&ChangeRecord::delete(obj("o1"), cid())).await.unwrap();

        let mut attrs = BTreeMap::new();
        attrs.insert("title".to_string(), AttributeValue::Text("ghost".to_string()));
        graph
            .apply_record(&ChangeRecord::update(obj("o1"), cid(), attrs, BTreeMap::new()))
            .await
            .unwrap();

        assert!(graph.get(&obj("o1")).is_none());
    }

    #[tokio::test]
    async fn test_relationship_edits() {
        let graph = MemoryGraph::new();
        let mut rels = BTreeMap::new();
        rels.insert(
            "tags".to_string(),
            vec![
                RelationshipDelta::Add(obj("t1")),
                RelationshipDelta::Add(obj("t2")),
                RelationshipDelta::Remove(obj("t1")),
            ],
        );
        graph
            .apply_record(&ChangeRecord::update(obj("o1"), cid(), BTreeMap::new(), rels))
            .await
            .unwrap();

        let related = graph.related(&obj("o1"), "tags");
        assert!(related.contains(&obj("t2")));
        assert!(!related.contains(&obj("t1")));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let graph = MemoryGraph::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("n".to_string(), AttributeValue::Int(42));
        graph.apply_record(&ChangeRecord::insert(obj("o1"), cid(), attrs)).await.unwrap();
        graph.apply_record(&ChangeRecord::delete(obj("o2"), cid())).await.unwrap();

        let bytes = graph.current_graph_snapshot().await.unwrap();

        let restored = MemoryGraph::new();
        restored.load_snapshot(&bytes).await.unwrap();
        assert_eq!(restored.attribute(&obj("o1"), "n"), Some(AttributeValue::Int(42)));
        // Tombstones survive the round trip
        assert!(restored.is_deleted(&obj("o2")));
    }
}
