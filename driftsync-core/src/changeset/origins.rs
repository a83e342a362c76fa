/*
    origins.rs - Committed-write origin ledger

    Records, per object, which change set last wrote each attribute and
    each relationship target. The apply pass consults it to tell a causal
    overwrite (the incoming set's basis covers the committed write) from
    a concurrent one that must go through conflict resolution — without
    that distinction, two clients that both published before seeing each
    other would apply in arrival order and diverge.

    A delete is final: it clears the object's write entries and leaves a
    delete stamp that later concurrent edits lose against.
*/

use super::record::{ChangeKind, ChangeRecord};
use super::set::ChangeSetId;
use crate::errors::SyncResult;
use crate::model::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last committed write to one relationship target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipWrite {
    /// The set that made the write
    pub stamp: ChangeSetId,

    /// Whether it added (true) or removed the target
    pub is_add: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ObjectOrigins {
    deleted: Option<ChangeSetId>,
    attributes: BTreeMap<String, ChangeSetId>,
    relationships: BTreeMap<String, BTreeMap<ObjectId, RelationshipWrite>>,
}

/// Per-object record of which set last wrote what
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginLedger {
    objects: BTreeMap<ObjectId, ObjectOrigins>,
}

impl OriginLedger {
    pub fn new() -> Self {
        OriginLedger::default()
    }

    /// The set that deleted the object, if any
    pub fn deleted(&self, object: &ObjectId) -> Option<&ChangeSetId> {
        self.objects.get(object).and_then(|o| o.deleted.as_ref())
    }

    /// The set that last wrote the attribute, if any
    pub fn attribute(&self, object: &ObjectId, name: &str) -> Option<&ChangeSetId> {
        self.objects.get(object).and_then(|o| o.attributes.get(name))
    }

    /// The last write to (relationship, target), if any
    pub fn relationship(
        &self,
        object: &ObjectId,
        name: &str,
        target: &ObjectId,
    ) -> Option<&RelationshipWrite> {
        self.objects
            .get(object)
            .and_then(|o| o.relationships.get(name))
            .and_then(|targets| targets.get(target))
    }

    /// Stamps of every committed write to the object, attribute and
    /// relationship alike
    pub fn write_stamps<'a>(
        &'a self,
        object: &ObjectId,
    ) -> impl Iterator<Item = &'a ChangeSetId> {
        self.objects.get(object).into_iter().flat_map(|o| {
            o.attributes.values().chain(
                o.relationships.values().flat_map(|targets| targets.values().map(|w| &w.stamp)),
            )
        })
    }

    /// Record the writes one applied record committed, stamped with the
    /// set that carried it
    pub fn note_record(&mut self, record: &ChangeRecord, stamp: &ChangeSetId) {
        let entry = self.objects.entry(record.object_id.clone()).or_default();

        if record.kind == ChangeKind::Delete {
            entry.attributes.clear();
            entry.relationships.clear();
            entry.deleted = Some(stamp.clone());
            return;
        }
        // Edits to a deleted object never reach the graph
        if entry.deleted.is_some() {
            return;
        }

        for name in record.attributes.keys() {
            entry.attributes.insert(name.clone(), stamp.clone());
        }
        for (name, deltas) in &record.relationships {
            let targets = entry.relationships.entry(name.clone()).or_default();
            for delta in deltas {
                targets.insert(
                    delta.target().clone(),
                    RelationshipWrite { stamp: stamp.clone(), is_add: delta.is_add() },
                );
            }
        }
    }

    /// Serialize for local persistence and whole-store transfer
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{AttributeValue, RelationshipDelta};
    use crate::model::{ClientId, SeqNumber};

    fn obj(id: &str) -> ObjectId {
        ObjectId::new(id.to_string())
    }

    fn stamp(client: &str, seq: u64) -> ChangeSetId {
        ChangeSetId { client: ClientId::new(client.to_string()), seq: SeqNumber(seq) }
    }

    fn update(client: &str, attr: &str) -> ChangeRecord {
        let mut attrs = std::collections::BTreeMap::new();
        attrs.insert(attr.to_string(), AttributeValue::Null);
        ChangeRecord::update(
            obj("o1"),
            ClientId::new(client.to_string()),
            attrs,
            Default::default(),
        )
    }

    #[test]
    fn test_latest_write_replaces_earlier() {
        let mut ledger = OriginLedger::new();
        ledger.note_record(&update("a", "title"), &stamp("a", 1));
        ledger.note_record(&update("b", "title"), &stamp("b", 4));

        assert_eq!(ledger.attribute(&obj("o1"), "title"), Some(&stamp("b", 4)));
        assert_eq!(ledger.attribute(&obj("o1"), "other"), None);
    }

    #[test]
    fn test_delete_clears_writes_and_is_final() {
        let mut ledger = OriginLedger::new();
        ledger.note_record(&update("a", "title"), &stamp("a", 1));
        ledger.note_record(
            &ChangeRecord::delete(obj("o1"), ClientId::new("b".to_string())),
            &stamp("b", 2),
        );

        assert_eq!(ledger.attribute(&obj("o1"), "title"), None);
        assert_eq!(ledger.deleted(&obj("o1")), Some(&stamp("b", 2)));

        // Notes after the delete are dropped, like edits to a tombstone
        ledger.note_record(&update("c", "title"), &stamp("c", 1));
        assert_eq!(ledger.attribute(&obj("o1"), "title"), None);
    }

    #[test]
    fn test_relationship_writes_tracked_per_target() {
        let mut ledger = OriginLedger::new();
        let mut rels = std::collections::BTreeMap::new();
        rels.insert("tags".to_string(), vec![RelationshipDelta::Add(obj("t1"))]);
        let record = ChangeRecord::update(
            obj("o1"),
            ClientId::new("a".to_string()),
            Default::default(),
            rels,
        );
        ledger.note_record(&record, &stamp("a", 3));

        let write = ledger.relationship(&obj("o1"), "tags", &obj("t1")).unwrap();
        assert!(write.is_add);
        assert_eq!(write.stamp, stamp("a", 3));
        assert!(ledger.relationship(&obj("o1"), "tags", &obj("t2")).is_none());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut ledger = OriginLedger::new();
        ledger.note_record(&update("a", "title"), &stamp("a", 1));
        let back = OriginLedger::from_bytes(&ledger.to_bytes().unwrap()).unwrap();
        assert_eq!(back.attribute(&obj("o1"), "title"), Some(&stamp("a", 1)));
    }
}
