/*
    tracker - Change Tracker

    Observes committed local mutations and accumulates them into one
    uncommitted batch. Repeated edits to the same (object, attribute)
    coalesce last-write-wins; a delete clears the object's pending deltas.
    seal() assigns the next sequence number and persists the set through
    the ChangeSetStore; a persist failure rolls the counter back and keeps
    the batch, so the client's own stream never skips a number.
*/

use crate::changeset::{
    AppliedMarks, AttributeValue, ChangeRecord, ChangeSet, ChangeSetStore, RelationshipDelta,
};
use crate::errors::SyncResult;
use crate::model::{ClientId, ObjectId};
use std::collections::BTreeMap;
use tracing::debug;

/// Pending edits for one object within the current batch
#[derive(Debug, Clone, Default)]
struct PendingObject {
    inserted: bool,
    deleted: bool,
    attributes: BTreeMap<String, AttributeValue>,
    relationships: BTreeMap<String, Vec<RelationshipDelta>>,
}

/// Accumulates local mutations and seals them into change sets
pub struct ChangeTracker {
    client: ClientId,
    pending: BTreeMap<ObjectId, PendingObject>,
}

impl ChangeTracker {
    pub fn new(client: ClientId) -> Self {
        ChangeTracker { client, pending: BTreeMap::new() }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// True if the current batch carries no edits
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record an object insertion with its initial attributes
    pub fn record_insert(&mut self, object: ObjectId, attributes: BTreeMap<String, AttributeValue>) {
        let entry = self.pending.entry(object).or_default();
        entry.inserted = true;
        entry.deleted = false;
        entry.attributes.extend(attributes);
    }

    /// Record an attribute update; later writes to the same attribute in
    /// this batch replace earlier ones
    pub fn record_update(&mut self, object: ObjectId, attribute: String, value: AttributeValue) {
        let entry = self.pending.entry(object).or_default();
        if entry.deleted {
            return;
        }
        entry.attributes.insert(attribute, value);
    }

    /// Record a relationship edit; an add and a remove of the same target
    /// within one batch collapse to the last one recorded
    pub fn record_relationship(&mut self, object: ObjectId, relationship: String, delta: RelationshipDelta) {
        let entry = self.pending.entry(object).or_default();
        if entry.deleted {
            return;
        }
        let deltas = entry.relationships.entry(relationship).or_default();
        deltas.retain(|d| d.target() != delta.target());
        deltas.push(delta);
    }

    /// Record an object deletion, discarding its pending deltas
    pub fn record_delete(&mut self, object: ObjectId) {
        let entry = self.pending.entry(object).or_default();
        entry.deleted = true;
        entry.inserted = false;
        entry.attributes.clear();
        entry.relationships.clear();
    }

    /// Pending edits touching the given object's attribute, if any
    pub fn pending_attribute(&self, object: &ObjectId, attribute: &str) -> Option<&AttributeValue> {
        self.pending.get(object).and_then(|p| p.attributes.get(attribute))
    }

    /// True if the object has a pending delete in this batch
    pub fn pending_delete(&self, object: &ObjectId) -> bool {
        self.pending.get(object).map(|p| p.deleted).unwrap_or(false)
    }

    /// All pending attribute edits for an object
    pub fn pending_attributes(
        &self,
        object: &ObjectId,
    ) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.pending.get(object).into_iter().flat_map(|p| p.attributes.iter())
    }

    /// All pending relationship deltas for an object
    pub fn pending_relationships(
        &self,
        object: &ObjectId,
    ) -> impl Iterator<Item = (&String, &Vec<RelationshipDelta>)> {
        self.pending.get(object).into_iter().flat_map(|p| p.relationships.iter())
    }

    /// Pending relationship deltas for (object, relationship)
    pub fn pending_relationship(&self, object: &ObjectId, relationship: &str) -> &[RelationshipDelta] {
        self.pending
            .get(object)
            .and_then(|p| p.relationships.get(relationship))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Drop a pending attribute edit (its remote counterpart won conflict
    /// resolution)
    pub fn discard_attribute(&mut self, object: &ObjectId, attribute: &str) {
        if let Some(entry) = self.pending.get_mut(object) {
            entry.attributes.remove(attribute);
        }
    }

    /// Drop every pending edit for an object (it was deleted remotely)
    pub fn discard_object(&mut self, object: &ObjectId) {
        self.pending.remove(object);
    }

    /// Seal the accumulated batch into a change set and store it durably
    ///
    /// The basis is the client's applied marks at seal time; consumers
    /// use it to tell causal overwrites from concurrent edits. Returns
    /// None for an empty batch. On a store failure the tracker state is
    /// left untouched: the batch stays pending and the sequence counter
    /// (owned by the store) does not advance.
    pub fn seal(
        &mut self,
        store: &mut ChangeSetStore,
        basis: &AppliedMarks,
    ) -> SyncResult<Option<ChangeSet>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let records: Vec<ChangeRecord> = self
            .pending
            .iter()
            .filter_map(|(object, p)| {
                if p.deleted {
                    Some(ChangeRecord::delete(object.clone(), self.client.clone()))
                } else if p.inserted {
                    Some(ChangeRecord::insert(object.clone(), self.client.clone(), p.attributes.clone()))
                } else {
                    let rec = ChangeRecord::update(
                        object.clone(),
                        self.client.clone(),
                        p.attributes.clone(),
                        p.relationships.clone(),
                    );
                    if rec.is_noop() {
                        None
                    } else {
                        Some(rec)
                    }
                }
            })
            .collect();

        if records.is_empty() {
            self.pending.clear();
            return Ok(None);
        }

        let seq = store.highest_seq().next();
        let set = ChangeSet::new(self.client.clone(), seq, basis.clone(), records);

        store.append(&set)?;
        self.pending.clear();

        debug!(seq = seq.as_u64(), records = set.len(), "sealed change set");
        Ok(Some(set))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeqNumber;
    use tempfile::TempDir;

    fn client() -> ClientId {
        ClientId::new("c1".to_string())
    }

    fn obj(id: &str) -> ObjectId {
        ObjectId::new(id.to_string())
    }

    fn text(s: &str) -> AttributeValue {
        AttributeValue::Text(s.to_string())
    }

    #[test]
    fn test_coalescing_last_write_wins() {
        let mut tracker = ChangeTracker::new(client());
        tracker.record_update(obj("o1"), "title".to_string(), text("first"));
        tracker.record_update(obj("o1"), "title".to_string(), text("second"));

        assert_eq!(tracker.pending_attribute(&obj("o1"), "title"), Some(&text("second")));
    }

    #[test]
    fn test_delete_clears_pending_edits() {
        let mut tracker = ChangeTracker::new(client());
        tracker.record_update(obj("o1"), "title".to_string(), text("x"));
        tracker.record_delete(obj("o1"));
        // Updates after a delete in the same batch are dropped
        tracker.record_update(obj("o1"), "title".to_string(), text("y"));

        assert!(tracker.pending_delete(&obj("o1")));
        assert_eq!(tracker.pending_attribute(&obj("o1"), "title"), None);
    }

    #[test]
    fn test_relationship_add_then_remove_collapses() {
        let mut tracker = ChangeTracker::new(client());
        tracker.record_relationship(
            obj("o1"),
            "tags".to_string(),
            RelationshipDelta::Add(obj("t1")),
        );
        tracker.record_relationship(
            obj("o1"),
            "tags".to_string(),
            RelationshipDelta::Remove(obj("t1")),
        );

        let deltas = tracker.pending_relationship(&obj("o1"), "tags");
        assert_eq!(deltas, &[RelationshipDelta::Remove(obj("t1"))]);
    }

    #[test]
    fn test_seal_assigns_next_seq_and_clears() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();
        let mut tracker = ChangeTracker::new(client());

        tracker.record_insert(obj("o1"), BTreeMap::new());
        let set = tracker.seal(&mut store, &AppliedMarks::new()).unwrap().unwrap();
        assert_eq!(set.seq, SeqNumber(1));
        assert!(tracker.is_empty());

        tracker.record_delete(obj("o1"));
        let set = tracker.seal(&mut store, &AppliedMarks::new()).unwrap().unwrap();
        assert_eq!(set.seq, SeqNumber(2));
    }

    #[test]
    fn test_seal_empty_batch_is_none() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();
        let mut tracker = ChangeTracker::new(client());
        assert!(tracker.seal(&mut store, &AppliedMarks::new()).unwrap().is_none());
        assert_eq!(store.highest_seq(), SeqNumber::ZERO);
    }

    #[test]
    fn test_seal_failure_keeps_batch() {
        let dir = TempDir::new().unwrap();
        // Store belongs to a different client, so append always fails
        let mut store = ChangeSetStore::open(dir.path(), ClientId::new("other".to_string())).unwrap();
        let mut tracker = ChangeTracker::new(client());
        tracker.record_insert(obj("o1"), BTreeMap::new());

        assert!(tracker.seal(&mut store, &AppliedMarks::new()).is_err());
        // Counter unadvanced, batch still pending
        assert_eq!(store.highest_seq(), SeqNumber::ZERO);
        assert!(!tracker.is_empty());
    }

    #[test]
    fn test_discard_attribute_for_lost_conflict() {
        let mut tracker = ChangeTracker::new(client());
        tracker.record_update(obj("o1"), "title".to_string(), text("mine"));
        tracker.record_update(obj("o1"), "body".to_string(), text("kept"));
        tracker.discard_attribute(&obj("o1"), "title");

        assert_eq!(tracker.pending_attribute(&obj("o1"), "title"), None);
        assert_eq!(tracker.pending_attribute(&obj("o1"), "body"), Some(&text("kept")));
    }
}
