/*
    record.rs - Individual change records

    One ChangeRecord captures the committed edits to a single object:
    inserted, updated (attribute and relationship deltas), or deleted.
    Records are immutable once created.
*/

use crate::model::{ClientId, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Edit to a named relationship of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipDelta {
    /// Add a reference to the target object
    Add(ObjectId),

    /// Remove a reference to the target object
    Remove(ObjectId),
}

impl RelationshipDelta {
    /// The object the delta points at
    pub fn target(&self) -> &ObjectId {
        match self {
            RelationshipDelta::Add(id) | RelationshipDelta::Remove(id) => id,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, RelationshipDelta::Add(_))
    }
}

/// Kind of change applied to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed change to one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The object this record targets
    pub object_id: ObjectId,

    /// Insert, update, or delete
    pub kind: ChangeKind,

    /// Attribute name -> new value (empty for deletes)
    pub attributes: BTreeMap<String, AttributeValue>,

    /// Relationship name -> deltas, in edit order (empty for deletes)
    pub relationships: BTreeMap<String, Vec<RelationshipDelta>>,

    /// The client that produced this change
    pub origin: ClientId,
}

impl ChangeRecord {
    /// Record an object insertion with its initial attributes
    pub fn insert(
        object_id: ObjectId,
        origin: ClientId,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Self {
        ChangeRecord {
            object_id,
            kind: ChangeKind::Insert,
            attributes,
            relationships: BTreeMap::new(),
            origin,
        }
    }

    /// Record an attribute/relationship update
    pub fn update(
        object_id: ObjectId,
        origin: ClientId,
        attributes: BTreeMap<String, AttributeValue>,
        relationships: BTreeMap<String, Vec<RelationshipDelta>>,
    ) -> Self {
        ChangeRecord { object_id, kind: ChangeKind::Update, attributes, relationships, origin }
    }

    /// Record an object deletion
    pub fn delete(object_id: ObjectId, origin: ClientId) -> Self {
        ChangeRecord {
            object_id,
            kind: ChangeKind::Delete,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            origin,
        }
    }

    /// True if this record carries no edits (update with empty deltas)
    pub fn is_noop(&self) -> bool {
        self.kind == ChangeKind::Update
            && self.attributes.is_empty()
            && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str) -> ObjectId {
        ObjectId::new(id.to_string())
    }

    #[test]
    fn test_insert_record() {
        let mut attrs = BTreeMap::new();
        attrs.insert("title".to_string(), AttributeValue::Text("hello".to_string()));
        let rec = ChangeRecord::insert(obj("o1"), ClientId::new("c1".to_string()), attrs);
        assert_eq!(rec.kind, ChangeKind::Insert);
        assert!(!rec.is_noop());
    }

    #[test]
    fn test_delete_record_has_no_deltas() {
        let rec = ChangeRecord::delete(obj("o1"), ClientId::new("c1".to_string()));
        assert_eq!(rec.kind, ChangeKind::Delete);
        assert!(rec.attributes.is_empty());
        assert!(rec.relationships.is_empty());
    }

    #[test]
    fn test_noop_update() {
        let rec = ChangeRecord::update(
            obj("o1"),
            ClientId::new("c1".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(rec.is_noop());
    }

    #[test]
    fn test_relationship_delta_target() {
        let add = RelationshipDelta::Add(obj("o2"));
        assert_eq!(add.target(), &obj("o2"));
        assert!(add.is_add());
        assert!(!RelationshipDelta::Remove(obj("o2")).is_add());
    }
}
