/*
    conflict - Deterministic conflict resolution

    Reconciles one local edit against one remote edit touching the same
    object. The outcome is a pure function of the two edits and the policy:
    wall-clock arrival order never participates, only edit contents and the
    producing client ids (lexicographic comparison as the stable tiebreak).

    Policy, applied in order:
    1. Delete beats update, from either side.
    2. Two writes to the same scalar attribute: the lexicographically
       larger client id wins.
    3. Disjoint attributes of the same object: both apply.
    4. Relationship add vs remove of the same target: insertion wins
       unless the remove comes from the same-or-higher-priority side.
*/

use crate::changeset::{AttributeValue, ChangeKind, ChangeRecord, RelationshipDelta};
use crate::model::{ClientId, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tie-break rule for concurrent relationship add/remove of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipBias {
    /// The add survives unless the remove side has same-or-higher priority
    InsertionWins,

    /// A concurrent remove always prevails
    RemovalWins,
}

/// Resolution policy; a policy choice, not a hidden invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    pub relationship_bias: RelationshipBias,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy { relationship_bias: RelationshipBias::InsertionWins }
    }
}

/// One detected collision between a local and a remote edit
///
/// Transient: exists only for the duration of one apply pass.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub object_id: ObjectId,
    pub local: ChangeRecord,
    pub remote: ChangeRecord,
}

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply this merged record to the object store
    Apply(ChangeRecord),

    /// Nothing to apply (both sides agreed, or the winner is already local)
    Noop,
}

/// True if `a` has priority over `b`
fn has_priority(a: &ClientId, b: &ClientId) -> bool {
    a.as_str() > b.as_str()
}

/// Decide a contest between one incoming scalar write and the concurrent
/// committed write it races with
pub fn incoming_write_wins(incoming: &ClientId, committed: &ClientId) -> bool {
    has_priority(incoming, committed)
}

/// True if a remove prevails over a concurrent add of the same target
pub fn remove_prevails(add: &ClientId, remove: &ClientId, bias: RelationshipBias) -> bool {
    match bias {
        RelationshipBias::InsertionWins => !has_priority(add, remove),
        RelationshipBias::RemovalWins => true,
    }
}

/// Resolve a conflict between a local and a remote edit to the same object
///
/// Returns the record to apply on top of the already-committed local state,
/// plus the set of local attribute edits that lost and must be discarded
/// from the pending batch.
pub fn resolve(conflict: &SyncConflict, policy: ConflictPolicy) -> ResolvedConflict {
    let local = &conflict.local;
    let remote = &conflict.remote;

    // Rule 1: delete beats update
    if remote.kind == ChangeKind::Delete {
        return ResolvedConflict {
            resolution: Resolution::Apply(ChangeRecord::delete(
                conflict.object_id.clone(),
                remote.origin.clone(),
            )),
            discard_local_object: true,
            discarded_attributes: Vec::new(),
            contested: 1,
        };
    }
    if local.kind == ChangeKind::Delete {
        // Local delete stands; the remote update is discarded
        return ResolvedConflict {
            resolution: Resolution::Noop,
            discard_local_object: false,
            discarded_attributes: Vec::new(),
            contested: 1,
        };
    }

    let remote_wins_scalars = has_priority(&remote.origin, &local.origin);
    let mut contested = 0;

    // Rules 2 and 3: merge attributes, remote applies where it wins or
    // where the local side has no competing edit
    let mut attributes: BTreeMap<String, AttributeValue> = BTreeMap::new();
    let mut discarded = Vec::new();
    for (name, value) in &remote.attributes {
        match local.attributes.get(name) {
            None => {
                attributes.insert(name.clone(), value.clone());
            }
            Some(_) if remote_wins_scalars => {
                contested += 1;
                attributes.insert(name.clone(), value.clone());
                discarded.push(name.clone());
            }
            Some(_) => {
                // local edit wins, remote value discarded
                contested += 1;
            }
        }
    }

    // Rule 4: relationships
    let mut relationships: BTreeMap<String, Vec<RelationshipDelta>> = BTreeMap::new();
    for (name, remote_deltas) in &remote.relationships {
        let local_deltas = local.relationships.get(name).map(|v| v.as_slice()).unwrap_or(&[]);
        let mut kept = Vec::new();
        for delta in remote_deltas {
            let opposing = local_deltas.iter().find(|d| {
                d.target() == delta.target() && d.is_add() != delta.is_add()
            });
            match opposing {
                None => kept.push(delta.clone()),
                Some(_) => {
                    contested += 1;
                    let (add_origin, remove_origin) = if delta.is_add() {
                        (&remote.origin, &local.origin)
                    } else {
                        (&local.origin, &remote.origin)
                    };
                    let removed = remove_prevails(
                        add_origin,
                        remove_origin,
                        policy.relationship_bias,
                    );
                    let remote_prevails = delta.is_add() != removed;
                    if remote_prevails {
                        kept.push(delta.clone());
                    }
                }
            }
        }
        if !kept.is_empty() {
            relationships.insert(name.clone(), kept);
        }
    }

    let merged = ChangeRecord::update(
        conflict.object_id.clone(),
        remote.origin.clone(),
        attributes,
        relationships,
    );

    ResolvedConflict {
        resolution: if merged.is_noop() { Resolution::Noop } else { Resolution::Apply(merged) },
        discard_local_object: false,
        discarded_attributes: discarded,
        contested,
    }
}

/// Full outcome of one resolution, including pending-batch cleanup
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    /// What to apply to the object store
    pub resolution: Resolution,

    /// The whole local pending object lost (remote delete won)
    pub discard_local_object: bool,

    /// Local pending attribute edits that lost and must be dropped
    pub discarded_attributes: Vec<String>,

    /// Number of genuinely contested writes (a disjoint merge counts zero)
    pub contested: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> ObjectId {
        ObjectId::new("o1".to_string())
    }

    fn cid(s: &str) -> ClientId {
        ClientId::new(s.to_string())
    }

    fn update(origin: &str, attr: &str, value: &str) -> ChangeRecord {
        let mut attrs = BTreeMap::new();
        attrs.insert(attr.to_string(), AttributeValue::Text(value.to_string()));
        ChangeRecord::update(obj(), cid(origin), attrs, BTreeMap::new())
    }

    fn rel_update(origin: &str, rel: &str, delta: RelationshipDelta) -> ChangeRecord {
        let mut rels = BTreeMap::new();
        rels.insert(rel.to_string(), vec![delta]);
        ChangeRecord::update(obj(), cid(origin), BTreeMap::new(), rels)
    }

    #[test]
    fn test_remote_delete_beats_local_update() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: update("aaa", "title", "mine"),
            remote: ChangeRecord::delete(obj(), cid("bbb")),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        assert!(resolved.discard_local_object);
        assert_eq!(resolved.contested, 1);
        match resolved.resolution {
            Resolution::Apply(rec) => assert_eq!(rec.kind, ChangeKind::Delete),
            _ => panic!("expected delete to apply"),
        }
    }

    #[test]
    fn test_local_delete_beats_remote_update() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: ChangeRecord::delete(obj(), cid("aaa")),
            remote: update("bbb", "title", "theirs"),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        assert_eq!(resolved.resolution, Resolution::Noop);
        assert!(!resolved.discard_local_object);
    }

    #[test]
    fn test_larger_client_id_wins_scalar() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: update("aaa", "title", "mine"),
            remote: update("bbb", "title", "theirs"),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        match resolved.resolution {
            Resolution::Apply(rec) => {
                assert_eq!(
                    rec.attributes.get("title"),
                    Some(&AttributeValue::Text("theirs".to_string()))
                );
            }
            _ => panic!("remote should win"),
        }
        assert_eq!(resolved.discarded_attributes, vec!["title".to_string()]);
        assert_eq!(resolved.contested, 1);
    }

    #[test]
    fn test_smaller_client_id_loses_scalar() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: update("bbb", "title", "mine"),
            remote: update("aaa", "title", "theirs"),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        assert_eq!(resolved.resolution, Resolution::Noop);
        assert!(resolved.discarded_attributes.is_empty());
        assert_eq!(resolved.contested, 1);
    }

    #[test]
    fn test_disjoint_attributes_both_apply() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: update("bbb", "title", "mine"),
            remote: update("aaa", "body", "theirs"),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        match resolved.resolution {
            Resolution::Apply(rec) => {
                assert!(rec.attributes.contains_key("body"));
                assert!(!rec.attributes.contains_key("title"));
            }
            _ => panic!("disjoint remote edit should apply"),
        }
        assert_eq!(resolved.contested, 0);
    }

    #[test]
    fn test_insertion_wins_relationship_default() {
        // Remote adds, local removes; local has the larger id, so under
        // insertion-wins the remove only prevails because of priority
        let target = ObjectId::new("t1".to_string());
        let conflict = SyncConflict {
            object_id: obj(),
            local: rel_update("bbb", "tags", RelationshipDelta::Remove(target.clone())),
            remote: rel_update("aaa", "tags", RelationshipDelta::Add(target.clone())),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        // remover "bbb" > adder "aaa": remove prevails, remote add dropped
        assert_eq!(resolved.resolution, Resolution::Noop);
        assert_eq!(resolved.contested, 1);

        // Adder has the larger id: the add survives
        let conflict = SyncConflict {
            object_id: obj(),
            local: rel_update("aaa", "tags", RelationshipDelta::Remove(target.clone())),
            remote: rel_update("bbb", "tags", RelationshipDelta::Add(target.clone())),
        };
        let resolved = resolve(&conflict, ConflictPolicy::default());
        match resolved.resolution {
            Resolution::Apply(rec) => {
                assert_eq!(rec.relationships["tags"], vec![RelationshipDelta::Add(target)]);
            }
            _ => panic!("add should survive"),
        }
    }

    #[test]
    fn test_removal_wins_bias() {
        // Under the removal bias the remove prevails even against a
        // higher-priority adder
        let target = ObjectId::new("t1".to_string());
        let policy = ConflictPolicy { relationship_bias: RelationshipBias::RemovalWins };
        let conflict = SyncConflict {
            object_id: obj(),
            local: rel_update("aaa", "tags", RelationshipDelta::Remove(target.clone())),
            remote: rel_update("bbb", "tags", RelationshipDelta::Add(target)),
        };
        let resolved = resolve(&conflict, policy);
        assert_eq!(resolved.resolution, Resolution::Noop);
    }

    #[test]
    fn test_determinism_independent_of_repetition() {
        let conflict = SyncConflict {
            object_id: obj(),
            local: update("aaa", "title", "mine"),
            remote: update("bbb", "title", "theirs"),
        };
        let first = resolve(&conflict, ConflictPolicy::default());
        for _ in 0..10 {
            let again = resolve(&conflict, ConflictPolicy::default());
            assert_eq!(first.resolution, again.resolution);
        }
    }

    /// The surviving value for one contested scalar, seen from the side
    /// whose pending edit is `local`
    fn surviving_value(local: &ChangeRecord, resolved: &ResolvedConflict) -> AttributeValue {
        match &resolved.resolution {
            Resolution::Apply(rec) => rec.attributes["title"].clone(),
            Resolution::Noop => local.attributes["title"].clone(),
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Both clients must converge on the same value no matter which
            // side of the conflict they see themselves on
            #[test]
            fn prop_scalar_winner_is_orientation_independent(
                a in "[a-z]{1,8}",
                b in "[a-z]{1,8}",
                va in "[a-z0-9 ]{0,12}",
                vb in "[a-z0-9 ]{0,12}",
            ) {
                prop_assume!(a != b);

                let seen_by_a = resolve(
                    &SyncConflict {
                        object_id: obj(),
                        local: update(&a, "title", &va),
                        remote: update(&b, "title", &vb),
                    },
                    ConflictPolicy::default(),
                );
                let seen_by_b = resolve(
                    &SyncConflict {
                        object_id: obj(),
                        local: update(&b, "title", &vb),
                        remote: update(&a, "title", &va),
                    },
                    ConflictPolicy::default(),
                );

                let winner_at_a = surviving_value(&update(&a, "title", &va), &seen_by_a);
                let winner_at_b = surviving_value(&update(&b, "title", &vb), &seen_by_b);
                prop_assert_eq!(&winner_at_a, &winner_at_b);

                let expected = if a > b { va } else { vb };
                prop_assert_eq!(winner_at_a, AttributeValue::Text(expected));
            }
        }
    }
}
