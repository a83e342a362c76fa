/*
    set.rs - Change sets

    A ChangeSet is one client's ordered batch of change records, identified
    by (producing client, per-client sequence number). Sets are immutable
    once sealed and are the unit of exchange on the shared medium.
*/

use super::marks::AppliedMarks;
use super::record::ChangeRecord;
use crate::model::{ClientId, SeqNumber, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a change set: (producing client, sequence number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeSetId {
    pub client: ClientId,
    pub seq: SeqNumber,
}

impl fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.client, self.seq)
    }
}

/// One client's sealed batch of edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// The client that produced this set
    pub client: ClientId,

    /// Per-client monotonically increasing sequence number
    pub seq: SeqNumber,

    /// When the set was sealed
    pub created_at: Timestamp,

    /// The producer's applied marks at seal time
    ///
    /// A committed write covered by this basis had been applied by the
    /// producer before it made these edits; an uncovered one is
    /// concurrent with them.
    pub basis: AppliedMarks,

    /// Records in commit order
    pub records: Vec<ChangeRecord>,
}

impl ChangeSet {
    pub fn new(
        client: ClientId,
        seq: SeqNumber,
        basis: AppliedMarks,
        records: Vec<ChangeRecord>,
    ) -> Self {
        ChangeSet { client, seq, created_at: Timestamp::now(), basis, records }
    }

    pub fn id(&self) -> ChangeSetId {
        ChangeSetId { client: self.client.clone(), seq: self.seq }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
