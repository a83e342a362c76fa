/*
    changeset - Change records, sets, wire codec, marks, and origins

    The exchange currency of the protocol:
    - ChangeRecord: one object's committed edits
    - ChangeSet: one client's sealed, sequence-numbered batch with the
      applied marks it was produced against
    - Frame codec with crc32 integrity
    - AppliedMarks: per-peer high-water marks
    - OriginLedger: which set last wrote each committed attribute/target
    - ChangeSetStore: durable local storage of own sealed sets
*/

pub mod codec;
pub mod marks;
pub mod origins;
pub mod record;
pub mod set;
pub mod store;

pub use codec::{decode_changeset, encode_changeset};
pub use marks::AppliedMarks;
pub use origins::{OriginLedger, RelationshipWrite};
pub use record::{AttributeValue, ChangeKind, ChangeRecord, RelationshipDelta};
pub use set::{ChangeSet, ChangeSetId};
pub use store::{parse_changeset_filename, ChangeSetStore};
