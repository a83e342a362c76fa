/*
    model - Identifier, time, and registry record types

    Shared vocabulary for the rest of the crate:
    - Client / document / object identifiers
    - Per-client sequence numbers
    - Registration and freshness records
*/

mod device;
mod types;

pub use device::{ClientInfo, DocumentInfo, RecentSync};
pub use types::{ClientId, DocumentId, ObjectId, SeqNumber, Timestamp};
