/*
    types.rs - Common identifier and time types

    Defines:
    - IDs for clients, documents, graph objects
    - Per-client sequence numbers
    - Millisecond timestamps
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as u64)
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between this timestamp and a later one
    pub fn age_at(&self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-client monotonically increasing change set number
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SeqNumber(pub u64);

impl SeqNumber {
    pub const ZERO: SeqNumber = SeqNumber(0);

    /// The sequence number immediately after this one
    pub fn next(&self) -> SeqNumber {
        SeqNumber(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a synchronizing client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: String) -> Self {
        ClientId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        ClientId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a synchronized document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: String) -> Self {
        DocumentId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        DocumentId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an object in the synchronized graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(id: String) -> Self {
        ObjectId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        ObjectId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_number_ordering() {
        assert!(SeqNumber(1) < SeqNumber(2));
        assert_eq!(SeqNumber(1).next(), SeqNumber(2));
        assert_eq!(SeqNumber::ZERO.next(), SeqNumber(1));
    }

    #[test]
    fn test_client_id_generate_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_age() {
        let t1 = Timestamp::from_millis(1_000);
        let t2 = Timestamp::from_millis(4_500);
        assert_eq!(t1.age_at(t2), 3_500);
        // Clock skew never yields an underflow
        assert_eq!(t2.age_at(t1), 0);
    }

    #[test]
    fn test_id_display() {
        let id = DocumentId::new("doc-1".to_string());
        assert_eq!(id.to_string(), "doc-1");
    }
}
