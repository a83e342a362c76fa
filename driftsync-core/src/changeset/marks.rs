/*
    marks.rs - Applied-set high-water marks

    Tracks, per peer, the highest sequence number this client has fully
    applied. Marks are strictly non-decreasing; a regression attempt is an
    error, and re-applying an already-marked set is a no-op upstream.
*/

use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, SeqNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-peer high-water marks of applied change sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMarks {
    marks: BTreeMap<ClientId, SeqNumber>,
}

impl AppliedMarks {
    pub fn new() -> Self {
        AppliedMarks { marks: BTreeMap::new() }
    }

    /// Highest applied sequence number for a peer (zero if never seen)
    pub fn get(&self, peer: &ClientId) -> SeqNumber {
        self.marks.get(peer).copied().unwrap_or(SeqNumber::ZERO)
    }

    /// The next sequence number expected from a peer
    pub fn next_expected(&self, peer: &ClientId) -> SeqNumber {
        self.get(peer).next()
    }

    /// True if the given set has already been applied
    pub fn contains(&self, peer: &ClientId, seq: SeqNumber) -> bool {
        seq <= self.get(peer)
    }

    /// Advance a peer's mark; regressions are rejected
    pub fn advance(&mut self, peer: ClientId, seq: SeqNumber) -> SyncResult<()> {
        let current = self.get(&peer);
        if seq < current {
            return Err(SyncError::MarkRegression { peer, current, attempted: seq });
        }
        self.marks.insert(peer, seq);
        Ok(())
    }

    /// Peers with at least one applied set
    pub fn peers(&self) -> impl Iterator<Item = &ClientId> {
        self.marks.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Serialize for publication on the medium
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

    fn peer(id: &str) -> ClientId {
        ClientId::new(id.to_string())
    }

    #[test]
    fn test_unknown_peer_is_zero() {
        let marks = AppliedMarks::new();
        assert_eq!(marks.get(&peer("a")), SeqNumber::ZERO);
        assert_eq!(marks.next_expected(&peer("a")), SeqNumber(1));
    }

    #[test]
    fn test_advance_and_contains() {
        let mut marks = AppliedMarks::new();
        marks.advance(peer("a"), SeqNumber(3)).unwrap();
        assert!(marks.contains(&peer("a"), SeqNumber(2)));
        assert!(marks.contains(&peer("a"), SeqNumber(3)));
        assert!(!marks.contains(&peer("a"), SeqNumber(4)));
    }

    #[test]
    fn test_regression_rejected() {
        let mut marks = AppliedMarks::new();
        marks.advance(peer("a"), SeqNumber(5)).unwrap();
        let err = marks.advance(peer("a"), SeqNumber(4)).unwrap_err();
        assert!(matches!(err, SyncError::MarkRegression { .. }));
        assert_eq!(marks.get(&peer("a")), SeqNumber(5));
    }

    #[test]
    fn test_same_mark_is_ok() {
        let mut marks = AppliedMarks::new();
        marks.advance(peer("a"), SeqNumber(5)).unwrap();
        marks.advance(peer("a"), SeqNumber(5)).unwrap();
        assert_eq!(marks.get(&peer("a")), SeqNumber(5));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut marks = AppliedMarks::new();
        marks.advance(peer("a"), SeqNumber(1)).unwrap();
        marks.advance(peer("b"), SeqNumber(7)).unwrap();
        let back = AppliedMarks::from_bytes(&marks.to_bytes().unwrap()).unwrap();
        assert_eq!(marks, back);
    }
}
