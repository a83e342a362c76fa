/*
    store.rs - Durable local store of sealed change sets

    Per-document append-only directory of the local client's sealed sets,
    one file per set named <seq>.changeset. Writes go to a temporary name
    first and are committed by atomic rename, so a crash never leaves a
    half-written set at its final name. Set N+1 is never stored before set
    N exists.
*/

use super::codec::{decode_changeset, encode_changeset};
use super::set::ChangeSet;
use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, SeqNumber};
use std::fs;
use std::path::{Path, PathBuf};

/// Filename for a sealed set
fn changeset_filename(seq: SeqNumber) -> String {
    format!("{}.changeset", seq.as_u64())
}

/// Parse a sequence number out of a changeset filename
pub fn parse_changeset_filename(name: &str) -> Option<SeqNumber> {
    let stem = name.strip_suffix(".changeset")?;
    stem.parse::<u64>().ok().map(SeqNumber)
}

/// Append-only store of this client's sealed change sets for one document
pub struct ChangeSetStore {
    dir: PathBuf,
    client: ClientId,
    highest: SeqNumber,
}

impl ChangeSetStore {
    /// Open (or create) the store, recovering the highest stored sequence
    /// number by scanning the directory
    pub fn open(dir: impl Into<PathBuf>, client: ClientId) -> SyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut highest = SeqNumber::ZERO;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(seq) = entry.file_name().to_str().and_then(parse_changeset_filename) {
                highest = highest.max(seq);
            }
        }

        Ok(ChangeSetStore { dir, client, highest })
    }

    /// Highest sequence number durably stored (zero if none)
    pub fn highest_seq(&self) -> SeqNumber {
        self.highest
    }

    /// Durably store a sealed set
    ///
    /// The set must carry exactly the next sequence number; anything else
    /// would open a gap in this client's own stream.
    pub fn append(&mut self, set: &ChangeSet) -> SyncResult<()> {
        if set.client != self.client {
            return Err(SyncError::InvalidState(format!(
                "set {} does not belong to client {}",
                set.id(),
                self.client
            )));
        }
        if set.seq != self.highest.next() {
            return Err(SyncError::SequenceGap {
                client: self.client.clone(),
                expected: self.highest.next(),
                found: set.seq,
            });
        }

        let frame = encode_changeset(set)?;
        let final_path = self.dir.join(changeset_filename(set.seq));
        let temp_path = self.dir.join(format!("{}.tmp", set.seq.as_u64()));

        fs::write(&temp_path, &frame)?;
        fs::rename(&temp_path, &final_path)?;

        self.highest = set.seq;
        Ok(())
    }

    /// Load a stored set by sequence number
    pub fn load(&self, seq: SeqNumber) -> SyncResult<ChangeSet> {
        let path = self.dir.join(changeset_filename(seq));
        if !path.exists() {
            return Err(SyncError::NotFound(format!("change set {} in {:?}", seq, self.dir)));
        }
        let bytes = fs::read(&path)?;
        decode_changeset(&bytes, &self.client, seq)
    }

    /// All stored sets at or after the given sequence number, in order
    pub fn load_from(&self, from: SeqNumber) -> SyncResult<Vec<ChangeSet>> {
        let mut sets = Vec::new();
        let mut seq = from.max(SeqNumber(1));
        while seq <= self.highest {
            sets.push(self.load(seq)?);
            seq = seq.next();
        }
        Ok(sets)
    }

    /// Remove stored sets at or below the cutoff (after a safe vacuum)
    pub fn discard_through(&mut self, cutoff: SeqNumber) -> SyncResult<usize> {
        let mut removed = 0;
        let mut seq = SeqNumber(1);
        while seq <= cutoff.min(self.highest) {
            let path = self.dir.join(changeset_filename(seq));
            if path.exists() {
                fs::remove_file(&path)?;
                removed += 1;
            }
            seq = seq.next();
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::record::ChangeRecord;
    use crate::model::ObjectId;
    use tempfile::TempDir;

    fn client() -> ClientId {
        ClientId::new("c1".to_string())
    }

    fn set(seq: u64) -> ChangeSet {
        ChangeSet::new(
            client(),
            SeqNumber(seq),
            crate::changeset::AppliedMarks::new(),
            vec![ChangeRecord::delete(ObjectId::new(format!("o{}", seq)), client())],
        )
    }

    #[test]
    fn test_append_and_load() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();

        store.append(&set(1)).unwrap();
        store.append(&set(2)).unwrap();

        assert_eq!(store.highest_seq(), SeqNumber(2));
        assert_eq!(store.load(SeqNumber(1)).unwrap().seq, SeqNumber(1));
        assert_eq!(store.load_from(SeqNumber(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_gap_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();

        store.append(&set(1)).unwrap();
        let err = store.append(&set(3)).unwrap_err();
        assert!(matches!(err, SyncError::SequenceGap { .. }));
        assert_eq!(store.highest_seq(), SeqNumber(1));
    }

    #[test]
    fn test_recovery_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();
            store.append(&set(1)).unwrap();
            store.append(&set(2)).unwrap();
        }
        let store = ChangeSetStore::open(dir.path(), client()).unwrap();
        assert_eq!(store.highest_seq(), SeqNumber(2));
    }

    #[test]
    fn test_foreign_set_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();
        let foreign = ChangeSet::new(
            ClientId::new("other".to_string()),
            SeqNumber(1),
            crate::changeset::AppliedMarks::new(),
            vec![],
        );
        assert!(store.append(&foreign).is_err());
    }

    #[test]
    fn test_discard_through() {
        let dir = TempDir::new().unwrap();
        let mut store = ChangeSetStore::open(dir.path(), client()).unwrap();
        for i in 1..=4 {
            store.append(&set(i)).unwrap();
        }
        let removed = store.discard_through(SeqNumber(2)).unwrap();
        assert_eq!(removed, 2);
        assert!(store.load(SeqNumber(2)).is_err());
        assert!(store.load(SeqNumber(3)).is_ok());
    }

    #[test]
    fn test_filename_parse() {
        assert_eq!(parse_changeset_filename("12.changeset"), Some(SeqNumber(12)));
        assert_eq!(parse_changeset_filename("12.tmp"), None);
        assert_eq!(parse_changeset_filename("abc.changeset"), None);
    }
}
