/*
    codec.rs - Wire encoding for change sets

    Frame layout: [magic:4][version:2][len:4][body:len][crc32:4]
    The body is the bincode-encoded ChangeSet. Any framing, checksum, or
    body decode failure surfaces as CorruptChangeSet so the apply pass can
    skip and flag the set without aborting the cycle.
*/

use super::set::ChangeSet;
use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, SeqNumber};

/// Identifies a change set frame
const MAGIC: [u8; 4] = *b"DSCS";

/// Current frame format version; 2 added the producer's basis marks
const FORMAT_VERSION: u16 = 2;

/// Encode a change set into its on-medium frame
pub fn encode_changeset(set: &ChangeSet) -> SyncResult<Vec<u8>> {
    let body = bincode::serialize(set)?;
    let checksum = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(4 + 2 + 4 + body.len() + 4);
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&checksum.to_le_bytes());

    Ok(frame)
}

/// Decode a change set frame fetched from the medium
///
/// The expected identity is supplied by the caller (it comes from the file
/// path on the medium); a body that decodes to a different identity is
/// treated as corrupt.
pub fn decode_changeset(
    bytes: &[u8],
    expected_client: &ClientId,
    expected_seq: SeqNumber,
) -> SyncResult<ChangeSet> {
    let corrupt = |reason: &str| SyncError::CorruptChangeSet {
        client: expected_client.clone(),
        seq: expected_seq,
        reason: reason.to_string(),
    };

    if bytes.len() < 4 + 2 + 4 + 4 {
        return Err(corrupt("frame too short"));
    }
    if bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", version)));
    }

    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    if bytes.len() != 4 + 2 + 4 + len + 4 {
        return Err(corrupt("frame length mismatch"));
    }

    let body = &bytes[10..10 + len];
    let stored = u32::from_le_bytes([
        bytes[10 + len],
        bytes[11 + len],
        bytes[12 + len],
        bytes[13 + len],
    ]);
    if crc32fast::hash(body) != stored {
        return Err(corrupt("checksum mismatch"));
    }

    let set: ChangeSet =
        bincode::deserialize(body).map_err(|e| corrupt(&format!("body decode: {}", e)))?;

    if &set.client != expected_client || set.seq != expected_seq {
        return Err(corrupt(&format!("identity mismatch: frame says {}", set.id())));
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::record::ChangeRecord;
    use crate::model::ObjectId;

    fn sample_set() -> ChangeSet {
        let client = ClientId::new("c1".to_string());
        ChangeSet::new(
            client.clone(),
            SeqNumber(2),
            crate::changeset::AppliedMarks::new(),
            vec![ChangeRecord::delete(ObjectId::new("o1".to_string()), client)],
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let set = sample_set();
        let frame = encode_changeset(&set).unwrap();
        let back = decode_changeset(&frame, &set.client, set.seq).unwrap();
        assert_eq!(set, back);
    }

    #[test]
    fn test_corrupt_checksum_detected() {
        let set = sample_set();
        let mut frame = encode_changeset(&set).unwrap();
        let mid = frame.len() / 2;
        frame[mid] ^= 0xff;
        let err = decode_changeset(&frame, &set.client, set.seq).unwrap_err();
        assert!(matches!(err, SyncError::CorruptChangeSet { .. }));
    }

    #[test]
    fn test_truncated_frame_detected() {
        let set = sample_set();
        let frame = encode_changeset(&set).unwrap();
        let err = decode_changeset(&frame[..frame.len() - 3], &set.client, set.seq).unwrap_err();
        assert!(matches!(err, SyncError::CorruptChangeSet { .. }));
    }

    #[test]
    fn test_identity_mismatch_detected() {
        let set = sample_set();
        let frame = encode_changeset(&set).unwrap();
        let err = decode_changeset(&frame, &set.client, SeqNumber(9)).unwrap_err();
        assert!(matches!(err, SyncError::CorruptChangeSet { seq: SeqNumber(9), .. }));
    }

    #[test]
    fn test_bad_magic_detected() {
        let set = sample_set();
        let mut frame = encode_changeset(&set).unwrap();
        frame[0] = b'X';
        let err = decode_changeset(&frame, &set.client, set.seq).unwrap_err();
        assert!(matches!(err, SyncError::CorruptChangeSet { .. }));
    }
}
