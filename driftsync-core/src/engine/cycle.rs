/*
    cycle.rs - The per-document sync cycle

    One cycle moves through Listing, Downloading, Verifying, Applying,
    Resolving and Publishing. Peers are processed in lexicographic id
    order so every client that sees the same remote state applies the
    same sets in the same order.

    Corrupt sets are skipped and the peer flagged for this cycle; a
    sequence gap is fatal for the whole cycle (skipping would silently
    lose edits). Each set applies all-or-nothing: graph and origin
    ledger are snapshotted before a set and restored if any record
    fails mid-set, with tracker discards deferred until the set commits.

    Incoming records contest both the pending local batch and committed
    writes the producer's basis does not cover; a backlog past the
    configured threshold is answered with a whole-store bootstrap when
    a snapshot exists and nothing local is pending.
*/

use super::DocumentSession;
use crate::changeset::{
    decode_changeset, encode_changeset, parse_changeset_filename, ChangeKind, ChangeRecord,
    ChangeSet, ChangeSetId, RelationshipDelta,
};
use crate::config::EngineConfig;
use crate::conflict::{incoming_write_wins, remove_prevails, resolve, Resolution, SyncConflict};
use crate::errors::{SyncError, SyncResult};
use crate::model::{ClientId, ObjectId, SeqNumber};
use crate::registry::Registry;
use crate::remote::{CryptoManager, TransportError};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Phase of a running cycle, for logging and progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Listing,
    Downloading,
    Verifying,
    Applying,
    Resolving,
    Publishing,
    Completed,
}

/// What one sync cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Remote sets fully applied this cycle
    pub applied_sets: usize,

    /// Conflicts that went through the resolver
    pub conflicts_resolved: usize,

    /// Corrupt sets skipped, with their peers flagged for attention
    pub skipped_corrupt: Vec<ChangeSetId>,

    /// The local set sealed and published this cycle, if any
    pub published: Option<ChangeSetId>,

    /// Largest backlog seen across peers before applying
    pub peak_backlog: u64,

    /// The cycle adopted a peer snapshot instead of replaying the backlog
    pub bootstrapped: bool,
}

/// Tracker cleanup owed once a whole set has applied
enum PendingDiscard {
    Object(ObjectId),
    Attribute(ObjectId, String),
}

impl DocumentSession {
    /// Run one full sync cycle against the medium
    pub(crate) async fn run_cycle(
        &mut self,
        crypto: Option<&CryptoManager>,
        registry: &Registry,
        config: &EngineConfig,
    ) -> SyncResult<CycleReport> {
        debug!(document = %self.doc, phase = ?CyclePhase::Listing, "cycle started");

        if self.transport.exists(&self.layout.deleted_document(&self.doc)).await? {
            return Err(SyncError::DocumentDeleted(self.doc.clone()));
        }

        let peers = self.list_peers().await?;
        let mut report = CycleReport::default();

        'replay: loop {
            for peer in &peers {
                debug!(peer = %peer, phase = ?CyclePhase::Downloading, "processing peer");
                let pending = self.pending_sets_for(peer).await?;

                report.peak_backlog = report.peak_backlog.max(pending.len() as u64);
                if pending.len() as u64 > config.backlog_threshold
                    && !report.bootstrapped
                    && self.tracker.is_empty()
                {
                    match self.download_whole_store(crypto).await {
                        Ok(()) => {
                            info!(
                                document = %self.doc,
                                peer = %peer,
                                backlog = pending.len(),
                                threshold = config.backlog_threshold,
                                "backlog too deep; adopted a whole-store snapshot"
                            );
                            // The adopted marks changed every peer's
                            // backlog; restart against the new baseline
                            report.bootstrapped = true;
                            continue 'replay;
                        }
                        Err(SyncError::NotFound(_)) => {
                            warn!(
                                document = %self.doc,
                                peer = %peer,
                                backlog = pending.len(),
                                threshold = config.backlog_threshold,
                                "backlog exceeds threshold but no snapshot exists; replaying"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }

                debug!(peer = %peer, phase = ?CyclePhase::Verifying, "verifying downloads");
                let mut sets = Vec::new();
                for seq in pending {
                    match self.download_set(peer, seq, crypto).await {
                        Ok(set) => sets.push(set),
                        Err(SyncError::CorruptChangeSet { client, seq, reason }) => {
                            warn!(
                                document = %self.doc,
                                peer = %client,
                                seq = %seq,
                                reason,
                                "corrupt change set skipped; peer flagged"
                            );
                            report.skipped_corrupt.push(ChangeSetId { client, seq });
                            // Later sets from this peer would open a gap
                            break;
                        }
                        Err(err) => return Err(err),
                    }
                }

                debug!(peer = %peer, phase = ?CyclePhase::Applying, sets = sets.len(), "applying sets");
                for set in sets {
                    let conflicts = self.apply_set(&set).await?;
                    report.conflicts_resolved += conflicts;
                    report.applied_sets += 1;
                    self.marks.advance(set.client.clone(), set.seq)?;
                    self.save_marks()?;
                }
            }
            break;
        }

        debug!(document = %self.doc, phase = ?CyclePhase::Publishing, "publishing local changes");

        if let Some(set) = self.tracker.seal(&mut self.store, &self.marks)? {
            // Our own sealed writes are committed too; remote concurrent
            // edits must contest them like any other
            let stamp = set.id();
            for record in &set.records {
                self.origins.note_record(record, &stamp);
            }
            self.save_origins()?;
            report.published = Some(stamp);
        }

        // Upload every sealed set the medium does not have yet; an earlier
        // cycle may have sealed one and failed before its upload
        let own_lane = self.layout.client_sync_changes_dir(&self.doc, &self.client);
        let remote_highest = self
            .transport
            .list(&own_lane)
            .await?
            .iter()
            .filter_map(|name| parse_changeset_filename(name))
            .max()
            .unwrap_or(SeqNumber::ZERO);
        for set in self.store.load_from(remote_highest.next())? {
            self.publish_set(&set, crypto).await?;
        }

        // Marks and freshness go out every cycle so peers can gate vacuum
        self.publish_marks(crypto).await?;
        registry.touch_recent_sync(&self.doc, &self.client).await?;

        info!(
            document = %self.doc,
            applied = report.applied_sets,
            conflicts = report.conflicts_resolved,
            skipped = report.skipped_corrupt.len(),
            published = report.published.as_ref().map(|id| id.to_string()),
            phase = ?CyclePhase::Completed,
            "cycle completed"
        );
        Ok(report)
    }

    /// Peer client ids with a sync-changes lane, in deterministic order
    pub(crate) async fn list_peers(&self) -> SyncResult<Vec<ClientId>> {
        let mut names = self.transport.list(&self.layout.sync_changes_dir(&self.doc)).await?;
        names.sort();
        Ok(names
            .into_iter()
            .map(ClientId::new)
            .filter(|id| *id != self.client)
            .collect())
    }

    /// Sequence numbers of the peer's sets past our mark, gap-checked
    async fn pending_sets_for(&self, peer: &ClientId) -> SyncResult<Vec<SeqNumber>> {
        let dir = self.layout.client_sync_changes_dir(&self.doc, peer);
        let names = self.transport.list(&dir).await?;

        let mark = self.marks.get(peer);
        let mut seqs: Vec<SeqNumber> = names
            .iter()
            .filter_map(|name| parse_changeset_filename(name))
            .filter(|seq| *seq > mark)
            .collect();
        seqs.sort();

        // Anything beyond our mark must start at the next expected number
        // and be contiguous; a hole means lost edits, never skip it
        let mut expected = self.marks.next_expected(peer);
        for seq in &seqs {
            if *seq != expected {
                return Err(SyncError::SequenceGap {
                    client: peer.clone(),
                    expected,
                    found: *seq,
                });
            }
            expected = expected.next();
        }
        Ok(seqs)
    }

    /// Fetch and verify one peer set
    async fn download_set(
        &self,
        peer: &ClientId,
        seq: SeqNumber,
        crypto: Option<&CryptoManager>,
    ) -> SyncResult<ChangeSet> {
        let path = self.layout.changeset(&self.doc, peer, seq);
        let bytes = self.transport.read(&path).await.map_err(|e| match e {
            // A listed set that vanished before the read is a gap, not
            // an absence we can ignore
            TransportError::NotFound(_) => SyncError::SequenceGap {
                client: peer.clone(),
                expected: seq,
                found: SeqNumber::ZERO,
            },
            other => other.into(),
        })?;

        let bytes = match self.open_payload(bytes, crypto) {
            Ok(bytes) => bytes,
            Err(SyncError::Encryption(reason)) => {
                return Err(SyncError::CorruptChangeSet { client: peer.clone(), seq, reason })
            }
            Err(err) => return Err(err),
        };
        decode_changeset(&bytes, peer, seq)
    }

    /// Apply one remote set all-or-nothing, resolving collisions against
    /// the pending local batch and against committed concurrent writes;
    /// returns the number of contested writes resolved
    async fn apply_set(&mut self, set: &ChangeSet) -> SyncResult<usize> {
        if self.marks.contains(&set.client, set.seq) {
            debug!(set = %set.id(), "set already applied, skipping");
            return Ok(0);
        }

        let snapshot = self.graph.current_graph_snapshot().await?;
        let origins_before = self.origins.clone();
        match self.apply_records(set).await {
            Ok((contested, discards)) => {
                // Tracker cleanup only lands once the whole set committed
                for discard in discards {
                    match discard {
                        PendingDiscard::Object(object) => self.tracker.discard_object(&object),
                        PendingDiscard::Attribute(object, attribute) => {
                            self.tracker.discard_attribute(&object, &attribute)
                        }
                    }
                }
                self.save_origins()?;
                Ok(contested)
            }
            Err(err) => {
                // Mid-set failure: no partial application may survive
                self.graph.load_snapshot(&snapshot).await?;
                self.origins = origins_before;
                Err(err)
            }
        }
    }

    async fn apply_records(
        &mut self,
        set: &ChangeSet,
    ) -> SyncResult<(usize, Vec<PendingDiscard>)> {
        let stamp = set.id();
        let mut contested = 0;
        let mut discards = Vec::new();
        for record in &set.records {
            let local = self.pending_record_for(&record.object_id);
            match local {
                None => {
                    let (filtered, fought) = self.filter_against_committed(record, set);
                    contested += fought;
                    if let Some(filtered) = filtered {
                        self.graph.apply_record(&filtered).await?;
                        self.origins.note_record(&filtered, &stamp);
                    }
                }
                Some(local) => {
                    debug!(
                        object = %record.object_id,
                        phase = ?CyclePhase::Resolving,
                        "collision with pending local batch"
                    );
                    let resolved = resolve(
                        &SyncConflict {
                            object_id: record.object_id.clone(),
                            local,
                            remote: record.clone(),
                        },
                        self.policy,
                    );
                    contested += resolved.contested;

                    if resolved.discard_local_object {
                        discards.push(PendingDiscard::Object(record.object_id.clone()));
                    }
                    for attribute in &resolved.discarded_attributes {
                        discards.push(PendingDiscard::Attribute(
                            record.object_id.clone(),
                            attribute.clone(),
                        ));
                    }
                    if let Resolution::Apply(merged) = resolved.resolution {
                        self.graph.apply_record(&merged).await?;
                        self.origins.note_record(&merged, &stamp);
                    }
                }
            }
        }
        Ok((contested, discards))
    }

    /// Filter an incoming record against the committed-write ledger
    ///
    /// A committed write the incoming set's basis covers (or that the
    /// same client made) happened before the producer edited, so the
    /// incoming write overwrites it outright. An uncovered write is
    /// concurrent and the contest is decided exactly as the pending-batch
    /// resolver decides it: delete beats update, the larger client id
    /// wins a scalar, relationship removes prevail per the policy bias.
    fn filter_against_committed(
        &self,
        record: &ChangeRecord,
        set: &ChangeSet,
    ) -> (Option<ChangeRecord>, usize) {
        let covered = |stamp: &ChangeSetId| {
            stamp.client == set.client || set.basis.contains(&stamp.client, stamp.seq)
        };

        if let Some(stamp) = self.origins.deleted(&record.object_id) {
            // A committed delete is final; edits made without having seen
            // it lose the delete-beats-update contest
            let fought = record.kind != ChangeKind::Delete && !covered(stamp);
            return (None, usize::from(fought));
        }

        if record.kind == ChangeKind::Delete {
            let fought =
                self.origins.write_stamps(&record.object_id).any(|stamp| !covered(stamp));
            return (Some(record.clone()), usize::from(fought));
        }

        let mut contested = 0;
        let mut dropped = false;

        let mut attributes: BTreeMap<String, crate::changeset::AttributeValue> = BTreeMap::new();
        for (name, value) in &record.attributes {
            match self.origins.attribute(&record.object_id, name) {
                Some(stamp) if !covered(stamp) => {
                    contested += 1;
                    if incoming_write_wins(&set.client, &stamp.client) {
                        attributes.insert(name.clone(), value.clone());
                    } else {
                        dropped = true;
                    }
                }
                _ => {
                    attributes.insert(name.clone(), value.clone());
                }
            }
        }

        let mut relationships: BTreeMap<String, Vec<RelationshipDelta>> = BTreeMap::new();
        for (name, deltas) in &record.relationships {
            let mut kept = Vec::new();
            for delta in deltas {
                match self.origins.relationship(&record.object_id, name, delta.target()) {
                    Some(write) if !covered(&write.stamp) && write.is_add != delta.is_add() => {
                        contested += 1;
                        let (add, remove) = if delta.is_add() {
                            (&set.client, &write.stamp.client)
                        } else {
                            (&write.stamp.client, &set.client)
                        };
                        let removed = remove_prevails(add, remove, self.policy.relationship_bias);
                        if delta.is_add() != removed {
                            kept.push(delta.clone());
                        } else {
                            dropped = true;
                        }
                    }
                    _ => kept.push(delta.clone()),
                }
            }
            if !kept.is_empty() {
                relationships.insert(name.clone(), kept);
            }
        }

        if !dropped {
            return (Some(record.clone()), contested);
        }
        let filtered = ChangeRecord {
            object_id: record.object_id.clone(),
            kind: record.kind,
            attributes,
            relationships,
            origin: record.origin.clone(),
        };
        if filtered.is_noop() {
            (None, contested)
        } else {
            (Some(filtered), contested)
        }
    }

    /// Synthesize a change record out of the pending local batch for an
    /// object, if the batch touches it
    fn pending_record_for(&self, object: &crate::model::ObjectId) -> Option<crate::changeset::ChangeRecord> {
        use crate::changeset::ChangeRecord;

        if self.tracker.pending_delete(object) {
            return Some(ChangeRecord::delete(object.clone(), self.client.clone()));
        }

        let attributes: BTreeMap<String, crate::changeset::AttributeValue> = self
            .tracker
            .pending_attributes(object)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let relationships: BTreeMap<String, Vec<crate::changeset::RelationshipDelta>> = self
            .tracker
            .pending_relationships(object)
            .map(|(name, deltas)| (name.clone(), deltas.to_vec()))
            .collect();

        if attributes.is_empty() && relationships.is_empty() {
            return None;
        }
        Some(ChangeRecord::update(object.clone(), self.client.clone(), attributes, relationships))
    }

    /// Upload a sealed local set to this client's lane on the medium
    async fn publish_set(&self, set: &ChangeSet, crypto: Option<&CryptoManager>) -> SyncResult<()> {
        let frame = encode_changeset(set)?;
        let payload = self.seal_payload(frame, crypto)?;
        let path = self.layout.changeset(&self.doc, &self.client, set.seq);
        self.transport.write(&path, &payload).await?;
        debug!(set = %set.id(), "published change set");
        Ok(())
    }

    /// Publish the current applied marks for vacuum gating
    pub(crate) async fn publish_marks(&self, crypto: Option<&CryptoManager>) -> SyncResult<()> {
        let bytes = self.seal_payload(self.marks.to_bytes()?, crypto)?;
        let path = self.layout.applied_marks(&self.doc, &self.client);
        self.transport.write(&path, &bytes).await?;
        Ok(())
    }
}
