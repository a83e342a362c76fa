/*
    vacuum.rs - Removal of superseded change sets

    A client vacuums only its own lane. A set may go once every known,
    non-departed client has published marks proving it applied that set;
    any client without published marks blocks vacuum entirely. Unsafe
    states return a typed refusal and delete nothing.
*/

use super::DocumentSession;
use crate::changeset::AppliedMarks;
use crate::config::EngineConfig;
use crate::errors::SyncResult;
use crate::model::SeqNumber;
use crate::registry::Registry;
use crate::remote::{CryptoManager, TransportError};
use tracing::{debug, info};

/// Result of a vacuum attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VacuumOutcome {
    /// Superseded sets were removed up to the cutoff
    Vacuumed { removed_remote: usize, removed_local: usize, cutoff: SeqNumber },

    /// Vacuuming now could strand a client; nothing was deleted
    Unsafe { reason: String },
}

impl DocumentSession {
    /// Remove this client's sets that every relevant peer has applied
    pub(crate) async fn vacuum(
        &mut self,
        crypto: Option<&CryptoManager>,
        registry: &Registry,
        config: &EngineConfig,
    ) -> SyncResult<VacuumOutcome> {
        if self.store.highest_seq() == SeqNumber::ZERO {
            return Ok(VacuumOutcome::Unsafe { reason: "no sealed sets".to_string() });
        }

        let participants = registry.document_participants(&self.doc).await?;
        let departed = registry.departed_clients(&self.doc, config.departed_after).await?;

        // Cutoff is the lowest mark any relevant peer holds for us
        let mut cutoff = self.store.highest_seq();
        for peer in &participants {
            if *peer == self.client || departed.contains(peer) {
                continue;
            }
            let path = self.layout.applied_marks(&self.doc, peer);
            let marks = match self.transport.read(&path).await {
                Ok(bytes) => {
                    let bytes = self.open_payload(bytes, crypto)?;
                    AppliedMarks::from_bytes(&bytes)?
                }
                Err(TransportError::NotFound(_)) => {
                    return Ok(VacuumOutcome::Unsafe {
                        reason: format!("client {} has never published marks", peer),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            cutoff = cutoff.min(marks.get(&self.client));
        }

        if cutoff == SeqNumber::ZERO {
            return Ok(VacuumOutcome::Unsafe {
                reason: "a client has not applied any of our sets".to_string(),
            });
        }

        // Remote files go first; losing a local copy of a still-remote set
        // would be worse than the reverse
        let mut removed_remote = 0;
        let mut seq = SeqNumber(1);
        while seq <= cutoff {
            let path = self.layout.changeset(&self.doc, &self.client, seq);
            if self.transport.exists(&path).await? {
                self.transport.delete(&path).await?;
                removed_remote += 1;
            }
            seq = seq.next();
        }
        let removed_local = self.store.discard_through(cutoff)?;

        if removed_remote == 0 && removed_local == 0 {
            debug!(document = %self.doc, cutoff = %cutoff, "nothing to vacuum");
        } else {
            info!(
                document = %self.doc,
                cutoff = %cutoff,
                removed_remote,
                removed_local,
                "vacuumed superseded sets"
            );
        }
        Ok(VacuumOutcome::Vacuumed { removed_remote, removed_local, cutoff })
    }
}
