//! Replacement detection
//!
//! When a network sensor holding a rank goes missing, a newly seen network
//! sensor may take its rank over. A candidate qualifies only if it was not
//! already sitting unused in overflow during the previous boot and no slot
//! expects it. Each replacement is applied as one batch of parameter writes.

use crate::compass::Compass;
use crate::data::{DeviceId, ParamBatch, Rank, SlotIndex};
use crate::diagnostics::Severity;
use crate::error::Result;
use crate::hw::detection::Candidate;
use crate::registry::Registration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementKind {
    /// The candidate was already active at a lower priority and moved up
    Promoted { from: Rank },
    /// The candidate came from overflow and was bound to a free slot
    Attached { slot: SlotIndex },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    pub rank: Rank,
    pub replaced: DeviceId,
    pub by: DeviceId,
    pub kind: ReplacementKind,
}

impl Compass {
    /// `id` may take over the rank of a missing sensor
    pub fn is_replacement(&self, id: DeviceId) -> bool {
        id.is_hot_pluggable()
            && !self.registry.overflow().was_seen_previously(id)
            && !self.registry.slots().is_expected(id)
    }

    /// Walk ranks in priority order and fill each missing network sensor's
    /// rank with the first qualifying candidate
    ///
    /// Boot passes everything it discovered. A runtime rescan passes only
    /// the devices it attached or parked in overflow itself.
    ///
    /// `spare` holds opened drivers for discovered devices that ended up in
    /// overflow. Unused spares are dropped.
    pub(crate) fn evaluate_replacements(
        &mut self,
        candidates: &[DeviceId],
        mut spare: Vec<Candidate>,
    ) -> Result<Vec<Replacement>> {
        let mut done = Vec::new();
        let ranks: Vec<Rank> = self.registry.priority().ranks().collect();

        for rank in ranks {
            let missing = self.registry.priority().working(rank);
            if !missing.is_hot_pluggable() || self.registry.slot_for_rank(rank).is_some() {
                continue;
            }

            for &candidate in candidates {
                if candidate == missing || !self.is_replacement(candidate) {
                    continue;
                }

                if let Some(replacement) = self.try_promote(rank, missing, candidate)? {
                    done.push(replacement);
                    break;
                }

                let Some(pos) = spare.iter().position(|c| c.device_id() == candidate) else {
                    continue;
                };
                if !self.has_free_slot() {
                    debug!(device_id = %candidate, "No free slot for replacement compass");
                    continue;
                }
                let spare_driver = spare.swap_remove(pos);
                if let Some(replacement) = self.replace_from_overflow(rank, missing, spare_driver)? {
                    done.push(replacement);
                    break;
                }
            }
        }
        Ok(done)
    }

    fn has_free_slot(&self) -> bool {
        self.registry
            .slots()
            .iter()
            .any(|(_, s)| !s.state.registered)
    }

    /// Move an active candidate from a lower priority up to `rank`
    fn try_promote(&mut self, rank: Rank, missing: DeviceId, candidate: DeviceId) -> Result<Option<Replacement>> {
        let Some(from) = self.registry.priority().find(candidate) else {
            return Ok(None);
        };
        let Some(slot) = self.registry.slot_for_rank(from) else {
            return Ok(None);
        };
        if from <= rank {
            // Already at higher priority
            return Ok(None);
        }

        let mut batch = ParamBatch::new();
        let priority = self.registry.priority_mut();
        priority.clear(from, &mut batch)?;
        priority.assign(rank, candidate, &mut batch)?;
        self.commit(batch)?;

        if let Some(s) = self.registry.slots_mut().get_mut(slot) {
            s.state.rank = Some(rank);
        }

        self.announce(rank, missing);
        info!(device_id = %candidate, from = from.get(), to = rank.get(), "Promoted replacement compass");
        Ok(Some(Replacement {
            rank,
            replaced: missing,
            by: candidate,
            kind: ReplacementKind::Promoted { from },
        }))
    }

    /// Free `rank` and register an overflow candidate through the normal path
    fn replace_from_overflow(
        &mut self,
        rank: Rank,
        missing: DeviceId,
        candidate: Candidate,
    ) -> Result<Option<Replacement>> {
        let id = candidate.device_id();
        let mut batch = ParamBatch::new();
        self.registry.priority_mut().clear(rank, &mut batch)?;

        let registration = self.registry.register(id, &mut batch)?;
        let Registration::Assigned { slot, rank: new_rank } = registration else {
            self.commit(batch)?;
            return Ok(None);
        };
        self.registry.overflow_mut().remove(id, &mut batch)?;
        self.commit(batch)?;

        if !self.attach(slot, candidate) {
            return Ok(None);
        }

        self.announce(rank, missing);
        Ok(Some(Replacement {
            rank: new_rank,
            replaced: missing,
            by: id,
            kind: ReplacementKind::Attached { slot },
        }))
    }

    fn announce(&self, rank: Rank, replaced: DeviceId) {
        self.diag.emit(
            Severity::Alert,
            &format!("Mag: Compass #{} with DEVID {} replaced", rank, replaced),
        );
    }
}
