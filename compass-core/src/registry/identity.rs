//! Identity registry
//!
//! Resolves device ids to a slot and a rank. Owns the slot table, the
//! priority list and the overflow list, and runs the boot-time preparation
//! that lines slots up with the persisted priority order.

use super::overflow::OverflowRegistry;
use super::priority::PriorityList;
use super::reorder::reorder_by_priority;
use super::slots::{SlotCalibration, SlotState, SlotTable};
use crate::data::{DeviceId, ParamBatch, ParamStorage, Rank, SlotIndex};
use crate::error::{CompassError, Result};
use tracing::{debug, info, warn};

/// Outcome of registering a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Bound to a slot and usable for navigation
    Assigned { slot: SlotIndex, rank: Rank },
    /// No slot available. Remembered as pseudo-instance `instance` (>= N),
    /// never used for navigation.
    Overflow { instance: usize },
}

impl Registration {
    pub fn slot(&self) -> Option<SlotIndex> {
        match self {
            Self::Assigned { slot, .. } => Some(*slot),
            Self::Overflow { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    slots: SlotTable,
    priority: PriorityList,
    overflow: OverflowRegistry,
    /// Highest rank handed out this run, plus one
    count: usize,
}

impl IdentityRegistry {
    pub fn load(storage: &dyn ParamStorage, max_instances: usize, max_unregistered: usize) -> Self {
        Self {
            slots: SlotTable::load(storage, max_instances),
            priority: PriorityList::load(storage, max_instances),
            overflow: OverflowRegistry::load(storage, max_unregistered),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of ranks in use
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Drop persisted-value bookkeeping for a batch that failed to commit
    pub fn resync(&mut self, storage: &dyn ParamStorage, failed: &ParamBatch) {
        for (_, slot) in self.slots.iter_mut() {
            slot.params.resync(storage, failed);
        }
        self.priority.resync(storage, failed);
        self.overflow.resync(storage, failed);
    }

    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    pub fn priority(&self) -> &PriorityList {
        &self.priority
    }

    pub fn priority_mut(&mut self) -> &mut PriorityList {
        &mut self.priority
    }

    pub fn overflow(&self) -> &OverflowRegistry {
        &self.overflow
    }

    pub fn overflow_mut(&mut self) -> &mut OverflowRegistry {
        &mut self.overflow
    }

    // ========================================================================
    // Boot preparation
    // ========================================================================

    /// Everything that must happen before the first probe
    ///
    /// Migrates a legacy primary setting, compacts the priority list,
    /// reorders slots to match it, caches each slot's expected id and rolls
    /// the overflow list over.
    pub fn prepare_boot(&mut self, legacy_primary: Option<usize>, batch: &mut ParamBatch) -> Result<()> {
        let slot_ids: Vec<DeviceId> = self
            .slots
            .iter()
            .map(|(_, s)| *s.params.dev_id.get())
            .collect();
        self.priority
            .migrate_legacy_primary(legacy_primary, &slot_ids, batch)?;
        self.priority.reconcile(batch)?;
        self.reorder(batch)?;

        for (_, slot) in self.slots.iter_mut() {
            slot.state.expected_id = *slot.params.dev_id.get();
        }

        self.overflow.begin_boot(batch)?;
        Ok(())
    }

    /// Swap slot contents so slot index equals rank. Returns the swap count.
    pub fn reorder(&mut self, batch: &mut ParamBatch) -> Result<usize> {
        let mut items: Vec<(SlotCalibration, SlotState)> = self
            .slots
            .calibrations()
            .into_iter()
            .zip(self.slots.states())
            .collect();

        let swaps = reorder_by_priority(self.priority.working_ids(), &mut items, |(cal, _)| cal.dev_id);
        if swaps.is_empty() {
            return Ok(0);
        }

        for (rank, from) in &swaps {
            info!(rank, from, "Moving compass calibration to match priority");
        }

        let (calibrations, states): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        self.slots.rewrite(&calibrations, states, batch)?;
        Ok(swaps.len())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Bind `id` to a slot and rank, or record it as overflow
    ///
    /// Fails with `ResourceExhausted` only when both the slots and the
    /// overflow list are full and the device is not already in overflow.
    pub fn register(&mut self, id: DeviceId, batch: &mut ParamBatch) -> Result<Registration> {
        if id.is_none() {
            return Err(CompassError::InvalidDeviceId(id.raw()));
        }

        if let Some(rank) = self.priority.resolve_or_allocate(id, batch)? {
            self.count = self.count.max(rank.get() + 1);
            if let Some(slot) = self.select_slot(id) {
                if let Some(s) = self.slots.get_mut(slot) {
                    s.state.registered = true;
                    s.state.rank = Some(rank);
                }
                debug!(device_id = %id, slot = slot.get(), rank = rank.get(), "Registered compass");
                return Ok(Registration::Assigned { slot, rank });
            }
        }

        match self.overflow.record(id) {
            Some(entry) => {
                let instance = self.capacity() + entry;
                info!(device_id = %id, instance, "Compass beyond slot capacity, kept as extra device");
                Ok(Registration::Overflow { instance })
            }
            None => {
                warn!(device_id = %id, "No slot or overflow entry left for compass");
                Err(CompassError::ResourceExhausted {
                    device_id: id.raw(),
                    slots: self.capacity(),
                    overflow: self.overflow.capacity(),
                })
            }
        }
    }

    /// Three passes, most specific first
    fn select_slot(&self, id: DeviceId) -> Option<SlotIndex> {
        let free_or_ours = |s: &SlotState| !s.registered || s.detected_id == id;

        // The slot this device was bound to last boot, or earlier this run
        self.slots
            .iter()
            .find(|(_, s)| {
                (s.state.expected_id == id && free_or_ours(&s.state))
                    || (!s.state.registered && *s.params.dev_id.get() == id)
            })
            // A slot that has never been configured
            .or_else(|| {
                self.slots
                    .iter()
                    .find(|(_, s)| !s.state.registered && s.params.dev_id.get().is_none())
            })
            // Any slot not bound this run; takes over its calibration
            .or_else(|| self.slots.iter().find(|(_, s)| !s.state.registered))
            .map(|(i, _)| i)
    }

    /// Unbind a slot. Its rank and calibration stay untouched.
    pub fn release(&mut self, slot: SlotIndex) {
        if let Some(s) = self.slots.get_mut(slot) {
            debug!(slot = slot.get(), device_id = %s.state.detected_id, "Released compass slot");
            s.state.registered = false;
            s.state.detected_id = DeviceId::NONE;
            s.state.rank = None;
            s.state.healthy = false;
            s.state.last_update_ms = None;
        }
    }

    /// Slot whose attached device holds `rank`
    pub fn slot_for_rank(&self, rank: Rank) -> Option<SlotIndex> {
        let id = self.priority.working(rank);
        self.slots.find_detected(id)
    }

    /// Clear in-memory ids of slots nothing registered to
    ///
    /// Not persisted, so a temporarily unplugged sensor keeps its
    /// calibration when it comes back.
    pub fn zero_unregistered_ids(&mut self) {
        for (_, slot) in self.slots.iter_mut() {
            if !slot.state.registered {
                slot.params.dev_id.set(DeviceId::NONE);
            }
        }
    }

    /// Forget ranks and slot ids whose devices are gone
    ///
    /// Ranks with a pending user edit are left alone. Returns the ranks
    /// that were cleared together with the id they held.
    pub fn reset_missing(&mut self, batch: &mut ParamBatch) -> Result<Vec<(Rank, DeviceId)>> {
        let mut removed = Vec::new();
        let ranks: Vec<Rank> = self.priority.ranks().collect();
        for rank in ranks {
            let stored = self.priority.stored(rank);
            if stored.is_none() || self.priority.pending_reboot(rank) {
                continue;
            }
            if self.slot_for_rank(rank).is_none() {
                self.priority.set_stored(rank, DeviceId::NONE, batch)?;
                removed.push((rank, stored));
            }
        }

        for (_, slot) in self.slots.iter_mut() {
            if slot.params.dev_id.get().is_none() && !slot.state.expected_id.is_none() {
                slot.params.dev_id.save(batch)?;
            }
        }
        Ok(removed)
    }
}
