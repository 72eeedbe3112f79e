//! Overflow registry
//!
//! Devices detected after every slot is taken are remembered here. The
//! list is persisted once per boot, after boot-time detection, so the next
//! boot knows which network devices were already present and unused. Those
//! are never treated as replacements for a missing sensor.

use crate::constants::store::OVERFLOW_PREFIX;
use crate::data::{DeviceId, Param, ParamBatch, ParamStorage};
use crate::error::Result;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OverflowRegistry {
    entries: Vec<Param<DeviceId>>,
    previously_seen: Vec<DeviceId>,
}

impl OverflowRegistry {
    pub fn load(storage: &dyn ParamStorage, capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|i| Param::load(storage, format!("{}.{}", OVERFLOW_PREFIX, i), DeviceId::NONE))
            .collect();
        Self {
            entries,
            previously_seen: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn resync(&mut self, storage: &dyn ParamStorage, failed: &ParamBatch) {
        for p in &mut self.entries {
            p.resync(storage, failed);
        }
    }

    /// Number of occupied entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|p| !p.get().is_none()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.entries.iter().all(|p| !p.get().is_none())
    }

    pub fn entries(&self) -> Vec<DeviceId> {
        self.entries.iter().map(|p| *p.get()).collect()
    }

    /// Move last boot's entries into the "seen previously" set and clear the list
    pub fn begin_boot(&mut self, batch: &mut ParamBatch) -> Result<()> {
        self.previously_seen = self
            .entries
            .iter()
            .map(|p| *p.get())
            .filter(|id| !id.is_none())
            .collect();
        for entry in &mut self.entries {
            entry.set_and_save(DeviceId::NONE, batch)?;
        }
        if !self.previously_seen.is_empty() {
            debug!(seen = ?self.previously_seen, "Overflow devices from previous boot");
        }
        Ok(())
    }

    /// Persist the devices that overflowed during boot detection
    pub fn finish_boot(&mut self, batch: &mut ParamBatch) -> Result<()> {
        for entry in &mut self.entries {
            entry.save(batch)?;
        }
        Ok(())
    }

    pub fn was_seen_previously(&self, id: DeviceId) -> bool {
        !id.is_none() && self.previously_seen.contains(&id)
    }

    pub fn position(&self, id: DeviceId) -> Option<usize> {
        if id.is_none() {
            return None;
        }
        self.entries.iter().position(|p| *p.get() == id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.position(id).is_some()
    }

    /// Entry index for `id`, taking the first free entry if it has none.
    /// The new entry lives in memory until the next save.
    pub fn record(&mut self, id: DeviceId) -> Option<usize> {
        if let Some(i) = self.position(id) {
            return Some(i);
        }
        let i = self.entries.iter().position(|p| p.get().is_none())?;
        self.entries[i].set(id);
        Some(i)
    }

    /// Drop `id` from the list and persist the removal
    pub fn remove(&mut self, id: DeviceId, batch: &mut ParamBatch) -> Result<bool> {
        let Some(i) = self.position(id) else {
            return Ok(false);
        };
        self.entries[i].set_and_save(DeviceId::NONE, batch)?;
        Ok(true)
    }
}
