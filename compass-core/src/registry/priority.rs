//! Priority list
//!
//! Maps rank to device id. Two copies are kept: the persisted list, which
//! user edits write to, and a working list captured at boot. Edits to the
//! persisted list only take effect after a reboot; registration writes
//! both.

use super::reorder::compact_priority;
use crate::constants::store::PRIORITY_PREFIX;
use crate::data::{DeviceId, Param, ParamBatch, ParamStorage, Rank};
use crate::error::{CompassError, Result};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PriorityList {
    stored: Vec<Param<DeviceId>>,
    working: Vec<DeviceId>,
}

impl PriorityList {
    pub fn load(storage: &dyn ParamStorage, capacity: usize) -> Self {
        let stored: Vec<Param<DeviceId>> = (0..capacity)
            .map(|i| Param::load(storage, format!("{}.{}", PRIORITY_PREFIX, i), DeviceId::NONE))
            .collect();
        let working = stored.iter().map(|p| *p.get()).collect();
        Self { stored, working }
    }

    pub fn capacity(&self) -> usize {
        self.stored.len()
    }

    pub fn resync(&mut self, storage: &dyn ParamStorage, failed: &ParamBatch) {
        for p in &mut self.stored {
            p.resync(storage, failed);
        }
    }

    pub fn ranks(&self) -> impl Iterator<Item = Rank> {
        (0..self.stored.len()).map(Rank::new)
    }

    fn check(&self, rank: Rank) -> Result<usize> {
        let i = rank.get();
        if i >= self.stored.len() {
            return Err(CompassError::InvalidIndex {
                index: i,
                capacity: self.stored.len(),
            });
        }
        Ok(i)
    }

    /// Working id at `rank`, empty when out of range
    pub fn working(&self, rank: Rank) -> DeviceId {
        self.working
            .get(rank.get())
            .copied()
            .unwrap_or(DeviceId::NONE)
    }

    /// Persisted id at `rank`, empty when out of range
    pub fn stored(&self, rank: Rank) -> DeviceId {
        self.stored
            .get(rank.get())
            .map(|p| *p.get())
            .unwrap_or(DeviceId::NONE)
    }

    pub fn working_ids(&self) -> &[DeviceId] {
        &self.working
    }

    pub fn stored_ids(&self) -> Vec<DeviceId> {
        self.stored.iter().map(|p| *p.get()).collect()
    }

    /// The persisted value differs from the one in effect
    pub fn pending_reboot(&self, rank: Rank) -> bool {
        self.working(rank) != self.stored(rank)
    }

    /// Seed rank 0 from a legacy "primary instance" setting
    ///
    /// Only applies when rank 0 is empty and the legacy value names a
    /// secondary slot.
    pub fn migrate_legacy_primary(
        &mut self,
        legacy_primary: Option<usize>,
        slot_ids: &[DeviceId],
        batch: &mut ParamBatch,
    ) -> Result<bool> {
        let Some(first) = self.stored.first_mut() else {
            return Ok(false);
        };
        if !first.get().is_none() {
            return Ok(false);
        }
        let Some(slot) = legacy_primary.filter(|&i| i != 0 && i < slot_ids.len()) else {
            return Ok(false);
        };

        let id = slot_ids[slot];
        let changed = first.set_and_save_if_changed(id, batch)?;
        if changed {
            info!(slot, device_id = %id, "Migrated legacy primary compass into priority list");
        }
        self.working[0] = id;
        Ok(changed)
    }

    /// Compact the persisted list and make it the working list
    pub fn reconcile(&mut self, batch: &mut ParamBatch) -> Result<()> {
        let compacted = compact_priority(&self.stored_ids());
        for (param, &id) in self.stored.iter_mut().zip(&compacted) {
            param.set_and_save_if_changed(id, batch)?;
        }
        debug!(priority = ?compacted, "Priority list reconciled");
        self.working = compacted;
        Ok(())
    }

    pub fn find(&self, id: DeviceId) -> Option<Rank> {
        if id.is_none() {
            return None;
        }
        self.working.iter().position(|&d| d == id).map(Rank::new)
    }

    /// Rank of `id`, allocating the first empty persisted rank if it has none
    ///
    /// Idempotent. Returns `None` when every rank is taken.
    pub fn resolve_or_allocate(&mut self, id: DeviceId, batch: &mut ParamBatch) -> Result<Option<Rank>> {
        if let Some(rank) = self.find(id) {
            return Ok(Some(rank));
        }
        let Some(i) = self.stored.iter().position(|p| p.get().is_none()) else {
            return Ok(None);
        };
        self.stored[i].set_and_save(id, batch)?;
        self.working[i] = id;
        debug!(rank = i, device_id = %id, "Allocated priority rank");
        Ok(Some(Rank::new(i)))
    }

    pub fn clear(&mut self, rank: Rank, batch: &mut ParamBatch) -> Result<()> {
        self.assign(rank, DeviceId::NONE, batch)
    }

    /// Put `id` at `rank` in both lists
    pub fn assign(&mut self, rank: Rank, id: DeviceId, batch: &mut ParamBatch) -> Result<()> {
        let i = self.check(rank)?;
        self.stored[i].set_and_save(id, batch)?;
        self.working[i] = id;
        Ok(())
    }

    /// Persist a user edit; takes effect after reboot
    pub fn set_stored(&mut self, rank: Rank, id: DeviceId, batch: &mut ParamBatch) -> Result<()> {
        let i = self.check(rank)?;
        self.stored[i].set_and_save(id, batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStorage;

    fn id(raw: u32) -> DeviceId {
        DeviceId::from_raw(raw)
    }

    #[test]
    fn test_reconcile_compacts_and_persists() {
        let mut storage = MemoryStorage::new();
        storage.insert("compass.priority.0", 0u32).unwrap();
        storage.insert("compass.priority.1", 5u32).unwrap();
        storage.insert("compass.priority.2", 5u32).unwrap();

        let mut list = PriorityList::load(&storage, 3);
        let mut batch = ParamBatch::new();
        list.reconcile(&mut batch).unwrap();
        batch.commit(&mut storage).unwrap();

        assert_eq!(list.working_ids(), &[id(5), id(0), id(0)]);
        assert_eq!(storage.get_as::<u32>("compass.priority.0"), Some(5));
        assert_eq!(storage.get_as::<u32>("compass.priority.2"), Some(0));
    }

    #[test]
    fn test_resolve_or_allocate_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut list = PriorityList::load(&storage, 2);
        let mut batch = ParamBatch::new();
        let a = list.resolve_or_allocate(id(1), &mut batch).unwrap();
        let again = list.resolve_or_allocate(id(1), &mut batch).unwrap();
        assert_eq!(a, Some(Rank::new(0)));
        assert_eq!(again, a);
        assert_eq!(list.resolve_or_allocate(id(2), &mut batch).unwrap(), Some(Rank::new(1)));
        assert_eq!(list.resolve_or_allocate(id(3), &mut batch).unwrap(), None);
    }

    #[test]
    fn test_user_edit_pends_until_reboot() {
        let mut storage = MemoryStorage::new();
        let mut list = PriorityList::load(&storage, 2);
        let mut batch = ParamBatch::new();
        list.assign(Rank::new(0), id(1), &mut batch).unwrap();
        list.set_stored(Rank::new(0), id(9), &mut batch).unwrap();
        batch.commit(&mut storage).unwrap();

        assert!(list.pending_reboot(Rank::new(0)));
        assert_eq!(list.working(Rank::new(0)), id(1));
        assert_eq!(list.find(id(9)), None);

        let rebooted = PriorityList::load(&storage, 2);
        assert_eq!(rebooted.working(Rank::new(0)), id(9));
    }

    #[test]
    fn test_out_of_range_rank() {
        let storage = MemoryStorage::new();
        let mut list = PriorityList::load(&storage, 2);
        let mut batch = ParamBatch::new();
        let err = list.clear(Rank::new(2), &mut batch).unwrap_err();
        assert!(matches!(err, CompassError::InvalidIndex { index: 2, capacity: 2 }));
        assert!(list.working(Rank::new(7)).is_none());
    }

    #[test]
    fn test_legacy_primary_migration() {
        let storage = MemoryStorage::new();
        let mut list = PriorityList::load(&storage, 3);
        let mut batch = ParamBatch::new();
        let slot_ids = [id(10), id(20), id(30)];

        assert!(!list.migrate_legacy_primary(Some(0), &slot_ids, &mut batch).unwrap());
        assert!(!list.migrate_legacy_primary(Some(3), &slot_ids, &mut batch).unwrap());
        assert!(list.migrate_legacy_primary(Some(2), &slot_ids, &mut batch).unwrap());
        assert_eq!(list.stored(Rank::new(0)), id(30));

        // Rank 0 is now populated, so a second migration is a no-op
        assert!(!list.migrate_legacy_primary(Some(1), &slot_ids, &mut batch).unwrap());
    }
}
