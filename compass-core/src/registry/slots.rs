//! Slot table
//!
//! A slot owns one set of persisted calibration plus the runtime state of
//! whichever device is currently bound to it. The table has a fixed
//! capacity chosen at startup.

use crate::constants::{calibration, store::SLOT_PREFIX};
use crate::data::{DeviceId, Param, ParamBatch, ParamStorage, Rank, Rotation, SlotIndex};
use crate::error::Result;
use nalgebra::{Matrix3, Vector3};

/// Plain copy of everything a slot persists
#[derive(Debug, Clone, PartialEq)]
pub struct SlotCalibration {
    pub dev_id: DeviceId,
    pub orientation: Rotation,
    pub offset: Vector3<f32>,
    pub diagonals: Vector3<f32>,
    pub offdiagonals: Vector3<f32>,
    pub scale_factor: f32,
    pub motor_compensation: Vector3<f32>,
    pub external: bool,
    pub use_for_yaw: bool,
}

impl Default for SlotCalibration {
    fn default() -> Self {
        Self {
            dev_id: DeviceId::NONE,
            orientation: Rotation::None,
            offset: Vector3::zeros(),
            diagonals: Vector3::repeat(1.0),
            offdiagonals: Vector3::zeros(),
            scale_factor: 0.0,
            motor_compensation: Vector3::zeros(),
            external: false,
            use_for_yaw: true,
        }
    }
}

impl SlotCalibration {
    pub fn has_scale_factor(&self) -> bool {
        (calibration::MIN_SCALE_FACTOR..=calibration::MAX_SCALE_FACTOR)
            .contains(&self.scale_factor)
    }

    /// Apply offsets, soft-iron matrix and scale to a body-frame sample
    pub fn correct(&self, raw: Vector3<f32>) -> Vector3<f32> {
        let diag = if self.diagonals == Vector3::zeros() {
            Vector3::repeat(1.0)
        } else {
            self.diagonals
        };
        let off = self.offdiagonals;
        let soft_iron = Matrix3::new(
            diag.x, off.x, off.y, //
            off.x, diag.y, off.z, //
            off.y, off.z, diag.z,
        );

        let field = soft_iron * (raw + self.offset);
        if self.has_scale_factor() {
            field * self.scale_factor
        } else {
            field
        }
    }
}

/// Persisted parameters of one slot
#[derive(Debug, Clone)]
pub struct SlotParams {
    pub dev_id: Param<DeviceId>,
    pub orientation: Param<Rotation>,
    pub offset: Param<Vector3<f32>>,
    pub diagonals: Param<Vector3<f32>>,
    pub offdiagonals: Param<Vector3<f32>>,
    pub scale_factor: Param<f32>,
    pub motor_compensation: Param<Vector3<f32>>,
    pub external: Param<bool>,
    pub use_for_yaw: Param<bool>,
}

impl SlotParams {
    pub fn load(storage: &dyn ParamStorage, index: SlotIndex) -> Self {
        let d = SlotCalibration::default();
        let key = |field: &str| format!("{}.{}.{}", SLOT_PREFIX, index.get(), field);
        Self {
            dev_id: Param::load(storage, key("dev_id"), d.dev_id),
            orientation: Param::load(storage, key("orientation"), d.orientation),
            offset: Param::load(storage, key("offset"), d.offset),
            diagonals: Param::load(storage, key("diagonals"), d.diagonals),
            offdiagonals: Param::load(storage, key("offdiagonals"), d.offdiagonals),
            scale_factor: Param::load(storage, key("scale_factor"), d.scale_factor),
            motor_compensation: Param::load(storage, key("motor_compensation"), d.motor_compensation),
            external: Param::load(storage, key("external"), d.external),
            use_for_yaw: Param::load(storage, key("use_for_yaw"), d.use_for_yaw),
        }
    }

    /// Working values as plain data
    pub fn snapshot(&self) -> SlotCalibration {
        SlotCalibration {
            dev_id: *self.dev_id.get(),
            orientation: *self.orientation.get(),
            offset: *self.offset.get(),
            diagonals: *self.diagonals.get(),
            offdiagonals: *self.offdiagonals.get(),
            scale_factor: *self.scale_factor.get(),
            motor_compensation: *self.motor_compensation.get(),
            external: *self.external.get(),
            use_for_yaw: *self.use_for_yaw.get(),
        }
    }

    pub fn resync(&mut self, storage: &dyn ParamStorage, failed: &ParamBatch) {
        self.dev_id.resync(storage, failed);
        self.orientation.resync(storage, failed);
        self.offset.resync(storage, failed);
        self.diagonals.resync(storage, failed);
        self.offdiagonals.resync(storage, failed);
        self.scale_factor.resync(storage, failed);
        self.motor_compensation.resync(storage, failed);
        self.external.resync(storage, failed);
        self.use_for_yaw.resync(storage, failed);
    }

    /// Take over every field of `cal`, persisting the ones that differ
    pub fn copy_from(&mut self, cal: &SlotCalibration, batch: &mut ParamBatch) -> Result<()> {
        self.dev_id.set_and_save_if_changed(cal.dev_id, batch)?;
        self.orientation.set_and_save_if_changed(cal.orientation, batch)?;
        self.offset.set_and_save_if_changed(cal.offset, batch)?;
        self.diagonals.set_and_save_if_changed(cal.diagonals, batch)?;
        self.offdiagonals.set_and_save_if_changed(cal.offdiagonals, batch)?;
        self.scale_factor.set_and_save_if_changed(cal.scale_factor, batch)?;
        self.motor_compensation
            .set_and_save_if_changed(cal.motor_compensation, batch)?;
        self.external.set_and_save_if_changed(cal.external, batch)?;
        self.use_for_yaw.set_and_save_if_changed(cal.use_for_yaw, batch)?;
        Ok(())
    }
}

/// Runtime state of a slot, never persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotState {
    /// Persisted id captured at boot, before detection
    pub expected_id: DeviceId,
    /// Id of the attached device, zero when nothing is attached
    pub detected_id: DeviceId,
    /// Bound to a device during this run
    pub registered: bool,
    pub rank: Option<Rank>,
    pub last_update_ms: Option<u64>,
    pub field: Vector3<f32>,
    pub healthy: bool,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub params: SlotParams,
    pub state: SlotState,
}

/// Fixed-capacity table of slots
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn load(storage: &dyn ParamStorage, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                params: SlotParams::load(storage, SlotIndex::new(i)),
                state: SlotState::default(),
            })
            .collect();
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn index(&self, i: usize) -> Option<SlotIndex> {
        SlotIndex::checked(i, self.slots.len())
    }

    pub fn get(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index.get())
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut Slot> {
        self.slots.get_mut(index.get())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (SlotIndex::new(i), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotIndex, &mut Slot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SlotIndex::new(i), s))
    }

    /// Slot currently attached to `id`
    pub fn find_detected(&self, id: DeviceId) -> Option<SlotIndex> {
        if id.is_none() {
            return None;
        }
        self.iter()
            .find(|(_, s)| s.state.detected_id == id)
            .map(|(i, _)| i)
    }

    /// True if any slot expects `id` from the previous boot
    pub fn is_expected(&self, id: DeviceId) -> bool {
        !id.is_none() && self.slots.iter().any(|s| s.state.expected_id == id)
    }

    pub fn registered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state.registered).count()
    }

    pub fn calibrations(&self) -> Vec<SlotCalibration> {
        self.slots.iter().map(|s| s.params.snapshot()).collect()
    }

    /// Replace slot contents wholesale, persisting changed fields
    pub(crate) fn rewrite(
        &mut self,
        calibrations: &[SlotCalibration],
        states: Vec<SlotState>,
        batch: &mut ParamBatch,
    ) -> Result<()> {
        for ((slot, cal), state) in self.slots.iter_mut().zip(calibrations).zip(states) {
            slot.params.copy_from(cal, batch)?;
            slot.state = state;
        }
        Ok(())
    }

    pub(crate) fn states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStorage;

    #[test]
    fn test_load_defaults() {
        let storage = MemoryStorage::new();
        let table = SlotTable::load(&storage, 3);
        assert_eq!(table.capacity(), 3);
        let slot = table.get(SlotIndex::new(1)).unwrap();
        assert!(slot.params.dev_id.get().is_none());
        assert!(*slot.params.use_for_yaw.get());
        assert!(table.index(3).is_none());
    }

    #[test]
    fn test_load_reads_keys_per_slot() {
        let storage = MemoryStorage::new();
        storage.insert("compass.slot.1.dev_id", 77u32).unwrap();
        storage.insert("compass.slot.1.offset", [10.0f32, -5.0, 2.0]).unwrap();
        let table = SlotTable::load(&storage, 2);
        let cal = table.get(SlotIndex::new(1)).unwrap().params.snapshot();
        assert_eq!(cal.dev_id, DeviceId::from_raw(77));
        assert_eq!(cal.offset, Vector3::new(10.0, -5.0, 2.0));
    }

    #[test]
    fn test_copy_from_writes_only_changes() {
        let storage = MemoryStorage::new();
        let mut table = SlotTable::load(&storage, 1);
        let slot = table.get_mut(SlotIndex::new(0)).unwrap();
        let mut cal = slot.params.snapshot();
        cal.dev_id = DeviceId::from_raw(5);
        cal.use_for_yaw = false;

        let mut batch = ParamBatch::new();
        slot.params.copy_from(&cal, &mut batch).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(slot.params.snapshot(), cal);
    }

    #[test]
    fn test_correct_applies_offset_then_scale() {
        let cal = SlotCalibration {
            offset: Vector3::new(-10.0, 0.0, 0.0),
            scale_factor: 1.2,
            ..SlotCalibration::default()
        };
        let out = cal.correct(Vector3::new(110.0, 0.0, 50.0));
        assert!((out.x - 120.0).abs() < 1e-4);
        assert!((out.z - 60.0).abs() < 1e-4);

        let unscaled = SlotCalibration::default().correct(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(unscaled, Vector3::new(1.0, 2.0, 3.0));
    }
}
