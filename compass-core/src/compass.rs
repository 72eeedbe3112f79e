//! The compass subsystem context
//!
//! [`Compass`] owns the slot table, priority list, overflow list and
//! backend pool. It is an explicit value rather than a process-wide
//! singleton, so tests can build as many as they like and the daemon can
//! share one behind a mutex.
//!
//! Public queries and calibration calls are indexed by [`Rank`]. A rank
//! maps to a slot through the device currently attached to it.

use crate::constants::store::LEGACY_PRIMARY_KEY;
use crate::data::{validate_settings, DeviceId, LearnMode, Param, ParamBatch, ParamStorage, Rank, Rotation, SlotIndex};
use crate::diagnostics::{DiagnosticSink, Severity};
use crate::error::Result;
use crate::hotplug::RuntimeRescan;
use crate::hw::detection::Candidate;
use crate::hw::{Backend, BackendPool, BootReport, CompassBus};
use crate::registry::{IdentityRegistry, Registration, Slot, SlotCalibration, SlotParams};
use crate::settings::CompassSettings;
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Compass {
    pub(crate) settings: CompassSettings,
    pub(crate) storage: Box<dyn ParamStorage>,
    pub(crate) diag: Arc<dyn DiagnosticSink>,
    pub(crate) registry: IdentityRegistry,
    pub(crate) backends: BackendPool,
    pub(crate) rescan: RuntimeRescan,
    pub(crate) learn: LearnMode,
    /// Highest-priority rank configured for yaw
    pub(crate) first_usable: Rank,
    init_done: bool,
}

impl Compass {
    pub fn new(
        settings: CompassSettings,
        storage: Box<dyn ParamStorage>,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        validate_settings(&settings)?;
        let registry = IdentityRegistry::load(
            storage.as_ref(),
            settings.max_instances,
            settings.max_unregistered,
        );
        Ok(Self {
            backends: BackendPool::new(settings.max_backends),
            rescan: RuntimeRescan::new(settings.rescan_interval_ms),
            learn: settings.learn,
            first_usable: Rank::PRIMARY,
            init_done: false,
            registry,
            storage,
            diag,
            settings,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Boot sequence: prepare tables, detect sensors, take a first reading
    pub fn init(&mut self, bus: &mut dyn CompassBus, now_ms: u64) -> Result<BootReport> {
        if !self.settings.enabled {
            info!("Compass disabled");
            return Ok(BootReport::default());
        }
        if self.init_done {
            warn!("Compass already initialised, ignoring second init");
            return Ok(BootReport::default());
        }

        let legacy: Param<usize> = Param::load(self.storage.as_ref(), LEGACY_PRIMARY_KEY, 0);
        let mut batch = ParamBatch::new();
        self.registry.prepare_boot(Some(*legacy.get()), &mut batch)?;
        self.commit(batch)?;

        let report = self.detect_backends(bus)?;

        // Only boot-time overflow is persisted; runtime additions stay in memory
        let mut batch = ParamBatch::new();
        self.registry.overflow_mut().finish_boot(&mut batch)?;
        self.commit(batch)?;

        self.init_done = true;
        if self.count() > 0 {
            self.read(now_ms);
        }
        self.registry.zero_unregistered_ids();

        info!(
            count = self.count(),
            backends = self.backends.len(),
            "Compass initialised"
        );
        Ok(report)
    }

    pub fn available(&self) -> bool {
        self.settings.enabled && self.init_done
    }

    /// Number of priority ranks in use
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    pub fn settings(&self) -> &CompassSettings {
        &self.settings
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &dyn ParamStorage {
        self.storage.as_ref()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Rank the heading estimate uses by default
    pub fn primary(&self) -> Rank {
        self.first_usable
    }

    pub fn learn(&self) -> LearnMode {
        self.learn
    }

    pub fn set_learn(&mut self, mode: LearnMode) {
        if mode != self.learn {
            info!(?mode, "Compass learn mode changed");
        }
        self.learn = mode;
    }

    /// Device currently holding `rank`
    pub fn device_at(&self, rank: Rank) -> DeviceId {
        self.registry.priority().working(rank)
    }

    pub fn overflow_entries(&self) -> Vec<DeviceId> {
        self.registry.overflow().entries()
    }

    /// Register a device id without attaching a driver
    pub fn register(&mut self, id: DeviceId) -> Result<Registration> {
        let mut batch = ParamBatch::new();
        let result = self.registry.register(id, &mut batch);
        self.commit(batch)?;
        result
    }

    // ========================================================================
    // Read cycle
    // ========================================================================

    /// Pull samples from every backend and refresh health
    ///
    /// Never blocks on the bus. Returns the health of the primary.
    pub fn read(&mut self, now_ms: u64) -> bool {
        if !self.available() {
            return false;
        }

        let slots = self.registry.slots_mut();
        for backend in self.backends.iter_mut() {
            let Some(raw) = backend.driver_mut().read() else {
                continue;
            };
            let Some(slot) = slots.get_mut(backend.slot()) else {
                continue;
            };
            let cal = slot.params.snapshot();
            let mut body = backend.mount().apply(raw);
            if cal.external {
                body = cal.orientation.apply(body);
            }
            slot.state.field = cal.correct(body);
            slot.state.last_update_ms = Some(now_ms);
        }

        let staleness = self.settings.staleness_ms;
        for (_, slot) in self.registry.slots_mut().iter_mut() {
            slot.state.healthy = slot
                .state
                .last_update_ms
                .map(|t| now_ms.saturating_sub(t) < staleness)
                .unwrap_or(false);
        }

        let first = self.registry.priority().ranks().find(|&r| {
            self.slot_at_rank(r)
                .map(|s| *s.params.use_for_yaw.get())
                .unwrap_or(false)
        });
        if let Some(rank) = first {
            self.first_usable = rank;
        }

        self.healthy(self.first_usable)
    }

    // ========================================================================
    // Internal plumbing
    // ========================================================================

    pub(crate) fn commit(&mut self, batch: ParamBatch) -> Result<()> {
        if let Err(e) = batch.commit(self.storage.as_mut()) {
            warn!(error = %e, params = batch.len(), "Parameter save failed, keeping previous values");
            self.registry.resync(self.storage.as_ref(), &batch);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn slot_at_rank(&self, rank: Rank) -> Option<&Slot> {
        let index = self.registry.slot_for_rank(rank)?;
        self.registry.slots().get(index)
    }

    /// Hand a driver to the backend pool and bind it to `slot`
    pub(crate) fn attach(&mut self, slot: SlotIndex, candidate: Candidate) -> bool {
        let id = candidate.device_id();
        let backend = Backend::new(candidate.driver, slot, candidate.mount);
        if !self.backends.add(backend) {
            self.registry.release(slot);
            return false;
        }
        if let Some(s) = self.registry.slots_mut().get_mut(slot) {
            s.state.detected_id = id;
            s.params.dev_id.set(id);
            s.params.external.set(candidate.external);
            info!(
                device_id = %id,
                slot = slot.get(),
                rank = ?s.state.rank.map(|r| r.get()),
                "Compass attached"
            );
        }
        true
    }

    /// Drop the driver for `id` and unbind its slot
    pub(crate) fn detach(&mut self, id: DeviceId) -> bool {
        let Some(backend) = self.backends.remove_device(id) else {
            return false;
        };
        self.registry.release(backend.slot());
        info!(device_id = %id, slot = backend.slot().get(), "Compass detached");
        true
    }

    pub(crate) fn reject(&self, id: DeviceId) {
        self.diag.emit(
            Severity::Critical,
            &format!("Mag: no room for compass DEVID {}", id),
        );
    }

    /// Run `f` on the parameters of the slot holding `rank` and commit its writes
    fn update_slot<R>(
        &mut self,
        rank: Rank,
        f: impl FnOnce(&mut SlotParams, DeviceId, &mut ParamBatch) -> Result<R>,
    ) -> Result<Option<R>> {
        let Some(index) = self.registry.slot_for_rank(rank) else {
            debug!(rank = rank.get(), "No compass at rank");
            return Ok(None);
        };
        let mut batch = ParamBatch::new();
        let out = match self.registry.slots_mut().get_mut(index) {
            Some(slot) => f(&mut slot.params, slot.state.detected_id, &mut batch)?,
            None => return Ok(None),
        };
        self.commit(batch)?;
        Ok(Some(out))
    }

    // ========================================================================
    // Calibration
    // ========================================================================

    pub fn calibration(&self, rank: Rank) -> Option<SlotCalibration> {
        self.slot_at_rank(rank).map(|s| s.params.snapshot())
    }

    pub fn offsets(&self, rank: Rank) -> Option<Vector3<f32>> {
        self.slot_at_rank(rank).map(|s| *s.params.offset.get())
    }

    /// Change offsets in memory only. False when no compass holds `rank`.
    pub fn set_offsets(&mut self, rank: Rank, offsets: Vector3<f32>) -> Result<bool> {
        self.update_slot(rank, |p, _, _| {
            p.offset.set(offsets);
            Ok(())
        })
        .map(|o| o.is_some())
    }

    pub fn set_and_save_offsets(&mut self, rank: Rank, offsets: Vector3<f32>) -> Result<bool> {
        self.update_slot(rank, |p, detected, batch| {
            p.offset.set(offsets);
            p.offset.save(batch)?;
            p.dev_id.set_and_save(detected, batch)
        })
        .map(|o| o.is_some())
    }

    /// Persist offsets and mark the attached device as the calibrated one
    pub fn save_offsets(&mut self, rank: Rank) -> Result<bool> {
        self.update_slot(rank, |p, detected, batch| {
            p.offset.save(batch)?;
            p.dev_id.set_and_save(detected, batch)
        })
        .map(|o| o.is_some())
    }

    pub fn save_all_offsets(&mut self) -> Result<()> {
        let ranks: Vec<Rank> = self.registry.priority().ranks().collect();
        for rank in ranks {
            self.save_offsets(rank)?;
        }
        Ok(())
    }

    pub fn set_and_save_diagonals(&mut self, rank: Rank, diagonals: Vector3<f32>) -> Result<bool> {
        self.update_slot(rank, |p, _, batch| p.diagonals.set_and_save(diagonals, batch))
            .map(|o| o.is_some())
    }

    pub fn set_and_save_offdiagonals(&mut self, rank: Rank, offdiagonals: Vector3<f32>) -> Result<bool> {
        self.update_slot(rank, |p, _, batch| p.offdiagonals.set_and_save(offdiagonals, batch))
            .map(|o| o.is_some())
    }

    pub fn set_and_save_scale_factor(&mut self, rank: Rank, scale_factor: f32) -> Result<bool> {
        self.update_slot(rank, |p, _, batch| p.scale_factor.set_and_save(scale_factor, batch))
            .map(|o| o.is_some())
    }

    pub fn set_and_save_orientation(&mut self, rank: Rank, orientation: Rotation) -> Result<bool> {
        self.update_slot(rank, |p, _, batch| {
            p.orientation.set_and_save_if_changed(orientation, batch)
        })
        .map(|o| o.is_some())
    }

    pub fn set_motor_compensation(&mut self, rank: Rank, factor: Vector3<f32>) -> Result<bool> {
        self.update_slot(rank, |p, _, _| {
            p.motor_compensation.set(factor);
            Ok(())
        })
        .map(|o| o.is_some())
    }

    pub fn save_motor_compensation(&mut self) -> Result<()> {
        let ranks: Vec<Rank> = self.registry.priority().ranks().collect();
        for rank in ranks {
            self.update_slot(rank, |p, _, batch| p.motor_compensation.save(batch))?;
        }
        Ok(())
    }

    pub fn set_use_for_yaw(&mut self, rank: Rank, use_for_yaw: bool) -> Result<bool> {
        self.update_slot(rank, |p, _, batch| {
            p.use_for_yaw.set_and_save_if_changed(use_for_yaw, batch)
        })
        .map(|o| o.is_some())
    }

    /// Scale factor is set and within the accepted range
    pub fn have_scale_factor(&self, rank: Rank) -> bool {
        self.available()
            && self
                .slot_at_rank(rank)
                .map(|s| s.params.snapshot().has_scale_factor())
                .unwrap_or(false)
    }

    /// Persist the in-memory id of every slot that has one
    pub fn force_save_calibration(&mut self) -> Result<()> {
        let mut batch = ParamBatch::new();
        for (_, slot) in self.registry.slots_mut().iter_mut() {
            if !slot.params.dev_id.get().is_none() {
                slot.params.dev_id.save(&mut batch)?;
            }
        }
        self.commit(batch)
    }

    /// User edit of the persisted priority list, applied on next boot
    pub fn set_priority(&mut self, rank: Rank, id: DeviceId) -> Result<()> {
        let mut batch = ParamBatch::new();
        self.registry.priority_mut().set_stored(rank, id, &mut batch)?;
        self.commit(batch)?;
        info!(rank = rank.get(), device_id = %id, "Compass priority changed, takes effect after reboot");
        Ok(())
    }

    /// Forget ranks whose device is absent and persist zeroed slot ids
    pub fn reset_missing_ids(&mut self) -> Result<Vec<(Rank, DeviceId)>> {
        let mut batch = ParamBatch::new();
        let removed = self.registry.reset_missing(&mut batch)?;
        self.commit(batch)?;
        for (rank, id) in &removed {
            self.diag.emit(
                Severity::Alert,
                &format!("Mag: Compass #{} with DEVID {} removed", rank, id),
            );
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Compass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compass")
            .field("available", &self.available())
            .field("count", &self.count())
            .field("priority", &self.registry.priority().working_ids())
            .field("backends", &self.backends)
            .finish()
    }
}
