//! Backend pool
//!
//! Active driver handles, each bound to one slot. At most one handle per
//! canonical bus address; adding beyond capacity fails quietly.

use super::bus::SensorDriver;
use crate::data::{DeviceId, Rotation, SlotIndex};
use tracing::{debug, warn};

pub struct Backend {
    driver: Box<dyn SensorDriver>,
    slot: SlotIndex,
    mount: Rotation,
}

impl Backend {
    pub fn new(driver: Box<dyn SensorDriver>, slot: SlotIndex, mount: Rotation) -> Self {
        Self {
            driver,
            slot,
            mount,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.driver.device_id()
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Board mounting rotation reported by the probe
    pub fn mount(&self) -> Rotation {
        self.mount
    }

    pub fn driver_mut(&mut self) -> &mut dyn SensorDriver {
        self.driver.as_mut()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("device_id", &self.device_id())
            .field("driver", &self.driver.driver_type())
            .field("slot", &self.slot)
            .finish()
    }
}

#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Backend>,
    capacity: usize,
}

impl BackendPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            backends: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.backends.len() >= self.capacity
    }

    pub fn has_device(&self, id: DeviceId) -> bool {
        !id.is_none() && self.backends.iter().any(|b| b.device_id() == id)
    }

    pub fn has_canonical(&self, id: DeviceId) -> bool {
        let canonical = id.canonical();
        self.backends
            .iter()
            .any(|b| b.device_id().canonical() == canonical)
    }

    pub fn for_slot(&self, slot: SlotIndex) -> Option<&Backend> {
        self.backends.iter().find(|b| b.slot() == slot)
    }

    /// Add a handle. Returns false when full or when its address is taken.
    pub fn add(&mut self, backend: Backend) -> bool {
        if self.is_full() {
            warn!(device_id = %backend.device_id(), "Backend pool full, dropping driver");
            return false;
        }
        if self.has_canonical(backend.device_id()) {
            debug!(device_id = %backend.device_id(), "Bus address already has a driver");
            return false;
        }
        self.backends.push(backend);
        true
    }

    pub fn remove_device(&mut self, id: DeviceId) -> Option<Backend> {
        let pos = self.backends.iter().position(|b| b.device_id() == id)?;
        Some(self.backends.remove(pos))
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.backends.iter().map(|b| b.device_id()).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Backend> {
        self.backends.iter_mut()
    }
}
