//! Pre-arm configuration checks
//!
//! A rank is configured when it has non-zero offsets and the device that
//! was calibrated is the one attached now.

use crate::compass::Compass;
use crate::data::{DeviceId, Rank};
use std::fmt;

/// Why the subsystem is not ready to arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreArmFailure {
    /// A calibrated sensor meant for yaw is absent
    NotFound { rank: Rank },
    /// The persisted priority list was edited and needs a reboot
    OrderChangePending,
    NotCalibrated,
}

impl fmt::Display for PreArmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { rank } => write!(f, "Compass {} not Found", rank),
            Self::OrderChangePending => f.write_str("Compass order change requires reboot"),
            Self::NotCalibrated => f.write_str("Compass not calibrated"),
        }
    }
}

impl std::error::Error for PreArmFailure {}

impl Compass {
    /// Calibration for `rank` belongs to the attached device
    pub fn configured(&self, rank: Rank) -> bool {
        if rank.get() >= self.count() {
            return false;
        }
        let Some(slot) = self.slot_at_rank(rank) else {
            return false;
        };
        if slot.params.offset.get().norm() == 0.0 {
            return false;
        }

        let detected = slot.state.detected_id;
        if detected.is_none() {
            return false;
        }

        // Compare against what is really in storage, not the working copy
        let persisted = slot
            .params
            .dev_id
            .reload(self.storage.as_ref())
            .unwrap_or(DeviceId::NONE);
        persisted == detected && persisted == *slot.params.dev_id.get()
    }

    /// Full pre-arm check, reporting the first problem found
    pub fn check_configured(&self) -> Result<(), PreArmFailure> {
        for rank in self.registry.priority().ranks() {
            let id = self.registry.priority().working(rank);
            if id.is_none() {
                continue;
            }
            if self.calibrated_for_yaw_but_absent(id) {
                return Err(PreArmFailure::NotFound { rank });
            }
            if self.usable_for_yaw(rank) && self.registry.priority().pending_reboot(rank) {
                return Err(PreArmFailure::OrderChangePending);
            }
        }

        let all_configured = (0..self.count())
            .map(Rank::new)
            .all(|r| self.configured(r) || !self.usable_for_yaw(r));
        if !all_configured {
            return Err(PreArmFailure::NotCalibrated);
        }
        Ok(())
    }

    /// A slot holds calibration for `id`, is meant for yaw, and nothing is attached
    fn calibrated_for_yaw_but_absent(&self, id: DeviceId) -> bool {
        if self.learn.blocks_yaw() || self.backends.has_device(id) {
            return false;
        }
        self.registry.slots().iter().any(|(_, s)| {
            s.state.expected_id == id && !s.state.registered && *s.params.use_for_yaw.get()
        })
    }
}
