//! Runtime network rescan
//!
//! Runs only while disarmed and at most once per interval. The work is
//! split so a caller sharing the [`Compass`] behind a lock can do bus I/O
//! without holding it:
//!
//! 1. `rescan_due` (locked) gates on arming state and rate
//! 2. `NetworkBus::discovered` (unlocked)
//! 3. `plan_rescan` (locked) picks which devices need a driver
//! 4. `NetworkBus::open` for each (unlocked)
//! 5. `apply_rescan` (locked) detaches vanished devices, registers new
//!    ones and offers only those new ones as replacements

use super::Replacement;
use crate::compass::Compass;
use crate::data::{DeviceId, ParamBatch, Rank, SlotIndex};
use crate::error::Result;
use crate::hw::detection::Candidate;
use crate::hw::{DriverType, NetworkBus, SensorDriver};
use crate::registry::Registration;
use tracing::{debug, info};

/// Rate limiter for the runtime rescan
#[derive(Debug, Clone)]
pub struct RuntimeRescan {
    interval_ms: u64,
    last_try_ms: Option<u64>,
}

impl RuntimeRescan {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_try_ms: None,
        }
    }

    /// True at most once per interval; records the attempt when it is
    pub fn due(&mut self, now_ms: u64) -> bool {
        if let Some(last) = self.last_try_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                return false;
            }
        }
        self.last_try_ms = Some(now_ms);
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanPlan {
    /// Everything announcing on the bus right now
    pub discovered: Vec<DeviceId>,
    /// Announcing devices that have no driver yet
    pub to_open: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RescanReport {
    pub attached: Vec<(DeviceId, SlotIndex, Rank)>,
    pub detached: Vec<DeviceId>,
    pub overflow: Vec<DeviceId>,
    pub rejected: Vec<DeviceId>,
    pub replacements: Vec<Replacement>,
}

impl RescanReport {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
            && self.detached.is_empty()
            && self.overflow.is_empty()
            && self.rejected.is_empty()
            && self.replacements.is_empty()
    }
}

impl Compass {
    /// Gate for the runtime rescan. Armed calls do not consume the interval.
    pub fn rescan_due(&mut self, now_ms: u64, armed: bool) -> bool {
        if !self.available() || armed {
            return false;
        }
        if !DriverType::Network.enabled(self.settings.driver_type_mask) {
            return false;
        }
        self.rescan.due(now_ms)
    }

    pub fn plan_rescan(&self, discovered: Vec<DeviceId>) -> RescanPlan {
        let mut to_open: Vec<DeviceId> = Vec::new();
        for &id in &discovered {
            if id.is_hot_pluggable() && !self.backends.has_device(id) && !to_open.contains(&id) {
                to_open.push(id);
            }
        }
        RescanPlan {
            discovered,
            to_open,
        }
    }

    pub fn apply_rescan(&mut self, plan: RescanPlan, drivers: Vec<Box<dyn SensorDriver>>) -> Result<RescanReport> {
        let mut report = RescanReport::default();

        for id in self.backends.device_ids() {
            if id.is_hot_pluggable() && !plan.discovered.contains(&id) && self.detach(id) {
                report.detached.push(id);
            }
        }

        let mut spare = Vec::new();
        let mut batch = ParamBatch::new();
        for driver in drivers {
            let candidate = Candidate::network(driver);
            let id = candidate.device_id();
            if self.backends.has_device(id) {
                continue;
            }
            match self.registry.register(id, &mut batch) {
                Ok(Registration::Assigned { slot, rank }) => {
                    if self.attach(slot, candidate) {
                        report.attached.push((id, slot, rank));
                    }
                }
                Ok(Registration::Overflow { .. }) => {
                    report.overflow.push(id);
                    spare.push(candidate);
                }
                // A runtime rescan never halts, whatever the boot policy
                Err(e) if e.is_exhausted() => {
                    self.reject(id);
                    report.rejected.push(id);
                }
                Err(e) => {
                    self.commit(batch)?;
                    return Err(e);
                }
            }
        }
        self.commit(batch)?;

        // Only devices that gained a backend or an overflow entry just now.
        // A sensor that was already attached keeps its rank when a higher
        // ranked one drops out.
        let fresh: Vec<DeviceId> = report
            .attached
            .iter()
            .map(|&(id, _, _)| id)
            .chain(report.overflow.iter().copied())
            .collect();
        report.replacements = self.evaluate_replacements(&fresh, spare)?;

        if report.is_empty() {
            debug!("Rescan found no changes");
        } else {
            info!(
                attached = report.attached.len(),
                detached = report.detached.len(),
                replacements = report.replacements.len(),
                "Compass rescan applied"
            );
        }
        Ok(report)
    }

    /// Whole rescan in one call, for callers that own the bus outright
    pub fn rescan(&mut self, now_ms: u64, armed: bool, bus: &mut dyn NetworkBus) -> Result<Option<RescanReport>> {
        if !self.rescan_due(now_ms, armed) {
            return Ok(None);
        }
        let plan = self.plan_rescan(bus.discovered());
        let drivers = plan.to_open.iter().filter_map(|&id| bus.open(id)).collect();
        self.apply_rescan(plan, drivers).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit() {
        let mut r = RuntimeRescan::new(1000);
        assert!(r.due(5_000));
        assert!(!r.due(5_999));
        assert!(r.due(6_000));
        assert!(!r.due(6_500));
    }
}
