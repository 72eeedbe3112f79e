//! Boot-time detection
//!
//! Probe attempts come from a data table of rules (bus scan) or from a
//! static list in the settings. One generic loop walks the attempts, skips
//! addresses that already have a driver, and collects every sensor that
//! answers. Registration happens after probing so devices the slots already
//! know are bound first, whatever order they answered in.

use super::bus::{BusClass, BusEnumeration, BusLocation, CompassBus, DriverType, ProbeRequest, SensorDriver};
use crate::compass::Compass;
use crate::data::{DeviceId, ParamBatch, Rank, Rotation, SlotIndex};
use crate::diagnostics::Severity;
use crate::error::Result;
use crate::hotplug::Replacement;
use crate::registry::Registration;
use crate::settings::ExhaustionPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// Probe table
// ============================================================================

const HMC5883_ADDRS: &[u8] = &[0x1e];
const QMC5883L_ADDRS: &[u8] = &[0x0d];
const AK09916_ADDRS: &[u8] = &[0x0c];
const LIS3MDL_ADDRS: &[u8] = &[0x1c, 0x1e];
const IST8310_ADDRS: &[u8] = &[0x0c, 0x0d, 0x0e, 0x0f];
const IST8308_ADDRS: &[u8] = &[0x0c];
const MMC3416_ADDRS: &[u8] = &[0x30];
const RM3100_ADDRS: &[u8] = &[0x20, 0x21, 0x22, 0x23];
const BMM150_ADDRS: &[u8] = &[0x10, 0x11, 0x12, 0x13];

/// Inputs the rule predicates look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeContext {
    /// Treat sensors on internal buses as external
    pub all_external: bool,
    pub probe_internal: bool,
}

/// One row of the scan table
#[derive(Debug, Clone, Copy)]
pub struct ProbeRule {
    pub driver: DriverType,
    pub class: BusClass,
    pub addresses: &'static [u8],
    pub rotation: Rotation,
    pub when: fn(&ProbeContext) -> bool,
}

fn always(_: &ProbeContext) -> bool {
    true
}

fn internal_enabled(ctx: &ProbeContext) -> bool {
    ctx.probe_internal
}

const fn external_rule(driver: DriverType, addresses: &'static [u8]) -> ProbeRule {
    ProbeRule {
        driver,
        class: BusClass::I2cExternal,
        addresses,
        rotation: Rotation::None,
        when: always,
    }
}

const fn internal_rule(driver: DriverType, addresses: &'static [u8]) -> ProbeRule {
    ProbeRule {
        driver,
        class: BusClass::I2cInternal,
        addresses,
        rotation: Rotation::None,
        when: internal_enabled,
    }
}

/// Generic I2C scan, external buses first
pub static SCAN_RULES: &[ProbeRule] = &[
    external_rule(DriverType::Hmc5883, HMC5883_ADDRS),
    internal_rule(DriverType::Hmc5883, HMC5883_ADDRS),
    external_rule(DriverType::Qmc5883l, QMC5883L_ADDRS),
    internal_rule(DriverType::Qmc5883l, QMC5883L_ADDRS),
    external_rule(DriverType::Ak09916, AK09916_ADDRS),
    internal_rule(DriverType::Ak09916, AK09916_ADDRS),
    external_rule(DriverType::Lis3mdl, LIS3MDL_ADDRS),
    internal_rule(DriverType::Lis3mdl, LIS3MDL_ADDRS),
    external_rule(DriverType::Ist8310, IST8310_ADDRS),
    internal_rule(DriverType::Ist8310, IST8310_ADDRS),
    external_rule(DriverType::Ist8308, IST8308_ADDRS),
    internal_rule(DriverType::Ist8308, IST8308_ADDRS),
    external_rule(DriverType::Mmc3416, MMC3416_ADDRS),
    internal_rule(DriverType::Mmc3416, MMC3416_ADDRS),
    external_rule(DriverType::Rm3100, RM3100_ADDRS),
    internal_rule(DriverType::Rm3100, RM3100_ADDRS),
    external_rule(DriverType::Bmm150, BMM150_ADDRS),
    internal_rule(DriverType::Bmm150, BMM150_ADDRS),
];

/// A fixed probe from the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticProbe {
    pub driver: DriverType,
    pub class: BusClass,
    pub bus: u8,
    pub address: u8,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub external: bool,
}

/// Where probe attempts come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSource {
    BusScan {
        #[serde(default)]
        all_external: bool,
        #[serde(default = "default_true")]
        probe_internal: bool,
    },
    Static {
        probes: Vec<StaticProbe>,
    },
}

fn default_true() -> bool {
    true
}

impl Default for ProbeSource {
    fn default() -> Self {
        Self::BusScan {
            all_external: false,
            probe_internal: true,
        }
    }
}

/// Expand a probe source into concrete attempts, honouring the driver mask
pub fn probe_plan<B>(source: &ProbeSource, buses: &B, driver_mask: u32) -> Vec<ProbeRequest>
where
    B: BusEnumeration + ?Sized,
{
    match source {
        ProbeSource::BusScan {
            all_external,
            probe_internal,
        } => {
            let ctx = ProbeContext {
                all_external: *all_external,
                probe_internal: *probe_internal,
            };
            let mut plan = Vec::new();
            for rule in SCAN_RULES {
                if !rule.driver.enabled(driver_mask) || !(rule.when)(&ctx) {
                    continue;
                }
                let external = rule.class == BusClass::I2cExternal || ctx.all_external;
                for bus in buses.buses(rule.class) {
                    for &address in rule.addresses {
                        plan.push(ProbeRequest {
                            driver: rule.driver,
                            class: rule.class,
                            location: BusLocation::new(bus, address),
                            rotation: rule.rotation,
                            external,
                        });
                    }
                }
            }
            plan
        }
        ProbeSource::Static { probes } => probes
            .iter()
            .filter(|p| p.driver.enabled(driver_mask))
            .map(|p| ProbeRequest {
                driver: p.driver,
                class: p.class,
                location: BusLocation::new(p.bus, p.address),
                rotation: p.rotation,
                external: p.external,
            })
            .collect(),
    }
}

// ============================================================================
// Detection
// ============================================================================

/// An opened driver waiting to be registered
pub(crate) struct Candidate {
    pub(crate) driver: Box<dyn SensorDriver>,
    pub(crate) mount: Rotation,
    pub(crate) external: bool,
}

impl Candidate {
    pub(crate) fn network(driver: Box<dyn SensorDriver>) -> Self {
        Self {
            driver,
            mount: Rotation::None,
            external: true,
        }
    }

    pub(crate) fn device_id(&self) -> DeviceId {
        self.driver.device_id()
    }
}

/// What boot detection found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootReport {
    pub assigned: Vec<(DeviceId, SlotIndex, Rank)>,
    pub overflow: Vec<DeviceId>,
    pub rejected: Vec<DeviceId>,
    /// Probe attempts skipped because the address already had a driver
    pub duplicates: usize,
    pub replacements: Vec<Replacement>,
}

impl BootReport {
    pub fn rank_of(&self, id: DeviceId) -> Option<Rank> {
        self.assigned
            .iter()
            .find(|(d, _, _)| *d == id)
            .map(|(_, _, r)| *r)
    }

    pub fn slot_of(&self, id: DeviceId) -> Option<SlotIndex> {
        self.assigned
            .iter()
            .find(|(d, _, _)| *d == id)
            .map(|(_, s, _)| *s)
    }
}

impl Compass {
    pub(crate) fn detect_backends(&mut self, bus: &mut dyn CompassBus) -> Result<BootReport> {
        let mut report = BootReport::default();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mask = self.settings.driver_type_mask;

        let plan = probe_plan(&self.settings.probe, &*bus, mask);
        debug!(attempts = plan.len(), "Probing compass buses");

        for request in &plan {
            let canonical = request.location.canonical_id(request.class);
            if self.have_driver(canonical, &candidates) {
                report.duplicates += 1;
                continue;
            }
            if let Some(driver) = bus.probe(request) {
                debug!(
                    device_id = %driver.device_id(),
                    driver = ?request.driver,
                    bus = request.location.bus,
                    address = request.location.address,
                    "Compass answered probe"
                );
                candidates.push(Candidate {
                    driver,
                    mount: request.rotation,
                    external: request.external,
                });
            }
        }

        let discovered = if DriverType::Network.enabled(mask) {
            bus.discovered()
        } else {
            Vec::new()
        };
        for &id in &discovered {
            if self.have_driver(id, &candidates) {
                report.duplicates += 1;
                continue;
            }
            if let Some(driver) = bus.open(id) {
                candidates.push(Candidate::network(driver));
            }
        }

        // Devices the slots already know go first
        candidates.sort_by_key(|c| !self.registry.slots().is_expected(c.device_id()));

        let mut spare = Vec::new();
        let mut batch = ParamBatch::new();
        for candidate in candidates {
            let id = candidate.device_id();
            match self.registry.register(id, &mut batch) {
                Ok(Registration::Assigned { slot, rank }) => {
                    if self.attach(slot, candidate) {
                        report.assigned.push((id, slot, rank));
                    }
                }
                Ok(Registration::Overflow { .. }) => {
                    report.overflow.push(id);
                    if id.is_hot_pluggable() {
                        spare.push(candidate);
                    }
                }
                Err(e) if e.is_exhausted() => match self.settings.exhaustion_policy {
                    ExhaustionPolicy::Halt => {
                        self.diag
                            .emit(Severity::Critical, "Mag: too many compass instances");
                        self.commit(batch)?;
                        return Err(e);
                    }
                    ExhaustionPolicy::RejectCandidate => {
                        self.reject(id);
                        report.rejected.push(id);
                    }
                },
                Err(e) => {
                    self.commit(batch)?;
                    return Err(e);
                }
            }
        }
        self.commit(batch)?;

        report.replacements = self.evaluate_replacements(&discovered, spare)?;

        if report.assigned.is_empty() {
            warn!("No compass backends available");
        } else {
            info!(
                assigned = report.assigned.len(),
                overflow = report.overflow.len(),
                rejected = report.rejected.len(),
                "Compass detection complete"
            );
        }
        Ok(report)
    }

    /// True if something already drives the bus address of `id`
    fn have_driver(&self, id: DeviceId, candidates: &[Candidate]) -> bool {
        let canonical = id.canonical();
        self.registry
            .slots()
            .iter()
            .any(|(_, s)| s.state.registered && s.params.dev_id.get().canonical() == canonical)
            || candidates
                .iter()
                .any(|c| c.device_id().canonical() == canonical)
    }
}
