//! End-to-end scenarios for the compass subsystem
//!
//! Each test drives a `Compass` against the simulated bus. A "reboot" is a
//! fresh `Compass` built over a clone of the same storage.

use compass_core::sim::SimBus;
use compass_core::{
    BootReport, BusClass, Compass, CompassError, CompassSettings, DeviceId, DiagnosticSink,
    DriverType, ExhaustionPolicy, JsonFileStorage, LearnMode, MemoryStorage, ParamStorage,
    PreArmFailure, Rank, RecordingSink, Replacement, ReplacementKind, Rotation, SlotIndex,
};
use nalgebra::Vector3;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Test utilities
fn earth() -> Vector3<f32> {
    Vector3::new(200.0, 100.0, -400.0)
}

fn settings(max_instances: usize, max_unregistered: usize) -> CompassSettings {
    CompassSettings {
        max_instances,
        max_unregistered,
        ..CompassSettings::default()
    }
}

fn boot_with_sink(
    storage: &MemoryStorage,
    settings: CompassSettings,
    bus: &mut SimBus,
) -> (Compass, BootReport, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let diag: Arc<dyn DiagnosticSink> = sink.clone();
    let mut compass = Compass::new(settings, Box::new(storage.clone()), diag).unwrap();
    let report = compass.init(bus, 0).unwrap();
    (compass, report, sink)
}

fn boot(storage: &MemoryStorage, settings: CompassSettings, bus: &mut SimBus) -> (Compass, BootReport) {
    let (compass, report, _) = boot_with_sink(storage, settings, bus);
    (compass, report)
}

fn stored(storage: &MemoryStorage, key: &str) -> DeviceId {
    storage.get_as(key).unwrap_or(DeviceId::NONE)
}

fn r(i: usize) -> Rank {
    Rank::new(i)
}

// ============================================================================
// Boot assignment
// ============================================================================

#[test]
fn test_first_boot_assigns_in_detection_order() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());

    let (compass, report) = boot(&storage, settings(3, 2), &mut bus);

    assert_eq!(report.rank_of(a), Some(r(0)));
    assert_eq!(report.slot_of(a), Some(SlotIndex::new(0)));
    assert_eq!(report.rank_of(b), Some(r(1)));
    assert_eq!(report.slot_of(b), Some(SlotIndex::new(1)));
    assert_eq!(compass.count(), 2);

    assert_eq!(stored(&storage, "compass.priority.0"), a);
    assert_eq!(stored(&storage, "compass.priority.1"), b);
    assert_eq!(stored(&storage, "compass.priority.2"), DeviceId::NONE);
}

#[test]
fn test_local_bus_scan() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let hmc = bus.add_local(DriverType::Hmc5883, BusClass::I2cExternal, 0, 0x1e, earth());
    let ist = bus.add_local(DriverType::Ist8310, BusClass::I2cInternal, 1, 0x0e, earth());

    let (compass, report) = boot(&storage, settings(3, 2), &mut bus);

    assert_eq!(report.rank_of(hmc), Some(r(0)));
    assert_eq!(report.rank_of(ist), Some(r(1)));
    // The LIS3MDL rule also covers 0x1e and must not probe it again
    assert!(report.duplicates > 0);
    assert!(compass.calibration(r(0)).unwrap().external);
    assert!(!compass.calibration(r(1)).unwrap().external);
}

#[test]
fn test_driver_mask_skips_family() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_local(DriverType::Hmc5883, BusClass::I2cExternal, 0, 0x1e, earth());
    let net = bus.add_network(10, earth());

    let mut s = settings(3, 2);
    s.driver_type_mask = DriverType::Hmc5883.bit();
    let (compass, report) = boot(&storage, s, &mut bus);

    assert_eq!(report.assigned.len(), 1);
    assert_eq!(compass.device_at(r(0)), net);
}

#[test]
fn test_identity_is_independent_of_probe_order() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    {
        let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);
        assert!(compass.set_and_save_offsets(r(0), Vector3::new(10.0, 0.0, 0.0)).unwrap());
        assert!(compass.set_and_save_offsets(r(1), Vector3::new(20.0, 0.0, 0.0)).unwrap());
    }

    // Same sensors, announcing in the opposite order
    let mut reversed = SimBus::new();
    reversed.add_network(11, earth());
    reversed.add_network(10, earth());
    let (compass, report) = boot(&storage, settings(3, 2), &mut reversed);

    assert_eq!(compass.device_at(r(0)), a);
    assert_eq!(compass.device_at(r(1)), b);
    assert_eq!(report.slot_of(a), Some(SlotIndex::new(0)));
    assert_eq!(compass.offsets(r(0)), Some(Vector3::new(10.0, 0.0, 0.0)));
    assert_eq!(compass.offsets(r(1)), Some(Vector3::new(20.0, 0.0, 0.0)));
    assert!(compass.configured(r(0)));
    assert!(compass.configured(r(1)));
}

#[test]
fn test_boot_reorders_calibration_to_match_priority() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());

    storage.insert("compass.priority.0", b).unwrap();
    storage.insert("compass.priority.1", a).unwrap();
    storage.insert("compass.slot.0.dev_id", a).unwrap();
    storage.insert("compass.slot.0.offset", Vector3::new(1.0f32, 2.0, 3.0)).unwrap();
    storage.insert("compass.slot.1.dev_id", b).unwrap();
    storage.insert("compass.slot.1.offset", Vector3::new(4.0f32, 5.0, 6.0)).unwrap();

    let (compass, report) = boot(&storage, settings(3, 2), &mut bus);

    assert_eq!(stored(&storage, "compass.slot.0.dev_id"), b);
    assert_eq!(
        storage.get_as::<Vector3<f32>>("compass.slot.0.offset"),
        Some(Vector3::new(4.0, 5.0, 6.0))
    );
    assert_eq!(report.slot_of(b), Some(SlotIndex::new(0)));
    assert_eq!(report.rank_of(b), Some(r(0)));
    assert_eq!(compass.offsets(r(0)), Some(Vector3::new(4.0, 5.0, 6.0)));
    assert_eq!(compass.offsets(r(1)), Some(Vector3::new(1.0, 2.0, 3.0)));
}

#[test]
fn test_legacy_primary_migrates_into_priority() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());

    storage.insert("compass.primary", 1usize).unwrap();
    storage.insert("compass.slot.0.dev_id", a).unwrap();
    storage.insert("compass.slot.1.dev_id", b).unwrap();

    let (compass, _) = boot(&storage, settings(3, 2), &mut bus);

    assert_eq!(stored(&storage, "compass.priority.0"), b);
    assert_eq!(compass.device_at(r(0)), b);
    assert_eq!(compass.device_at(r(1)), a);
    assert_eq!(stored(&storage, "compass.slot.0.dev_id"), b);
}

// ============================================================================
// Exhaustion
// ============================================================================

#[test]
fn test_exhaustion_rejects_candidate_by_default() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let c = bus.add_network(12, earth());

    let (compass, report, sink) = boot_with_sink(&storage, settings(1, 1), &mut bus);

    assert_eq!(report.rank_of(a), Some(r(0)));
    assert_eq!(report.overflow, vec![b]);
    assert_eq!(report.rejected, vec![c]);
    assert_eq!(compass.overflow_entries(), vec![b]);
    assert!(sink.contains("no room for compass"));
}

#[test]
fn test_exhaustion_halts_when_configured() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    bus.add_network(11, earth());
    bus.add_network(12, earth());

    let mut s = settings(1, 1);
    s.exhaustion_policy = ExhaustionPolicy::Halt;
    let sink = Arc::new(RecordingSink::new());
    let diag: Arc<dyn DiagnosticSink> = sink.clone();
    let mut compass = Compass::new(s, Box::new(storage.clone()), diag).unwrap();

    let err = compass.init(&mut bus, 0).unwrap_err();
    assert!(err.is_exhausted());
    assert!(!compass.available());
    assert!(sink.contains("too many compass instances"));
}

// ============================================================================
// Replacement
// ============================================================================

/// Boot once with `a` and `b` and calibrate both, so the next boot expects them
fn calibrated_pair(storage: &MemoryStorage, bus: &mut SimBus, n: usize, m: usize) {
    let (mut compass, _) = boot(storage, settings(n, m), bus);
    compass.set_and_save_offsets(r(0), Vector3::new(10.0, 0.0, 0.0)).unwrap();
    compass.set_and_save_offsets(r(1), Vector3::new(20.0, 0.0, 0.0)).unwrap();
}

#[test]
fn test_previous_overflow_device_is_not_a_replacement() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    bus.add_network(11, earth());
    let x = bus.add_network(12, earth());

    {
        let (mut compass, report) = boot(&storage, settings(2, 2), &mut bus);
        assert_eq!(report.overflow, vec![x]);
        compass.set_and_save_offsets(r(0), Vector3::new(10.0, 0.0, 0.0)).unwrap();
        compass.set_and_save_offsets(r(1), Vector3::new(20.0, 0.0, 0.0)).unwrap();
    }
    assert_eq!(stored(&storage, "compass.overflow.0"), x);

    bus.set_present(a, false);
    let (mut compass, report) = boot(&storage, settings(2, 2), &mut bus);

    assert!(report.replacements.is_empty());
    assert_eq!(compass.device_at(r(0)), a);
    assert_eq!(compass.overflow_entries()[0], x);
    assert_eq!(compass.check_configured(), Err(PreArmFailure::NotFound { rank: r(0) }));

    // Nor at runtime
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();
    assert!(report.replacements.is_empty());
    assert_eq!(compass.device_at(r(0)), a);
}

#[test]
fn test_new_network_device_replaces_missing_one_at_boot() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    bus.add_network(11, earth());
    calibrated_pair(&storage, &mut bus, 2, 2);

    bus.set_present(a, false);
    let c = bus.add_network(13, earth());
    let (compass, report, sink) = boot_with_sink(&storage, settings(2, 2), &mut bus);

    assert_eq!(
        report.replacements,
        vec![Replacement {
            rank: r(0),
            replaced: a,
            by: c,
            kind: ReplacementKind::Attached { slot: SlotIndex::new(0) },
        }]
    );
    assert_eq!(compass.device_at(r(0)), c);
    assert_eq!(stored(&storage, "compass.priority.0"), c);
    assert!(!compass.overflow_entries().contains(&c));
    assert!(sink.contains(&format!("Mag: Compass #0 with DEVID {} replaced", a)));

    // Inherited calibration belongs to the old sensor
    assert!(!compass.configured(r(0)));
    assert_eq!(compass.check_configured(), Err(PreArmFailure::NotCalibrated));
}

#[test]
fn test_runtime_replacement_from_overflow() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    bus.add_network(11, earth());
    calibrated_pair(&storage, &mut bus, 2, 2);

    let (mut compass, _) = boot(&storage, settings(2, 2), &mut bus);
    let c = bus.add_network(13, earth());

    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.overflow, vec![c]);
    assert!(report.replacements.is_empty());
    // Runtime overflow stays in memory
    assert_eq!(stored(&storage, "compass.overflow.0"), DeviceId::NONE);

    bus.set_present(a, false);
    let report = compass.rescan(2_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.detached, vec![a]);
    assert_eq!(report.replacements.len(), 1);
    assert_eq!(report.replacements[0].by, c);
    assert_eq!(report.replacements[0].rank, r(0));
    assert_eq!(compass.device_at(r(0)), c);
}

#[test]
fn test_unexpected_lower_rank_is_promoted() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    // `a` is unplugged and `c` plugged in between two rescans
    bus.set_present(a, false);
    let c = bus.add_network(12, earth());
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();

    assert_eq!(report.attached, vec![(c, SlotIndex::new(2), r(2))]);
    assert_eq!(
        report.replacements,
        vec![Replacement {
            rank: r(0),
            replaced: a,
            by: c,
            kind: ReplacementKind::Promoted { from: r(2) },
        }]
    );
    assert_eq!(compass.device_at(r(0)), c);
    assert_eq!(compass.device_at(r(1)), b);
    assert_eq!(compass.device_at(r(2)), DeviceId::NONE);
    assert_eq!(stored(&storage, "compass.priority.0"), c);
    assert!(compass.field(r(0)).is_some());
}

#[test]
fn test_dropout_does_not_promote_attached_sensor() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(2, 2), &mut bus);

    bus.set_present(a, false);
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.detached, vec![a]);
    assert!(report.replacements.is_empty());
    assert_eq!(compass.device_at(r(0)), a);
    assert_eq!(compass.device_at(r(1)), b);
    assert_eq!(stored(&storage, "compass.priority.0"), a);
    assert_eq!(stored(&storage, "compass.priority.1"), b);

    // Back on the bus, back in its own rank
    bus.set_present(a, true);
    let report = compass.rescan(2_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.attached, vec![(a, SlotIndex::new(0), r(0))]);
    assert!(report.replacements.is_empty());
}

#[test]
fn test_expected_sensor_returning_is_not_a_replacement() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    calibrated_pair(&storage, &mut bus, 2, 2);

    bus.set_present(a, false);
    bus.set_present(b, false);
    let (mut compass, report) = boot(&storage, settings(2, 2), &mut bus);
    assert!(report.assigned.is_empty());

    // Both ranks are missing and slot 1 is unregistered, yet it expects `b`
    bus.set_present(b, true);
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();

    assert_eq!(report.attached, vec![(b, SlotIndex::new(1), r(1))]);
    assert!(report.replacements.is_empty());
    assert_eq!(compass.device_at(r(0)), a);
    assert_eq!(compass.device_at(r(1)), b);
    assert_eq!(stored(&storage, "compass.priority.0"), a);
}

// ============================================================================
// Hot-plug
// ============================================================================

#[test]
fn test_detach_and_reattach_keeps_rank() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    bus.set_present(b, false);
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.detached, vec![b]);
    assert_eq!(compass.device_at(r(1)), b);
    assert!(compass.field(r(1)).is_none());

    bus.set_present(b, true);
    let report = compass.rescan(2_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.attached, vec![(b, SlotIndex::new(1), r(1))]);
    assert_eq!(compass.backend_count(), 2);
}

#[test]
fn test_rescan_gated_by_arming_and_rate() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);
    bus.add_network(11, earth());

    assert!(compass.rescan(1_000, true, &mut bus).unwrap().is_none());
    let report = compass.rescan(1_000, false, &mut bus).unwrap().unwrap();
    assert_eq!(report.attached.len(), 1);
    assert!(compass.rescan(1_500, false, &mut bus).unwrap().is_none());
    assert!(compass.rescan(2_000, false, &mut bus).unwrap().unwrap().is_empty());
}

#[test]
fn test_rescan_disabled_when_network_masked() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let mut s = settings(3, 2);
    s.driver_type_mask = DriverType::Network.bit();
    let (mut compass, report) = boot(&storage, s, &mut bus);

    assert!(report.assigned.is_empty());
    assert!(compass.rescan(1_000, false, &mut bus).unwrap().is_none());
}

// ============================================================================
// Health
// ============================================================================

#[test]
fn test_staleness_and_health_mask() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    assert!(compass.read(400));
    assert_eq!(compass.healthy_mask(), 0b11);

    bus.set_silent(a, true);
    assert!(!compass.read(1_000));
    assert!(!compass.healthy(r(0)));
    assert!(compass.healthy(r(1)));
    assert_eq!(compass.healthy_mask(), 0b10);
    assert!(!compass.use_for_yaw());
}

#[test]
fn test_consistency_follows_fields() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    assert!(compass.consistent());
    assert_eq!(compass.num_enabled(), 2);

    bus.set_field(b, Vector3::new(-200.0, -100.0, -400.0));
    compass.read(100);
    assert!(!compass.consistent());

    // Excluding the disagreeing sensor from yaw restores agreement
    compass.set_use_for_yaw(r(1), false).unwrap();
    assert!(compass.consistent());
    assert_eq!(compass.num_enabled(), 1);
}

#[test]
fn test_inflight_learning_blocks_yaw() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    assert!(compass.usable_for_yaw(r(0)));
    compass.set_learn(LearnMode::InFlight);
    assert!(!compass.usable_for_yaw(r(0)));
    assert_eq!(compass.num_enabled(), 0);
    assert!(compass.consistent());
}

// ============================================================================
// Configuration checks
// ============================================================================

#[test]
fn test_configured_needs_saved_offsets() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);

    assert!(!compass.configured(r(0)));
    assert_eq!(compass.check_configured(), Err(PreArmFailure::NotCalibrated));

    // In memory only is not enough
    compass.set_offsets(r(0), Vector3::new(5.0, 5.0, 5.0)).unwrap();
    assert!(!compass.configured(r(0)));

    compass.save_offsets(r(0)).unwrap();
    assert!(compass.configured(r(0)));
    assert_eq!(compass.check_configured(), Ok(()));
}

#[test]
fn test_priority_edit_needs_reboot() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    let (mut compass, _) = boot(&storage, settings(3, 2), &mut bus);
    compass.save_all_offsets().unwrap();
    compass.set_and_save_offsets(r(0), Vector3::new(1.0, 0.0, 0.0)).unwrap();
    compass.set_and_save_offsets(r(1), Vector3::new(1.0, 0.0, 0.0)).unwrap();
    assert_eq!(compass.check_configured(), Ok(()));

    compass.set_priority(r(0), b).unwrap();
    compass.set_priority(r(1), a).unwrap();
    assert_eq!(compass.check_configured(), Err(PreArmFailure::OrderChangePending));
    assert_eq!(compass.device_at(r(0)), a);

    let (compass, _) = boot(&storage, settings(3, 2), &mut bus);
    assert_eq!(compass.device_at(r(0)), b);
    assert_eq!(compass.offsets(r(0)), Some(Vector3::new(1.0, 0.0, 0.0)));
}

#[test]
fn test_reset_missing_ids_forgets_absent_sensor() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());
    calibrated_pair(&storage, &mut bus, 3, 2);

    bus.set_present(a, false);
    let (mut compass, _, sink) = boot_with_sink(&storage, settings(3, 2), &mut bus);
    assert_eq!(compass.check_configured(), Err(PreArmFailure::NotFound { rank: r(0) }));

    let removed = compass.reset_missing_ids().unwrap();
    assert_eq!(removed, vec![(r(0), a)]);
    assert!(sink.contains(&format!("Mag: Compass #0 with DEVID {} removed", a)));
    assert_eq!(stored(&storage, "compass.priority.0"), DeviceId::NONE);
    assert_eq!(stored(&storage, "compass.slot.0.dev_id"), DeviceId::NONE);

    // Next boot compacts the list and b moves up
    let (compass, _) = boot(&storage, settings(3, 2), &mut bus);
    assert_eq!(compass.device_at(r(0)), b);
}

// ============================================================================
// Persistence
// ============================================================================

/// Memory storage whose writes can be made to fail
struct FlakyStorage {
    inner: MemoryStorage,
    failing: Arc<AtomicBool>,
}

impl ParamStorage for FlakyStorage {
    fn read(&self, key: &str) -> Option<Value> {
        self.inner.read(key)
    }

    fn write_batch(&mut self, entries: &[(String, Value)]) -> compass_core::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CompassError::storage("write refused"));
        }
        self.inner.write_batch(entries)
    }
}

#[test]
fn test_failed_save_is_retried_in_full() {
    let storage = MemoryStorage::new();
    let failing = Arc::new(AtomicBool::new(false));
    let flaky = FlakyStorage {
        inner: storage.clone(),
        failing: failing.clone(),
    };
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let mut compass = Compass::new(settings(2, 2), Box::new(flaky), Arc::new(RecordingSink::new())).unwrap();
    compass.init(&mut bus, 0).unwrap();

    let key = "compass.slot.0.orientation";
    failing.store(true, Ordering::SeqCst);
    assert!(compass.set_and_save_orientation(r(0), Rotation::Yaw90).is_err());
    assert_eq!(storage.get_as::<Rotation>(key), None);

    failing.store(false, Ordering::SeqCst);
    assert!(compass.set_and_save_orientation(r(0), Rotation::Yaw90).unwrap());
    assert_eq!(storage.get_as::<Rotation>(key), Some(Rotation::Yaw90));
}

#[test]
fn test_reboot_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.json");
    let mut bus = SimBus::new();
    let a = bus.add_network(10, earth());
    let b = bus.add_network(11, earth());

    {
        let storage = JsonFileStorage::open(&path).unwrap();
        let mut compass =
            Compass::new(settings(3, 2), Box::new(storage), Arc::new(RecordingSink::new())).unwrap();
        compass.init(&mut bus, 0).unwrap();
        compass.set_and_save_offsets(r(1), Vector3::new(7.0, 8.0, 9.0)).unwrap();
    }
    assert!(path.exists());

    let storage = JsonFileStorage::open(&path).unwrap();
    let mut compass =
        Compass::new(settings(3, 2), Box::new(storage), Arc::new(RecordingSink::new())).unwrap();
    compass.init(&mut bus, 0).unwrap();

    assert_eq!(compass.device_at(r(0)), a);
    assert_eq!(compass.device_at(r(1)), b);
    assert_eq!(compass.offsets(r(1)), Some(Vector3::new(7.0, 8.0, 9.0)));
    assert!(compass.configured(r(1)));
}

#[test]
fn test_second_init_is_ignored() {
    let storage = MemoryStorage::new();
    let mut bus = SimBus::new();
    bus.add_network(10, earth());
    let (mut compass, report) = boot(&storage, settings(3, 2), &mut bus);
    assert_eq!(report.assigned.len(), 1);

    let again = compass.init(&mut bus, 10).unwrap();
    assert_eq!(again, BootReport::default());
    assert_eq!(compass.backend_count(), 1);
}
