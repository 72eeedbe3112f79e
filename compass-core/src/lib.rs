//! Compass Core Library
//!
//! Identity, priority and lifecycle management for a set of magnetometers.
//!
//! # Features
//!
//! - **Stable identity**: Each physical sensor keeps its calibration slot and priority rank across reboots
//! - **Boot detection**: Probe plan over local buses plus network discovery, expected devices first
//! - **Hot-plug**: Rate-limited network rescans that attach, detach and replace sensors at runtime
//! - **Health**: Staleness, yaw usability and inter-sensor field consistency
//! - **Persistence**: Batched, atomic parameter storage with version checks
//!
//! # Module Structure
//!
//! - `data/` - Device ids, parameter storage, validation
//! - `registry/` - Slots, priority list, overflow list
//! - `hw/` - Bus traits, probe plan, driver pool
//! - `hotplug/` - Runtime rescan and replacement
//!
//! # Example
//!
//! ```no_run
//! use compass_core::{Compass, CompassSettings, MemoryStorage, TracingSink};
//! use compass_core::sim::SimBus;
//! use std::sync::Arc;
//!
//! let mut compass = Compass::new(
//!     CompassSettings::default(),
//!     Box::new(MemoryStorage::new()),
//!     Arc::new(TracingSink),
//! ).unwrap();
//! let mut bus = SimBus::new();
//! let report = compass.init(&mut bus, 0).unwrap();
//! println!("{} compasses", report.assigned.len());
//! ```

// Grouped modules
pub mod data;
pub mod hotplug;
pub mod hw;
pub mod registry;

// Standalone modules
pub mod compass;
pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod prearm;
pub mod settings;
pub mod sim;

// Re-export primary types from data/
pub use data::{BusType, DeviceId, LearnMode, Rank, Rotation, SlotIndex};

// Re-export persistence types from data/
pub use data::{JsonFileStorage, MemoryStorage, Param, ParamBatch, ParamStorage};

// Re-export validation functions from data/
pub use data::validate_settings;

// Re-export error types
pub use error::{CompassError, Result};

// Re-export the subsystem
pub use compass::Compass;
pub use diagnostics::{DiagnosticSink, RecordingSink, Severity, TracingSink};
pub use health::{fields_consistent, ConsistencyLimits};
pub use prearm::PreArmFailure;
pub use settings::{get_settings_path, load_settings, save_settings, CompassSettings, ExhaustionPolicy};

// Re-export registry types
pub use registry::{IdentityRegistry, Registration, SlotCalibration};

// Re-export hardware types from hw/
pub use hw::{
    probe_plan, BootReport, BusClass, BusEnumeration, BusLocation, CompassBus, DriverType,
    NetworkBus, ProbeRequest, ProbeSource, Prober, SensorDriver, StaticProbe,
};

// Re-export hot-plug types
pub use hotplug::{Replacement, ReplacementKind, RescanPlan, RescanReport};
