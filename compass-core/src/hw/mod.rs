//! Hardware interaction
//!
//! Bus abstractions, the boot probe plan, and the pool of opened drivers.

mod backend;
pub mod bus;
pub mod detection;

pub use backend::{Backend, BackendPool};
pub use bus::{
    BusClass, BusEnumeration, BusLocation, CompassBus, DriverType, NetworkBus, ProbeRequest,
    Prober, SensorDriver,
};
pub use detection::{
    probe_plan, BootReport, ProbeContext, ProbeRule, ProbeSource, StaticProbe, SCAN_RULES,
};
