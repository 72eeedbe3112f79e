//! Bus-facing interfaces
//!
//! Raw bus I/O lives outside this crate. The subsystem sees buses through
//! three small traits: enumeration of bus instances, probing a driver at an
//! address, and discovery on the shared network bus.

use crate::data::{BusType, DeviceId, Rotation};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Sensor driver families
///
/// The discriminant is the bit position in the driver type mask. A set bit
/// disables the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverType {
    Hmc5883 = 0,
    Lsm303d = 1,
    Ak8963 = 2,
    Bmm150 = 3,
    Lsm9ds1 = 4,
    Lis3mdl = 5,
    Ak09916 = 6,
    Ist8310 = 7,
    Icm20948 = 8,
    Mmc3416 = 9,
    Sitl = 10,
    Network = 11,
    Qmc5883l = 12,
    Mag3110 = 14,
    Ist8308 = 15,
    Rm3100 = 16,
    Msp = 17,
    ExternalAhrs = 18,
}

impl DriverType {
    pub fn bit(self) -> u32 {
        1u32 << (self as u32)
    }

    pub fn enabled(self, mask: u32) -> bool {
        mask & self.bit() == 0
    }

    /// Variant tag packed into device ids produced by this driver
    pub fn devtype(self) -> u8 {
        self as u8 + 1
    }
}

/// Which group of buses a probe targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusClass {
    I2cExternal,
    I2cInternal,
    Spi,
    Network,
}

impl BusClass {
    pub fn bus_type(self) -> BusType {
        match self {
            Self::I2cExternal | Self::I2cInternal => BusType::I2c,
            Self::Spi => BusType::Spi,
            Self::Network => BusType::Can,
        }
    }
}

/// One place a sensor may answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusLocation {
    pub bus: u8,
    pub address: u8,
}

impl BusLocation {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    /// Id of whatever answers here, without a variant tag
    pub fn canonical_id(self, class: BusClass) -> DeviceId {
        DeviceId::new(class.bus_type(), self.bus, self.address, 0)
    }
}

/// A single probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub driver: DriverType,
    pub class: BusClass,
    pub location: BusLocation,
    pub rotation: Rotation,
    pub external: bool,
}

/// An opened sensor
pub trait SensorDriver: Send {
    fn device_id(&self) -> DeviceId;

    fn driver_type(&self) -> DriverType;

    /// Newest raw body-frame sample, or `None` when nothing new arrived
    fn read(&mut self) -> Option<Vector3<f32>>;
}

/// Lists the bus instances of a class
pub trait BusEnumeration {
    fn buses(&self, class: BusClass) -> Vec<u8>;
}

/// Opens a driver if a matching sensor answers at the requested location
pub trait Prober {
    fn probe(&mut self, request: &ProbeRequest) -> Option<Box<dyn SensorDriver>>;
}

/// The shared network bus, where sensors announce themselves
pub trait NetworkBus {
    /// Devices currently announcing, in announcement order
    fn discovered(&self) -> Vec<DeviceId>;

    fn open(&mut self, id: DeviceId) -> Option<Box<dyn SensorDriver>>;
}

/// Everything boot detection needs from the hardware
pub trait CompassBus: BusEnumeration + Prober + NetworkBus {}

impl<T: BusEnumeration + Prober + NetworkBus> CompassBus for T {}
