//! Packed device identities
//!
//! A device id packs the bus class, bus number, address (or network node id)
//! and a driver-specific variant tag into a single `u32`:
//!
//! ```text
//!  bits 0-2   bus type
//!  bits 3-7   bus number
//!  bits 8-15  address / node id
//!  bits 16-23 device variant
//! ```
//!
//! Ids are only ever produced by probing hardware. Zero means "no device".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of bus a device is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BusType {
    Unknown = 0,
    I2c = 1,
    Spi = 2,
    /// Vehicle-wide network bus; devices on it may appear and disappear at runtime
    Can = 3,
    Sitl = 4,
    Msp = 5,
    Serial = 6,
}

impl BusType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::I2c,
            2 => Self::Spi,
            3 => Self::Can,
            4 => Self::Sitl,
            5 => Self::Msp,
            6 => Self::Serial,
            _ => Self::Unknown,
        }
    }

    /// Only network-bus devices can be hot-plugged
    pub fn is_hot_pluggable(self) -> bool {
        matches!(self, Self::Can)
    }
}

/// Opaque packed device identity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    pub const NONE: DeviceId = DeviceId(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(bus_type: BusType, bus: u8, address: u8, devtype: u8) -> Self {
        Self(
            (bus_type as u32 & 0x07)
                | ((bus as u32 & 0x1f) << 3)
                | ((address as u32) << 8)
                | ((devtype as u32) << 16),
        )
    }

    pub fn i2c(bus: u8, address: u8, devtype: u8) -> Self {
        Self::new(BusType::I2c, bus, address, devtype)
    }

    pub fn spi(bus: u8, address: u8, devtype: u8) -> Self {
        Self::new(BusType::Spi, bus, address, devtype)
    }

    /// Network-bus device identified by bus instance and node id
    pub fn can(bus: u8, node: u8, devtype: u8) -> Self {
        Self::new(BusType::Can, bus, node, devtype)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn bus_type(self) -> BusType {
        BusType::from_raw((self.0 & 0x07) as u8)
    }

    pub fn bus(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    pub fn address(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub fn devtype(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    pub fn with_devtype(self, devtype: u8) -> Self {
        Self((self.0 & 0x0000_ffff) | ((devtype as u32) << 16))
    }

    /// Bus address with the variant tag cleared, used to spot two drivers
    /// claiming the same physical device.
    pub fn canonical(self) -> Self {
        self.with_devtype(0)
    }

    pub fn is_hot_pluggable(self) -> bool {
        !self.is_none() && self.bus_type().is_hot_pluggable()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
