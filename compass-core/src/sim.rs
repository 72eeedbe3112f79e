//! Simulated buses
//!
//! An in-memory world of sensors behind the bus traits. Clones share the
//! same world, so a test or the daemon can keep a handle to plug and unplug
//! sensors while the subsystem holds another.

use crate::data::DeviceId;
use crate::hw::{BusClass, BusEnumeration, BusLocation, DriverType, NetworkBus, ProbeRequest, Prober, SensorDriver};
use nalgebra::Vector3;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
struct SimSensor {
    id: DeviceId,
    driver: DriverType,
    class: BusClass,
    location: BusLocation,
    field: Vector3<f32>,
    present: bool,
    silent: bool,
}

#[derive(Debug, Default)]
struct SimWorld {
    buses: HashMap<BusClass, Vec<u8>>,
    sensors: Vec<SimSensor>,
    probes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SimBus {
    world: Arc<Mutex<SimWorld>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bus(&self, class: BusClass, bus: u8) {
        let mut world = self.world.lock();
        let buses = world.buses.entry(class).or_default();
        if !buses.contains(&bus) {
            buses.push(bus);
        }
    }

    /// Put a sensor on a local bus. Returns the id a probe will report.
    pub fn add_local(&self, driver: DriverType, class: BusClass, bus: u8, address: u8, field: Vector3<f32>) -> DeviceId {
        self.add_bus(class, bus);
        let id = DeviceId::new(class.bus_type(), bus, address, driver.devtype());
        self.world.lock().sensors.push(SimSensor {
            id,
            driver,
            class,
            location: BusLocation::new(bus, address),
            field,
            present: true,
            silent: false,
        });
        id
    }

    /// Put a sensor on the network bus, announcing immediately
    pub fn add_network(&self, node: u8, field: Vector3<f32>) -> DeviceId {
        let id = DeviceId::can(0, node, DriverType::Network.devtype());
        self.world.lock().sensors.push(SimSensor {
            id,
            driver: DriverType::Network,
            class: BusClass::Network,
            location: BusLocation::new(0, node),
            field,
            present: true,
            silent: false,
        });
        id
    }

    pub fn set_present(&self, id: DeviceId, present: bool) {
        if let Some(s) = self.world.lock().sensors.iter_mut().find(|s| s.id == id) {
            s.present = present;
        }
    }

    pub fn set_field(&self, id: DeviceId, field: Vector3<f32>) {
        if let Some(s) = self.world.lock().sensors.iter_mut().find(|s| s.id == id) {
            s.field = field;
        }
    }

    /// Keep the sensor on the bus but stop it producing samples
    pub fn set_silent(&self, id: DeviceId, silent: bool) {
        if let Some(s) = self.world.lock().sensors.iter_mut().find(|s| s.id == id) {
            s.silent = silent;
        }
    }

    pub fn probe_count(&self) -> usize {
        self.world.lock().probes
    }

    fn driver_for(&self, sensor: &SimSensor) -> Box<dyn SensorDriver> {
        Box::new(SimDriver {
            id: sensor.id,
            driver: sensor.driver,
            world: Arc::clone(&self.world),
        })
    }
}

impl BusEnumeration for SimBus {
    fn buses(&self, class: BusClass) -> Vec<u8> {
        self.world
            .lock()
            .buses
            .get(&class)
            .cloned()
            .unwrap_or_default()
    }
}

impl Prober for SimBus {
    fn probe(&mut self, request: &ProbeRequest) -> Option<Box<dyn SensorDriver>> {
        let sensor = {
            let mut world = self.world.lock();
            world.probes += 1;
            world
                .sensors
                .iter()
                .find(|s| {
                    s.present
                        && s.driver == request.driver
                        && s.class == request.class
                        && s.location == request.location
                })
                .cloned()
        }?;
        trace!(device_id = %sensor.id, "Simulated probe hit");
        Some(self.driver_for(&sensor))
    }
}

impl NetworkBus for SimBus {
    fn discovered(&self) -> Vec<DeviceId> {
        self.world
            .lock()
            .sensors
            .iter()
            .filter(|s| s.present && s.class == BusClass::Network)
            .map(|s| s.id)
            .collect()
    }

    fn open(&mut self, id: DeviceId) -> Option<Box<dyn SensorDriver>> {
        let sensor = self
            .world
            .lock()
            .sensors
            .iter()
            .find(|s| s.present && s.class == BusClass::Network && s.id == id)
            .cloned()?;
        Some(self.driver_for(&sensor))
    }
}

/// Driver handle onto a simulated sensor
#[derive(Debug)]
pub struct SimDriver {
    id: DeviceId,
    driver: DriverType,
    world: Arc<Mutex<SimWorld>>,
}

impl SensorDriver for SimDriver {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn driver_type(&self) -> DriverType {
        self.driver
    }

    fn read(&mut self) -> Option<Vector3<f32>> {
        let world = self.world.lock();
        world
            .sensors
            .iter()
            .find(|s| s.id == self.id)
            .filter(|s| s.present && !s.silent)
            .map(|s| s.field)
    }
}
