//! Simulated hardware scenarios
//!
//! A scenario lists sensors and when they appear or vanish, so the daemon
//! can exercise hot-plug without real hardware.

use compass_core::sim::SimBus;
use compass_core::{BusClass, DeviceId, DriverType};
use compass_error::{CompassError, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use crate::scheduler::Clock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How often the simulated world is updated
const TICK_MS: u64 = 100;

/// Largest scenario file we will read
const MAX_SCENARIO_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorPlacement {
    Network {
        node: u8,
    },
    Local {
        driver: DriverType,
        class: BusClass,
        bus: u8,
        address: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSensor {
    #[serde(flatten)]
    pub placement: SensorPlacement,

    /// Body-frame field in milligauss
    #[serde(default = "default_field")]
    pub field: [f32; 3],

    /// Milliseconds after start when the sensor shows up
    #[serde(default)]
    pub appear_ms: u64,

    /// Milliseconds after start when the sensor is unplugged
    #[serde(default)]
    pub vanish_ms: Option<u64>,
}

fn default_field() -> [f32; 3] {
    [200.0, 100.0, -400.0]
}

impl ScenarioSensor {
    fn present_at(&self, elapsed_ms: u64) -> bool {
        elapsed_ms >= self.appear_ms && self.vanish_ms.map_or(true, |t| elapsed_ms < t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub sensors: Vec<ScenarioSensor>,
}

impl Default for Scenario {
    /// One external I2C sensor and two network sensors, the second arriving late
    fn default() -> Self {
        Self {
            sensors: vec![
                ScenarioSensor {
                    placement: SensorPlacement::Local {
                        driver: DriverType::Ist8310,
                        class: BusClass::I2cExternal,
                        bus: 0,
                        address: 0x0e,
                    },
                    field: default_field(),
                    appear_ms: 0,
                    vanish_ms: None,
                },
                ScenarioSensor {
                    placement: SensorPlacement::Network { node: 124 },
                    field: default_field(),
                    appear_ms: 0,
                    vanish_ms: None,
                },
                ScenarioSensor {
                    placement: SensorPlacement::Network { node: 125 },
                    field: default_field(),
                    appear_ms: 3_000,
                    vanish_ms: None,
                },
            ],
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| CompassError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        if meta.len() > MAX_SCENARIO_SIZE {
            return Err(CompassError::FileTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                max_size: MAX_SCENARIO_SIZE,
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CompassError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| CompassError::config(format!("Failed to parse scenario {:?}: {}", path, e)))
    }

    /// Populate a bus with every sensor, presence set for time zero
    pub fn build(&self) -> (SimBus, Vec<DeviceId>) {
        let bus = SimBus::new();
        let ids = self
            .sensors
            .iter()
            .map(|s| {
                let field = Vector3::from(s.field);
                let id = match s.placement {
                    SensorPlacement::Network { node } => bus.add_network(node, field),
                    SensorPlacement::Local {
                        driver,
                        class,
                        bus: n,
                        address,
                    } => bus.add_local(driver, class, n, address, field),
                };
                bus.set_present(id, s.present_at(0));
                id
            })
            .collect();
        (bus, ids)
    }

    /// Plug and unplug sensors for the current time. Returns how many changed.
    pub fn advance(&self, bus: &SimBus, ids: &[DeviceId], last_ms: u64, now_ms: u64) -> usize {
        let mut changed = 0;
        for (sensor, &id) in self.sensors.iter().zip(ids) {
            let was = sensor.present_at(last_ms);
            let is = sensor.present_at(now_ms);
            if was != is {
                info!(device_id = %id, present = is, "Simulated sensor {}", if is { "plugged" } else { "unplugged" });
                bus.set_present(id, is);
                changed += 1;
            }
        }
        changed
    }
}

/// Apply the scenario timeline until shutdown
pub async fn run_scenario(
    scenario: Scenario,
    bus: SimBus,
    ids: Vec<DeviceId>,
    clock: Clock,
    shutdown: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    let mut last_ms = 0;
    while !shutdown.load(Ordering::SeqCst) {
        ticker.tick().await;
        let now_ms = clock.now_ms();
        scenario.advance(&bus, &ids, last_ms, now_ms);
        last_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::NetworkBus;

    #[test]
    fn test_parse_with_defaults() {
        let json = r#"{
            "sensors": [
                { "kind": "network", "node": 10 },
                { "kind": "local", "driver": "hmc5883", "class": "i2c_external", "bus": 0, "address": 30, "vanish_ms": 500 }
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.sensors.len(), 2);
        assert_eq!(scenario.sensors[0].field, default_field());
        assert_eq!(scenario.sensors[1].vanish_ms, Some(500));
    }

    #[test]
    fn test_advance_toggles_presence() {
        let scenario = Scenario::default();
        let (bus, ids) = scenario.build();
        assert_eq!(bus.discovered(), vec![ids[1]]);

        assert_eq!(scenario.advance(&bus, &ids, 0, 2_000), 0);
        assert_eq!(scenario.advance(&bus, &ids, 2_000, 3_000), 1);
        assert_eq!(bus.discovered(), vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Scenario::load(&path).is_err());
    }
}
