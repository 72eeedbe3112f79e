//! Compass subsystem settings
//!
//! JSON file with per-field defaults, so a partial or empty file is valid.

use crate::constants::{capacity, paths, store, timing};
use crate::data::{read_limited, validate_settings, write_atomic, LearnMode};
use crate::error::{CompassError, Result};
use crate::health::ConsistencyLimits;
use crate::hw::ProbeSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to do when a device finds no slot and no overflow entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Abort boot detection with an error
    Halt,
    /// Drop the newest device and keep going
    #[default]
    RejectCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompassSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Calibrated slots and priority ranks (N)
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Overflow entries (M)
    #[serde(default = "default_max_unregistered")]
    pub max_unregistered: usize,

    #[serde(default = "default_max_backends")]
    pub max_backends: usize,

    /// Set bits disable driver families
    #[serde(default)]
    pub driver_type_mask: u32,

    #[serde(default)]
    pub learn: LearnMode,

    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,

    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,

    #[serde(default)]
    pub exhaustion_policy: ExhaustionPolicy,

    #[serde(default)]
    pub probe: ProbeSource,

    #[serde(default)]
    pub consistency: ConsistencyLimits,
}

fn default_enabled() -> bool {
    true
}

fn default_max_instances() -> usize {
    capacity::DEFAULT_MAX_INSTANCES
}

fn default_max_unregistered() -> usize {
    capacity::DEFAULT_MAX_UNREGISTERED
}

fn default_max_backends() -> usize {
    capacity::DEFAULT_MAX_BACKENDS
}

fn default_staleness_ms() -> u64 {
    timing::STALENESS_MS
}

fn default_rescan_interval_ms() -> u64 {
    timing::RESCAN_INTERVAL_MS
}

impl Default for CompassSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_instances: default_max_instances(),
            max_unregistered: default_max_unregistered(),
            max_backends: default_max_backends(),
            driver_type_mask: 0,
            learn: LearnMode::default(),
            staleness_ms: default_staleness_ms(),
            rescan_interval_ms: default_rescan_interval_ms(),
            exhaustion_policy: ExhaustionPolicy::default(),
            probe: ProbeSource::default(),
            consistency: ConsistencyLimits::default(),
        }
    }
}

pub fn get_settings_path() -> PathBuf {
    paths::default_settings_path()
}

/// Load settings, returning defaults if the file does not exist
pub fn load_settings(path: &Path) -> Result<CompassSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(CompassSettings::default());
    }

    let content = read_limited(path, store::MAX_SETTINGS_SIZE)?;
    let settings: CompassSettings = serde_json::from_str(&content)
        .map_err(|e| CompassError::config(format!("Failed to parse settings JSON: {}", e)))?;

    validate_settings(&settings)?;
    info!("Loaded compass settings from {:?}", path);
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &CompassSettings) -> Result<()> {
    validate_settings(settings)?;
    let json = serde_json::to_string_pretty(settings)?;
    write_atomic(path, json.as_bytes())?;
    debug!("Saved compass settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let settings: CompassSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, CompassSettings::default());
        assert_eq!(settings.max_instances, 3);
        assert_eq!(settings.staleness_ms, 500);
        assert_eq!(settings.exhaustion_policy, ExhaustionPolicy::RejectCandidate);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json")).unwrap();
        assert!(settings.enabled);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = CompassSettings {
            max_instances: 2,
            learn: LearnMode::InFlight,
            exhaustion_policy: ExhaustionPolicy::Halt,
            ..CompassSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(CompassError::Config(_))));
    }

    #[test]
    fn test_out_of_range_capacity_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"max_instances": 0}"#).unwrap();
        assert!(matches!(
            load_settings(&path),
            Err(CompassError::InvalidConfig { .. })
        ));
    }
}
