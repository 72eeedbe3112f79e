//! Constants and configuration values for the compass subsystem
//!
//! Centralizes capacities, timing windows and tolerances.
//! Never use magic numbers in other files - add them here first.

/// Table capacities
pub mod capacity {
    /// Default number of calibrated slots (N)
    pub const DEFAULT_MAX_INSTANCES: usize = 3;

    /// Largest slot count a configuration may request
    pub const MAX_INSTANCES_LIMIT: usize = 8;

    /// Default number of overflow entries (M)
    pub const DEFAULT_MAX_UNREGISTERED: usize = 5;

    pub const MAX_UNREGISTERED_LIMIT: usize = 16;

    /// Default number of simultaneously active driver handles
    pub const DEFAULT_MAX_BACKENDS: usize = 9;

    pub const MAX_BACKENDS_LIMIT: usize = 32;
}

/// Timing windows
pub mod timing {
    /// A sample older than this marks the instance unhealthy
    pub const STALENESS_MS: u64 = 500;

    /// Minimum period between runtime network rescans
    pub const RESCAN_INTERVAL_MS: u64 = 1000;

    /// Read cycle rate used by the daemon
    pub const DEFAULT_READ_RATE_HZ: u32 = 50;

    /// How often the daemon logs pre-arm status
    pub const PREARM_REPORT_INTERVAL_MS: u64 = 5000;
}

/// Cross-instance agreement limits
pub mod consistency {
    /// Maximum 3D angle between an instance and the primary (degrees)
    pub const MAX_XYZ_ANGLE_DEG: f32 = 90.0;

    /// Maximum horizontal-plane angle between an instance and the primary (degrees)
    pub const MAX_XY_ANGLE_DEG: f32 = 60.0;

    /// Maximum horizontal-plane length difference (milligauss)
    pub const MAX_XY_LENGTH_DIFF: f32 = 200.0;
}

/// Calibration bounds
pub mod calibration {
    pub const MIN_SCALE_FACTOR: f32 = 0.85;
    pub const MAX_SCALE_FACTOR: f32 = 1.4;
}

/// Parameter store layout
pub mod store {
    pub const CURRENT_VERSION: u32 = 1;

    /// Refuse to load anything larger than this
    pub const MAX_STORE_SIZE: u64 = 1024 * 1024;

    pub const MAX_SETTINGS_SIZE: u64 = 64 * 1024;

    pub const PRIORITY_PREFIX: &str = "compass.priority";
    pub const OVERFLOW_PREFIX: &str = "compass.overflow";
    pub const SLOT_PREFIX: &str = "compass.slot";

    /// Legacy "primary instance" parameter from older layouts
    pub const LEGACY_PRIMARY_KEY: &str = "compass.primary";
}

/// File system paths
pub mod paths {
    use std::path::PathBuf;

    pub const APP_DIR: &str = "compassd";
    pub const STORE_FILE: &str = "params.json";
    pub const SETTINGS_FILE: &str = "settings.json";

    /// User configuration directory for the daemon
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR))
    }

    pub fn default_store_path() -> PathBuf {
        user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
            .join(STORE_FILE)
    }

    pub fn default_settings_path() -> PathBuf {
        user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
            .join(SETTINGS_FILE)
    }
}
