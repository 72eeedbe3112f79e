//! Settings validation

use crate::constants::{capacity, timing};
use crate::error::{CompassError, Result};
use crate::settings::CompassSettings;

/// Check capacities and timing windows before anything is allocated
pub fn validate_settings(settings: &CompassSettings) -> Result<()> {
    validate_range(
        "max_instances",
        settings.max_instances,
        1,
        capacity::MAX_INSTANCES_LIMIT,
    )?;
    validate_range(
        "max_unregistered",
        settings.max_unregistered,
        0,
        capacity::MAX_UNREGISTERED_LIMIT,
    )?;
    validate_range(
        "max_backends",
        settings.max_backends,
        1,
        capacity::MAX_BACKENDS_LIMIT,
    )?;

    if settings.staleness_ms == 0 {
        return Err(CompassError::invalid_config("staleness_ms", "must be positive"));
    }
    if settings.rescan_interval_ms < timing::RESCAN_INTERVAL_MS {
        return Err(CompassError::invalid_config(
            "rescan_interval_ms",
            format!("must be at least {} ms", timing::RESCAN_INTERVAL_MS),
        ));
    }

    let limits = &settings.consistency;
    if !(limits.max_xyz_angle_deg > 0.0 && limits.max_xyz_angle_deg <= 180.0) {
        return Err(CompassError::invalid_config("consistency.max_xyz_angle_deg", "must be in (0, 180]"));
    }
    if !(limits.max_xy_angle_deg > 0.0 && limits.max_xy_angle_deg <= 180.0) {
        return Err(CompassError::invalid_config("consistency.max_xy_angle_deg", "must be in (0, 180]"));
    }
    if !(limits.max_xy_length_diff > 0.0) {
        return Err(CompassError::invalid_config("consistency.max_xy_length_diff", "must be positive"));
    }
    Ok(())
}

fn validate_range(field: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(CompassError::invalid_config(
            field,
            format!("{} is outside {}..={}", value, min, max),
        ));
    }
    Ok(())
}
