//! Health and cross-instance consistency
//!
//! Pure queries over the slot table. None of them fail; an instance that
//! cannot be evaluated simply reports unhealthy or unusable.

use crate::compass::Compass;
use crate::constants::consistency;
use crate::data::Rank;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Tolerances for [`fields_consistent`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyLimits {
    #[serde(default = "default_xyz_angle")]
    pub max_xyz_angle_deg: f32,
    #[serde(default = "default_xy_angle")]
    pub max_xy_angle_deg: f32,
    #[serde(default = "default_xy_length")]
    pub max_xy_length_diff: f32,
}

fn default_xyz_angle() -> f32 {
    consistency::MAX_XYZ_ANGLE_DEG
}

fn default_xy_angle() -> f32 {
    consistency::MAX_XY_ANGLE_DEG
}

fn default_xy_length() -> f32 {
    consistency::MAX_XY_LENGTH_DIFF
}

impl Default for ConsistencyLimits {
    fn default() -> Self {
        Self {
            max_xyz_angle_deg: default_xyz_angle(),
            max_xy_angle_deg: default_xy_angle(),
            max_xy_length_diff: default_xy_length(),
        }
    }
}

fn angle_between3(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    a.normalize().dot(&b.normalize()).clamp(-1.0, 1.0).acos()
}

fn angle_between2(a: &Vector2<f32>, b: &Vector2<f32>) -> f32 {
    a.normalize().dot(&b.normalize()).clamp(-1.0, 1.0).acos()
}

/// Check every field against the primary, failing on the first disagreement
///
/// A zero horizontal component on the primary or any other field fails
/// immediately.
pub fn fields_consistent(primary: Vector3<f32>, others: &[Vector3<f32>], limits: &ConsistencyLimits) -> bool {
    let primary_xy = primary.xy();
    if primary_xy == Vector2::zeros() {
        return false;
    }

    let max_xyz = limits.max_xyz_angle_deg.to_radians();
    let max_xy = limits.max_xy_angle_deg.to_radians();

    for field in others {
        let field_xy = field.xy();
        if field_xy == Vector2::zeros() {
            return false;
        }

        if angle_between3(field, &primary) > max_xyz {
            return false;
        }

        if angle_between2(&field_xy, &primary_xy) > max_xy {
            return false;
        }

        if (primary_xy - field_xy).norm() > limits.max_xy_length_diff {
            return false;
        }
    }
    true
}

impl Compass {
    /// Latest sample for `rank` is within the staleness window
    pub fn healthy(&self, rank: Rank) -> bool {
        self.slot_at_rank(rank)
            .map(|s| s.state.healthy)
            .unwrap_or(false)
    }

    /// Health of the primary instance
    pub fn primary_healthy(&self) -> bool {
        self.healthy(self.primary())
    }

    /// Bit `r` set when rank `r` is healthy
    pub fn healthy_mask(&self) -> u32 {
        self.registry
            .priority()
            .ranks()
            .filter(|&r| self.healthy(r))
            .fold(0u32, |mask, r| mask | (1u32 << r.get()))
    }

    /// Rank `rank` may feed the heading estimate
    pub fn usable_for_yaw(&self, rank: Rank) -> bool {
        if !self.available() || self.learn.blocks_yaw() {
            return false;
        }
        self.slot_at_rank(rank)
            .map(|s| s.state.registered && *s.params.use_for_yaw.get())
            .unwrap_or(false)
    }

    /// The primary is healthy and usable
    pub fn use_for_yaw(&self) -> bool {
        let primary = self.primary();
        self.healthy(primary) && self.usable_for_yaw(primary)
    }

    /// Number of ranks usable for yaw
    pub fn num_enabled(&self) -> usize {
        if self.count() == 0 {
            return 0;
        }
        self.registry
            .priority()
            .ranks()
            .filter(|&r| self.usable_for_yaw(r))
            .count()
    }

    /// Corrected field of `rank`, in milligauss
    pub fn field(&self, rank: Rank) -> Option<Vector3<f32>> {
        self.slot_at_rank(rank).map(|s| s.state.field)
    }

    /// All usable instances agree with the primary
    ///
    /// True when nothing is usable.
    pub fn consistent(&self) -> bool {
        let others: Vec<Vector3<f32>> = (0..self.count())
            .map(Rank::new)
            .filter(|&r| self.usable_for_yaw(r))
            .filter_map(|r| self.field(r))
            .collect();
        if others.is_empty() {
            return true;
        }
        let primary = self.field(self.primary()).unwrap_or_else(Vector3::zeros);
        fields_consistent(primary, &others, &self.settings.consistency)
    }
}
