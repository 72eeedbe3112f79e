//! Core index and enum types shared across the compass subsystem

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Index newtypes
// ============================================================================

/// Physical slot in the slot table. Owns one set of persisted calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Index checked against a table capacity
    pub fn checked(index: usize, capacity: usize) -> Option<Self> {
        (index < capacity).then_some(Self(index))
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

/// Position in the priority list. Rank 0 is the most trusted sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(usize);

impl Rank {
    pub const PRIMARY: Rank = Rank(0);

    pub const fn new(rank: usize) -> Self {
        Self(rank)
    }

    pub fn checked(rank: usize, capacity: usize) -> Option<Self> {
        (rank < capacity).then_some(Self(rank))
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Sensor orientation
// ============================================================================

/// Mounting orientation of a sensor relative to the vehicle body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Yaw90,
    Yaw180,
    Yaw270,
    Roll180,
    Pitch180,
}

impl Rotation {
    /// Rotate a body-frame sample into the vehicle frame
    pub fn apply(self, v: Vector3<f32>) -> Vector3<f32> {
        match self {
            Self::None => v,
            Self::Yaw90 => Vector3::new(-v.y, v.x, v.z),
            Self::Yaw180 => Vector3::new(-v.x, -v.y, v.z),
            Self::Yaw270 => Vector3::new(v.y, -v.x, v.z),
            Self::Roll180 => Vector3::new(v.x, -v.y, -v.z),
            Self::Pitch180 => Vector3::new(-v.x, v.y, -v.z),
        }
    }
}

// ============================================================================
// Learning mode
// ============================================================================

/// Offset learning mode
///
/// While in-flight learning is active no instance may be used for yaw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnMode {
    #[default]
    None,
    Internal,
    Ekf,
    InFlight,
}

impl LearnMode {
    pub fn blocks_yaw(self) -> bool {
        matches!(self, Self::InFlight)
    }
}
