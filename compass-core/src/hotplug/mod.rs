//! Runtime hot-plug handling for network-bus sensors

mod replacement;
mod rescan;

pub use replacement::{Replacement, ReplacementKind};
pub use rescan::{RescanPlan, RescanReport, RuntimeRescan};
