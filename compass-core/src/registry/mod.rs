//! Identity registry
//!
//! Slots, the device priority list and the overflow list, plus the rules that
//! bind a detected device to one of them.

mod identity;
mod overflow;
mod priority;
mod reorder;
mod slots;

pub use identity::{IdentityRegistry, Registration};
pub use overflow::OverflowRegistry;
pub use priority::PriorityList;
pub use reorder::{compact_priority, reorder_by_priority};
pub use slots::{Slot, SlotCalibration, SlotParams, SlotState, SlotTable};
