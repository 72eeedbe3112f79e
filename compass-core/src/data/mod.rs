//! Data types, persistence, and validation modules

mod device_id;
mod persistence;
mod types;
mod validation;

pub use device_id::{BusType, DeviceId};
pub use persistence::{JsonFileStorage, MemoryStorage, Param, ParamBatch, ParamStorage};
pub(crate) use persistence::{read_limited, write_atomic};
pub use types::{LearnMode, Rank, Rotation, SlotIndex};
pub use validation::validate_settings;
