//! Re-export of the shared compass error type

pub use compass_error::{CompassError, Result};
