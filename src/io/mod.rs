//! Input/output helpers.
//!
//! - per-trial CSV export (`export`)
//! - calibration / region JSON read/write (`summary`)

pub mod export;
pub mod summary;

pub use export::*;
pub use summary::*;
