//! Data sources: the observed spectrum and synthetic pseudoexperiments.
//!
//! The observed counts are a process-wide constant (`domain::OBSERVED_COUNTS`);
//! this module owns everything random.

pub mod pseudo;
pub mod streams;

pub use pseudo::*;
pub use streams::*;
