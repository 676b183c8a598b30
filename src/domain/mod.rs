//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - parameter sets (`ParameterVector`, `NuisanceParams`, `SignalLocation`)
//! - binned data (`EnergySpectrum`, the observed counts)
//! - fixed configuration (`PriorConstants`, `ParameterBounds`, `CalibrationConfig`)
//! - policy enums for the calibration loop

pub mod types;

pub use types::*;
