//! Poisson mean model for the binned spectrum.
//!
//! The model is implemented as small, pure functions so that the likelihood,
//! the pseudoexperiment generator and the fitter can share it.

pub mod model;

pub use model::*;
