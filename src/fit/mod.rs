//! Likelihood fitting.
//!
//! Responsibilities:
//!
//! - build the negative log-likelihood of a spectrum (full and restricted forms)
//! - minimize it inside parameter bounds (L-BFGS, Nelder-Mead fallback)
//! - report the minimum, the minimizing point and convergence diagnostics

pub mod fitter;
pub mod likelihood;
pub mod optimizer;

pub use fitter::*;
pub use likelihood::*;
pub use optimizer::*;
