//! `spectral-fc` library crate.
//!
//! Profile-likelihood inference and Feldman-Cousins calibration for a binned
//! Poisson energy spectrum. The binary (`sfc`) is a thin wrapper around this
//! library so that:
//!
//! - core logic is testable without spawning processes
//! - the statistics modules stay free of CLI and output concerns

pub mod app;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod profile;
pub mod report;
