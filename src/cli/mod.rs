//! Command-line parsing for the profile-likelihood / Feldman-Cousins engine.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! statistics code. Arguments are turned into typed configuration in
//! `app`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{DegeneracyPolicy, NonConvergedPolicy, StreamMode};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "sfc",
    version,
    about = "Profile likelihood and Feldman-Cousins calibration for a binned Poisson spectrum"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Global fit on the observed spectrum, restricted fit at (mass, delta) and λ.
    Fit(FitArgs),
    /// Calibrate λ at one (mass, delta) with pseudoexperiments.
    Calibrate(CalibrateArgs),
    /// Calibrate every location of a (mass, delta) grid and report the region.
    Scan(ScanArgs),
    /// Print a previously exported calibration or region JSON.
    Show(ShowArgs),
}

/// Signal location and minimizer settings.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Signal peak position (bin units).
    #[arg(long, default_value_t = 8.0)]
    pub mass: f64,

    /// Signal peak width (bin units).
    #[arg(long, default_value_t = 2.0)]
    pub delta: f64,

    /// Maximum L-BFGS iterations per fit.
    #[arg(long, default_value_t = 1000)]
    pub max_iter: u64,

    /// Gradient tolerance of the minimizer.
    #[arg(long, default_value_t = 1e-6)]
    pub tol: f64,

    /// Do not polish non-converged L-BFGS runs with Nelder-Mead.
    #[arg(long)]
    pub no_fallback: bool,

    /// Report Hessian-based standard errors for the global fit.
    #[arg(long)]
    pub uncertainties: bool,
}

/// Pseudoexperiment settings.
#[derive(Debug, Args, Clone)]
pub struct ToyArgs {
    /// Number of pseudoexperiments per location.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub toys: usize,

    /// Master random seed.
    #[arg(long, default_value_t = crate::data::DEFAULT_MASTER_SEED)]
    pub seed: u64,

    /// Random stream assignment.
    #[arg(long, value_enum, default_value_t = StreamMode::PerTrial)]
    pub stream_mode: StreamMode,

    /// Treatment of trials whose fits did not converge.
    #[arg(long, value_enum, default_value_t = NonConvergedPolicy::Exclude)]
    pub non_converged: NonConvergedPolicy,

    /// Treatment of nuisance draws that give a non-positive bin mean.
    #[arg(long, value_enum, default_value_t = DegeneracyPolicy::Redraw)]
    pub degeneracy: DegeneracyPolicy,

    /// Confidence level of the acceptance decision.
    #[arg(long = "cl", default_value_t = 0.68)]
    pub confidence_level: f64,

    /// Worker threads (defaults to the number of CPUs).
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct CalibrateArgs {
    #[command(flatten)]
    pub fit: FitArgs,

    #[command(flatten)]
    pub toys: ToyArgs,

    /// Bins of the printed λ histogram (0 disables it).
    #[arg(long, default_value_t = 20)]
    pub histogram_bins: usize,

    /// Export per-trial results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the calibration summary to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,

    /// Write a markdown bundle of every trial into this directory.
    #[arg(long, value_name = "DIR")]
    pub debug: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub fit: FitArgs,

    #[command(flatten)]
    pub toys: ToyArgs,

    #[arg(long, default_value_t = 2.0)]
    pub mass_min: f64,

    #[arg(long, default_value_t = 14.0)]
    pub mass_max: f64,

    #[arg(long, default_value_t = 7)]
    pub mass_steps: usize,

    #[arg(long, default_value_t = 0.5)]
    pub delta_min: f64,

    #[arg(long, default_value_t = 4.0)]
    pub delta_max: f64,

    #[arg(long, default_value_t = 5)]
    pub delta_steps: usize,

    /// Export the region to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,
}

/// Options for printing a saved summary.
#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// JSON file produced by `--export-json`.
    #[arg(value_name = "JSON")]
    pub path: PathBuf,
}
