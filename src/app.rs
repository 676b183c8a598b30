//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initialises logging
//! - parses CLI arguments into typed configuration
//! - runs the shared pipeline
//! - prints reports and writes optional exports

use clap::Parser;
use log::{info, warn};

use crate::cli::{CalibrateArgs, Command, FitArgs, ScanArgs, ShowArgs, ToyArgs};
use crate::domain::{CalibrationConfig, OBSERVED_COUNTS, SignalLocation};
use crate::error::AppError;
use crate::fit::{FitOptions, OptimizerConfig};
use crate::io::{SummaryBody, SummaryFile};
use crate::math::lin_space;
use crate::profile::ScanConfig;

pub mod pipeline;

/// Entry point for the `sfc` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    // `sfc` with no subcommand behaves like `sfc fit`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Calibrate(args) => handle_calibrate(args),
        Command::Scan(args) => handle_scan(args),
        Command::Show(args) => handle_show(args),
    }
}

fn init_logging() {
    // A second initialisation (e.g. from tests) is harmless.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let out = pipeline::run_fit(fit_options_from_args(&args), location_from_args(&args))?;
    println!("{}", crate::report::format_global_fit(&out.global));
    println!("{}", crate::report::format_profile(&out.point));
    Ok(())
}

fn handle_calibrate(args: CalibrateArgs) -> Result<(), AppError> {
    configure_threads(&args.toys)?;
    let config = calibration_config_from_args(location_from_args(&args.fit), &args.toys);
    let calibration = pipeline::run_calibration(fit_options_from_args(&args.fit), &config)?;

    println!("{}", crate::report::format_global_fit(&calibration.observed.global));
    println!("{}", crate::report::format_profile(&calibration.observed));
    println!("{}", crate::report::format_calibration(&calibration.summary));
    if args.histogram_bins > 0 {
        let hist = crate::report::lambda_histogram(
            &calibration.sample,
            config.non_converged,
            args.histogram_bins,
        );
        println!("{}", crate::report::format_histogram(&hist, 50));
    }

    if let Some(path) = &args.export {
        crate::io::write_trials_csv(path, &calibration.sample)?;
        info!("wrote trial CSV to {}", path.display());
    }
    if let Some(path) = &args.export_json {
        let file = SummaryFile::from_calibration(&OBSERVED_COUNTS, &calibration);
        crate::io::write_summary_json(path, &file)?;
        info!("wrote calibration JSON to {}", path.display());
    }
    if let Some(dir) = &args.debug {
        let path = crate::debug::write_debug_bundle(dir, &calibration)?;
        info!("wrote debug bundle to {}", path.display());
    }
    Ok(())
}

fn handle_scan(args: ScanArgs) -> Result<(), AppError> {
    configure_threads(&args.toys)?;
    let config = scan_config_from_args(&args)?;
    let region = pipeline::run_scan(fit_options_from_args(&args.fit), &config)?;
    println!("{}", crate::report::format_region(&region));

    if let Some(path) = &args.export_json {
        let file = SummaryFile::from_region(&OBSERVED_COUNTS, &config, &region);
        crate::io::write_summary_json(path, &file)?;
        info!("wrote region JSON to {}", path.display());
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let file = crate::io::read_summary_json(&args.path)?;
    println!(
        "{} {} | generated {} | counts {:?}\n",
        file.tool, file.version, file.generated, file.observed_counts
    );
    match &file.body {
        SummaryBody::Calibration {
            global_fit,
            summary,
            ..
        } => {
            println!("{}", crate::report::format_global_fit(global_fit));
            println!("{}", crate::report::format_calibration(summary));
        }
        SummaryBody::Region { region, .. } => {
            println!("{}", crate::report::format_region(region));
        }
    }
    Ok(())
}

fn configure_threads(args: &ToyArgs) -> Result<(), AppError> {
    let Some(threads) = args.threads else {
        return Ok(());
    };
    if threads == 0 {
        return Err(AppError::new(2, "--threads must be > 0"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .map_err(|e| AppError::new(2, format!("Failed to configure thread pool: {e}")))
}

pub fn fit_options_from_args(args: &FitArgs) -> FitOptions {
    FitOptions {
        optimizer: OptimizerConfig {
            max_iter: args.max_iter,
            tol: args.tol,
            nelder_mead_fallback: !args.no_fallback,
            ..OptimizerConfig::default()
        },
        uncertainties: args.uncertainties,
        ..FitOptions::default()
    }
}

fn location_from_args(args: &FitArgs) -> SignalLocation {
    let location = SignalLocation::new(args.mass, args.delta);
    if !crate::domain::ParameterBounds::default().contains_location(location) {
        warn!("location {location:?} lies outside the fit bounds");
    }
    location
}

pub fn calibration_config_from_args(location: SignalLocation, args: &ToyArgs) -> CalibrationConfig {
    CalibrationConfig {
        location,
        n_toys: args.toys,
        seed: args.seed,
        stream_mode: args.stream_mode,
        non_converged: args.non_converged,
        degeneracy: args.degeneracy,
        confidence_level: args.confidence_level,
    }
}

pub fn scan_config_from_args(args: &ScanArgs) -> Result<ScanConfig, AppError> {
    let config = ScanConfig {
        masses: lin_space(args.mass_min, args.mass_max, args.mass_steps)?,
        deltas: lin_space(args.delta_min, args.delta_max, args.delta_steps)?,
        calibration: calibration_config_from_args(location_from_args(&args.fit), &args.toys),
    };
    config.validate()?;
    Ok(config)
}

/// Rewrite argv so `sfc` defaults to `sfc fit`.
///
/// Rules:
/// - `sfc`                       -> `sfc fit`
/// - `sfc --mass 6 ...`          -> `sfc fit --mass 6 ...`
/// - `sfc --help/--version/-h`   -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("fit".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "fit" | "calibrate" | "scan" | "show");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "fit flags".
    if arg1.starts_with('-') {
        argv.insert(1, "fit".to_string());
        return argv;
    }

    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_defaults_to_fit() {
        assert_eq!(rewrite_args(argv(&["sfc"])), argv(&["sfc", "fit"]));
        assert_eq!(
            rewrite_args(argv(&["sfc", "--mass", "6"])),
            argv(&["sfc", "fit", "--mass", "6"])
        );
        assert_eq!(rewrite_args(argv(&["sfc", "--help"])), argv(&["sfc", "--help"]));
        assert_eq!(
            rewrite_args(argv(&["sfc", "scan", "-n", "10"])),
            argv(&["sfc", "scan", "-n", "10"])
        );
    }

    #[test]
    fn scan_args_become_a_grid() {
        let cli = crate::cli::Cli::parse_from(argv(&[
            "sfc",
            "scan",
            "--mass-min",
            "4",
            "--mass-max",
            "8",
            "--mass-steps",
            "3",
            "--delta-steps",
            "2",
            "--seed",
            "9",
        ]));
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        let config = scan_config_from_args(&args).unwrap();
        assert_eq!(config.masses, vec![4.0, 6.0, 8.0]);
        assert_eq!(config.deltas.len(), 2);
        assert_eq!(config.calibration.seed, 9);
        assert_eq!(config.locations().len(), 6);
    }

    #[test]
    fn fit_flags_reach_the_optimizer() {
        let cli = crate::cli::Cli::parse_from(argv(&[
            "sfc",
            "fit",
            "--max-iter",
            "250",
            "--no-fallback",
            "--uncertainties",
        ]));
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let options = fit_options_from_args(&args);
        assert_eq!(options.optimizer.max_iter, 250);
        assert!(!options.optimizer.nelder_mead_fallback);
        assert!(options.uncertainties);
    }
}
