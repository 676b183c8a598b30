//! Shared inference workflow used by every subcommand.
//!
//! observed spectrum -> global fit -> restricted fit / calibration / scan
//!
//! The subcommands then only differ in what they print and export.

use crate::domain::{
    CalibrationConfig, EnergySpectrum, ParameterVector, PriorConstants, SignalLocation,
};
use crate::error::Result;
use crate::fit::{FitDriver, FitOptions, FitResult};
use crate::profile::{Calibration, ConfidenceRegion, ProfileOrchestrator, ProfilePoint, ScanConfig};

/// Outputs of `sfc fit`.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub spectrum: EnergySpectrum,
    pub global: FitResult<ParameterVector>,
    pub point: ProfilePoint,
}

/// Build the orchestrator for `options` with the default priors.
pub fn orchestrator(options: FitOptions) -> Result<ProfileOrchestrator> {
    ProfileOrchestrator::new(FitDriver::new(options)?, PriorConstants::default())
}

/// Global fit on the observed spectrum and λ at `location`.
pub fn run_fit(options: FitOptions, location: SignalLocation) -> Result<FitOutput> {
    let orchestrator = orchestrator(options)?;
    let spectrum = EnergySpectrum::observed();
    let global = orchestrator.observed_global_fit(&spectrum)?;
    let point = orchestrator.profile(&spectrum, &global, location)?;
    Ok(FitOutput {
        spectrum,
        global,
        point,
    })
}

/// Observed λ at `config.location` calibrated with pseudoexperiments.
pub fn run_calibration(options: FitOptions, config: &CalibrationConfig) -> Result<Calibration> {
    orchestrator(options)?.calibrate(&EnergySpectrum::observed(), config)
}

/// Confidence region over the grid in `config`.
pub fn run_scan(options: FitOptions, config: &ScanConfig) -> Result<ConfidenceRegion> {
    orchestrator(options)?.scan(&EnergySpectrum::observed(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::LAMBDA_TOLERANCE;

    #[test]
    fn default_fit_run_reproduces_observed_scenarios() {
        let out = run_fit(FitOptions::default(), SignalLocation::new(8.0, 2.0)).unwrap();
        assert!(out.global.converged);
        assert!(out.global.nll.is_finite());
        assert!(out.point.restricted.converged);
        assert!(out.point.restricted.nll >= out.global.nll - LAMBDA_TOLERANCE);
        assert!(out.point.lambda >= 0.0);
        assert_eq!(out.spectrum, EnergySpectrum::observed());
    }

    #[test]
    fn invalid_bounds_fail_before_fitting() {
        let mut options = FitOptions::default();
        options.bounds.delta = (0.0, 5.0);
        assert!(run_fit(options, SignalLocation::new(8.0, 2.0)).is_err());
    }
}
