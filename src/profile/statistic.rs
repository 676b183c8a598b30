//! Profile likelihood test statistic.
//!
//! λ(mass, delta) = min over (a, b, c, d) of the restricted NLL
//!                − min over all six parameters of the full NLL
//!
//! Both minima come from the same [`FitDriver`] and the same dataset.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{
    EnergySpectrum, NuisanceParams, ParameterVector, PriorConstants, SignalLocation,
};
use crate::error::{InferenceError, Result};
use crate::fit::{FitDriver, FitResult, FullNll};

/// Negative λ beyond this is reported as a fit problem before clipping.
pub const LAMBDA_TOLERANCE: f64 = 1e-6;

/// Global fit, restricted fit and the statistic formed from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub location: SignalLocation,
    pub global: FitResult<ParameterVector>,
    pub restricted: FitResult<NuisanceParams>,
    /// `restricted.nll - global.nll`, never negative.
    pub lambda: f64,
    /// The global fit was replaced by a refit started at the restricted optimum.
    pub refit: bool,
}

impl ProfilePoint {
    pub fn converged(&self) -> bool {
        self.global.converged && self.restricted.converged
    }
}

/// Computes global fits, restricted fits and λ; drives calibration and scans.
#[derive(Debug, Clone)]
pub struct ProfileOrchestrator {
    pub(crate) driver: FitDriver,
    pub(crate) priors: PriorConstants,
}

impl ProfileOrchestrator {
    pub fn new(driver: FitDriver, priors: PriorConstants) -> Result<Self> {
        priors.validate()?;
        Ok(Self { driver, priors })
    }

    pub fn driver(&self) -> &FitDriver {
        &self.driver
    }

    pub fn priors(&self) -> &PriorConstants {
        &self.priors
    }

    /// Global fit to real data. Anything downstream of an unconverged
    /// observed fit is meaningless, so non-convergence is an error here.
    pub fn observed_global_fit(
        &self,
        spectrum: &EnergySpectrum,
    ) -> Result<FitResult<ParameterVector>> {
        let fit = self.driver.fit_full(spectrum)?;
        if !fit.converged {
            return Err(InferenceError::ConvergenceFailure(format!(
                "global fit to the observed spectrum did not converge after {} iterations: {}",
                fit.n_iter, fit.message
            )));
        }
        info!(
            "global fit: nll={:.6} ({} iterations, {})",
            fit.nll, fit.n_iter, fit.method
        );
        Ok(fit)
    }

    /// λ at `location` given an already computed global fit on `spectrum`.
    pub fn profile(
        &self,
        spectrum: &EnergySpectrum,
        global: &FitResult<ParameterVector>,
        location: SignalLocation,
    ) -> Result<ProfilePoint> {
        self.profile_with(&FullNll::new(spectrum), global.clone(), location)
    }

    /// Global fit plus λ at `location`, both from scratch.
    pub fn profile_from_scratch(
        &self,
        spectrum: &EnergySpectrum,
        location: SignalLocation,
    ) -> Result<ProfilePoint> {
        let objective = FullNll::new(spectrum);
        let global = self
            .driver
            .fit_full_from(&objective, self.driver.options().full_guess)?;
        self.profile_with(&objective, global, location)
    }

    pub(crate) fn profile_with(
        &self,
        objective: &FullNll,
        mut global: FitResult<ParameterVector>,
        location: SignalLocation,
    ) -> Result<ProfilePoint> {
        let restricted = self
            .driver
            .fit_restricted_objective(&objective.restricted(location))?;

        let mut refit = false;
        if restricted.nll < global.nll {
            // The global fit stopped in a worse basin than the restricted one.
            let start = ParameterVector::from_parts(restricted.best, location);
            let retry = self.driver.fit_full_from(objective, start)?;
            debug!(
                "refit from restricted optimum at {location:?}: {:.6} -> {:.6}",
                global.nll, retry.nll
            );
            if retry.nll < global.nll {
                global = retry;
                refit = true;
            }
        }

        let raw = restricted.nll - global.nll;
        if raw < -LAMBDA_TOLERANCE {
            warn!("negative profile statistic {raw:.3e} at {location:?}; clipped to 0");
        }
        let lambda = raw.max(0.0);

        Ok(ProfilePoint {
            location,
            global,
            restricted,
            lambda,
            refit,
        })
    }
}

impl Default for ProfileOrchestrator {
    fn default() -> Self {
        Self {
            driver: FitDriver::default(),
            priors: PriorConstants::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitOptions;

    #[test]
    fn observed_profile_at_default_location() {
        let orchestrator = ProfileOrchestrator::default();
        let spectrum = EnergySpectrum::observed();
        let global = orchestrator.observed_global_fit(&spectrum).unwrap();
        let point = orchestrator
            .profile(&spectrum, &global, SignalLocation::new(8.0, 2.0))
            .unwrap();

        assert!(point.restricted.converged, "{}", point.restricted.message);
        assert!(point.lambda >= 0.0);
        assert!(point.lambda.is_finite());
        assert!(point.restricted.nll >= point.global.nll - LAMBDA_TOLERANCE);
    }

    #[test]
    fn lambda_is_small_at_the_global_best_location() {
        let orchestrator = ProfileOrchestrator::default();
        let spectrum = EnergySpectrum::observed();
        let global = orchestrator.observed_global_fit(&spectrum).unwrap();
        let best = global.best.location();
        let point = orchestrator.profile(&spectrum, &global, best).unwrap();
        assert!(point.lambda < 1e-3, "lambda at best fit = {}", point.lambda);
    }

    #[test]
    fn refit_guard_repairs_a_poor_global_fit() {
        let orchestrator = ProfileOrchestrator::default();
        let spectrum = EnergySpectrum::observed();
        let objective = FullNll::new(&spectrum);
        let good = orchestrator.observed_global_fit(&spectrum).unwrap();

        // Pretend the global fit stopped far from the optimum.
        let mut poor = good.clone();
        poor.best = ParameterVector::new(1.0, 1.0, 0.0, 1.0, 3.0, 1.0);
        poor.nll = objective.nll(&poor.best).unwrap();
        assert!(poor.nll > good.nll);

        let point = orchestrator
            .profile_with(&objective, poor, good.best.location())
            .unwrap();
        assert!(point.refit);
        assert!(point.lambda >= 0.0);
        assert!(point.global.nll <= point.restricted.nll + LAMBDA_TOLERANCE);
    }

    #[test]
    fn unconverged_observed_fit_is_a_convergence_failure() {
        let mut options = FitOptions::default();
        options.optimizer.max_iter = 1;
        options.optimizer.nelder_mead_fallback = false;
        options.optimizer.max_restarts = 0;
        let driver = FitDriver::new(options).unwrap();
        let orchestrator = ProfileOrchestrator::new(driver, PriorConstants::default()).unwrap();

        let err = orchestrator
            .observed_global_fit(&EnergySpectrum::observed())
            .unwrap_err();
        assert!(matches!(err, InferenceError::ConvergenceFailure(_)), "{err:?}");
    }

    #[test]
    fn zero_width_location_is_rejected() {
        let orchestrator = ProfileOrchestrator::default();
        let err = orchestrator
            .profile_from_scratch(&EnergySpectrum::observed(), SignalLocation::new(8.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, InferenceError::Domain(_)));
    }
}
