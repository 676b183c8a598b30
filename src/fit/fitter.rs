//! Fit driver: likelihood objective + bounded minimizer.
//!
//! Given a spectrum we solve either:
//! - the full fit over all six parameters
//! - the restricted fit over `(a, b, c, d)` at a pinned `(mass, delta)`
//!
//! Every fit starts from a fixed initial guess and runs inside
//! [`ParameterBounds`], which keep all bin means strictly positive. The
//! result always carries the best point found, whether or not the minimizer
//! converged.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{
    EnergySpectrum, NuisanceParams, ParameterBounds, ParameterSet, ParameterVector,
    SignalLocation,
};
use crate::error::{InferenceError, Result};
use crate::fit::likelihood::{FullNll, Objective, RestrictedNll};
use crate::fit::optimizer::{Method, Minimizer, OptimizerConfig};
use crate::math::{hessian_from_gradient, standard_errors};

/// Fitting options shared by full and restricted fits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub bounds: ParameterBounds,
    pub optimizer: OptimizerConfig,
    /// Starting point of every full fit.
    pub full_guess: ParameterVector,
    /// Starting point of every restricted fit.
    pub restricted_guess: NuisanceParams,
    /// Estimate parameter uncertainties for full fits (Hessian inversion).
    pub uncertainties: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            bounds: ParameterBounds::default(),
            optimizer: OptimizerConfig::default(),
            full_guess: ParameterVector::new(10.0, 5.0, 3.0, 1.0, 8.0, 2.0),
            restricted_guess: NuisanceParams::new(10.0, 5.0, 3.0, 1.0),
            uncertainties: false,
        }
    }
}

/// Outcome of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult<P> {
    /// Minimizing point (best found, even when not converged).
    pub best: P,
    /// Objective value at `best`.
    pub nll: f64,
    pub converged: bool,
    pub n_iter: u64,
    pub n_fev: usize,
    pub n_gev: usize,
    pub method: Method,
    pub message: String,
    /// Standard errors in parameter order, when requested.
    pub uncertainties: Option<Vec<f64>>,
}

/// Drives the minimizer over likelihood objectives.
#[derive(Debug, Clone)]
pub struct FitDriver {
    options: FitOptions,
    minimizer: Minimizer,
}

impl FitDriver {
    pub fn new(options: FitOptions) -> Result<Self> {
        options.bounds.validate()?;
        Ok(Self {
            minimizer: Minimizer::new(options.optimizer),
            options,
        })
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Minimize `objective` starting at `initial` within `bounds`.
    pub fn fit<P: ParameterSet>(
        &self,
        objective: &dyn Objective,
        initial: P,
        bounds: &[(f64, f64)],
    ) -> Result<FitResult<P>> {
        let raw = self
            .minimizer
            .minimize(objective, &initial.to_vec(), bounds)?;
        if !raw.converged {
            warn!("fit did not converge ({}): {}", raw.method, raw.message);
        }
        Ok(FitResult {
            best: P::from_slice(&raw.parameters)?,
            nll: raw.fval,
            converged: raw.converged,
            n_iter: raw.n_iter,
            n_fev: raw.n_fev,
            n_gev: raw.n_gev,
            method: raw.method,
            message: raw.message,
            uncertainties: None,
        })
    }

    /// Full six-parameter fit from the configured initial guess.
    ///
    /// Uncertainties are attached here (and only here) when enabled, so
    /// calibration trials going through [`FitDriver::fit_full_from`] skip the
    /// Hessian.
    pub fn fit_full(&self, spectrum: &EnergySpectrum) -> Result<FitResult<ParameterVector>> {
        let objective = FullNll::new(spectrum);
        let mut result = self.fit_full_from(&objective, self.options.full_guess)?;
        if self.options.uncertainties {
            let x = result.best.to_vec();
            let hessian = hessian_from_gradient(|p| objective.gradient(p), &x)?;
            result.uncertainties = Some(standard_errors(&hessian));
        }
        Ok(result)
    }

    /// Full fit of an existing objective from an explicit starting point.
    pub fn fit_full_from(
        &self,
        objective: &FullNll,
        initial: ParameterVector,
    ) -> Result<FitResult<ParameterVector>> {
        let result = self.fit(objective, initial, &self.options.bounds.full())?;
        debug!("full fit: nll={:.6} at {:?}", result.nll, result.best);
        Ok(result)
    }

    /// Restricted fit over `(a, b, c, d)` at `location`.
    pub fn fit_restricted(
        &self,
        spectrum: &EnergySpectrum,
        location: SignalLocation,
    ) -> Result<FitResult<NuisanceParams>> {
        self.fit_restricted_objective(&RestrictedNll::new(spectrum, location))
    }

    pub fn fit_restricted_objective(
        &self,
        objective: &RestrictedNll,
    ) -> Result<FitResult<NuisanceParams>> {
        let location = objective.location();
        if !(location.delta.is_finite() && location.delta > 0.0 && location.mass.is_finite()) {
            return Err(InferenceError::Domain(format!(
                "restricted fit needs a finite location with delta > 0, got {location:?}"
            )));
        }
        let result = self.fit(
            objective,
            self.options.restricted_guess,
            &self.options.bounds.nuisance(),
        )?;
        debug!(
            "restricted fit at {:?}: nll={:.6} at {:?}",
            location, result.nll, result.best
        );
        Ok(result)
    }
}

impl Default for FitDriver {
    fn default() -> Self {
        Self {
            options: FitOptions::default(),
            minimizer: Minimizer::default(),
        }
    }
}
