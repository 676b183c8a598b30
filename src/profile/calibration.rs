//! Monte-Carlo calibration of λ at one signal location.
//!
//! Each trial generates a pseudoexperiment at the location, refits it (global
//! and restricted) and records λ_trial. The observed λ is then compared with
//! the empirical distribution of λ_trial:
//!
//! - p-value: `#{λ_trial >= λ_obs} / n_used`
//! - accepted at confidence level CL iff `p > 1 - CL`
//!
//! Trial failures never abort the run; they are counted and excluded.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::data::{PseudoExperimentGenerator, RngStreams};
use crate::domain::{
    CalibrationConfig, EnergySpectrum, NonConvergedPolicy, NuisanceParams, ParameterVector,
    SignalLocation, StreamMode,
};
use crate::error::{InferenceError, Result};
use crate::fit::{FitResult, FullNll};
use crate::profile::statistic::{ProfileOrchestrator, ProfilePoint};

/// Degrees of freedom of the asymptotic λ distribution (pinned parameters).
pub const PINNED_PARAMETERS: f64 = 2.0;

/// One successful trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: u64,
    /// Smeared nuisance parameters the spectrum was generated with.
    pub nuisance: NuisanceParams,
    pub counts: Vec<u64>,
    pub redraws: usize,
    pub global_nll: f64,
    pub restricted_nll: f64,
    pub lambda: f64,
    pub global_converged: bool,
    pub restricted_converged: bool,
    pub refit: bool,
}

impl TrialRecord {
    pub fn converged(&self) -> bool {
        self.global_converged && self.restricted_converged
    }
}

/// A trial that produced no λ (e.g. sampling degeneracy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub trial: u64,
    pub reason: String,
}

/// All trials at one location, in trial order.
///
/// Built once by [`ProfileOrchestrator::generate_sample`] and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatisticSample {
    location: SignalLocation,
    records: Vec<TrialRecord>,
    failures: Vec<TrialFailure>,
}

impl TestStatisticSample {
    pub fn location(&self) -> SignalLocation {
        self.location
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn failures(&self) -> &[TrialFailure] {
        &self.failures
    }

    /// Trials attempted.
    pub fn n_trials(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    pub fn n_errored(&self) -> usize {
        self.failures.len()
    }

    pub fn n_nonconverged(&self) -> usize {
        self.records.iter().filter(|r| !r.converged()).count()
    }

    /// λ values admitted under `policy`, in trial order.
    pub fn lambdas(&self, policy: NonConvergedPolicy) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| policy == NonConvergedPolicy::Include || r.converged())
            .map(|r| r.lambda)
            .collect()
    }

    fn from_outcomes(location: SignalLocation, outcomes: Vec<(u64, Result<TrialRecord>)>) -> Self {
        let mut records = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (trial, outcome) in outcomes {
            match outcome {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("trial {trial} at {location:?} failed: {e}");
                    failures.push(TrialFailure {
                        trial,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Self {
            location,
            records,
            failures,
        }
    }
}

/// Calibration verdict at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub location: SignalLocation,
    pub confidence_level: f64,
    pub lambda_observed: f64,
    pub n_toys: usize,
    /// Trials entering the empirical distribution.
    pub n_used: usize,
    pub n_errored: usize,
    pub n_nonconverged: usize,
    /// Empirical p-value; `None` when no trial was usable.
    pub p_value: Option<f64>,
    /// Binomial standard error of `p_value`.
    pub p_value_error: Option<f64>,
    /// Wilks reference: `P(χ²(2) >= 2λ_obs)`.
    pub p_value_asymptotic: f64,
    /// Empirical CL-quantile of λ_trial.
    pub critical_value: Option<f64>,
    pub accepted: bool,
}

/// Observed profile point, toy sample and verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub config: CalibrationConfig,
    pub observed: ProfilePoint,
    pub sample: TestStatisticSample,
    pub summary: CalibrationSummary,
}

impl ProfileOrchestrator {
    /// Run `config.n_toys` pseudoexperiments at `config.location`.
    pub fn generate_sample(
        &self,
        config: &CalibrationConfig,
        n_bins: usize,
    ) -> Result<TestStatisticSample> {
        config.validate()?;
        let location = config.location;
        let n_toys = config.n_toys as u64;
        info!(
            "calibrating {location:?}: {n_toys} toys, seed {}, {:?} streams",
            config.seed, config.stream_mode
        );

        let outcomes: Vec<(u64, Result<TrialRecord>)> = match config.stream_mode {
            StreamMode::PerTrial => (0..n_toys)
                .into_par_iter()
                .map(|trial| {
                    let streams = RngStreams::for_trial(config.seed, trial);
                    let outcome = self
                        .generator(config, n_bins, streams)
                        .and_then(|mut generator| self.run_trial(&mut generator, trial, location));
                    (trial, outcome)
                })
                .collect(),
            StreamMode::Shared => {
                let mut generator =
                    self.generator(config, n_bins, RngStreams::shared(config.seed))?;
                (0..n_toys)
                    .map(|trial| (trial, self.run_trial(&mut generator, trial, location)))
                    .collect()
            }
        };

        let sample = TestStatisticSample::from_outcomes(location, outcomes);
        info!(
            "calibration at {location:?} done: {} ok, {} errored, {} non-converged",
            sample.records.len(),
            sample.n_errored(),
            sample.n_nonconverged()
        );
        Ok(sample)
    }

    /// Observed λ at `config.location` calibrated against pseudoexperiments.
    pub fn calibrate(
        &self,
        observed: &EnergySpectrum,
        config: &CalibrationConfig,
    ) -> Result<Calibration> {
        let global = self.observed_global_fit(observed)?;
        self.calibrate_with_global(observed, &global, config)
    }

    /// Like [`ProfileOrchestrator::calibrate`], reusing a converged global fit.
    pub fn calibrate_with_global(
        &self,
        observed: &EnergySpectrum,
        global: &FitResult<ParameterVector>,
        config: &CalibrationConfig,
    ) -> Result<Calibration> {
        config.validate()?;
        let point = self.profile(observed, global, config.location)?;
        info!(
            "observed lambda at {:?} = {:.6}",
            config.location, point.lambda
        );
        let sample = self.generate_sample(config, observed.n_bins())?;
        let summary = summarize(config, point.lambda, &sample)?;
        Ok(Calibration {
            config: *config,
            observed: point,
            sample,
            summary,
        })
    }

    fn generator(
        &self,
        config: &CalibrationConfig,
        n_bins: usize,
        streams: RngStreams,
    ) -> Result<PseudoExperimentGenerator> {
        PseudoExperimentGenerator::new(&self.priors, n_bins, config.degeneracy, streams)
    }

    fn run_trial(
        &self,
        generator: &mut PseudoExperimentGenerator,
        trial: u64,
        location: SignalLocation,
    ) -> Result<TrialRecord> {
        let experiment = generator.generate(location)?;
        let objective = FullNll::new(&experiment.spectrum);
        let global = self
            .driver
            .fit_full_from(&objective, self.driver.options().full_guess)?;
        let point = self.profile_with(&objective, global, location)?;
        debug!("trial {trial}: lambda={:.6}", point.lambda);

        Ok(TrialRecord {
            trial,
            nuisance: experiment.nuisance,
            counts: experiment.spectrum.counts().to_vec(),
            redraws: experiment.redraws,
            global_nll: point.global.nll,
            restricted_nll: point.restricted.nll,
            lambda: point.lambda,
            global_converged: point.global.converged,
            restricted_converged: point.restricted.converged,
            refit: point.refit,
        })
    }
}

/// Reduce a sample to its verdict.
pub fn summarize(
    config: &CalibrationConfig,
    lambda_observed: f64,
    sample: &TestStatisticSample,
) -> Result<CalibrationSummary> {
    let mut lambdas = sample.lambdas(config.non_converged);
    lambdas.sort_by(f64::total_cmp);
    let n_used = lambdas.len();
    if n_used == 0 {
        warn!(
            "no usable trials at {:?}; location cannot be accepted",
            config.location
        );
    }

    let p_value = empirical_p_value(&lambdas, lambda_observed);
    let p_value_error = p_value.map(|p| binomial_error(p, n_used));
    let critical_value = (n_used > 0).then(|| quantile_sorted(&lambdas, config.confidence_level));
    let accepted = p_value.is_some_and(|p| p > 1.0 - config.confidence_level);

    Ok(CalibrationSummary {
        location: config.location,
        confidence_level: config.confidence_level,
        lambda_observed,
        n_toys: config.n_toys,
        n_used,
        n_errored: sample.n_errored(),
        n_nonconverged: sample.n_nonconverged(),
        p_value,
        p_value_error,
        p_value_asymptotic: asymptotic_p_value(lambda_observed)?,
        critical_value,
        accepted,
    })
}

/// Fraction of `sorted` (ascending) at or above `lambda_observed`.
pub fn empirical_p_value(sorted: &[f64], lambda_observed: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = sorted.partition_point(|v| *v < lambda_observed);
    Some((sorted.len() - idx) as f64 / sorted.len() as f64)
}

pub fn binomial_error(p: f64, n: usize) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    (p * (1.0 - p) / n as f64).sqrt()
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let idx = p * ((n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let frac = idx - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Wilks' theorem: 2λ follows χ² with one degree of freedom per pinned
/// parameter.
pub fn asymptotic_p_value(lambda: f64) -> Result<f64> {
    let chi2 = ChiSquared::new(PINNED_PARAMETERS)
        .map_err(|e| InferenceError::Config(format!("chi-squared reference: {e}")))?;
    Ok(chi2.sf(2.0 * lambda.max(0.0)))
}
