//! Pseudoexperiment generation.
//!
//! One pseudoexperiment at a hypothesized `(mass, delta)`:
//!
//! 1. draw `(a, b, c, d)` independently from their Gaussian priors
//! 2. evaluate the Poisson mean of every bin
//! 3. draw each bin count from `Poisson(μ_k)`
//!
//! Smearing can produce a non-positive mean (e.g. a large negative draw of
//! `d`). That case is resolved by the generator's `DegeneracyPolicy`.

use log::{debug, warn};
use rand_distr::{Distribution, Normal, Poisson};

use crate::data::streams::RngStreams;
use crate::domain::{
    DegeneracyPolicy, EnergySpectrum, GaussianPrior, NuisanceParams, ParameterVector,
    PriorConstants, SignalLocation,
};
use crate::error::{InferenceError, Result};
use crate::models::expected_counts;

/// Maximum nuisance redraws under `DegeneracyPolicy::Redraw`.
pub const MAX_REDRAWS: usize = 100;

/// Floor applied to non-positive means under `DegeneracyPolicy::Clamp`.
pub const MEAN_FLOOR: f64 = 1e-9;

/// One generated pseudoexperiment plus the draws that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoExperiment {
    pub location: SignalLocation,
    pub nuisance: NuisanceParams,
    pub spectrum: EnergySpectrum,
    /// Nuisance redraws needed before every mean was positive.
    pub redraws: usize,
    /// Bins whose mean was floored (clamp policy only).
    pub clamped_bins: usize,
}

/// Draws synthetic spectra from the model, owning its random streams.
#[derive(Debug, Clone)]
pub struct PseudoExperimentGenerator {
    smearing: [Normal<f64>; 4],
    n_bins: usize,
    policy: DegeneracyPolicy,
    streams: RngStreams,
}

fn prior_normal(name: &str, prior: GaussianPrior) -> Result<Normal<f64>> {
    Normal::new(prior.center, prior.width)
        .map_err(|e| InferenceError::Config(format!("prior for {name}: {e}")))
}

impl PseudoExperimentGenerator {
    pub fn new(
        priors: &PriorConstants,
        n_bins: usize,
        policy: DegeneracyPolicy,
        streams: RngStreams,
    ) -> Result<Self> {
        priors.validate()?;
        if n_bins == 0 {
            return Err(InferenceError::Config("pseudoexperiments need >= 1 bin".into()));
        }
        Ok(Self {
            smearing: [
                prior_normal("a", priors.a)?,
                prior_normal("b", priors.b)?,
                prior_normal("c", priors.c)?,
                prior_normal("d", priors.d)?,
            ],
            n_bins,
            policy,
            streams,
        })
    }

    /// Generate one spectrum at `location`.
    pub fn generate(&mut self, location: SignalLocation) -> Result<PseudoExperiment> {
        if location.delta == 0.0 || !(location.delta.is_finite() && location.mass.is_finite()) {
            return Err(InferenceError::Domain(format!(
                "cannot generate at mass={}, delta={}",
                location.mass, location.delta
            )));
        }

        let mut redraws = 0usize;
        let (nuisance, means, clamped_bins) = loop {
            let nuisance = self.draw_nuisance();
            let params = ParameterVector::from_parts(nuisance, location);
            let means = expected_counts(&params, self.n_bins).ok();

            match means {
                Some(means) if means.iter().all(|m| m.is_finite() && *m > 0.0) => {
                    break (nuisance, means, 0);
                }
                Some(means) if self.policy == DegeneracyPolicy::Clamp => {
                    if means.iter().any(|m| !m.is_finite()) {
                        return Err(InferenceError::SamplingDegeneracy(format!(
                            "non-finite bin mean for nuisance draw {nuisance:?}"
                        )));
                    }
                    let clamped = means.iter().filter(|m| **m <= 0.0).count();
                    let floored = means.into_iter().map(|m| m.max(MEAN_FLOOR)).collect();
                    warn!("clamped {clamped} non-positive bin mean(s) for draw {nuisance:?}");
                    break (nuisance, floored, clamped);
                }
                _ => {}
            }

            if self.policy == DegeneracyPolicy::Abort || redraws >= MAX_REDRAWS {
                return Err(InferenceError::SamplingDegeneracy(format!(
                    "nuisance draw {nuisance:?} gives a non-positive bin mean (after {redraws} redraws)"
                )));
            }
            redraws += 1;
            warn!("non-positive bin mean for draw {nuisance:?}; redrawing ({redraws}/{MAX_REDRAWS})");
        };

        let mut counts = Vec::with_capacity(self.n_bins);
        for &mu in &means {
            let poisson = Poisson::new(mu).map_err(|e| {
                InferenceError::SamplingDegeneracy(format!("Poisson mean {mu}: {e}"))
            })?;
            let n: f64 = poisson.sample(self.streams.counts());
            counts.push(n as u64);
        }

        debug!("pseudoexperiment at {location:?}: nuisance={nuisance:?}, counts={counts:?}");
        Ok(PseudoExperiment {
            location,
            nuisance,
            spectrum: EnergySpectrum::new(counts)?,
            redraws,
            clamped_bins,
        })
    }

    fn draw_nuisance(&mut self) -> NuisanceParams {
        let rng = self.streams.nuisance();
        let [a, b, c, d] = &self.smearing;
        NuisanceParams::new(a.sample(rng), b.sample(rng), c.sample(rng), d.sample(rng))
    }
}
