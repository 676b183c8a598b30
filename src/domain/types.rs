//! Shared domain types.
//!
//! These types are intentionally small `Copy`/value types so they can be:
//!
//! - passed freely between rayon workers without synchronization
//! - exported to JSON/CSV
//! - reloaded later for reporting

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, Result};

/// Number of energy bins in a spectrum.
pub const N_BINS: usize = 20;

/// The experiment's observed energy spectrum (bins `k = 1..=20`).
pub const OBSERVED_COUNTS: [u64; N_BINS] = [
    7, 4, 4, 3, 4, 6, 5, 3, 6, 5, 4, 1, 3, 0, 1, 1, 2, 0, 1, 0,
];

/// Names of the six model parameters in vector order.
pub const PARAMETER_NAMES: [&str; 6] = ["a", "b", "c", "d", "mass", "delta"];

/// A fixed-size parameter set that the fit driver can flatten for the
/// minimizer and rebuild from the minimizer's output.
pub trait ParameterSet: Sized + Copy {
    /// Number of free parameters.
    const DIM: usize;

    fn to_vec(&self) -> Vec<f64>;

    /// Rebuild from a flat slice of exactly `DIM` values.
    fn from_slice(values: &[f64]) -> Result<Self>;
}

fn check_len(values: &[f64], dim: usize) -> Result<()> {
    if values.len() != dim {
        return Err(InferenceError::Config(format!(
            "expected {dim} parameter values, got {}",
            values.len()
        )));
    }
    Ok(())
}

/// Background/signal normalization and shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NuisanceParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl NuisanceParams {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }
}

impl ParameterSet for NuisanceParams {
    const DIM: usize = 4;

    fn to_vec(&self) -> Vec<f64> {
        vec![self.a, self.b, self.c, self.d]
    }

    fn from_slice(values: &[f64]) -> Result<Self> {
        check_len(values, Self::DIM)?;
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

/// Signal location and width (the parameters of interest).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalLocation {
    pub mass: f64,
    pub delta: f64,
}

impl SignalLocation {
    pub fn new(mass: f64, delta: f64) -> Self {
        Self { mass, delta }
    }
}

impl Default for SignalLocation {
    fn default() -> Self {
        Self::new(8.0, 2.0)
    }
}

/// All six model parameters `(a, b, c, d, mass, delta)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub mass: f64,
    pub delta: f64,
}

impl ParameterVector {
    pub fn new(a: f64, b: f64, c: f64, d: f64, mass: f64, delta: f64) -> Self {
        Self {
            a,
            b,
            c,
            d,
            mass,
            delta,
        }
    }

    pub fn from_parts(nuisance: NuisanceParams, location: SignalLocation) -> Self {
        Self::new(
            nuisance.a,
            nuisance.b,
            nuisance.c,
            nuisance.d,
            location.mass,
            location.delta,
        )
    }

    pub fn nuisance(&self) -> NuisanceParams {
        NuisanceParams::new(self.a, self.b, self.c, self.d)
    }

    pub fn location(&self) -> SignalLocation {
        SignalLocation::new(self.mass, self.delta)
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.mass, self.delta]
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl ParameterSet for ParameterVector {
    const DIM: usize = 6;

    fn to_vec(&self) -> Vec<f64> {
        self.to_array().to_vec()
    }

    fn from_slice(values: &[f64]) -> Result<Self> {
        check_len(values, Self::DIM)?;
        Ok(Self::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        ))
    }
}

/// Binned counts, bin `k` (1-based) at index `k - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergySpectrum {
    counts: Vec<u64>,
}

impl EnergySpectrum {
    pub fn new(counts: Vec<u64>) -> Result<Self> {
        if counts.is_empty() {
            return Err(InferenceError::Config("energy spectrum has no bins".into()));
        }
        Ok(Self { counts })
    }

    /// The fixed observed spectrum.
    pub fn observed() -> Self {
        Self {
            counts: OBSERVED_COUNTS.to_vec(),
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Iterate `(k, n_k)` with the 1-based bin index as `f64`.
    pub fn bins(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &n)| ((i + 1) as f64, n))
    }
}

/// Gaussian prior: central value and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    pub center: f64,
    pub width: f64,
}

impl GaussianPrior {
    pub const fn new(center: f64, width: f64) -> Self {
        Self { center, width }
    }
}

/// Priors used to smear the nuisance parameters of each pseudoexperiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorConstants {
    pub a: GaussianPrior,
    pub b: GaussianPrior,
    pub c: GaussianPrior,
    pub d: GaussianPrior,
}

impl Default for PriorConstants {
    fn default() -> Self {
        Self {
            a: GaussianPrior::new(10.26, 0.3),
            b: GaussianPrior::new(5.16, 0.1),
            c: GaussianPrior::new(3.31, 0.6),
            d: GaussianPrior::new(0.76, 0.04),
        }
    }
}

impl PriorConstants {
    pub fn validate(&self) -> Result<()> {
        for (name, prior) in [("a", self.a), ("b", self.b), ("c", self.c), ("d", self.d)] {
            if !(prior.center.is_finite() && prior.width.is_finite() && prior.width >= 0.0) {
                return Err(InferenceError::Config(format!(
                    "invalid prior for {name}: center={}, width={}",
                    prior.center, prior.width
                )));
            }
        }
        Ok(())
    }
}

/// Box constraints for the six model parameters.
///
/// A valid box keeps every bin mean strictly positive: with `a, c >= 0`,
/// `b, delta > 0` and `d > 0` each term of the mean is non-negative and the
/// offset is positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub a: (f64, f64),
    pub b: (f64, f64),
    pub c: (f64, f64),
    pub d: (f64, f64),
    pub mass: (f64, f64),
    pub delta: (f64, f64),
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            a: (0.0, 100.0),
            b: (0.1, 100.0),
            c: (0.0, 100.0),
            d: (1e-6, 50.0),
            mass: (0.5, 20.5),
            delta: (0.1, 20.0),
        }
    }
}

impl ParameterBounds {
    pub fn validate(&self) -> Result<()> {
        let boxes = [
            ("a", self.a),
            ("b", self.b),
            ("c", self.c),
            ("d", self.d),
            ("mass", self.mass),
            ("delta", self.delta),
        ];
        for (name, (lo, hi)) in boxes {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(InferenceError::Config(format!(
                    "invalid bounds for {name}: [{lo}, {hi}]"
                )));
            }
        }
        if self.a.0 < 0.0 || self.c.0 < 0.0 {
            return Err(InferenceError::Config(
                "lower bounds of a and c must be >= 0".into(),
            ));
        }
        if self.b.0 <= 0.0 || self.d.0 <= 0.0 || self.delta.0 <= 0.0 {
            return Err(InferenceError::Config(
                "lower bounds of b, d and delta must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Bounds in `ParameterVector` order.
    pub fn full(&self) -> Vec<(f64, f64)> {
        vec![self.a, self.b, self.c, self.d, self.mass, self.delta]
    }

    /// Bounds in `NuisanceParams` order.
    pub fn nuisance(&self) -> Vec<(f64, f64)> {
        vec![self.a, self.b, self.c, self.d]
    }

    pub fn contains_location(&self, location: SignalLocation) -> bool {
        let (m_lo, m_hi) = self.mass;
        let (d_lo, d_hi) = self.delta;
        (m_lo..=m_hi).contains(&location.mass) && (d_lo..=d_hi).contains(&location.delta)
    }
}

/// What to do when smeared nuisance parameters give a non-positive bin mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DegeneracyPolicy {
    /// Redraw the nuisance parameters (bounded number of attempts).
    #[default]
    Redraw,
    /// Floor the offending means at a small positive value.
    Clamp,
    /// Fail the trial immediately.
    Abort,
}

/// Whether trials with a non-converged fit enter the calibration sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NonConvergedPolicy {
    #[default]
    Exclude,
    Include,
}

/// How random streams are assigned to pseudoexperiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StreamMode {
    /// One independently seeded sub-stream pair per trial (parallel-safe).
    #[default]
    PerTrial,
    /// One shared stream pair consumed sequentially, trial after trial.
    Shared,
}

/// Monte-Carlo calibration settings for one signal location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub location: SignalLocation,
    pub n_toys: usize,
    pub seed: u64,
    pub stream_mode: StreamMode,
    pub non_converged: NonConvergedPolicy,
    pub degeneracy: DegeneracyPolicy,
    /// Confidence level used for the acceptance decision and critical value.
    pub confidence_level: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            location: SignalLocation::default(),
            n_toys: 1000,
            seed: crate::data::DEFAULT_MASTER_SEED,
            stream_mode: StreamMode::PerTrial,
            non_converged: NonConvergedPolicy::Exclude,
            degeneracy: DegeneracyPolicy::Redraw,
            confidence_level: 0.68,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_toys == 0 {
            return Err(InferenceError::Config("number of toys must be > 0".into()));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(InferenceError::Config(format!(
                "confidence level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        let SignalLocation { mass, delta } = self.location;
        if !(mass.is_finite() && delta.is_finite() && delta > 0.0) {
            return Err(InferenceError::Config(format!(
                "invalid signal location: mass={mass}, delta={delta} (delta must be > 0)"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_vector_splits_into_nuisance_and_location() {
        let p = ParameterVector::new(10.0, 5.0, 3.0, 1.0, 8.0, 2.0);
        assert_eq!(p.nuisance(), NuisanceParams::new(10.0, 5.0, 3.0, 1.0));
        assert_eq!(p.location(), SignalLocation::new(8.0, 2.0));
        assert_eq!(ParameterVector::from_parts(p.nuisance(), p.location()), p);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(ParameterVector::from_slice(&[1.0; 4]).is_err());
        assert!(NuisanceParams::from_slice(&[1.0; 6]).is_err());
        let n = NuisanceParams::from_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(n.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn observed_spectrum_has_one_based_bins() {
        let s = EnergySpectrum::observed();
        assert_eq!(s.n_bins(), N_BINS);
        assert_eq!(s.total(), 60);
        let first = s.bins().next().unwrap();
        assert_eq!(first, (1.0, 7));
        assert!(EnergySpectrum::new(Vec::new()).is_err());
    }

    #[test]
    fn default_bounds_are_valid_and_bad_bounds_are_rejected() {
        ParameterBounds::default().validate().unwrap();

        let zero_delta = ParameterBounds {
            delta: (0.0, 5.0),
            ..ParameterBounds::default()
        };
        assert!(zero_delta.validate().is_err());

        let negative_c = ParameterBounds {
            c: (-1.0, 5.0),
            ..ParameterBounds::default()
        };
        assert!(negative_c.validate().is_err());
    }

    #[test]
    fn calibration_config_validation() {
        CalibrationConfig::default().validate().unwrap();
        let bad = CalibrationConfig {
            n_toys: 0,
            ..CalibrationConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad_cl = CalibrationConfig {
            confidence_level: 1.0,
            ..CalibrationConfig::default()
        };
        assert!(bad_cl.validate().is_err());
    }

    #[test]
    fn calibration_config_rejects_non_positive_width() {
        for delta in [-2.0, 0.0, f64::NAN] {
            let config = CalibrationConfig {
                location: SignalLocation::new(8.0, delta),
                ..CalibrationConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, InferenceError::Config(_)), "delta {delta}: {err:?}");
        }
    }
}
