//! Confidence-region sweep over a `(mass, delta)` grid.
//!
//! Every grid location is calibrated independently; its seed is derived from
//! the master seed and the location's grid index, so the verdict at one
//! location does not depend on which other locations are scanned.

use log::info;
use serde::{Deserialize, Serialize};

use crate::data::derive_seed;
use crate::domain::{CalibrationConfig, EnergySpectrum, ParameterVector, SignalLocation};
use crate::error::{InferenceError, Result};
use crate::fit::FitResult;
use crate::math::location_grid;
use crate::profile::calibration::CalibrationSummary;
use crate::profile::statistic::ProfileOrchestrator;

/// Grid axes plus the calibration settings applied at every location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub masses: Vec<f64>,
    pub deltas: Vec<f64>,
    /// `location` is ignored; `seed` is the master seed of the sweep.
    pub calibration: CalibrationConfig,
}

impl ScanConfig {
    pub fn locations(&self) -> Vec<SignalLocation> {
        location_grid(&self.masses, &self.deltas)
    }

    pub fn validate(&self) -> Result<()> {
        if self.masses.is_empty() || self.deltas.is_empty() {
            return Err(InferenceError::Config("scan grid is empty".into()));
        }
        if let Some(bad) = self.deltas.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            return Err(InferenceError::Config(format!(
                "scan widths must be finite and > 0, got {bad}"
            )));
        }
        if let Some(bad) = self.masses.iter().find(|m| !m.is_finite()) {
            return Err(InferenceError::Config(format!("non-finite scan mass {bad}")));
        }
        Ok(())
    }

    /// Calibration settings for the location at grid index `index`.
    pub fn calibration_at(&self, index: usize, location: SignalLocation) -> CalibrationConfig {
        CalibrationConfig {
            location,
            seed: derive_seed(self.calibration.seed, "location", index as u64),
            ..self.calibration
        }
    }
}

/// Sweep result: one calibration summary per grid location (mass-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRegion {
    pub confidence_level: f64,
    pub global_fit: ParameterVector,
    pub global_nll: f64,
    pub points: Vec<CalibrationSummary>,
}

impl ConfidenceRegion {
    pub fn accepted(&self) -> impl Iterator<Item = &CalibrationSummary> + '_ {
        self.points.iter().filter(|p| p.accepted)
    }

    pub fn n_accepted(&self) -> usize {
        self.accepted().count()
    }

    /// Smallest and largest accepted mass and delta, when anything is accepted.
    pub fn extent(&self) -> Option<((f64, f64), (f64, f64))> {
        let mut it = self.accepted();
        let first = it.next()?.location;
        let init = ((first.mass, first.mass), (first.delta, first.delta));
        Some(it.fold(init, |((m_lo, m_hi), (d_lo, d_hi)), p| {
            let SignalLocation { mass, delta } = p.location;
            ((m_lo.min(mass), m_hi.max(mass)), (d_lo.min(delta), d_hi.max(delta)))
        }))
    }
}

impl ProfileOrchestrator {
    /// Calibrate every grid location against the observed spectrum.
    pub fn scan(&self, observed: &EnergySpectrum, config: &ScanConfig) -> Result<ConfidenceRegion> {
        config.validate()?;
        let global = self.observed_global_fit(observed)?;
        self.scan_with_global(observed, &global, config)
    }

    pub fn scan_with_global(
        &self,
        observed: &EnergySpectrum,
        global: &FitResult<ParameterVector>,
        config: &ScanConfig,
    ) -> Result<ConfidenceRegion> {
        config.validate()?;
        let locations = config.locations();
        info!(
            "scanning {} locations ({} masses x {} widths)",
            locations.len(),
            config.masses.len(),
            config.deltas.len()
        );

        let mut points = Vec::with_capacity(locations.len());
        for (index, location) in locations.into_iter().enumerate() {
            let calibration =
                self.calibrate_with_global(observed, global, &config.calibration_at(index, location))?;
            points.push(calibration.summary);
        }

        let region = ConfidenceRegion {
            confidence_level: config.calibration.confidence_level,
            global_fit: global.best,
            global_nll: global.nll,
            points,
        };
        info!(
            "{} of {} locations inside the {:.0}% region",
            region.n_accepted(),
            region.points.len(),
            100.0 * region.confidence_level
        );
        Ok(region)
    }
}
