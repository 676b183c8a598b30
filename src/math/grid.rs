//! Grid generation for confidence-region sweeps.
//!
//! The region is built over a deterministic rectangular grid of `(mass, delta)`
//! locations so that the same flags always visit the same points in the same
//! order.

use crate::domain::SignalLocation;
use crate::error::{InferenceError, Result};

/// Generate `steps` evenly spaced points between `min` and `max` (inclusive).
///
/// `steps == 1` yields just `min`.
pub fn lin_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && max >= min) {
        return Err(InferenceError::Config(format!(
            "Invalid grid range: min={min}, max={max} (must be finite and max>=min)."
        )));
    }
    if steps == 0 {
        return Err(InferenceError::Config("Grid steps must be >= 1.".into()));
    }
    if steps == 1 {
        return Ok(vec![min]);
    }

    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Cartesian product of mass and delta values, mass-major.
pub fn location_grid(masses: &[f64], deltas: &[f64]) -> Vec<SignalLocation> {
    let mut out = Vec::with_capacity(masses.len() * deltas.len());
    for &mass in masses {
        for &delta in deltas {
            out.push(SignalLocation::new(mass, delta));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lin_space_includes_endpoints() {
        let v = lin_space(2.0, 18.0, 9).unwrap();
        assert_eq!(v.len(), 9);
        assert!((v[0] - 2.0).abs() < 1e-12);
        assert!((v[8] - 18.0).abs() < 1e-12);
        assert!((v[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn lin_space_rejects_bad_ranges() {
        assert!(lin_space(5.0, 1.0, 3).is_err());
        assert!(lin_space(1.0, 5.0, 0).is_err());
        assert_eq!(lin_space(3.0, 3.0, 1).unwrap(), vec![3.0]);
    }

    #[test]
    fn location_grid_is_mass_major() {
        let grid = location_grid(&[1.0, 2.0], &[0.5, 1.0, 1.5]);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], SignalLocation::new(1.0, 0.5));
        assert_eq!(grid[2], SignalLocation::new(1.0, 1.5));
        assert_eq!(grid[3], SignalLocation::new(2.0, 0.5));
    }
}
