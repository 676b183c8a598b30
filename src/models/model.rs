//! Expected counts per bin.
//!
//! ```text
//! μ(k) = a·exp(−k/b) + d + (c/δ)·exp(−½((k − m)/δ)²)
//! ```
//!
//! An exponential background plus flat offset, and a Gaussian peak of area
//! `c` at `m` with width `δ`. The model never clamps: a non-positive mean is
//! returned as-is and rejected by whoever needs a valid Poisson mean.

use crate::domain::ParameterVector;
use crate::error::{InferenceError, Result};

fn check_divisors(p: &ParameterVector) -> Result<()> {
    if p.b == 0.0 || !p.b.is_finite() {
        return Err(InferenceError::Domain(format!(
            "background slope b must be finite and non-zero, got {}",
            p.b
        )));
    }
    if p.delta == 0.0 || !p.delta.is_finite() {
        return Err(InferenceError::Domain(format!(
            "signal width delta must be finite and non-zero, got {}",
            p.delta
        )));
    }
    Ok(())
}

/// Poisson mean for bin `k` (1-based).
pub fn poisson_mean(p: &ParameterVector, k: f64) -> Result<f64> {
    check_divisors(p)?;
    let background = p.a * (-k / p.b).exp() + p.d;
    let z = (k - p.mass) / p.delta;
    let signal = (p.c / p.delta) * (-0.5 * z * z).exp();
    Ok(background + signal)
}

/// Poisson means for bins `1..=n_bins`.
pub fn expected_counts(p: &ParameterVector, n_bins: usize) -> Result<Vec<f64>> {
    (1..=n_bins).map(|k| poisson_mean(p, k as f64)).collect()
}

/// Mean and its gradient with respect to `(a, b, c, d, mass, delta)`.
pub fn poisson_mean_with_gradient(p: &ParameterVector, k: f64) -> Result<(f64, [f64; 6])> {
    check_divisors(p)?;
    let e = (-k / p.b).exp();
    let z = (k - p.mass) / p.delta;
    let g = (-0.5 * z * z).exp();
    let peak = (p.c / p.delta) * g;
    let mu = p.a * e + p.d + peak;

    let grad = [
        e,
        p.a * e * k / (p.b * p.b),
        g / p.delta,
        1.0,
        peak * z / p.delta,
        peak * (z * z - 1.0) / p.delta,
    ];
    Ok((mu, grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nominal() -> ParameterVector {
        ParameterVector::new(10.26, 5.16, 3.31, 0.76, 8.0, 2.0)
    }

    #[test]
    fn mean_matches_closed_form_at_peak() {
        let p = nominal();
        let mu = poisson_mean(&p, 8.0).unwrap();
        let expected = 10.26 * (-8.0_f64 / 5.16).exp() + 0.76 + 3.31 / 2.0;
        assert_relative_eq!(mu, expected, epsilon = 1e-12);
    }

    #[test]
    fn pure_background_strictly_decreases_in_k() {
        let p = ParameterVector::new(10.0, 5.0, 0.0, 1.0, 8.0, 2.0);
        let means = expected_counts(&p, 20).unwrap();
        for w in means.windows(2) {
            assert!(w[1] < w[0], "expected decreasing means, got {w:?}");
        }
    }

    #[test]
    fn zero_divisors_are_domain_errors() {
        let mut p = nominal();
        p.delta = 0.0;
        assert!(matches!(poisson_mean(&p, 1.0), Err(InferenceError::Domain(_))));
        let mut p = nominal();
        p.b = 0.0;
        assert!(matches!(poisson_mean(&p, 1.0), Err(InferenceError::Domain(_))));
        assert!(poisson_mean_with_gradient(&p, 1.0).is_err());
    }

    #[test]
    fn model_does_not_clamp_negative_means() {
        let p = ParameterVector::new(-50.0, 5.0, 0.0, 0.1, 8.0, 2.0);
        let mu = poisson_mean(&p, 1.0).unwrap();
        assert!(mu < 0.0);
    }

    #[test]
    fn analytic_gradient_matches_central_differences() {
        let p = nominal();
        let base = p.to_array();
        for k in [1.0, 6.5, 8.0, 13.0, 20.0] {
            let (mu, grad) = poisson_mean_with_gradient(&p, k).unwrap();
            assert_relative_eq!(mu, poisson_mean(&p, k).unwrap(), epsilon = 1e-12);
            for i in 0..6 {
                let h = 1e-6 * base[i].abs().max(1.0);
                let mut plus = base;
                let mut minus = base;
                plus[i] += h;
                minus[i] -= h;
                let f_plus = poisson_mean(&ParameterVector::from_array(plus), k).unwrap();
                let f_minus = poisson_mean(&ParameterVector::from_array(minus), k).unwrap();
                let numeric = (f_plus - f_minus) / (2.0 * h);
                assert_relative_eq!(grad[i], numeric, epsilon = 1e-6, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn mean_is_continuous_in_each_parameter() {
        let p = nominal();
        let base = p.to_array();
        let mu0 = poisson_mean(&p, 7.0).unwrap();
        for i in 0..6 {
            let mut nudged = base;
            nudged[i] += 1e-9;
            let mu1 = poisson_mean(&ParameterVector::from_array(nudged), 7.0).unwrap();
            assert!(mu1.is_finite());
            assert!((mu1 - mu0).abs() < 1e-6);
        }
    }
}
