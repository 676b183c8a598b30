//! Hessian-based parameter uncertainties.
//!
//! At a likelihood minimum the covariance of the estimates is approximated by
//! the inverse Hessian of the NLL. The Hessian is built from forward
//! differences of the analytic gradient:
//!
//! ```text
//! H_ij ≈ (g_i(x + ε·e_j) − g_i(x)) / ε
//! ```
//!
//! Forward steps only ever increase a coordinate, so a point on a lower bound
//! stays inside the valid region.

use log::warn;
use nalgebra::DMatrix;

use crate::error::Result;

/// Finite-difference Hessian of a function given its gradient, symmetrised.
pub fn hessian_from_gradient<G>(gradient: G, x: &[f64]) -> Result<DMatrix<f64>>
where
    G: Fn(&[f64]) -> Result<Vec<f64>>,
{
    let n = x.len();
    let grad_center = gradient(x)?;
    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        let eps = 1e-5 * x[j].abs().max(1.0);
        let mut x_plus = x.to_vec();
        x_plus[j] += eps;
        let grad_plus = gradient(&x_plus)?;
        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Invert a Hessian via (progressively damped) Cholesky.
///
/// Returns `None` when no positive-definite damping is found.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n)
        .map(|i| hessian[(i, i)].abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    for _ in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            let cov = chol.solve(&identity);
            if (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) {
                return Some(cov);
            }
        }
        let next = if damping == 0.0 {
            diag_scale * 1e-9
        } else {
            damping * 10.0
        };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }
    None
}

/// `1/sqrt(|H_ii|)` per parameter.
pub fn diagonal_uncertainties(hessian: &DMatrix<f64>) -> Vec<f64> {
    (0..hessian.nrows())
        .map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt())
        .collect()
}

/// Standard errors from the inverse Hessian, with the diagonal estimate as
/// fallback when inversion fails.
pub fn standard_errors(hessian: &DMatrix<f64>) -> Vec<f64> {
    match invert_hessian(hessian) {
        Some(cov) => (0..cov.nrows()).map(|i| cov[(i, i)].sqrt()).collect(),
        None => {
            warn!("Hessian inversion failed, using diagonal approximation");
            diagonal_uncertainties(hessian)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_hessian_and_errors() {
        // f = x²/(2σx²) + y²/(2σy²)  ->  errors σx, σy
        let (sx, sy) = (2.0_f64, 0.5_f64);
        let grad = |p: &[f64]| -> Result<Vec<f64>> { Ok(vec![p[0] / (sx * sx), p[1] / (sy * sy)]) };
        let h = hessian_from_gradient(grad, &[0.3, -0.1]).unwrap();
        assert_relative_eq!(h[(0, 0)], 0.25, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 1)], 4.0, epsilon = 1e-6);
        assert_relative_eq!(h[(0, 1)], 0.0, epsilon = 1e-9);

        let errs = standard_errors(&h);
        assert_relative_eq!(errs[0], sx, epsilon = 1e-4);
        assert_relative_eq!(errs[1], sy, epsilon = 1e-4);
    }

    #[test]
    fn singular_hessian_is_damped_into_a_finite_covariance() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let errs = standard_errors(&h);
        assert!(errs.iter().all(|e| e.is_finite() && *e > 0.0));
    }
}
