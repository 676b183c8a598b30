//! Special functions used by the likelihood.

use statrs::function::gamma::ln_gamma;

/// `ln(n!)` computed as `ln Γ(n + 1)`.
///
/// Stable for any count; `n!` itself overflows `f64` beyond `n = 170`.
pub fn ln_factorial(n: u64) -> f64 {
    if n < 2 {
        return 0.0;
    }
    ln_gamma(n as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn small_factorials_match_direct_product() {
        let mut fact = 1.0_f64;
        for n in 1..=15u64 {
            fact *= n as f64;
            assert_relative_eq!(ln_factorial(n), fact.ln(), epsilon = 1e-9);
        }
        assert_eq!(ln_factorial(0), 0.0);
    }

    #[test]
    fn large_counts_stay_finite() {
        let v = ln_factorial(10_000);
        assert!(v.is_finite());
        // Stirling: n ln n - n + ½ ln(2πn)
        let n = 10_000.0_f64;
        let stirling = n * n.ln() - n + 0.5 * (2.0 * std::f64::consts::PI * n).ln();
        assert_relative_eq!(v, stirling, max_relative = 1e-8);
    }
}
