//! Reporting utilities: λ distribution summaries and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::NonConvergedPolicy;
use crate::profile::TestStatisticSample;

/// Equal-width histogram of the admitted λ sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaHistogram {
    /// `(lower edge, upper edge, count)` per bin.
    pub bins: Vec<(f64, f64, usize)>,
    pub n: usize,
}

/// Bin λ_trial values admitted under `policy` into `n_bins` equal-width bins
/// spanning `[0, max λ]`.
pub fn lambda_histogram(
    sample: &TestStatisticSample,
    policy: NonConvergedPolicy,
    n_bins: usize,
) -> LambdaHistogram {
    let lambdas = sample.lambdas(policy);
    let n_bins = n_bins.max(1);
    let max = lambdas.iter().copied().fold(0.0_f64, f64::max);
    let width = if max > 0.0 { max / n_bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; n_bins];
    for &l in &lambdas {
        let idx = ((l / width) as usize).min(n_bins - 1);
        counts[idx] += 1;
    }

    LambdaHistogram {
        bins: counts
            .into_iter()
            .enumerate()
            .map(|(i, c)| (i as f64 * width, (i + 1) as f64 * width, c))
            .collect(),
        n: lambdas.len(),
    }
}
