//! Plain-text formatting of fits, calibrations and confidence regions.
//!
//! All formatting lives here so the fitting code stays free of output
//! concerns.

use crate::domain::{NuisanceParams, PARAMETER_NAMES, ParameterSet, ParameterVector};
use crate::fit::FitResult;
use crate::profile::{CalibrationSummary, ConfidenceRegion, ProfilePoint};
use crate::report::LambdaHistogram;

/// Global fit: parameter table, objective value and diagnostics.
pub fn format_global_fit(fit: &FitResult<ParameterVector>) -> String {
    let mut out = String::new();
    out.push_str("=== Global fit (all parameters free) ===\n");
    out.push_str(&format_diagnostics(fit));
    out.push_str(&format_parameter_table(
        &PARAMETER_NAMES,
        &fit.best.to_vec(),
        fit.uncertainties.as_deref(),
    ));
    out
}

/// Restricted fit and the profile statistic at its location.
pub fn format_profile(point: &ProfilePoint) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== Restricted fit at mass={:.4}, delta={:.4} ===\n",
        point.location.mass, point.location.delta
    ));
    out.push_str(&format_diagnostics(&point.restricted));
    out.push_str(&format_parameter_table(
        &PARAMETER_NAMES[..NuisanceParams::DIM],
        &point.restricted.best.to_vec(),
        None,
    ));
    out.push_str(&format!("\nlambda = {:.6}", point.lambda));
    if point.refit {
        out.push_str(" (global fit refined from the restricted optimum)");
    }
    out.push('\n');
    out
}

/// Calibration verdict at one location.
pub fn format_calibration(summary: &CalibrationSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== Calibration at mass={:.4}, delta={:.4} ===\n",
        summary.location.mass, summary.location.delta
    ));
    out.push_str(&format!(
        "Toys: {} requested | {} used | {} errored | {} non-converged\n",
        summary.n_toys, summary.n_used, summary.n_errored, summary.n_nonconverged
    ));
    out.push_str(&format!("lambda_obs        : {:.6}\n", summary.lambda_observed));
    out.push_str(&format!(
        "p-value (toys)    : {}",
        fmt_opt(summary.p_value, 4)
    ));
    if let Some(err) = summary.p_value_error {
        out.push_str(&format!(" +/- {err:.4}"));
    }
    out.push('\n');
    out.push_str(&format!(
        "p-value (chi2, 2) : {:.4}\n",
        summary.p_value_asymptotic
    ));
    out.push_str(&format!(
        "lambda_c @ {:.0}%    : {}\n",
        100.0 * summary.confidence_level,
        fmt_opt(summary.critical_value, 6)
    ));
    out.push_str(&format!(
        "Verdict           : {}\n",
        if summary.accepted {
            "inside the confidence region"
        } else {
            "excluded"
        }
    ));
    out
}

/// Grid sweep table, one row per location.
pub fn format_region(region: &ConfidenceRegion) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== Confidence region ({:.0}% CL) ===\n",
        100.0 * region.confidence_level
    ));
    let best = region.global_fit.location();
    out.push_str(&format!(
        "Global best fit: mass={:.4}, delta={:.4}, nll={:.6}\n\n",
        best.mass, best.delta, region.global_nll
    ));

    out.push_str(
        format!(
            "{:>8} {:>8} {:>12} {:>8} {:>8} {:>6} {:<3}\n",
            "mass", "delta", "lambda_obs", "p", "p_chi2", "used", "in"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<8} {:-<8} {:-<12} {:-<8} {:-<8} {:-<6} {:-<3}\n",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for p in &region.points {
        out.push_str(
            format!(
                "{:>8.3} {:>8.3} {:>12.5} {:>8} {:>8.4} {:>6} {:<3}\n",
                p.location.mass,
                p.location.delta,
                p.lambda_observed,
                fmt_opt(p.p_value, 4),
                p.p_value_asymptotic,
                p.n_used,
                if p.accepted { "*" } else { "" }
            )
            .trim_end(),
        );
        out.push('\n');
    }

    match region.extent() {
        Some(((m_lo, m_hi), (d_lo, d_hi))) => out.push_str(&format!(
            "\n{} accepted | mass in [{m_lo:.3}, {m_hi:.3}] | delta in [{d_lo:.3}, {d_hi:.3}]\n",
            region.n_accepted()
        )),
        None => out.push_str("\nNo location accepted.\n"),
    }
    out
}

/// Horizontal bar chart of the λ histogram.
pub fn format_histogram(hist: &LambdaHistogram, width: usize) -> String {
    let width = width.max(10);
    let peak = hist.bins.iter().map(|b| b.2).max().unwrap_or(0).max(1);
    let mut out = format!("lambda_trial distribution (n={}):\n", hist.n);
    for &(lo, hi, count) in &hist.bins {
        let bar = "#".repeat(count * width / peak);
        out.push_str(&format!("[{lo:>8.3}, {hi:>8.3}) {count:>6} {bar}").trim_end());
        out.push('\n');
    }
    out
}

fn format_diagnostics<P>(fit: &FitResult<P>) -> String {
    format!(
        "nll={:.6} | converged={} | method={} | iter={} | fev={} | gev={}\n{}\n\n",
        fit.nll, fit.converged, fit.method, fit.n_iter, fit.n_fev, fit.n_gev, fit.message
    )
}

fn format_parameter_table(names: &[&str], values: &[f64], errors: Option<&[f64]>) -> String {
    let mut out = String::new();
    out.push_str(format!("{:<8} {:>14} {:>14}\n", "param", "value", "std.err").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<14} {:-<14}\n", "", "", "").trim_end());
    out.push('\n');
    for (i, (name, value)) in names.iter().zip(values).enumerate() {
        let err = errors.and_then(|e| e.get(i).copied());
        out.push_str(
            format!("{:<8} {:>14.6} {:>14}\n", name, value, fmt_opt(err, 6)).trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.precision$}"),
        _ => "-".to_string(),
    }
}
