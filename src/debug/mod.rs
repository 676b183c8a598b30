//! Debug bundle writer for inspecting individual calibration trials.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::domain::PARAMETER_NAMES;
use crate::error::{InferenceError, Result};
use crate::profile::Calibration;

fn write_err(e: std::io::Error) -> InferenceError {
    InferenceError::Io(format!("failed to write debug bundle: {e}"))
}

/// Write a markdown bundle for `calibration` under `dir` and return its path.
pub fn write_debug_bundle(dir: &Path, calibration: &Calibration) -> Result<PathBuf> {
    create_dir_all(dir)
        .map_err(|e| InferenceError::Io(format!("failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let config = &calibration.config;
    let path = dir.join(format!(
        "sfc_debug_m{:.2}_d{:.2}_seed{}_{ts}.md",
        config.location.mass, config.location.delta, config.seed
    ));

    let file = File::create(&path)
        .map_err(|e| InferenceError::Io(format!("failed to create debug file: {e}")))?;
    let mut out = BufWriter::new(file);
    write_bundle(&mut out, calibration).map_err(write_err)?;
    out.flush().map_err(write_err)?;
    Ok(path)
}

fn write_bundle<W: Write>(out: &mut W, calibration: &Calibration) -> std::io::Result<()> {
    let config = &calibration.config;
    let summary = &calibration.summary;
    let observed = &calibration.observed;

    writeln!(out, "# sfc debug bundle")?;
    writeln!(out, "- generated: {}", Local::now().to_rfc3339())?;
    writeln!(
        out,
        "- location: mass={}, delta={}",
        config.location.mass, config.location.delta
    )?;
    writeln!(
        out,
        "- toys: {} | seed: {} | streams: {:?} | degeneracy: {:?} | non-converged: {:?}",
        config.n_toys, config.seed, config.stream_mode, config.degeneracy, config.non_converged
    )?;
    writeln!(
        out,
        "- lambda_obs: {:.6} | p: {} | accepted: {}",
        summary.lambda_observed,
        fmt_opt(summary.p_value),
        summary.accepted
    )?;

    writeln!(out, "\n## Observed global fit")?;
    writeln!(out, "| param | value |")?;
    writeln!(out, "| - | - |")?;
    for (name, value) in PARAMETER_NAMES.iter().zip(observed.global.best.to_array()) {
        writeln!(out, "| {name} | {value:.6} |")?;
    }
    writeln!(
        out,
        "nll_global={:.6}, nll_restricted={:.6}, refit={}",
        observed.global.nll, observed.restricted.nll, observed.refit
    )?;

    writeln!(out, "\n## Trials")?;
    writeln!(
        out,
        "| trial | a | b | c | d | redraws | counts | nll_global | nll_restricted | lambda | converged |"
    )?;
    writeln!(out, "| - | - | - | - | - | - | - | - | - | - | - |")?;
    for rec in calibration.sample.records() {
        let n = rec.nuisance;
        let counts: Vec<String> = rec.counts.iter().map(u64::to_string).collect();
        writeln!(
            out,
            "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {} | {} | {:.6} | {:.6} | {:.6} | {} |",
            rec.trial,
            n.a,
            n.b,
            n.c,
            n.d,
            rec.redraws,
            counts.join(" "),
            rec.global_nll,
            rec.restricted_nll,
            rec.lambda,
            rec.converged()
        )?;
    }

    if !calibration.sample.failures().is_empty() {
        writeln!(out, "\n## Failed trials")?;
        for fail in calibration.sample.failures() {
            writeln!(out, "- trial {}: {}", fail.trial, fail.reason)?;
        }
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CalibrationConfig, EnergySpectrum, StreamMode};
    use crate::profile::ProfileOrchestrator;

    #[test]
    fn bundle_has_a_row_per_trial() {
        let config = CalibrationConfig {
            n_toys: 3,
            seed: 8,
            stream_mode: StreamMode::Shared,
            ..CalibrationConfig::default()
        };
        let calibration = ProfileOrchestrator::default()
            .calibrate(&EnergySpectrum::observed(), &config)
            .unwrap();

        let dir = std::env::temp_dir().join(format!("sfc-debug-{}", std::process::id()));
        let path = write_debug_bundle(&dir, &calibration).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("# sfc debug bundle"));
        let rows = text
            .lines()
            .skip_while(|l| !l.starts_with("## Trials"))
            .filter(|l| l.starts_with("| ") && !l.starts_with("| trial") && !l.starts_with("| -"))
            .count();
        assert_eq!(rows, calibration.sample.records().len());
        std::fs::remove_dir_all(&dir).ok();
    }
}
