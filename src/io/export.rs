//! Export per-trial calibration results to CSV.
//!
//! One row per attempted trial, in trial order. Failed trials keep their row
//! with empty numeric columns so the file always has `n_toys` data rows.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{InferenceError, Result};
use crate::profile::TestStatisticSample;

const HEADER: &str = "trial,mass,delta,a,b,c,d,redraws,global_nll,restricted_nll,lambda,global_converged,restricted_converged,refit,error";

/// Write the sample to `path`.
pub fn write_trials_csv(path: &Path, sample: &TestStatisticSample) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        InferenceError::Io(format!("failed to create trial CSV '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);
    write_trials(&mut out, sample)
        .and_then(|()| out.flush())
        .map_err(|e| InferenceError::Io(format!("failed to write trial CSV: {e}")))
}

/// Write the CSV rows to any writer.
pub fn write_trials<W: Write>(out: &mut W, sample: &TestStatisticSample) -> std::io::Result<()> {
    let location = sample.location();
    let mut rows: Vec<(u64, String)> = Vec::with_capacity(sample.n_trials());

    for rec in sample.records() {
        let n = rec.nuisance;
        rows.push((
            rec.trial,
            format!(
                "{},{},{},{:.10},{:.10},{:.10},{:.10},{},{:.10},{:.10},{:.10},{},{},{},",
                rec.trial,
                location.mass,
                location.delta,
                n.a,
                n.b,
                n.c,
                n.d,
                rec.redraws,
                rec.global_nll,
                rec.restricted_nll,
                rec.lambda,
                rec.global_converged,
                rec.restricted_converged,
                rec.refit,
            ),
        ));
    }
    for fail in sample.failures() {
        rows.push((
            fail.trial,
            format!(
                "{},{},{},,,,,,,,,,,,{}",
                fail.trial,
                location.mass,
                location.delta,
                fail.reason.replace([',', '"', '\n'], ";")
            ),
        ));
    }
    rows.sort_by_key(|(trial, _)| *trial);

    writeln!(out, "{HEADER}")?;
    for (_, row) in rows {
        writeln!(out, "{row}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CalibrationConfig, StreamMode};
    use crate::profile::ProfileOrchestrator;

    #[test]
    fn one_row_per_trial_with_fixed_columns() {
        let config = CalibrationConfig {
            n_toys: 5,
            seed: 11,
            stream_mode: StreamMode::Shared,
            ..CalibrationConfig::default()
        };
        let sample = ProfileOrchestrator::default()
            .generate_sample(&config, 20)
            .unwrap();

        let mut buf = Vec::new();
        write_trials(&mut buf, &sample).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 1 + config.n_toys);
        let columns = HEADER.split(',').count();
        for (i, line) in lines[1..].iter().enumerate() {
            assert!(line.starts_with(&format!("{i},")), "row {i}: {line}");
            assert_eq!(line.split(',').count(), columns, "row {i}: {line}");
        }
    }
}
