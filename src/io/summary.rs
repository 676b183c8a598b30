//! Read/write calibration and confidence-region JSON files.
//!
//! The JSON file is the portable record of a run: the configuration that
//! produced it, the observed global fit and the verdicts. `sfc show` reads it
//! back without refitting anything.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CalibrationConfig, ParameterVector};
use crate::error::{InferenceError, Result};
use crate::fit::FitResult;
use crate::profile::{Calibration, CalibrationSummary, ConfidenceRegion, ScanConfig};

pub const TOOL_NAME: &str = "sfc";

/// Payload of a summary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryBody {
    Calibration {
        config: CalibrationConfig,
        global_fit: FitResult<ParameterVector>,
        summary: CalibrationSummary,
    },
    Region {
        config: ScanConfig,
        region: ConfidenceRegion,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub tool: String,
    pub version: String,
    pub generated: DateTime<Utc>,
    pub observed_counts: Vec<u64>,
    #[serde(flatten)]
    pub body: SummaryBody,
}

impl SummaryFile {
    fn new(observed_counts: &[u64], body: SummaryBody) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated: Utc::now(),
            observed_counts: observed_counts.to_vec(),
            body,
        }
    }

    pub fn from_calibration(observed_counts: &[u64], calibration: &Calibration) -> Self {
        Self::new(
            observed_counts,
            SummaryBody::Calibration {
                config: calibration.config,
                global_fit: calibration.observed.global.clone(),
                summary: calibration.summary.clone(),
            },
        )
    }

    pub fn from_region(observed_counts: &[u64], config: &ScanConfig, region: &ConfidenceRegion) -> Self {
        Self::new(
            observed_counts,
            SummaryBody::Region {
                config: config.clone(),
                region: region.clone(),
            },
        )
    }
}

/// Write a summary JSON file.
pub fn write_summary_json(path: &Path, summary: &SummaryFile) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        InferenceError::Io(format!("failed to create summary JSON '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, summary)
        .map_err(|e| InferenceError::Io(format!("failed to write summary JSON: {e}")))?;
    out.flush()
        .map_err(|e| InferenceError::Io(format!("failed to write summary JSON: {e}")))
}

/// Read a summary JSON file.
pub fn read_summary_json(path: &Path) -> Result<SummaryFile> {
    let file = File::open(path).map_err(|e| {
        InferenceError::Io(format!("failed to open summary JSON '{}': {e}", path.display()))
    })?;
    let summary: SummaryFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| InferenceError::Io(format!("invalid summary JSON: {e}")))?;
    if summary.tool != TOOL_NAME {
        return Err(InferenceError::Io(format!(
            "summary JSON was written by '{}', not '{TOOL_NAME}'",
            summary.tool
        )));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OBSERVED_COUNTS, SignalLocation};
    use crate::fit::Method;

    fn calibration_file() -> SummaryFile {
        let location = SignalLocation::new(8.0, 2.0);
        SummaryFile::new(
            &OBSERVED_COUNTS,
            SummaryBody::Calibration {
                config: CalibrationConfig::default(),
                global_fit: FitResult {
                    best: ParameterVector::new(10.1, 5.2, 3.1, 0.8, 7.9, 1.8),
                    nll: 40.25,
                    converged: true,
                    n_iter: 12,
                    n_fev: 20,
                    n_gev: 20,
                    method: Method::Lbfgs,
                    message: "converged".into(),
                    uncertainties: None,
                },
                summary: CalibrationSummary {
                    location,
                    confidence_level: 0.68,
                    lambda_observed: 0.3,
                    n_toys: 1000,
                    n_used: 997,
                    n_errored: 0,
                    n_nonconverged: 3,
                    p_value: Some(0.61),
                    p_value_error: Some(0.015),
                    p_value_asymptotic: 0.74,
                    critical_value: Some(1.2),
                    accepted: true,
                },
            },
        )
    }

    #[test]
    fn summary_file_survives_disk() {
        let dir = std::env::temp_dir().join(format!("sfc-summary-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calibration.json");

        let written = calibration_file();
        write_summary_json(&path, &written).unwrap();
        let read = read_summary_json(&path).unwrap();
        assert_eq!(read, written);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\": \"calibration\""));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn foreign_json_is_rejected() {
        let dir = std::env::temp_dir().join(format!("sfc-foreign-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("other.json");

        let mut file = calibration_file();
        file.tool = "other-tool".into();
        write_summary_json(&path, &file).unwrap();
        assert!(matches!(read_summary_json(&path), Err(InferenceError::Io(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
