//! Hardware report intake.

pub mod validator;

use crate::error::ReportError;
use crate::models::HardwareReport;

pub use validator::{validate_file, validate_str, validate_value};

/// Result of validating a hardware report.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<ReportError>,
    pub warnings: Vec<String>,
    /// Present only when `ok` is true.
    pub normalized: Option<HardwareReport>,
}

impl ValidationOutcome {
    pub(crate) fn failed(errors: Vec<ReportError>) -> Self {
        ValidationOutcome {
            ok: false,
            errors,
            warnings: Vec::new(),
            normalized: None,
        }
    }

    /// Convert into the normalized report or the collected errors.
    pub fn into_result(self) -> Result<(HardwareReport, Vec<String>), Vec<ReportError>> {
        match (self.ok, self.normalized) {
            (true, Some(report)) => Ok((report, self.warnings)),
            _ if self.errors.is_empty() => Err(vec![ReportError::Schema(
                "report produced no normalized output".to_string(),
            )]),
            _ => Err(self.errors),
        }
    }
}
