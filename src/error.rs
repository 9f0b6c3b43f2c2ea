//! Domain errors raised by configuration validation and the averaging engine.

use thiserror::Error;

/// Errors for a single analyte's computation.
///
/// These never abort a whole run: the pipeline records them in the analyte
/// summary and moves on to the next analyte.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QcError {
    #[error("insufficient data for '{analyte}': {available} records, at least {required} required")]
    InsufficientData {
        analyte: String,
        available: usize,
        required: usize,
    },

    #[error("invalid configuration for '{analyte}': {reason}")]
    InvalidConfiguration { analyte: String, reason: String },

    #[error("series '{analyte}' is not in chronological order at index {index}")]
    UnsortedSeries { analyte: String, index: usize },
}

impl QcError {
    pub(crate) fn invalid_config(analyte: &str, reason: impl Into<String>) -> Self {
        QcError::InvalidConfiguration {
            analyte: analyte.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable label, used as `error_type` in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            QcError::InsufficientData { .. } => "insufficient_data",
            QcError::InvalidConfiguration { .. } => "invalid_configuration",
            QcError::UnsortedSeries { .. } => "unsorted_series",
        }
    }
}
