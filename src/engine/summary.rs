use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::Method;
use crate::engine::utility::{mean, stddev};
use crate::engine::{AoNResult, WindowStatus};
use crate::error::QcError;

/// Per-analyte roll-up of a run, written to the JSON summary.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct AnalyteSummary {
    pub analyte: String,
    pub method: Option<String>,
    pub windows: usize,
    pub valid_windows: usize,
    pub invalid_windows: usize,
    pub alarms: usize,

    // statistics over valid window means
    pub mean_of_means: Option<f64>,
    pub sd_of_means: Option<f64>,
    pub cv_percent: Option<f64>,
    pub min_mean: Option<f64>,
    pub max_mean: Option<f64>,

    pub first_window_end: Option<NaiveDateTime>,
    pub last_window_end: Option<NaiveDateTime>,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// Rolls `results` up into an [`AnalyteSummary`].
pub fn summarize(analyte: &str, method: &Method, results: &[AoNResult]) -> AnalyteSummary {
    let means: Vec<f64> = results.iter().filter_map(|r| r.mean).collect();
    let valid_windows = results
        .iter()
        .filter(|r| r.status == WindowStatus::Valid)
        .count();

    let mut summary = AnalyteSummary {
        analyte: analyte.to_string(),
        method: Some(method.name().to_string()),
        windows: results.len(),
        valid_windows,
        invalid_windows: results.len() - valid_windows,
        alarms: results.iter().filter(|r| r.alarm).count(),
        first_window_end: results.first().map(|r| r.window_end),
        last_window_end: results.last().map(|r| r.window_end),
        ..Default::default()
    };

    if !means.is_empty() {
        let avg = mean(&means);
        let sd = stddev(&means, avg);

        summary.mean_of_means = Some(avg);
        summary.sd_of_means = Some(sd);
        summary.cv_percent = Some(if avg == 0.0 { 0.0 } else { sd / avg.abs() * 100.0 });
        summary.min_mean = means.iter().copied().reduce(f64::min);
        summary.max_mean = means.iter().copied().reduce(f64::max);
    }

    summary
}

impl AnalyteSummary {
    /// Records an analyte whose computation failed.
    pub fn from_error(analyte: &str, error: &QcError) -> Self {
        AnalyteSummary {
            analyte: analyte.to_string(),
            error_type: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Set the method name
    pub fn with_method(mut self, method: &Method) -> Self {
        self.method = Some(method.name().to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Weighting;
    use chrono::NaiveDate;

    fn result(index: usize, mean: Option<f64>, alarm: bool) -> AoNResult {
        let base = NaiveDate::from_ymd_opt(2025, 10, 22)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap();
        AoNResult {
            analyte: "na".into(),
            window_index: index,
            window_end: base + chrono::Duration::minutes(index as i64),
            mean,
            sample_count: 5,
            truncated_count: 0,
            status: if mean.is_some() {
                WindowStatus::Valid
            } else {
                WindowStatus::Invalid
            },
            alarm,
        }
    }

    #[test]
    fn test_summarize_counts_and_stats() {
        let results = vec![
            result(0, Some(139.0), false),
            result(1, None, false),
            result(2, Some(141.0), true),
        ];
        let method = Method::MovingAverage {
            weighting: Weighting::Simple,
        };

        let summary = summarize("na", &method, &results);

        assert_eq!(summary.windows, 3);
        assert_eq!(summary.valid_windows, 2);
        assert_eq!(summary.invalid_windows, 1);
        assert_eq!(summary.alarms, 1);
        assert_eq!(summary.mean_of_means, Some(140.0));
        assert_eq!(summary.sd_of_means, Some(1.0));
        assert_eq!(summary.min_mean, Some(139.0));
        assert_eq!(summary.max_mean, Some(141.0));
        assert_eq!(summary.first_window_end, Some(results[0].window_end));
        assert_eq!(summary.last_window_end, Some(results[2].window_end));
        assert_eq!(summary.method.as_deref(), Some("moving_average"));
        assert!(!summary.is_error());
    }

    #[test]
    fn test_summarize_all_invalid() {
        let results = vec![result(0, None, false)];
        let method = Method::MovingAverage {
            weighting: Weighting::Simple,
        };
        let summary = summarize("na", &method, &results);
        assert_eq!(summary.mean_of_means, None);
        assert_eq!(summary.cv_percent, None);
    }

    #[test]
    fn test_from_error() {
        let err = QcError::InsufficientData {
            analyte: "k".into(),
            available: 0,
            required: 20,
        };
        let summary = AnalyteSummary::from_error("k", &err);
        assert!(summary.is_error());
        assert_eq!(summary.error_type.as_deref(), Some("insufficient_data"));
        assert_eq!(summary.windows, 0);
    }
}
