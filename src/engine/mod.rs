//! Averaging engine.
//!
//! Slides a fixed-size window over an [`AnalyteSeries`] one record at a time
//! and aggregates every window with the strategy chosen by the analyte's
//! [`Method`](crate::config::Method): a truncated Average-of-Normals mean, or a simple or
//! exponentially weighted moving average. Computation is pure; results are
//! produced lazily in chronological order.

pub mod aggregate;
pub mod control;
pub mod summary;
pub mod utility;
mod window;

pub use control::{ControlSummary, summarize_controls};
pub use summary::{AnalyteSummary, summarize};
pub use window::Windows;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::AnalyteConfig;
use crate::error::QcError;
use crate::record::AnalyteSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Valid,
    /// Too few values survived truncation to compute a mean.
    Invalid,
}

/// One computed statistic per window position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AoNResult {
    pub analyte: String,
    pub window_index: usize,
    /// Timestamp of the newest record in the window.
    pub window_end: NaiveDateTime,
    pub mean: Option<f64>,
    /// Values included in the mean.
    pub sample_count: usize,
    pub truncated_count: usize,
    pub status: WindowStatus,
    /// Mean fell outside the analyte's control limits.
    pub alarm: bool,
}

/// Computes the windows for `series` with whichever method `config` selects.
///
/// # Errors
///
/// [`QcError::InvalidConfiguration`] if `config` is inconsistent, and
/// [`QcError::InsufficientData`] if the series is shorter than
/// [`AnalyteConfig::required_records`].
pub fn compute<'a>(
    series: &'a AnalyteSeries,
    config: &'a AnalyteConfig,
) -> Result<Windows<'a>, QcError> {
    config.validate(series.analyte())?;

    let required = config.required_records();
    if series.len() < required {
        return Err(QcError::InsufficientData {
            analyte: series.analyte().to_string(),
            available: series.len(),
            required,
        });
    }

    Ok(Windows::new(series, config))
}

/// Average of Normals: truncated mean per window.
pub fn compute_average_of_normals<'a>(
    series: &'a AnalyteSeries,
    config: &'a AnalyteConfig,
) -> Result<Windows<'a>, QcError> {
    expect_method(series, config, "average_of_normals")?;
    compute(series, config)
}

/// Plain or exponentially weighted moving average per window.
pub fn compute_moving_average<'a>(
    series: &'a AnalyteSeries,
    config: &'a AnalyteConfig,
) -> Result<Windows<'a>, QcError> {
    expect_method(series, config, "moving_average")?;
    compute(series, config)
}

fn expect_method(series: &AnalyteSeries, config: &AnalyteConfig, expected: &str) -> Result<(), QcError> {
    let actual = config.method.name();
    if actual != expected {
        return Err(QcError::invalid_config(
            series.analyte(),
            format!("method is {actual}, expected {expected}"),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::config::{Method, Truncation, Weighting};
    use crate::record::test_support::series_of;
    use proptest::prelude::*;

    fn aon(window_size: usize, minimum_retained: usize) -> AnalyteConfig {
        AnalyteConfig {
            window_size,
            minimum_sample_count: None,
            method: Method::AverageOfNormals {
                truncation: Truncation::Absolute {
                    low: 135.0,
                    high: 145.0,
                },
                minimum_retained,
            },
            control_limits: None,
        }
    }

    proptest! {
        /// Property: one result per window position, in chronological order
        #[test]
        fn window_count_matches_series(
            values in prop::collection::vec(120.0f64..160.0, 1..80),
            window_size in 1usize..25,
        ) {
            prop_assume!(values.len() >= window_size);
            let series = series_of("na", &values);
            let config = aon(window_size, 1);

            let results: Vec<_> = compute(&series, &config).unwrap().collect();
            prop_assert_eq!(results.len(), values.len() - window_size + 1);
            prop_assert!(results.windows(2).all(|p| p[0].window_end <= p[1].window_end));
        }

        /// Property: every window value is either included or truncated,
        /// and a valid mean always lies within the truncation bounds
        #[test]
        fn truncation_accounts_for_every_value(
            values in prop::collection::vec(120.0f64..160.0, 10..40),
            minimum_retained in 1usize..10,
        ) {
            let series = series_of("na", &values);
            let config = aon(10, minimum_retained);

            for result in compute(&series, &config).unwrap() {
                prop_assert_eq!(result.sample_count + result.truncated_count, 10);
                match result.mean {
                    Some(mean) => {
                        prop_assert!(result.sample_count >= minimum_retained);
                        prop_assert!((135.0..=145.0).contains(&mean));
                    }
                    None => prop_assert!(result.sample_count < minimum_retained),
                }
            }
        }

        /// Property: running twice yields identical output
        #[test]
        fn computation_is_idempotent(
            values in prop::collection::vec(0.0f64..20.0, 5..40),
            alpha in 0.05f64..1.0,
        ) {
            let series = series_of("glu", &values);
            let config = AnalyteConfig {
                window_size: 5,
                minimum_sample_count: None,
                method: Method::MovingAverage { weighting: Weighting::Exponential { alpha } },
                control_limits: None,
            };

            let first: Vec<_> = compute(&series, &config).unwrap().collect();
            let second: Vec<_> = compute(&series, &config).unwrap().collect();
            prop_assert_eq!(first, second);
        }

        /// Property: a series exactly one window long yields one result
        #[test]
        fn exact_window_yields_one_result(window_size in 1usize..30) {
            let series = series_of("na", &vec![140.0; window_size]);
            let config = aon(window_size, 1);
            prop_assert_eq!(compute(&series, &config).unwrap().count(), 1);
        }
    }
}
