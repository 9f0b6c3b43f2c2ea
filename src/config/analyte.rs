use serde::{Deserialize, Serialize};

use crate::error::QcError;

/// Per-analyte averaging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyteConfig {
    pub window_size: usize,
    /// Minimum number of records the series must hold. Defaults to the window size.
    #[serde(default)]
    pub minimum_sample_count: Option<usize>,
    pub method: Method,
    #[serde(default)]
    pub control_limits: Option<ControlLimits>,
}

/// Aggregation applied to each window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Method {
    AverageOfNormals {
        truncation: Truncation,
        /// Fewer retained values than this marks the window invalid.
        minimum_retained: usize,
    },
    MovingAverage {
        #[serde(default)]
        weighting: Weighting,
    },
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::AverageOfNormals { .. } => "average_of_normals",
            Method::MovingAverage { .. } => "moving_average",
        }
    }
}

/// How outliers are cut from an Average-of-Normals window. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Truncation {
    /// Fixed physiological range.
    Absolute { low: f64, high: f64 },
    /// Percentiles (0-100) of the window's own values.
    Percentile { low: f64, high: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Simple,
    /// Newest value weighs `alpha`, the one before `alpha * (1 - alpha)`, and so on.
    Exponential { alpha: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlLimits {
    pub low: f64,
    pub high: f64,
}

impl ControlLimits {
    /// True when `mean` falls strictly outside the limits.
    pub fn violated_by(&self, mean: f64) -> bool {
        mean < self.low || mean > self.high
    }
}

impl AnalyteConfig {
    /// Records needed before a single window can be computed.
    pub fn required_records(&self) -> usize {
        self.window_size
            .max(self.minimum_sample_count.unwrap_or(self.window_size))
    }

    /// Checks the settings for internal consistency.
    pub fn validate(&self, analyte: &str) -> Result<(), QcError> {
        if self.window_size == 0 {
            return Err(QcError::invalid_config(analyte, "window_size must be at least 1"));
        }

        match &self.method {
            Method::AverageOfNormals {
                truncation,
                minimum_retained,
            } => {
                if *minimum_retained == 0 {
                    return Err(QcError::invalid_config(
                        analyte,
                        "minimum_retained must be at least 1",
                    ));
                }
                if *minimum_retained > self.window_size {
                    return Err(QcError::invalid_config(
                        analyte,
                        format!(
                            "minimum_retained ({}) exceeds window_size ({})",
                            minimum_retained, self.window_size
                        ),
                    ));
                }
                truncation.validate(analyte)?;
            }
            Method::MovingAverage { weighting } => {
                if let Weighting::Exponential { alpha } = weighting {
                    if !(*alpha > 0.0 && *alpha <= 1.0) {
                        return Err(QcError::invalid_config(
                            analyte,
                            format!("exponential alpha must be in (0, 1], got {alpha}"),
                        ));
                    }
                }
            }
        }

        if let Some(limits) = &self.control_limits {
            check_range(analyte, "control_limits", limits.low, limits.high)?;
        }

        Ok(())
    }
}

impl Truncation {
    fn validate(&self, analyte: &str) -> Result<(), QcError> {
        match *self {
            Truncation::Absolute { low, high } => check_range(analyte, "truncation", low, high),
            Truncation::Percentile { low, high } => {
                check_range(analyte, "truncation", low, high)?;
                if low < 0.0 || high > 100.0 {
                    return Err(QcError::invalid_config(
                        analyte,
                        format!("percentiles must lie within [0, 100], got [{low}, {high}]"),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_range(analyte: &str, what: &str, low: f64, high: f64) -> Result<(), QcError> {
    if !low.is_finite() || !high.is_finite() {
        return Err(QcError::invalid_config(
            analyte,
            format!("{what} bounds must be finite numbers"),
        ));
    }
    if low > high {
        return Err(QcError::invalid_config(
            analyte,
            format!("{what} low bound {low} is above high bound {high}"),
        ));
    }
    Ok(())
}
