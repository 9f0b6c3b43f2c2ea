//! Per-window aggregation strategies.

use crate::config::{Method, Truncation, Weighting};
use crate::engine::utility::{mean, percentile_sorted};

/// Outcome of aggregating one window of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowAggregate {
    /// `None` when too few values survived truncation.
    pub mean: Option<f64>,
    pub included: usize,
    pub truncated: usize,
}

/// The aggregation step, selected from an analyte's [`Method`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregator {
    TruncatedMean {
        truncation: Truncation,
        minimum_retained: usize,
    },
    Mean,
    ExponentialMean {
        alpha: f64,
    },
}

impl From<&Method> for Aggregator {
    fn from(method: &Method) -> Self {
        match *method {
            Method::AverageOfNormals {
                truncation,
                minimum_retained,
            } => Aggregator::TruncatedMean {
                truncation,
                minimum_retained,
            },
            Method::MovingAverage {
                weighting: Weighting::Simple,
            } => Aggregator::Mean,
            Method::MovingAverage {
                weighting: Weighting::Exponential { alpha },
            } => Aggregator::ExponentialMean { alpha },
        }
    }
}

impl Aggregator {
    /// Aggregates `values`, ordered oldest first.
    pub fn aggregate(&self, values: &[f64]) -> WindowAggregate {
        match *self {
            Aggregator::TruncatedMean {
                truncation,
                minimum_retained,
            } => truncated_mean(values, truncation, minimum_retained),
            Aggregator::Mean => WindowAggregate {
                mean: Some(mean(values)),
                included: values.len(),
                truncated: 0,
            },
            Aggregator::ExponentialMean { alpha } => WindowAggregate {
                mean: Some(exponential_mean(values, alpha)),
                included: values.len(),
                truncated: 0,
            },
        }
    }
}

/// Inclusive bounds for `sorted` under `truncation`.
fn bounds(sorted: &[f64], truncation: Truncation) -> Option<(f64, f64)> {
    match truncation {
        Truncation::Absolute { low, high } => Some((low, high)),
        Truncation::Percentile { low, high } => Some((
            percentile_sorted(sorted, low)?,
            percentile_sorted(sorted, high)?,
        )),
    }
}

fn truncated_mean(values: &[f64], truncation: Truncation, minimum_retained: usize) -> WindowAggregate {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let normals: Vec<f64> = match bounds(&sorted, truncation) {
        Some((low, high)) => sorted.into_iter().filter(|v| *v >= low && *v <= high).collect(),
        None => Vec::new(),
    };

    let included = normals.len();
    let truncated = values.len() - included;
    let mean = (included >= minimum_retained && included > 0).then(|| mean(&normals));

    WindowAggregate {
        mean,
        included,
        truncated,
    }
}

fn exponential_mean(values: &[f64], alpha: f64) -> f64 {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    let mut weight = alpha;

    for value in values.iter().rev() {
        weighted += weight * value;
        weight_sum += weight;
        weight *= 1.0 - alpha;
    }

    if weight_sum == 0.0 {
        0.0
    } else {
        weighted / weight_sum
    }
}
