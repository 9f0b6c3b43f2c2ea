use crate::config::AnalyteConfig;
use crate::engine::aggregate::Aggregator;
use crate::engine::{AoNResult, WindowStatus};
use crate::record::AnalyteSeries;

/// Lazy sliding-window iterator over a series, one result per window position.
///
/// Cloning yields an independent iterator at the same position, and
/// [`Windows::rewind`] restarts from the first window.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    series: &'a AnalyteSeries,
    config: &'a AnalyteConfig,
    aggregator: Aggregator,
    position: usize,
}

impl<'a> Windows<'a> {
    pub(crate) fn new(series: &'a AnalyteSeries, config: &'a AnalyteConfig) -> Self {
        Self {
            series,
            config,
            aggregator: Aggregator::from(&config.method),
            position: 0,
        }
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Total number of window positions over the whole series.
    pub fn total(&self) -> usize {
        (self.series.len() + 1).saturating_sub(self.config.window_size)
    }
}

impl Iterator for Windows<'_> {
    type Item = AoNResult;

    fn next(&mut self) -> Option<AoNResult> {
        let end = self.position + self.config.window_size;
        let window = self.series.records().get(self.position..end)?;
        let newest = window.last()?;

        let values: Vec<f64> = window.iter().map(|r| r.value).collect();
        let aggregate = self.aggregator.aggregate(&values);

        let status = match aggregate.mean {
            Some(_) => WindowStatus::Valid,
            None => WindowStatus::Invalid,
        };
        let alarm = match (aggregate.mean, &self.config.control_limits) {
            (Some(mean), Some(limits)) => limits.violated_by(mean),
            _ => false,
        };

        let result = AoNResult {
            analyte: self.series.analyte().to_string(),
            window_index: self.position,
            window_end: newest.timestamp,
            mean: aggregate.mean,
            sample_count: aggregate.included,
            truncated_count: aggregate.truncated,
            status,
            alarm,
        };

        self.position += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}
