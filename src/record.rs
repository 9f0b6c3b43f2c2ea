//! Result records and per-analyte series.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::QcError;

/// Whether a result comes from a patient sample or a QC material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Patient,
    Control,
}

/// A single analyzer result, as normalized by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub analyte: String,
    pub value: f64,
    pub timestamp: NaiveDateTime,
    pub kind: SampleKind,
    pub sample_id: String,
    pub analyser: Option<String>,
}

/// Chronologically ordered results for one analyte.
#[derive(Debug, Clone)]
pub struct AnalyteSeries {
    analyte: String,
    records: Vec<ResultRecord>,
}

impl AnalyteSeries {
    /// Wraps already ordered records.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::UnsortedSeries`] at the first record whose timestamp
    /// is earlier than its predecessor's.
    pub fn new(analyte: &str, records: Vec<ResultRecord>) -> Result<Self, QcError> {
        if let Some(index) = records
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(QcError::UnsortedSeries {
                analyte: analyte.to_string(),
                index: index + 1,
            });
        }

        Ok(Self {
            analyte: analyte.to_string(),
            records,
        })
    }

    /// Sorts `records` by timestamp first. The sort is stable, so results
    /// measured at the same moment keep their file order.
    pub fn from_unsorted(analyte: &str, mut records: Vec<ResultRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            analyte: analyte.to_string(),
            records,
        }
    }

    pub fn analyte(&self) -> &str {
        &self.analyte
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Groups records by analyte into chronologically sorted series.
pub fn group_by_analyte(records: Vec<ResultRecord>) -> BTreeMap<String, AnalyteSeries> {
    let mut grouped: BTreeMap<String, Vec<ResultRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.analyte.clone()).or_default().push(record);
    }

    grouped
        .into_iter()
        .map(|(analyte, records)| {
            let series = AnalyteSeries::from_unsorted(&analyte, records);
            (analyte, series)
        })
        .collect()
}

/// Groups QC material results by `(analyte, material)` into chronologically
/// sorted series, keeping each control level apart.
pub fn group_by_material(records: Vec<ResultRecord>) -> BTreeMap<(String, String), AnalyteSeries> {
    let mut grouped: BTreeMap<(String, String), Vec<ResultRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry((record.analyte.clone(), record.sample_id.clone()))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|(key, records)| {
            let series = AnalyteSeries::from_unsorted(&key.0, records);
            (key, series)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, NaiveDate};

    /// Builds a patient series with one result per minute.
    pub(crate) fn series_of(analyte: &str, values: &[f64]) -> AnalyteSeries {
        let start = NaiveDate::from_ymd_opt(2025, 10, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        let records = values
            .iter()
            .enumerate()
            .map(|(i, &value)| ResultRecord {
                analyte: analyte.to_string(),
                value,
                timestamp: start + Duration::minutes(i as i64),
                kind: SampleKind::Patient,
                sample_id: format!("P{i:04}"),
                analyser: Some("VLK_PRO-4_C503".to_string()),
            })
            .collect();
        AnalyteSeries::new(analyte, records).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::series_of;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_rejects_unsorted() {
        let mut records = series_of("na", &[140.0, 141.0, 139.0]).records().to_vec();
        records.swap(1, 2);
        records[1].timestamp -= Duration::hours(1);

        let err = AnalyteSeries::new("na", records).unwrap_err();
        assert_eq!(
            err,
            QcError::UnsortedSeries {
                analyte: "na".into(),
                index: 1
            }
        );
    }

    #[test]
    fn test_equal_timestamps_are_allowed() {
        let mut records = series_of("k", &[4.1, 4.2]).records().to_vec();
        records[1].timestamp = records[0].timestamp;
        assert!(AnalyteSeries::new("k", records).is_ok());
    }

    #[test]
    fn test_from_unsorted_is_stable() {
        let mut records = series_of("k", &[4.1, 4.2, 4.3]).records().to_vec();
        let t = records[0].timestamp;
        records[2].timestamp = t - Duration::minutes(5);
        records[1].timestamp = t;

        let series = AnalyteSeries::from_unsorted("k", records);
        let values: Vec<f64> = series.records().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![4.3, 4.1, 4.2]);
    }

    #[test]
    fn test_group_by_analyte() {
        let mut records = series_of("na", &[140.0, 141.0]).records().to_vec();
        records.extend(series_of("k", &[4.0]).records().iter().cloned());

        let grouped = group_by_analyte(records);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["na"].len(), 2);
        assert_eq!(grouped["k"].len(), 1);
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["k", "na"]);
    }

    #[test]
    fn test_group_by_material_keeps_levels_apart() {
        let mut records = series_of("na", &[120.0, 160.0, 121.0]).records().to_vec();
        for (record, material) in records.iter_mut().zip(["VLK_Low", "VLK_High", "VLK_Low"]) {
            record.sample_id = material.to_string();
            record.kind = SampleKind::Control;
        }
        records.reverse();

        let grouped = group_by_material(records);
        let low = &grouped[&("na".to_string(), "VLK_Low".to_string())];
        let values: Vec<f64> = low.records().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![120.0, 121.0]);
        assert_eq!(grouped[&("na".to_string(), "VLK_High".to_string())].len(), 1);
    }
}
