//! Reproducibility figures for QC materials.
//!
//! Control results never enter the patient windows. Each material is kept as
//! its own chronological series per analyte and summarized separately.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::engine::utility::{mean, sample_stddev};
use crate::record::{ResultRecord, group_by_material};

/// Mean, SD and CV of one QC material for one analyte.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlSummary {
    pub analyte: String,
    pub material: String,
    /// Analysers that measured this material, in first-seen order.
    pub analysers: Vec<String>,
    pub count: usize,
    pub mean: f64,
    pub sd: Option<f64>,
    pub cv_percent: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub first_measured: NaiveDateTime,
    pub last_measured: NaiveDateTime,
}

/// Summarizes control results per `(analyte, material)`, ordered by analyte
/// then material.
pub fn summarize_controls(records: Vec<ResultRecord>) -> Vec<ControlSummary> {
    group_by_material(records)
        .into_iter()
        .filter_map(|((analyte, material), series)| {
            let records = series.records();
            let first = records.first()?;
            let last = records.last()?;
            let values: Vec<f64> = records.iter().map(|r| r.value).collect();

            let avg = mean(&values);
            let sd = sample_stddev(&values, avg);
            let mut analysers: Vec<String> = Vec::new();
            for analyser in records.iter().filter_map(|r| r.analyser.as_ref()) {
                if !analysers.contains(analyser) {
                    analysers.push(analyser.clone());
                }
            }

            Some(ControlSummary {
                count: values.len(),
                mean: avg,
                sd,
                cv_percent: sd.map(|sd| if avg == 0.0 { 0.0 } else { sd / avg.abs() * 100.0 }),
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                first_measured: first.timestamp,
                last_measured: last.timestamp,
                analysers,
                analyte,
                material,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SampleKind;
    use crate::record::test_support::series_of;
    use pretty_assertions::assert_eq;

    fn controls(analyte: &str, materials: &[&str], values: &[f64]) -> Vec<ResultRecord> {
        let mut records = series_of(analyte, values).records().to_vec();
        for (record, material) in records.iter_mut().zip(materials) {
            record.sample_id = material.to_string();
            record.kind = SampleKind::Control;
        }
        records
    }

    #[test]
    fn test_levels_are_summarized_separately() {
        let records = controls(
            "na",
            &["VLK_Low", "VLK_High", "VLK_Low", "VLK_High", "VLK_Low"],
            &[119.0, 160.0, 121.0, 162.0, 120.0],
        );

        let summaries = summarize_controls(records);
        assert_eq!(summaries.len(), 2);

        let high = &summaries[0];
        assert_eq!(high.material, "VLK_High");
        assert_eq!(high.count, 2);
        assert_eq!(high.mean, 161.0);
        assert_eq!(high.sd, Some(2.0_f64.sqrt()));

        let low = &summaries[1];
        assert_eq!(low.material, "VLK_Low");
        assert_eq!(low.count, 3);
        assert_eq!(low.mean, 120.0);
        assert_eq!(low.sd, Some(1.0));
        assert!((low.cv_percent.unwrap() - 100.0 / 120.0).abs() < 1e-12);
        assert_eq!((low.min, low.max), (119.0, 121.0));
        assert_eq!(low.analysers, vec!["VLK_PRO-4_C503".to_string()]);
        assert!(low.first_measured < low.last_measured);
    }

    #[test]
    fn test_single_measurement_has_no_sd() {
        let summaries = summarize_controls(controls("k", &["VLK_Low"], &[3.0]));
        assert_eq!(summaries[0].sd, None);
        assert_eq!(summaries[0].cv_percent, None);
    }

    #[test]
    fn test_no_controls() {
        assert!(summarize_controls(Vec::new()).is_empty());
    }
}
