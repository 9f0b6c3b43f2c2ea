//! Batch pipeline: load the input, compute every configured analyte, write
//! the report and summary.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::{AnalyteConfig, QcConfig};
use crate::engine::{AnalyteSummary, AoNResult, ControlSummary, compute, summarize, summarize_controls};
use crate::loader::{LoadOptions, LoadStats, load_file};
use crate::output::{ReportOptions, RunSummary, print_pretty, summary_path, write_results, write_summary};
use crate::record::{AnalyteSeries, ResultRecord, SampleKind, group_by_analyte};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub load: LoadOptions,
    pub report: ReportOptions,
    /// Maximum number of analytes computed at the same time.
    pub concurrency: usize,
}

/// Files written by a run and the per-analyte summaries.
#[derive(Debug)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub summary_path: PathBuf,
    pub load_stats: LoadStats,
    pub summaries: Vec<AnalyteSummary>,
    pub controls: Vec<ControlSummary>,
}

/// Record counts per analyte found in an input file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyteCount {
    pub analyte: String,
    pub records: usize,
    pub configured: bool,
}

/// Runs the whole batch. Analytes are computed concurrently, bounded by
/// `options.concurrency`, and reported in name order. Control results are
/// kept out of the patient windows and summarized per material.
#[tracing::instrument(skip_all, fields(input = %options.input.display(), output = %options.output.display()))]
pub async fn run(config: Arc<QcConfig>, options: &RunOptions) -> Result<RunOutcome> {
    let (records, load_stats) = load_file(&options.input, &config.input, &options.load)?;
    let (controls, patients): (Vec<ResultRecord>, Vec<ResultRecord>) = records
        .into_iter()
        .partition(|r| r.kind == SampleKind::Control);
    let controls = summarize_controls(controls);
    let mut grouped = group_by_analyte(patients);

    for (analyte, series) in &grouped {
        if config.analyte(analyte).is_none() {
            warn!(analyte = %analyte, records = series.len(), "Analyte not configured, skipping");
        }
    }

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = Vec::new();

    for (analyte, analyte_config) in &config.analytes {
        let series = grouped
            .remove(analyte)
            .unwrap_or_else(|| AnalyteSeries::from_unsorted(analyte, Vec::new()));
        let analyte_config = analyte_config.clone();
        let permit = Arc::clone(&semaphore).acquire_owned().await?;

        tasks.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process_analyte(&series, &analyte_config)
        }));
    }

    let mut results = Vec::new();
    let mut summaries = Vec::new();
    for task in tasks {
        let (analyte_results, summary) = task.await?;
        results.extend(analyte_results);
        summaries.push(summary);
    }

    let report_path = write_results(&options.output, &results, &options.report)?;
    let summary_path = summary_path(&report_path);
    let run_summary = RunSummary {
        generated_at: Utc::now(),
        input: options.input.display().to_string(),
        analytes: summaries,
        controls,
    };
    write_summary(&summary_path, &run_summary)?;
    print_pretty(&run_summary);

    let failed = run_summary.analytes.iter().filter(|s| s.is_error()).count();
    info!(
        analytes = run_summary.analytes.len(),
        failed,
        windows = results.len(),
        controls = run_summary.controls.len(),
        "Run complete"
    );

    Ok(RunOutcome {
        report_path,
        summary_path,
        load_stats,
        summaries: run_summary.analytes,
        controls: run_summary.controls,
    })
}

/// Computes one analyte. Errors are recorded in the summary, not returned.
pub fn process_analyte(series: &AnalyteSeries, config: &AnalyteConfig) -> (Vec<AoNResult>, AnalyteSummary) {
    let analyte = series.analyte();
    match compute(series, config) {
        Ok(windows) => {
            let results: Vec<AoNResult> = windows.collect();
            let summary = summarize(analyte, &config.method, &results);
            info!(
                analyte,
                method = config.method.name(),
                records = series.len(),
                windows = summary.windows,
                invalid = summary.invalid_windows,
                alarms = summary.alarms,
                "Analyte computed"
            );
            (results, summary)
        }
        Err(e) => {
            error!(analyte, error = %e, "Analyte computation failed");
            (
                Vec::new(),
                AnalyteSummary::from_error(analyte, &e).with_method(&config.method),
            )
        }
    }
}

/// Loads the input and counts records per analyte without computing anything.
pub fn inspect(config: &QcConfig, input: &Path, load: &LoadOptions) -> Result<Vec<AnalyteCount>> {
    let (records, _) = load_file(input, &config.input, load)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        *counts.entry(record.analyte.clone()).or_default() += 1;
    }
    for analyte in config.analytes.keys() {
        counts.entry(analyte.clone()).or_default();
    }

    Ok(counts
        .into_iter()
        .map(|(analyte, records)| AnalyteCount {
            configured: config.analyte(&analyte).is_some(),
            analyte,
            records,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Method, Weighting};
    use crate::output::ReportOptions;
    use crate::record::test_support::series_of;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_process_analyte_records_errors() {
        let series = series_of("na", &[140.0; 3]);
        let config = AnalyteConfig {
            window_size: 5,
            minimum_sample_count: None,
            method: Method::MovingAverage {
                weighting: Weighting::Simple,
            },
            control_limits: None,
        };

        let (results, summary) = process_analyte(&series, &config);
        assert!(results.is_empty());
        assert_eq!(summary.error_type.as_deref(), Some("insufficient_data"));
        assert_eq!(summary.method.as_deref(), Some("moving_average"));
    }

    #[test]
    fn test_process_analyte_success() {
        let series = series_of("na", &[1.0, 2.0, 3.0]);
        let config = AnalyteConfig {
            window_size: 2,
            minimum_sample_count: None,
            method: Method::MovingAverage {
                weighting: Weighting::Simple,
            },
            control_limits: None,
        };

        let (results, summary) = process_analyte(&series, &config);
        assert_eq!(results.len(), 2);
        assert_eq!(summary.windows, 2);
        assert_eq!(summary.mean_of_means, Some(2.0));
    }

    const REPRO_EXPORT: &str = "\
Reproduceerbaarheid
Afdeling;KCL
Periode;01-10-2025 t/m 03-10-2025
Gebruiker;tester

Datum;Materiaal;Analyser;NA;K
01-10-2025 08:00;VLK_Low;VLK_PRO-4_C503;119;3,0
01-10-2025 08:05;VLK_High;VLK_PRO-4_C503;160;6,4
02-10-2025 08:00;VLK_Low;VLK_PRO-4_C503;121;3,2
02-10-2025 08:05;VLK_High;VLK_PRO-4_C503;162;6,6
03-10-2025 08:00;VLK_Low;VLK_PRO-4_C503;120;-
01-10-2025 09:00;P0001;VLK_PRO-4_C503;140;4,1
01-10-2025 09:10;P0002;VLK_PRO-4_C503;141;4,2
Aantal records: 7
";

    #[tokio::test]
    async fn test_run_summarizes_control_levels() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("repro.csv");
        std::fs::write(&input, REPRO_EXPORT).unwrap();

        let mut config = QcConfig::from_json(
            r#"{ "analytes": { "na": { "window_size": 2, "method": { "type": "moving_average" } } } }"#,
        )
        .unwrap();
        config.input.include_controls = true;
        let options = RunOptions {
            input,
            output: dir.path().join("report.csv"),
            load: LoadOptions::default(),
            report: ReportOptions::default(),
            concurrency: 1,
        };

        let outcome = run(Arc::new(config), &options).await.unwrap();

        let na = &outcome.summaries[0];
        assert_eq!(na.windows, 1);
        assert_eq!(na.mean_of_means, Some(140.5));

        let levels: Vec<_> = outcome
            .controls
            .iter()
            .map(|c| (c.analyte.as_str(), c.material.as_str(), c.count))
            .collect();
        assert_eq!(
            levels,
            vec![
                ("k", "VLK_High", 2),
                ("k", "VLK_Low", 2),
                ("na", "VLK_High", 2),
                ("na", "VLK_Low", 3),
            ]
        );
        let na_low = &outcome.controls[3];
        assert_eq!(na_low.mean, 120.0);
        assert_eq!(na_low.sd, Some(1.0));
    }
}
