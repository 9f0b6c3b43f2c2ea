//! Report writing: a CSV with one row per window and a JSON run summary.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::{AnalyteSummary, AoNResult, ControlSummary, WindowStatus};

const REPORT_HEADER: [&str; 8] = [
    "analyte",
    "window_index",
    "window_end",
    "mean",
    "sample_count",
    "truncated_count",
    "status",
    "alarm",
];

const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub separator: u8,
    /// Write `11,5` instead of `11.5` for spreadsheets with Dutch regional settings.
    pub decimal_comma: bool,
    pub gzip: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            separator: b';',
            decimal_comma: false,
            gzip: false,
        }
    }
}

/// Top-level JSON summary written next to the report.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub input: String,
    pub analytes: Vec<AnalyteSummary>,
    /// Per-material reproducibility, present when controls are loaded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlSummary>,
}

#[derive(Serialize)]
struct ReportRow<'a> {
    analyte: &'a str,
    window_index: usize,
    window_end: String,
    mean: String,
    sample_count: usize,
    truncated_count: usize,
    status: WindowStatus,
    alarm: bool,
}

impl<'a> ReportRow<'a> {
    fn from_result(result: &'a AoNResult, decimal_comma: bool) -> Self {
        ReportRow {
            analyte: &result.analyte,
            window_index: result.window_index,
            window_end: result.window_end.format(TIMESTAMP_FORMAT).to_string(),
            mean: result
                .mean
                .map(|m| format_number(m, decimal_comma))
                .unwrap_or_default(),
            sample_count: result.sample_count,
            truncated_count: result.truncated_count,
            status: result.status,
            alarm: result.alarm,
        }
    }
}

fn format_number(value: f64, decimal_comma: bool) -> String {
    let text = value.to_string();
    if decimal_comma {
        text.replace('.', ",")
    } else {
        text
    }
}

/// Writes `results` as CSV to `path`, gzip-compressed if requested.
///
/// A `.gz` suffix is appended to gzip output that lacks one. Returns the path
/// actually written.
pub fn write_results(path: &Path, results: &[AoNResult], options: &ReportOptions) -> Result<PathBuf> {
    let path = if options.gzip && path.extension().and_then(|e| e.to_str()) != Some("gz") {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(&path)
        .with_context(|| format!("failed to create report '{}'", path.display()))?;
    debug!(path = %path.display(), rows = results.len(), gzip = options.gzip, "Writing report");

    if options.gzip {
        let encoder = write_rows(GzEncoder::new(file, Compression::default()), results, options)?;
        encoder.finish()?;
    } else {
        write_rows(file, results, options)?;
    }

    info!(path = %path.display(), rows = results.len(), "Report written");
    Ok(path)
}

fn write_rows<W: Write>(sink: W, results: &[AoNResult], options: &ReportOptions) -> Result<W> {
    let mut writer = WriterBuilder::new()
        .delimiter(options.separator)
        .has_headers(false)
        .from_writer(sink);

    writer.write_record(REPORT_HEADER)?;
    for result in results {
        writer.serialize(ReportRow::from_result(result, options.decimal_comma))?;
    }
    writer.flush()?;

    writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush report: {}", e.error()))
}

/// Path of the JSON summary belonging to a report path.
pub fn summary_path(report: &Path) -> PathBuf {
    let mut name = report.as_os_str().to_owned();
    name.push(".summary.json");
    PathBuf::from(name)
}

/// Writes the run summary as pretty-printed JSON.
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write summary '{}'", path.display()))?;
    info!(path = %path.display(), analytes = summary.analytes.len(), "Summary written");
    Ok(())
}

/// Logs the summary using Rust's debug pretty-print format.
pub fn print_pretty(summary: &RunSummary) {
    debug!("{:#?}", summary);
}
