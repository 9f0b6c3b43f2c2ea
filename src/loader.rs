//! CSV loader for analyzer results.
//!
//! Normalizes GLIMS exports (wide, one column per test) and long-format files
//! into [`ResultRecord`]s. Cells that cannot be used are skipped with a warning
//! rather than failing the load.

use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder};
use encoding_rs::WINDOWS_1252;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{InputSettings, Layout};
use crate::record::{ResultRecord, SampleKind};

const DATETIME_FORMATS: &[&str] = &[
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%m-%y %H:%M:%S",
    "%d-%m-%y %H:%M",
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%y", "%d/%m/%y"];

/// `%Y` also accepts `25`; such years are reparsed with `%y` instead.
const MIN_FOUR_DIGIT_YEAR: i32 = 1000;

/// Row filters applied while loading.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Keep only rows whose analyser identifier contains `PRO-<n>`.
    pub analyser: Option<u32>,
}

/// Counters describing what the loader kept and dropped.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadStats {
    pub rows: usize,
    pub records: usize,
    pub invalid_dates: usize,
    pub invalid_values: usize,
    pub filtered_rows: usize,
}

/// Reads the CSV file at `path`.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_file(
    path: impl AsRef<Path>,
    settings: &InputSettings,
    options: &LoadOptions,
) -> Result<(Vec<ResultRecord>, LoadStats)> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open input '{}'", path.display()))?;
    let (records, stats) = load_reader(file, settings, options)
        .with_context(|| format!("failed to read input '{}'", path.display()))?;

    info!(
        rows = stats.rows,
        records = stats.records,
        invalid_dates = stats.invalid_dates,
        invalid_values = stats.invalid_values,
        filtered_rows = stats.filtered_rows,
        "Input loaded"
    );
    Ok((records, stats))
}

/// Reads CSV data from any reader.
pub fn load_reader<R: Read>(
    mut reader: R,
    settings: &InputSettings,
    options: &LoadOptions,
) -> Result<(Vec<ResultRecord>, LoadStats)> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let body = skip_lines(&bytes, settings.leading_rows());

    let mut csv_reader = ReaderBuilder::new()
        .delimiter(settings.separator as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut rows = Vec::new();
    for row in csv_reader.byte_records() {
        rows.push(row?);
    }

    if rows.is_empty() {
        bail!("no header row after skipping {} rows", settings.leading_rows());
    }
    let header: Vec<String> = rows
        .remove(0)
        .iter()
        .map(|field| decode(field).to_lowercase())
        .collect();
    let keep = rows.len().saturating_sub(settings.footer_rows());
    rows.truncate(keep);

    debug!(columns = header.len(), rows = rows.len(), layout = ?settings.layout, "Parsing rows");

    let mut loader = RowLoader {
        settings,
        options,
        records: Vec::new(),
        stats: LoadStats::default(),
    };
    match settings.layout {
        Layout::Glims => loader.load_glims(&header, &rows)?,
        Layout::Long => loader.load_long(&header, &rows)?,
    }

    loader.stats.records = loader.records.len();
    Ok((loader.records, loader.stats))
}

struct RowLoader<'a> {
    settings: &'a InputSettings,
    options: &'a LoadOptions,
    records: Vec<ResultRecord>,
    stats: LoadStats,
}

impl RowLoader<'_> {
    fn load_glims(&mut self, header: &[String], rows: &[ByteRecord]) -> Result<()> {
        if header.len() < 4 {
            bail!(
                "GLIMS export needs date, sample, analyser and at least one test column, found {} columns",
                header.len()
            );
        }
        let mnemonics = &header[3..];

        for (index, row) in rows.iter().enumerate() {
            self.stats.rows += 1;
            let line = index + 1;

            let Some(timestamp) = self.row_timestamp(field(row, 0), line) else {
                continue;
            };
            let sample_id = field(row, 1);
            let analyser = field(row, 2);

            let Some(kind) = self.accept_row(&sample_id, Some(analyser.as_str()), None) else {
                self.stats.filtered_rows += 1;
                continue;
            };

            for (offset, mnemonic) in mnemonics.iter().enumerate() {
                let cell = field(row, offset + 3);
                let Some(value) = self.cell_value(&cell, mnemonic, line) else {
                    continue;
                };
                self.records.push(ResultRecord {
                    analyte: mnemonic.clone(),
                    value,
                    timestamp,
                    kind,
                    sample_id: sample_id.clone(),
                    analyser: Some(analyser.clone()),
                });
            }
        }
        Ok(())
    }

    fn load_long(&mut self, header: &[String], rows: &[ByteRecord]) -> Result<()> {
        let column = |name: &str| header.iter().position(|h| h == name);
        let (Some(analyte_col), Some(value_col), Some(timestamp_col)) =
            (column("analyte"), column("value"), column("timestamp"))
        else {
            bail!("long layout requires 'analyte', 'value' and 'timestamp' columns, found {header:?}");
        };
        let kind_col = column("kind");
        let sample_col = column("sample_id");
        let analyser_col = column("analyser");

        for (index, row) in rows.iter().enumerate() {
            self.stats.rows += 1;
            let line = index + 1;

            let Some(timestamp) = self.row_timestamp(field(row, timestamp_col), line) else {
                continue;
            };
            let analyte = field(row, analyte_col).to_lowercase();
            let sample_id = sample_col.map(|c| field(row, c)).unwrap_or_default();
            let analyser = analyser_col.map(|c| field(row, c));

            let explicit = kind_col.and_then(|c| parse_kind(&field(row, c)));
            let Some(kind) = self.accept_row(&sample_id, analyser.as_deref(), explicit) else {
                self.stats.filtered_rows += 1;
                continue;
            };

            let Some(value) = self.cell_value(&field(row, value_col), &analyte, line) else {
                continue;
            };
            self.records.push(ResultRecord {
                analyte,
                value,
                timestamp,
                kind,
                sample_id,
                analyser,
            });
        }
        Ok(())
    }

    fn row_timestamp(&mut self, raw: String, line: usize) -> Option<NaiveDateTime> {
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            self.stats.invalid_dates += 1;
            if !raw.is_empty() {
                warn!(line, date = %raw, "Invalid date format, skipping row");
            }
        }
        parsed
    }

    /// Applies material, analyser and control filters; returns the sample kind
    /// of rows that are kept. An explicit kind takes precedence over the
    /// control prefix.
    fn accept_row(
        &self,
        sample_id: &str,
        analyser: Option<&str>,
        explicit: Option<SampleKind>,
    ) -> Option<SampleKind> {
        if self.settings.skip_materials.iter().any(|m| m == sample_id) {
            return None;
        }
        if let Some(number) = self.options.analyser {
            let marker = format!("PRO-{number}");
            if !analyser.is_some_and(|a| a.contains(&marker)) {
                return None;
            }
        }

        let kind = explicit.unwrap_or_else(|| {
            if !self.settings.control_prefix.is_empty()
                && sample_id.starts_with(&self.settings.control_prefix)
            {
                SampleKind::Control
            } else {
                SampleKind::Patient
            }
        });
        if kind == SampleKind::Control && !self.settings.include_controls {
            return None;
        }
        Some(kind)
    }

    fn cell_value(&mut self, cell: &str, analyte: &str, line: usize) -> Option<f64> {
        if cell.is_empty() || cell == self.settings.missing_marker {
            return None;
        }
        let value = parse_value(cell);
        if value.is_none() {
            self.stats.invalid_values += 1;
            warn!(line, analyte, value = %cell, "Non-numeric result, skipping cell");
        }
        value
    }
}

/// Parses a day-first date with optional time, or an ISO date. Two-digit
/// years are read as 1970-2069.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .find(|dt| dt.year() >= MIN_FOUR_DIGIT_YEAR)
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .filter_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .find(|date| date.year() >= MIN_FOUR_DIGIT_YEAR)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Parses a numeric result, accepting a decimal comma.
pub fn parse_value(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_kind(raw: &str) -> Option<SampleKind> {
    match raw.trim().to_lowercase().as_str() {
        "patient" => Some(SampleKind::Patient),
        "control" | "qc" => Some(SampleKind::Control),
        _ => None,
    }
}

fn field(row: &ByteRecord, index: usize) -> String {
    row.get(index).map(decode).unwrap_or_default()
}

/// GLIMS exports are Windows-1252; UTF-8 cells are taken as they are.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim().to_string(),
        Err(_) => WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .trim()
            .to_string(),
    }
}

fn skip_lines(bytes: &[u8], count: usize) -> &[u8] {
    let mut rest = bytes;
    for _ in 0..count {
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return &[],
        }
    }
    rest
}
