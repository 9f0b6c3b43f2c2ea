//! CLI entry point for the QC averager.
//!
//! Provides subcommands for computing Average-of-Normals / Moving-Average
//! reports from GLIMS exports, validating a configuration file, and
//! inspecting which analytes an export contains.

use anyhow::Result;
use clap::{Parser, Subcommand};
use qc_averager::config::QcConfig;
use qc_averager::loader::LoadOptions;
use qc_averager::output::ReportOptions;
use qc_averager::pipeline::{RunOptions, inspect, run};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "qc_averager")]
#[command(about = "Average of Normals and Moving Average QC for analyzer results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-analyte window statistics and write a CSV report
    Compute {
        /// GLIMS export or long-format CSV
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// JSON configuration file
        #[arg(short, long, default_value = "config_data.json")]
        config: PathBuf,

        /// CSV report to write; the summary goes to <output>.summary.json
        #[arg(short, long, default_value = "aon_report.csv")]
        output: PathBuf,

        /// Override the CSV separator from the configuration
        #[arg(short, long)]
        separator: Option<char>,

        /// Only use results from Cobas Pro analyser N (e.g. 3 or 4)
        #[arg(short, long)]
        analyser: Option<u32>,

        /// Maximum number of analytes computed concurrently
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Gzip compress the report
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Write decimal commas instead of points
        #[arg(long, default_value_t = false)]
        decimal_comma: bool,
    },
    /// Load and validate a configuration file
    CheckConfig {
        /// JSON configuration file
        #[arg(short, long, default_value = "config_data.json")]
        config: PathBuf,
    },
    /// List the analytes found in an input file
    Inspect {
        /// GLIMS export or long-format CSV
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// JSON configuration file
        #[arg(short, long, default_value = "config_data.json")]
        config: PathBuf,

        /// Override the CSV separator from the configuration
        #[arg(short, long)]
        separator: Option<char>,

        /// Only use results from Cobas Pro analyser N (e.g. 3 or 4)
        #[arg(short, long)]
        analyser: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/qc_averager.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("qc_averager.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compute {
            input,
            config,
            output,
            separator,
            analyser,
            concurrency,
            gzip,
            decimal_comma,
        } => {
            let config = load_config(&config, separator)?;
            let options = RunOptions {
                input,
                output,
                load: LoadOptions { analyser },
                report: ReportOptions {
                    separator: config.input.separator as u8,
                    decimal_comma,
                    gzip,
                },
                concurrency,
            };

            let outcome = run(Arc::new(config), &options).await?;

            for summary in outcome.summaries.iter().filter(|s| s.is_error()) {
                warn!(
                    analyte = %summary.analyte,
                    error = summary.error_message.as_deref().unwrap_or(""),
                    "Analyte not reported"
                );
            }
            for control in &outcome.controls {
                info!(
                    analyte = %control.analyte,
                    material = %control.material,
                    count = control.count,
                    mean = control.mean,
                    cv_percent = control.cv_percent,
                    "Control material"
                );
            }
            info!(
                report = %outcome.report_path.display(),
                summary = %outcome.summary_path.display(),
                records = outcome.load_stats.records,
                "Successfully saved results"
            );
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config, None)?;

            for (name, analyte) in &config.analytes {
                info!(
                    analyte = %name,
                    method = analyte.method.name(),
                    window_size = analyte.window_size,
                    required_records = analyte.required_records(),
                    control_limits = analyte.control_limits.is_some(),
                    "Analyte"
                );
            }
            info!(
                analytes = config.analytes.len(),
                layout = ?config.input.layout,
                separator = %config.input.separator,
                "Configuration is valid"
            );
        }
        Commands::Inspect {
            input,
            config,
            separator,
            analyser,
        } => {
            let config = load_config(&config, separator)?;
            let counts = inspect(&config, &input, &LoadOptions { analyser })?;

            for count in &counts {
                info!(
                    analyte = %count.analyte,
                    records = count.records,
                    configured = count.configured,
                    "Analyte"
                );
            }

            let unconfigured = counts.iter().filter(|c| !c.configured).count();
            let missing = counts.iter().filter(|c| c.configured && c.records == 0).count();
            info!(
                total = counts.len(),
                unconfigured,
                missing,
                "Input summary"
            );
        }
    }

    Ok(())
}

/// Loads the configuration once, applying a CLI separator override.
#[tracing::instrument(skip(path), fields(path = %path.display()))]
fn load_config(path: &Path, separator: Option<char>) -> Result<QcConfig> {
    let mut config = QcConfig::load(path)?;
    if let Some(separator) = separator {
        config.input.separator = separator;
        config.validate()?;
    }
    info!(analytes = config.analytes.len(), "Configuration loaded");
    Ok(config)
}
