//! Run configuration.
//!
//! Loaded once from a JSON document and passed by reference to the loader and
//! the engine:
//! ```json
//! {
//!   "input": { "layout": "glims", "separator": ";" },
//!   "analytes": {
//!     "na": {
//!       "window_size": 20,
//!       "method": {
//!         "type": "average_of_normals",
//!         "truncation": { "type": "absolute", "low": 135, "high": 145 },
//!         "minimum_retained": 10
//!       }
//!     }
//!   }
//! }
//! ```

mod analyte;

pub use analyte::{AnalyteConfig, ControlLimits, Method, Truncation, Weighting};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::QcError;

/// Column layout of the input CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// GLIMS export: metadata rows, then date, sample, analyser and one column per test.
    #[default]
    Glims,
    /// One result per row with `analyte`, `value`, `timestamp` and optional `kind` columns.
    Long,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub layout: Layout,
    pub separator: char,
    /// Rows before the header row. Defaults per layout, see [`InputSettings::leading_rows`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_rows: Option<usize>,
    /// Trailing rows dropped after the data. Defaults per layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_footer: Option<usize>,
    pub missing_marker: String,
    pub control_prefix: String,
    pub include_controls: bool,
    pub skip_materials: Vec<String>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            layout: Layout::Glims,
            separator: ';',
            skip_rows: None,
            skip_footer: None,
            missing_marker: "-".to_string(),
            control_prefix: "VLK_".to_string(),
            include_controls: false,
            skip_materials: Vec::new(),
        }
    }
}

impl InputSettings {
    /// Rows skipped before the header row. GLIMS writes four metadata rows and
    /// an empty one; long files start with their header.
    pub fn leading_rows(&self) -> usize {
        self.skip_rows.unwrap_or(match self.layout {
            Layout::Glims => 5,
            Layout::Long => 0,
        })
    }

    /// Rows dropped after the data. GLIMS ends with a record-count line.
    pub fn footer_rows(&self) -> usize {
        self.skip_footer.unwrap_or(match self.layout {
            Layout::Glims => 1,
            Layout::Long => 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcConfig {
    #[serde(default)]
    pub input: InputSettings,
    pub analytes: BTreeMap<String, AnalyteConfig>,
}

impl QcConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to load config '{}'", path.display()))
    }

    /// Parses a JSON document, lowercases analyte keys and validates the result.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: QcConfig = serde_json::from_str(content)?;

        let mut analytes = BTreeMap::new();
        for (name, config) in raw.analytes {
            let key = name.trim().to_lowercase();
            if analytes.insert(key.clone(), config).is_some() {
                return Err(
                    QcError::invalid_config(&key, "analyte is configured more than once").into(),
                );
            }
        }

        let config = QcConfig {
            input: raw.input,
            analytes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QcError> {
        if self.analytes.is_empty() {
            return Err(QcError::invalid_config("*", "no analytes configured"));
        }
        if !self.input.separator.is_ascii() {
            return Err(QcError::invalid_config(
                "*",
                format!("separator '{}' is not a single ASCII character", self.input.separator),
            ));
        }
        for (name, analyte) in &self.analytes {
            analyte.validate(name)?;
        }
        Ok(())
    }

    pub fn analyte(&self, name: &str) -> Option<&AnalyteConfig> {
        self.analytes.get(name)
    }
}
