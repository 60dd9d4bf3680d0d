//! Analysis Configuration Module
//! JSON description of one analysis run: sources, stages and outputs.

use crate::data::{Condition, SourceDescriptor};
use crate::stats::{RegressionConfig, DEFAULT_SEED, DEFAULT_TEST_FRACTION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_title() -> String {
    "Analysis".to_string()
}

fn default_test_fraction() -> f64 {
    DEFAULT_TEST_FRACTION
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// Load, filter/select and optionally aggregate one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStep {
    pub source: SourceDescriptor,
    #[serde(default)]
    pub filter: Vec<Condition>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
}

impl TableStep {
    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub left_on: String,
    pub right_on: String,
}

/// Drop rows at or above the given percentile of `column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimStep {
    pub column: String,
    pub percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationStep {
    /// Discriminator column; one coefficient per distinct value when set.
    #[serde(default)]
    pub by: Option<String>,
    pub x: String,
    pub y: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionStep {
    pub x: String,
    pub y: String,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Raw x values to predict after fitting.
    #[serde(default)]
    pub predict_inputs: Vec<f64>,
}

impl RegressionStep {
    pub fn split_config(&self) -> RegressionConfig {
        RegressionConfig {
            test_fraction: self.test_fraction,
            seed: self.seed,
        }
    }
}

/// Which table a ranking chart reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableRef {
    Primary,
    Secondary,
    #[default]
    Analysed,
}

/// Descending bar chart of `value` labelled by `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingStep {
    #[serde(default)]
    pub table: TableRef,
    pub label: String,
    pub value: String,
    /// One chart per distinct value of this column.
    #[serde(default)]
    pub split_by: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputStep {
    #[serde(default)]
    pub chart_dir: Option<PathBuf>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub print_all_rows: bool,
    #[serde(default)]
    pub rankings: Vec<RankingStep>,
}

/// Complete description of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_title")]
    pub title: String,
    pub primary: TableStep,
    #[serde(default)]
    pub secondary: Option<TableStep>,
    #[serde(default)]
    pub join: Option<JoinStep>,
    #[serde(default)]
    pub trims: Vec<TrimStep>,
    #[serde(default)]
    pub correlation: Option<CorrelationStep>,
    #[serde(default)]
    pub regression: Option<RegressionStep>,
    #[serde(default)]
    pub output: OutputStep,
}

impl AnalysisConfig {
    /// Read and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_table("primary", &self.primary)?;
        if let Some(secondary) = &self.secondary {
            Self::validate_table("secondary", secondary)?;
        }

        match (&self.secondary, &self.join) {
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "a secondary table requires a join step".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "a join step requires a secondary table".into(),
                ))
            }
            _ => {}
        }

        for trim in &self.trims {
            if !(trim.percentile > 0.0 && trim.percentile <= 100.0) {
                return Err(ConfigError::Invalid(format!(
                    "trim percentile for '{}' must be in (0, 100], got {}",
                    trim.column, trim.percentile
                )));
            }
        }

        if let Some(regression) = &self.regression {
            if !(regression.test_fraction > 0.0 && regression.test_fraction < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "regression test_fraction must be in (0, 1), got {}",
                    regression.test_fraction
                )));
            }
        }

        for ranking in &self.output.rankings {
            if ranking.table == TableRef::Secondary && self.secondary.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "ranking of '{}' refers to a missing secondary table",
                    ranking.value
                )));
            }
        }
        Ok(())
    }

    fn validate_table(name: &str, step: &TableStep) -> Result<(), ConfigError> {
        if !step.sum.is_empty() && step.group_by.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{name} table sums columns without group_by"
            )));
        }
        if step.is_aggregated() && step.sum.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{name} table groups without any sum column"
            )));
        }
        Ok(())
    }
}
