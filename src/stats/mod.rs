//! Stats module - Correlation and regression

mod calculator;
mod regression;

use crate::data::ProcessorError;
use thiserror::Error;

pub use calculator::{
    Correlation, CorrelationResult, SeriesSummary, StatsCalculator, UndefinedReason,
};
pub use regression::{
    r2_score, run_regression, train_test_split, LinearModel, RegressionConfig, RegressionReport,
    StandardScaler, TrainTestSplit, DEFAULT_SEED, DEFAULT_TEST_FRACTION,
};

#[derive(Error, Debug)]
pub enum StatsError {
    #[error(transparent)]
    Table(#[from] ProcessorError),
    #[error("Series length mismatch: {x} x values vs {y} y values")]
    LengthMismatch { x: usize, y: usize },
    #[error("Degenerate statistics: {0}")]
    DegenerateStatistics(String),
    #[error("Model fit failed: {0}")]
    ModelFit(String),
    #[error("Invalid train/test split: {0}")]
    InvalidSplit(String),
}
