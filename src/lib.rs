//! geocorr - Geographic table correlation and regression
//!
//! Loads tabular sources, reduces them per geographic unit, joins them and
//! measures how two quantities move together.

pub mod charts;
pub mod config;
pub mod data;
pub mod pipeline;
pub mod stats;

pub use config::AnalysisConfig;
pub use pipeline::{AnalysisOutcome, AnalysisPipeline, CorrelationOutcome, RegressionOutcome};
