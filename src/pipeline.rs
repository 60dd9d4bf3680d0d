//! Analysis Pipeline Module
//! Runs load → filter/select → aggregate → join → trim → correlate → regress
//! for one `AnalysisConfig`, then renders charts and the JSON report.

use crate::charts::{RankingSeries, RegressionChartData, StaticChartRenderer};
use crate::config::{AnalysisConfig, RankingStep, TableRef, TableStep};
use crate::data::{DataLoader, DataProcessor};
use crate::stats::{
    run_regression, Correlation, CorrelationResult, LinearModel, RegressionReport, SeriesSummary,
    StatsCalculator,
};
use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Correlation over the whole analysed table or per discriminator value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    Overall(Correlation),
    ByGroup(CorrelationResult),
}

impl CorrelationOutcome {
    /// Flatten into a label → correlation map for display.
    pub fn as_map(&self) -> CorrelationResult {
        match self {
            CorrelationOutcome::Overall(c) => BTreeMap::from([("overall".to_string(), *c)]),
            CorrelationOutcome::ByGroup(map) => map.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionOutcome {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub report: RegressionReport,
    /// (raw x, predicted y) for each configured scenario input.
    pub scenarios: Vec<(f64, f64)>,
}

/// Every intermediate table and result of one run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub primary: DataFrame,
    pub secondary: Option<DataFrame>,
    pub joined: Option<DataFrame>,
    /// Joined (or primary) table after the percentile trims.
    pub analysed: DataFrame,
    pub correlation: Option<CorrelationOutcome>,
    pub regression: Option<RegressionOutcome>,
    pub summaries: BTreeMap<String, SeriesSummary>,
}

impl AnalysisOutcome {
    fn table(&self, table: TableRef) -> Option<&DataFrame> {
        match table {
            TableRef::Primary => Some(&self.primary),
            TableRef::Secondary => self.secondary.as_ref(),
            TableRef::Analysed => Some(&self.analysed),
        }
    }
}

#[derive(Serialize)]
struct RowCounts {
    primary: usize,
    secondary: Option<usize>,
    joined: Option<usize>,
    analysed: usize,
}

#[derive(Serialize)]
struct Scenario {
    x: f64,
    predicted: f64,
}

#[derive(Serialize)]
struct RegressionSummary {
    model: LinearModel,
    r2: Option<f64>,
    r2_undefined: Option<String>,
    train_rows: usize,
    test_rows: usize,
    scenarios: Vec<Scenario>,
}

/// Serialised form of an `AnalysisOutcome`.
#[derive(Serialize)]
struct AnalysisReport<'a> {
    title: &'a str,
    rows: RowCounts,
    correlation: Option<&'a CorrelationOutcome>,
    regression: Option<RegressionSummary>,
    summaries: &'a BTreeMap<String, SeriesSummary>,
}

/// `0.1234`, or `undefined` when the held-out set cannot score the fit.
pub fn format_r2(r2: Option<f64>) -> String {
    r2.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"))
}

fn timed<T>(stage: &str, run: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    log::info!("{stage}: started");
    let result = run();
    match &result {
        Ok(_) => log::info!("{stage}: finished in {:.2?}", start.elapsed()),
        Err(e) => log::error!("{stage}: failed after {:.2?}: {e:#}", start.elapsed()),
    }
    result
}

pub struct AnalysisPipeline {
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run(&self) -> Result<AnalysisOutcome> {
        let config = &self.config;

        let primary = timed("primary table", || Self::prepare_table(&config.primary))
            .context("preparing primary table")?;
        let secondary = match &config.secondary {
            Some(step) => Some(
                timed("secondary table", || Self::prepare_table(step))
                    .context("preparing secondary table")?,
            ),
            None => None,
        };

        let joined = match (&secondary, &config.join) {
            (Some(right), Some(join)) => Some(
                timed("join", || {
                    let joined =
                        DataProcessor::join_inner(&primary, right, &join.left_on, &join.right_on)?;
                    if joined.height() == 0 {
                        log::warn!(
                            "Join on '{}' = '{}' produced no rows",
                            join.left_on,
                            join.right_on
                        );
                    } else {
                        log::info!("Joined table has {} rows", joined.height());
                    }
                    Ok(joined)
                })
                .context("joining tables")?,
            ),
            _ => None,
        };

        let mut analysed = joined.clone().unwrap_or_else(|| primary.clone());
        for trim in &config.trims {
            let before = analysed.height();
            analysed = DataProcessor::trim_at_percentile(&analysed, &trim.column, trim.percentile)
                .with_context(|| format!("trimming '{}' at p{}", trim.column, trim.percentile))?;
            log::info!(
                "Trimmed '{}' at p{}: {} → {} rows",
                trim.column,
                trim.percentile,
                before,
                analysed.height()
            );
        }

        let correlation = match &config.correlation {
            Some(step) => Some(
                timed("correlation", || {
                    let outcome = match &step.by {
                        Some(by) => CorrelationOutcome::ByGroup(StatsCalculator::correlate_by(
                            &analysed, by, &step.x, &step.y,
                        )?),
                        None => CorrelationOutcome::Overall(StatsCalculator::correlate(
                            &analysed, &step.x, &step.y,
                        )?),
                    };
                    for (group, c) in outcome.as_map() {
                        if c.coefficient().is_none() {
                            log::warn!("Correlation for '{group}' is {c}");
                        }
                    }
                    Ok(outcome)
                })
                .with_context(|| format!("correlating '{}' with '{}'", step.x, step.y))?,
            ),
            None => None,
        };

        let regression = match &config.regression {
            Some(step) => Some(
                timed("regression", || {
                    let x = DataProcessor::numeric_values(&analysed, &step.x)?;
                    let y = DataProcessor::numeric_values(&analysed, &step.y)?;
                    let report = run_regression(&x, &y, &step.split_config())?;
                    log::info!(
                        "Fitted {} ~ {} on {} rows, R² = {}",
                        step.y,
                        step.x,
                        report.train_rows,
                        format_r2(report.r2)
                    );
                    let scenarios = step
                        .predict_inputs
                        .iter()
                        .copied()
                        .zip(report.model.predict(&step.predict_inputs))
                        .collect();
                    Ok(RegressionOutcome {
                        x,
                        y,
                        report,
                        scenarios,
                    })
                })
                .with_context(|| format!("regressing '{}' on '{}'", step.y, step.x))?,
            ),
            None => None,
        };

        let summaries = self
            .summary_columns()
            .into_iter()
            .map(|name| {
                let values = DataProcessor::numeric_values(&analysed, &name)
                    .with_context(|| format!("summarising '{name}'"))?;
                Ok((name, StatsCalculator::summarize(&values)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(AnalysisOutcome {
            primary,
            secondary,
            joined,
            analysed,
            correlation,
            regression,
            summaries,
        })
    }

    /// Draw the configured dashboards into `dir` and return the written files.
    pub fn render_charts(&self, outcome: &AnalysisOutcome, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating chart directory {}", dir.display()))?;
        let mut written = Vec::new();

        let mut rankings = Vec::new();
        for step in &self.config.output.rankings {
            rankings.extend(Self::rankings_for(outcome, step)?);
        }
        if !rankings.is_empty() || outcome.correlation.is_some() {
            let path = dir.join("correlation.png");
            let correlations = outcome
                .correlation
                .as_ref()
                .map(CorrelationOutcome::as_map)
                .unwrap_or_default();
            StaticChartRenderer::render_correlation_dashboard(
                &path,
                &self.config.title,
                &rankings,
                &correlations,
            )?;
            written.push(path);
        }

        if let (Some(regression), Some(step)) = (&outcome.regression, &self.config.regression) {
            let path = dir.join("regression.png");
            let correlation = match &outcome.correlation {
                Some(CorrelationOutcome::Overall(c)) => Some(*c),
                _ => None,
            };
            let data = RegressionChartData {
                x_label: &step.x,
                y_label: &step.y,
                x: &regression.x,
                y: &regression.y,
                correlation,
                report: &regression.report,
                scenarios: &regression.scenarios,
            };
            StaticChartRenderer::render_regression_dashboard(&path, &self.config.title, &data)?;
            written.push(path);
        }

        Ok(written)
    }

    /// Write the outcome as pretty-printed JSON.
    pub fn write_report(&self, outcome: &AnalysisOutcome, path: &Path) -> Result<()> {
        let regression = outcome.regression.as_ref().map(|r| RegressionSummary {
            model: r.report.model,
            r2: r.report.r2,
            r2_undefined: r.report.r2_undefined.clone(),
            train_rows: r.report.train_rows,
            test_rows: r.report.test_x.len(),
            scenarios: r
                .scenarios
                .iter()
                .map(|&(x, predicted)| Scenario { x, predicted })
                .collect(),
        });
        let report = AnalysisReport {
            title: &self.config.title,
            rows: RowCounts {
                primary: outcome.primary.height(),
                secondary: outcome.secondary.as_ref().map(DataFrame::height),
                joined: outcome.joined.as_ref().map(DataFrame::height),
                analysed: outcome.analysed.height(),
            },
            correlation: outcome.correlation.as_ref(),
            regression,
            summaries: &outcome.summaries,
        };

        let file = File::create(path).with_context(|| format!("creating report {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report).context("writing report")?;
        log::info!("Wrote report to {}", path.display());
        Ok(())
    }

    fn prepare_table(step: &TableStep) -> Result<DataFrame> {
        let raw = DataLoader::load(&step.source)
            .with_context(|| format!("loading {}", step.source.location))?;

        let selected = DataProcessor::filter_select(&raw, &step.filter, step.select.as_deref())?;
        log::info!("Filter/select kept {} rows", selected.height());
        if !step.is_aggregated() {
            return Ok(selected);
        }

        let aggregated = DataProcessor::aggregate_sum(&selected, &step.group_by, &step.sum)?;
        log::info!(
            "Aggregated by {:?} into {} rows",
            step.group_by,
            aggregated.height()
        );
        Ok(aggregated)
    }

    fn rankings_for(outcome: &AnalysisOutcome, step: &RankingStep) -> Result<Vec<RankingSeries>> {
        let table = outcome
            .table(step.table)
            .with_context(|| format!("ranking of '{}' has no table to read", step.value))?;
        let title = step.title.clone().unwrap_or_else(|| step.value.clone());

        let rankings = match &step.split_by {
            Some(split) => DataProcessor::split_by(table, split)?
                .into_iter()
                .map(|(key, part)| {
                    RankingSeries::from_table(&part, &step.label, &step.value, format!("{title} - {key}"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![RankingSeries::from_table(table, &step.label, &step.value, title)?],
        };
        Ok(rankings)
    }

    fn summary_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        if let Some(step) = &self.config.correlation {
            columns.extend([step.x.clone(), step.y.clone()]);
        }
        if let Some(step) = &self.config.regression {
            columns.extend([step.x.clone(), step.y.clone()]);
        }
        columns.sort();
        columns.dedup();
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_passes_results_through() {
        assert_eq!(timed("ok stage", || Ok(3)).unwrap(), 3);

        let err = timed::<()>("failing stage", || Err(anyhow::anyhow!("boom"))).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_format_r2() {
        assert_eq!(format_r2(Some(0.98765)), "0.9877");
        assert_eq!(format_r2(None), "undefined");
    }
}
