//! Static Chart Renderer
//! Writes PNG dashboards with plotters.
//!
//! Layouts:
//! 1. Correlation dashboard: one descending ranking bar chart per series,
//!    followed by a text panel listing the correlation of each group.
//! 2. Regression dashboard (2x2):
//!    - Scatter of the analysed pairs with the fitted line
//!    - Held-out actual vs predicted values
//!    - Residuals vs predictions
//!    - Predictions for scenario inputs

use crate::data::{DataProcessor, ProcessorError};
use crate::pipeline::format_r2;
use crate::stats::{Correlation, CorrelationResult, RegressionReport};
use plotters::coord::Shift;
use plotters::prelude::*;
use polars::prelude::DataFrame;
use std::error::Error;
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

pub const CHART_WIDTH: u32 = 1700;
pub const CHART_HEIGHT: u32 = 900;

const BAR: RGBColor = RGBColor(91, 155, 213);
const ACTUAL: RGBColor = RGBColor(91, 155, 213);
const PREDICTED: RGBColor = RGBColor(237, 125, 49);
const RESIDUAL: RGBColor = RGBColor(112, 173, 71);

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Chart rendering failed: {0}")]
    Render(String),
    #[error(transparent)]
    Table(#[from] ProcessorError),
    #[error("Failed to prepare chart directory: {0}")]
    Io(#[from] std::io::Error),
}

type Panel<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type DrawResult<T> = Result<T, Box<dyn Error>>;

/// Labels and values of a ranking, largest value first.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingSeries {
    pub title: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl RankingSeries {
    /// Build a ranking from two columns of a table, sorted descending by `value`.
    pub fn from_table(
        df: &DataFrame,
        label: &str,
        value: &str,
        title: impl Into<String>,
    ) -> Result<Self, ChartError> {
        let sorted = DataProcessor::sort_descending(df, value)?;
        Ok(Self {
            title: title.into(),
            labels: DataProcessor::text_values(&sorted, label)?,
            values: DataProcessor::numeric_values(&sorted, value)?,
        })
    }
}

/// Inputs of the regression dashboard.
pub struct RegressionChartData<'a> {
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub correlation: Option<Correlation>,
    pub report: &'a RegressionReport,
    /// (raw x, predicted y) pairs.
    pub scenarios: &'a [(f64, f64)],
}

pub struct StaticChartRenderer;

impl StaticChartRenderer {
    /// Rankings plus a correlation text panel, two panels per row.
    pub fn render_correlation_dashboard(
        path: &Path,
        title: &str,
        rankings: &[RankingSeries],
        correlations: &CorrelationResult,
    ) -> Result<(), ChartError> {
        Self::draw_correlation_dashboard(path, title, rankings, correlations)
            .map_err(|e| ChartError::Render(e.to_string()))?;
        log::info!("Wrote correlation dashboard to {}", path.display());
        Ok(())
    }

    pub fn render_regression_dashboard(
        path: &Path,
        title: &str,
        data: &RegressionChartData<'_>,
    ) -> Result<(), ChartError> {
        Self::draw_regression_dashboard(path, title, data)
            .map_err(|e| ChartError::Render(e.to_string()))?;
        log::info!("Wrote regression dashboard to {}", path.display());
        Ok(())
    }

    fn draw_correlation_dashboard(
        path: &Path,
        title: &str,
        rankings: &[RankingSeries],
        correlations: &CorrelationResult,
    ) -> DrawResult<()> {
        let root = BitMapBackend::new(path, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        root.fill(&WHITE)?;
        let root = root.titled(title, ("sans-serif", 28))?;

        let rows = (rankings.len() + 1).div_ceil(2);
        let panels = root.split_evenly((rows, 2));
        for (panel, ranking) in panels.iter().zip(rankings) {
            Self::draw_ranking(panel, ranking)?;
        }
        Self::draw_correlation_panel(&panels[rankings.len()], correlations)?;

        root.present()?;
        Ok(())
    }

    fn draw_regression_dashboard(
        path: &Path,
        title: &str,
        data: &RegressionChartData<'_>,
    ) -> DrawResult<()> {
        let root = BitMapBackend::new(path, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        root.fill(&WHITE)?;
        let root = root.titled(title, ("sans-serif", 28))?;
        let panels = root.split_evenly((2, 2));
        let report = data.report;

        // Fitted line across the observed x range
        let line = match (min_of(data.x), max_of(data.x)) {
            (Some(lo), Some(hi)) => {
                let ends = report.model.predict(&[lo, hi]);
                vec![(lo, ends[0]), (hi, ends[1])]
            }
            _ => Vec::new(),
        };
        let observed: Vec<(f64, f64)> = data.x.iter().copied().zip(data.y.iter().copied()).collect();
        let caption = match data.correlation {
            Some(c) => format!("Dispersion (r = {c})"),
            None => "Dispersion".to_string(),
        };
        Self::draw_scatter(
            &panels[0],
            &caption,
            (data.x_label, data.y_label),
            &[("Observed", observed.as_slice(), ACTUAL)],
            Some((line, PREDICTED)),
        )?;

        let actual: Vec<(f64, f64)> = report.test_x.iter().copied().zip(report.test_y.iter().copied()).collect();
        let predicted: Vec<(f64, f64)> = report
            .test_x
            .iter()
            .copied()
            .zip(report.predicted_test_y.iter().copied())
            .collect();
        Self::draw_scatter(
            &panels[1],
            &format!("Actual vs predicted (R² = {})", format_r2(report.r2)),
            (data.x_label, data.y_label),
            &[("Actual", actual.as_slice(), ACTUAL), ("Predicted", predicted.as_slice(), PREDICTED)],
            None,
        )?;

        let residuals: Vec<(f64, f64)> = report
            .predicted_test_y
            .iter()
            .copied()
            .zip(report.residuals.iter().copied())
            .collect();
        let zero_line = match (min_of(&report.predicted_test_y), max_of(&report.predicted_test_y)) {
            (Some(lo), Some(hi)) => vec![(lo, 0.0), (hi, 0.0)],
            _ => Vec::new(),
        };
        Self::draw_scatter(
            &panels[2],
            "Residuals",
            ("Predicted", "Residual"),
            &[("Residual", residuals.as_slice(), RESIDUAL)],
            Some((zero_line, BLACK)),
        )?;

        if data.scenarios.is_empty() {
            Self::draw_message(&panels[3], "No scenario inputs")?;
        } else {
            Self::draw_scatter(
                &panels[3],
                "Scenario predictions",
                (data.x_label, data.y_label),
                &[("Predicted", data.scenarios, PREDICTED)],
                None,
            )?;
        }

        root.present()?;
        Ok(())
    }

    fn draw_ranking(panel: &Panel<'_>, ranking: &RankingSeries) -> DrawResult<()> {
        if ranking.values.is_empty() {
            return Self::draw_message(panel, &format!("{}: no rows", ranking.title));
        }

        let n = ranking.values.len() as u32;
        let y_range = padded_range(ranking.values.iter().copied().chain([0.0]));
        let labels = &ranking.labels;

        let mut chart = ChartBuilder::on(panel)
            .caption(&ranking.title, ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d((0u32..n).into_segmented(), y_range)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(n as usize)
            .x_label_formatter(&|v: &SegmentValue<u32>| match v {
                SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                    labels.get(*i as usize).cloned().unwrap_or_default()
                }
                SegmentValue::Last => String::new(),
            })
            .y_label_formatter(&|v: &f64| compact_number(*v))
            .draw()?;

        chart.draw_series(
            Histogram::vertical(&chart)
                .style(BAR.filled())
                .margin(2)
                .data(ranking.values.iter().enumerate().map(|(i, v)| (i as u32, *v))),
        )?;
        Ok(())
    }

    fn draw_correlation_panel(panel: &Panel<'_>, correlations: &CorrelationResult) -> DrawResult<()> {
        let panel = panel.titled("Correlations", ("sans-serif", 20))?;
        let (width, _) = panel.dim_in_pixel();
        let style = TextStyle::from(("sans-serif", 18).into_font()).color(&BLACK);

        let x = (width / 20) as i32;
        let mut y = 40;
        for (group, correlation) in correlations {
            panel.draw(&Text::new(format!("{group}: {correlation}"), (x, y), style.clone()))?;
            y += 32;
        }
        Ok(())
    }

    fn draw_scatter(
        panel: &Panel<'_>,
        caption: &str,
        (x_desc, y_desc): (&str, &str),
        series: &[(&str, &[(f64, f64)], RGBColor)],
        line: Option<(Vec<(f64, f64)>, RGBColor)>,
    ) -> DrawResult<()> {
        let line_points = line.as_ref().map(|(p, _)| p.as_slice()).unwrap_or(&[]);
        let all_points = || {
            series
                .iter()
                .flat_map(|(_, points, _)| points.iter())
                .chain(line_points.iter())
        };
        let x_range = padded_range(all_points().map(|p| p.0));
        let y_range = padded_range(all_points().map(|p| p.1));

        let mut chart = ChartBuilder::on(panel)
            .caption(caption, ("sans-serif", 18))
            .margin(12)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(x_range, y_range)?;

        chart
            .configure_mesh()
            .x_desc(x_desc)
            .y_desc(y_desc)
            .x_label_formatter(&|v: &f64| compact_number(*v))
            .y_label_formatter(&|v: &f64| compact_number(*v))
            .draw()?;

        for (label, points, color) in series {
            let color = *color;
            chart
                .draw_series(points.iter().map(move |&(x, y)| Circle::new((x, y), 3, color.filled())))?
                .label(*label)
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }

        if let Some((points, color)) = line {
            if !points.is_empty() {
                chart.draw_series(LineSeries::new(points, color.stroke_width(2)))?;
            }
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
        Ok(())
    }

    fn draw_message(panel: &Panel<'_>, message: &str) -> DrawResult<()> {
        let (width, height) = panel.dim_in_pixel();
        let style = TextStyle::from(("sans-serif", 18).into_font()).color(&BLACK);
        panel.draw(&Text::new(
            message.to_string(),
            ((width / 10) as i32, (height / 2) as i32),
            style,
        ))?;
        Ok(())
    }
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().filter(|v| v.is_finite()).reduce(f64::min)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().filter(|v| v.is_finite()).reduce(f64::max)
}

/// Axis range covering every finite value with 5% padding on each side.
pub fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min.is_infinite() {
        return 0.0..1.0;
    }
    if min == max {
        return (min - 1.0)..(max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}

/// Short axis label, e.g. `1.5M` for 1 500 000.
pub fn compact_number(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.1}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}k", value / 1e3)
    } else if abs >= 1.0 || abs == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_ranking_is_descending() {
        let df = df![
            "UF" => ["RJ", "SP", "MG"],
            "VALOR PARCELA" => [400.0, 1000.0, 700.0]
        ]
        .unwrap();

        let ranking = RankingSeries::from_table(&df, "UF", "VALOR PARCELA", "Valor Parcela").unwrap();
        assert_eq!(ranking.labels, vec!["SP", "MG", "RJ"]);
        assert_eq!(ranking.values, vec![1000.0, 700.0, 400.0]);
    }

    #[test]
    fn test_ranking_missing_column() {
        let df = df!["UF" => ["SP"], "v" => [1.0]].unwrap();
        assert!(matches!(
            RankingSeries::from_table(&df, "UF", "QT_VOTOS", "x"),
            Err(ChartError::Table(ProcessorError::MissingColumn(_)))
        ));
    }

    #[test]
    fn test_padded_range() {
        let range = padded_range([0.0, 10.0, f64::NAN].into_iter());
        assert!((range.start + 0.5).abs() < 1e-12);
        assert!((range.end - 10.5).abs() < 1e-12);

        assert_eq!(padded_range([3.0, 3.0].into_iter()), 2.0..4.0);
        assert_eq!(padded_range(std::iter::empty()), 0.0..1.0);
    }

    #[test]
    fn test_compact_number() {
        assert_eq!(compact_number(1_500_000.0), "1.5M");
        assert_eq!(compact_number(2_300.0), "2.3k");
        assert_eq!(compact_number(42.0), "42");
        assert_eq!(compact_number(0.25), "0.25");
        assert_eq!(compact_number(-3.2e9), "-3.2B");
    }
}
