//! Charts module - Static PNG dashboards

mod renderer;

pub use renderer::{
    compact_number, padded_range, ChartError, RankingSeries, RegressionChartData,
    StaticChartRenderer, CHART_HEIGHT, CHART_WIDTH,
};
