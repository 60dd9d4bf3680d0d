//! Statistics Calculator Module
//! Handles Pearson correlation (overall and per group) and descriptive summaries.

use crate::data::DataProcessor;
use crate::stats::StatsError;
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fmt;

/// Why a correlation coefficient could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    TooFewRows,
    ZeroVariance,
}

/// Pearson correlation between two series, or the reason it is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Correlation {
    Coefficient {
        r: f64,
        n: usize,
        /// Two-sided p-value of `r`; absent when n <= 2.
        p_value: Option<f64>,
    },
    Undefined {
        n: usize,
        reason: UndefinedReason,
    },
}

impl Correlation {
    pub fn coefficient(&self) -> Option<f64> {
        match self {
            Correlation::Coefficient { r, .. } => Some(*r),
            Correlation::Undefined { .. } => None,
        }
    }

    pub fn sample_size(&self) -> usize {
        match self {
            Correlation::Coefficient { n, .. } | Correlation::Undefined { n, .. } => *n,
        }
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correlation::Coefficient { r, p_value: Some(p), .. } => write!(f, "{r:.4} (p = {p:.4})"),
            Correlation::Coefficient { r, .. } => write!(f, "{r:.4}"),
            Correlation::Undefined {
                reason: UndefinedReason::TooFewRows,
                n,
            } => write!(f, "undefined ({n} rows)"),
            Correlation::Undefined {
                reason: UndefinedReason::ZeroVariance,
                ..
            } => write!(f, "undefined (zero variance)"),
        }
    }
}

/// Discriminator value → correlation, ordered by discriminator.
pub type CorrelationResult = BTreeMap<String, Correlation>;

/// Descriptive statistics of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p05: f64,
    pub p95: f64,
}

impl Default for SeriesSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean: f64::NAN,
            median: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            p05: f64::NAN,
            p95: f64::NAN,
        }
    }
}

/// Handles statistical calculations with multi-threading support.
pub struct StatsCalculator;

impl StatsCalculator {
    /// Pearson correlation using population moments.
    ///
    /// Fewer than two rows or a constant series yields [`Correlation::Undefined`].
    pub fn pearson(x: &[f64], y: &[f64]) -> Result<Correlation, StatsError> {
        if x.len() != y.len() {
            return Err(StatsError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        let n = x.len();
        if n < 2 {
            return Ok(Correlation::Undefined {
                n,
                reason: UndefinedReason::TooFewRows,
            });
        }

        let mean_x = x.iter().mean();
        let mean_y = y.iter().mean();

        // Deviations are divided by their largest magnitude so the cross
        // products stay finite for values near the f64 range limits.
        let spread = |values: &[f64], mean: f64| {
            values.iter().fold(0.0f64, |acc, v| acc.max((v - mean).abs()))
        };
        let (scale_x, scale_y) = (spread(x, mean_x), spread(y, mean_y));
        if scale_x == 0.0 || scale_y == 0.0 {
            return Ok(Correlation::Undefined {
                n,
                reason: UndefinedReason::ZeroVariance,
            });
        }

        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (xi, yi) in x.iter().zip(y) {
            let dx = (xi - mean_x) / scale_x;
            let dy = (yi - mean_y) / scale_y;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }

        let r = (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0);
        Ok(Correlation::Coefficient {
            r,
            n,
            p_value: Self::correlation_p_value(r, n),
        })
    }

    /// Two-sided p-value for H0: r = 0 using Student's t with n-2 degrees of freedom.
    pub fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
        if n <= 2 {
            return None;
        }
        if r.abs() >= 1.0 {
            return Some(0.0);
        }
        let df = (n - 2) as f64;
        let t = r * (df / (1.0 - r * r)).sqrt();
        StudentsT::new(0.0, 1.0, df)
            .ok()
            .map(|dist| 2.0 * (1.0 - dist.cdf(t.abs())))
    }

    /// Correlation of two numeric columns over the whole table.
    pub fn correlate(df: &DataFrame, x: &str, y: &str) -> Result<Correlation, StatsError> {
        let xs = DataProcessor::numeric_values(df, x)?;
        let ys = DataProcessor::numeric_values(df, y)?;
        Self::pearson(&xs, &ys)
    }

    /// Correlation of `x` and `y` for every distinct value of `by`.
    ///
    /// Groups are evaluated in parallel; the result is keyed by group value.
    pub fn correlate_by(
        df: &DataFrame,
        by: &str,
        x: &str,
        y: &str,
    ) -> Result<CorrelationResult, StatsError> {
        let keys = DataProcessor::text_values(df, by)?;
        let xs = DataProcessor::numeric_values(df, x)?;
        let ys = DataProcessor::numeric_values(df, y)?;

        let mut groups: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for ((key, xv), yv) in keys.into_iter().zip(xs).zip(ys) {
            let entry = groups.entry(key).or_default();
            entry.0.push(xv);
            entry.1.push(yv);
        }

        groups
            .into_par_iter()
            .map(|(key, (gx, gy))| Self::pearson(&gx, &gy).map(|c| (key, c)))
            .collect()
    }

    /// Descriptive statistics for an array of values.
    pub fn summarize(values: &[f64]) -> SeriesSummary {
        let n = values.len();
        if n == 0 {
            return SeriesSummary::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mean = values.iter().mean();
        let median = Self::percentile(&sorted, 50.0);

        SeriesSummary {
            count: n,
            mean,
            median,
            std: values.iter().population_std_dev(),
            min: sorted[0],
            max: sorted[n - 1],
            p05: Self::percentile(&sorted, 5.0),
            p95: Self::percentile(&sorted, 95.0),
        }
    }

    /// Calculate percentile using linear interpolation (NumPy compatible).
    pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
        let n = sorted_values.len();
        if n == 0 {
            return f64::NAN;
        }
        if n == 1 {
            return sorted_values[0];
        }

        let rank = (p / 100.0) * (n - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = (rank.ceil() as usize).min(n - 1);
        let frac = rank - lower as f64;

        if lower == upper {
            sorted_values[lower]
        } else {
            sorted_values[lower] * (1.0 - frac) + sorted_values[upper] * frac
        }
    }
}
