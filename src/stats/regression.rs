//! Linear Regression Module
//! Seeded train/test split, standard scaling and an ordinary least-squares line.

use crate::stats::StatsError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_SEED: u64 = 42;

/// Split parameters for [`run_regression`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
        }
    }
}

/// Paired (x, y) observations partitioned into training and test sets.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train_x: Vec<f64>,
    pub train_y: Vec<f64>,
    pub test_x: Vec<f64>,
    pub test_y: Vec<f64>,
}

/// Shuffle pairs with a seeded RNG and hold out `ceil(test_fraction * n)` of them.
pub fn train_test_split(
    x: &[f64],
    y: &[f64],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit, StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(StatsError::InvalidSplit(format!(
            "test fraction {test_fraction} must be in (0, 1)"
        )));
    }

    let n = x.len();
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(StatsError::InvalidSplit(format!(
            "{n} rows cannot be split with test fraction {test_fraction}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok(TrainTestSplit {
        train_x: train_idx.iter().map(|&i| x[i]).collect(),
        train_y: train_idx.iter().map(|&i| y[i]).collect(),
        test_x: test_idx.iter().map(|&i| x[i]).collect(),
        test_y: test_idx.iter().map(|&i| y[i]).collect(),
    })
}

/// Zero-mean, unit-variance transform (population standard deviation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
}

impl StandardScaler {
    pub fn fit(values: &[f64]) -> Result<Self, StatsError> {
        if values.is_empty() {
            return Err(StatsError::ModelFit("cannot fit scaler on no values".into()));
        }
        let mean = values.iter().mean();
        let scale = values.iter().population_std_dev();
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(StatsError::ModelFit(format!(
                "feature has zero variance (all values {mean})"
            )));
        }
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| (v - self.mean) / self.scale).collect()
    }

    pub fn inverse_transform(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|v| v * self.scale + self.mean).collect()
    }
}

/// Ordinary least-squares line fitted on scaled x.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearModel {
    pub scaler: StandardScaler,
    /// Change in y per standard deviation of x.
    pub slope: f64,
    pub intercept: f64,
}

impl LinearModel {
    /// Fit the scaler and the line on raw training data.
    pub fn fit(train_x: &[f64], train_y: &[f64]) -> Result<Self, StatsError> {
        if train_x.len() != train_y.len() {
            return Err(StatsError::LengthMismatch {
                x: train_x.len(),
                y: train_y.len(),
            });
        }
        let mut distinct = train_x.to_vec();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(StatsError::ModelFit(format!(
                "training split has {} distinct x values, need at least 2",
                distinct.len()
            )));
        }

        let scaler = StandardScaler::fit(train_x)?;
        let xs = scaler.transform(train_x);

        let n = xs.len() as f64;
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = train_y.iter().sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (xi, yi) in xs.iter().zip(train_y) {
            sxy += (xi - mean_x) * (yi - mean_y);
            sxx += (xi - mean_x) * (xi - mean_x);
        }
        if sxx == 0.0 {
            return Err(StatsError::ModelFit("scaled training x has zero variance".into()));
        }

        let slope = sxy / sxx;
        Ok(Self {
            scaler,
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn predict_scaled(&self, scaled_x: &[f64]) -> Vec<f64> {
        scaled_x
            .iter()
            .map(|x| self.intercept + self.slope * x)
            .collect()
    }

    /// Predict y for raw x values.
    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        self.predict_scaled(&self.scaler.transform(x))
    }

    /// Coefficient of determination on raw x values. May be negative.
    pub fn score(&self, x: &[f64], y: &[f64]) -> Result<f64, StatsError> {
        if x.len() != y.len() {
            return Err(StatsError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        r2_score(y, &self.predict(x))
    }
}

/// R² = 1 - SS_res / SS_tot, unclamped.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64, StatsError> {
    if y_true.len() < 2 {
        return Err(StatsError::DegenerateStatistics(format!(
            "R² needs at least 2 observations, got {}",
            y_true.len()
        )));
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Err(StatsError::DegenerateStatistics(
            "R² is undefined when the observed values are constant".into(),
        ));
    }
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    Ok(1.0 - ss_res / ss_tot)
}

/// Fitted model plus its held-out evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionReport {
    pub model: LinearModel,
    /// Held-out R²; `None` when it is undefined for the test set.
    pub r2: Option<f64>,
    /// Why `r2` is `None`.
    pub r2_undefined: Option<String>,
    pub train_rows: usize,
    pub test_x: Vec<f64>,
    pub test_y: Vec<f64>,
    pub predicted_test_y: Vec<f64>,
    /// `test_y - predicted_test_y`
    pub residuals: Vec<f64>,
}

/// Split, scale, fit and score in one pass.
///
/// A degenerate test set (fewer than 2 rows or constant y) leaves `r2` empty
/// but still returns the fitted model.
pub fn run_regression(
    x: &[f64],
    y: &[f64],
    config: &RegressionConfig,
) -> Result<RegressionReport, StatsError> {
    let split = train_test_split(x, y, config.test_fraction, config.seed)?;
    let model = LinearModel::fit(&split.train_x, &split.train_y)?;

    let predicted_test_y = model.predict(&split.test_x);
    let (r2, r2_undefined) = match r2_score(&split.test_y, &predicted_test_y) {
        Ok(r2) => (Some(r2), None),
        Err(StatsError::DegenerateStatistics(reason)) => {
            log::warn!("Held-out R² undefined: {reason}");
            (None, Some(reason))
        }
        Err(e) => return Err(e),
    };
    let residuals = split
        .test_y
        .iter()
        .zip(&predicted_test_y)
        .map(|(actual, predicted)| actual - predicted)
        .collect();

    Ok(RegressionReport {
        model,
        r2,
        r2_undefined,
        train_rows: split.train_x.len(),
        test_x: split.test_x,
        test_y: split.test_y,
        predicted_test_y,
        residuals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 3.0).collect();
        let y = x.iter().map(|v| 2.0 * v + 1.0).collect();
        (x, y)
    }

    #[test]
    fn test_perfect_line() {
        let (x, y) = linear_data(20);
        let report = run_regression(&x, &y, &RegressionConfig::default()).unwrap();

        assert!((report.r2.unwrap() - 1.0).abs() < 1e-9);
        assert!(report.r2_undefined.is_none());
        let predictions = report.model.predict(&[400_000.0, 500_000.0, 600_000.0]);
        for (x, p) in [400_000.0, 500_000.0, 600_000.0].iter().zip(predictions) {
            assert!((p - (2.0 * x + 1.0)).abs() < 1e-6 * x);
        }
        assert!(report.residuals.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let (x, y) = linear_data(10);
        let a = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(a.test_x.len(), 2);
        assert_eq!(a.train_x.len(), 8);

        let b = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(a, b);

        // pairs stay aligned after shuffling
        for (xv, yv) in a.train_x.iter().zip(&a.train_y) {
            assert_eq!(*yv, 2.0 * xv + 1.0);
        }

        // ceil(0.25 * 7) = 2
        let c = train_test_split(&x[..7], &y[..7], 0.25, 1).unwrap();
        assert_eq!(c.test_x.len(), 2);
    }

    #[test]
    fn test_invalid_splits() {
        let (x, y) = linear_data(5);
        assert!(matches!(
            train_test_split(&x, &y, 0.0, 42),
            Err(StatsError::InvalidSplit(_))
        ));
        assert!(matches!(
            train_test_split(&x, &y, 1.0, 42),
            Err(StatsError::InvalidSplit(_))
        ));
        assert!(matches!(
            train_test_split(&x[..1], &y[..1], 0.2, 42),
            Err(StatsError::InvalidSplit(_))
        ));
        assert!(matches!(
            train_test_split(&x, &y[..3], 0.2, 42),
            Err(StatsError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_scaler_uses_training_statistics_only() {
        let scaler = StandardScaler::fit(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(scaler.mean, 2.0);
        assert!((scaler.scale - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let transformed = scaler.transform(&[2.0, 100.0]);
        assert_eq!(transformed[0], 0.0);
        let restored = scaler.inverse_transform(&transformed);
        assert!((restored[1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_training_split() {
        let err = LinearModel::fit(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, StatsError::ModelFit(_)));

        let err = LinearModel::fit(&[5.0], &[1.0]).unwrap_err();
        assert!(matches!(err, StatsError::ModelFit(_)));

        assert!(matches!(
            StandardScaler::fit(&[7.0, 7.0]),
            Err(StatsError::ModelFit(_))
        ));
    }

    #[test]
    fn test_negative_r2_is_preserved() {
        let model = LinearModel::fit(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]).unwrap();
        // the model predicts y = x, observed values run the opposite way
        let r2 = model.score(&[0.0, 1.0, 2.0], &[2.0, 1.0, 0.0]).unwrap();
        assert!((r2 - (-3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_r2_on_constant_observations_is_degenerate() {
        assert!(matches!(
            r2_score(&[3.0, 3.0], &[3.0, 3.0]),
            Err(StatsError::DegenerateStatistics(_))
        ));
        assert!(matches!(
            r2_score(&[3.0], &[3.0]),
            Err(StatsError::DegenerateStatistics(_))
        ));
    }

    #[test]
    fn test_residuals_are_actual_minus_predicted() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let report = run_regression(&x, &y, &RegressionConfig::default()).unwrap();
        for ((actual, predicted), residual) in report
            .test_y
            .iter()
            .zip(&report.predicted_test_y)
            .zip(&report.residuals)
        {
            assert_eq!(*residual, actual - predicted);
        }
        assert_eq!(report.train_rows + report.test_x.len(), 10);
    }

    #[test]
    fn test_single_test_row_keeps_model() {
        // 5 rows at the default fraction hold out exactly one row
        let (x, y) = linear_data(5);
        let report = run_regression(&x, &y, &RegressionConfig::default()).unwrap();

        assert_eq!(report.test_x.len(), 1);
        assert_eq!(report.train_rows, 4);
        assert!(report.r2.is_none());
        assert!(report.r2_undefined.as_deref().unwrap().contains("at least 2"));
        let predicted = report.model.predict(&[30.0]);
        assert!((predicted[0] - 61.0).abs() < 1e-9);
    }
}
