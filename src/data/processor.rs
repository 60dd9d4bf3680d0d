//! Data Processor Module
//! Filter/select, group-by sum, inner join and ranking helpers over DataFrames.

use crate::stats::StatsCalculator;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Column '{0}' not found in table")]
    MissingColumn(String),
    #[error("Column '{column}' has non-numeric type {dtype}")]
    NonNumericColumn { column: String, dtype: String },
    #[error("Column '{column}' has {count} missing or non-numeric values")]
    MissingValues { column: String, count: usize },
    #[error("Join keys '{left}' ({left_dtype}) and '{right}' ({right_dtype}) have different types")]
    JoinKeyType {
        left: String,
        left_dtype: String,
        right: String,
        right_dtype: String,
    },
    #[error("Membership test on '{0}' mixes value types")]
    MixedLiteralTypes(String),
    #[error("Aggregation requires at least one grouping column")]
    NoGroupColumns,
    #[error("Percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),
}

/// A typed literal used in row predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    fn to_expr(&self) -> Expr {
        match self {
            Literal::Bool(v) => lit(*v),
            Literal::Int(v) => lit(*v),
            Literal::Float(v) => lit(*v),
            Literal::Text(v) => lit(v.clone()),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

/// One term of a conjunctive row predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { column: String, value: Literal },
    In { column: String, values: Vec<Literal> },
}

impl Condition {
    pub fn equals(column: &str, value: impl Into<Literal>) -> Self {
        Condition::Equals {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn is_in<L: Into<Literal>>(column: &str, values: impl IntoIterator<Item = L>) -> Self {
        Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Condition::Equals { column, .. } | Condition::In { column, .. } => column,
        }
    }

    fn to_expr(&self) -> Result<Expr, ProcessorError> {
        match self {
            Condition::Equals { column, value } => Ok(col(column.as_str()).eq(value.to_expr())),
            Condition::In { column, values } => {
                let series = literals_to_series(column, values)?;
                Ok(col(column.as_str()).is_in(lit(series)))
            }
        }
    }
}

fn literals_to_series(column: &str, values: &[Literal]) -> Result<Series, ProcessorError> {
    let name: PlSmallStr = column.into();
    if values.iter().all(|v| matches!(v, Literal::Int(_))) {
        let ints: Vec<i64> = values
            .iter()
            .filter_map(|v| match v {
                Literal::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, ints));
    }
    if values
        .iter()
        .all(|v| matches!(v, Literal::Int(_) | Literal::Float(_)))
    {
        let floats: Vec<f64> = values
            .iter()
            .filter_map(|v| match v {
                Literal::Int(i) => Some(*i as f64),
                Literal::Float(f) => Some(*f),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, floats));
    }
    if values.iter().all(|v| matches!(v, Literal::Text(_))) {
        let texts: Vec<&str> = values
            .iter()
            .filter_map(|v| match v {
                Literal::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, texts));
    }
    if values.iter().all(|v| matches!(v, Literal::Bool(_))) {
        let bools: Vec<bool> = values
            .iter()
            .filter_map(|v| match v {
                Literal::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, bools));
    }
    Err(ProcessorError::MixedLiteralTypes(column.to_string()))
}

/// Check whether a dtype can be summed.
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Stateless table transformations. Every operation returns a new DataFrame.
pub struct DataProcessor;

impl DataProcessor {
    /// Keep rows matching every condition, then project `columns` in order.
    ///
    /// An empty predicate keeps every row and `None` keeps every column.
    pub fn filter_select(
        df: &DataFrame,
        predicate: &[Condition],
        columns: Option<&[String]>,
    ) -> Result<DataFrame, ProcessorError> {
        for condition in predicate {
            Self::require_column(df, condition.column())?;
        }
        if let Some(columns) = columns {
            for name in columns {
                Self::require_column(df, name)?;
            }
        }

        let mut lf = df.clone().lazy();
        let mut combined: Option<Expr> = None;
        for condition in predicate {
            let expr = condition.to_expr()?;
            combined = Some(match combined {
                Some(acc) => acc.and(expr),
                None => expr,
            });
        }
        if let Some(expr) = combined {
            lf = lf.filter(expr);
        }
        if let Some(columns) = columns {
            let exprs: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
            lf = lf.select(exprs);
        }

        Ok(lf.collect()?)
    }

    /// Group by `group_by` and replace each `sum_columns` column by its group total.
    ///
    /// Output columns are the grouping columns followed by the summed columns.
    /// Row order is unspecified.
    pub fn aggregate_sum(
        df: &DataFrame,
        group_by: &[String],
        sum_columns: &[String],
    ) -> Result<DataFrame, ProcessorError> {
        if group_by.is_empty() {
            return Err(ProcessorError::NoGroupColumns);
        }
        for name in group_by {
            Self::require_column(df, name)?;
        }
        for name in sum_columns {
            Self::require_numeric(df, name)?;
        }

        let keys: Vec<Expr> = group_by.iter().map(|c| col(c.as_str())).collect();
        let sums: Vec<Expr> = sum_columns.iter().map(|c| col(c.as_str()).sum()).collect();

        let aggregated = df.clone().lazy().group_by(keys).agg(sums).collect()?;
        Ok(aggregated)
    }

    /// Inner join on `left_on == right_on`.
    ///
    /// Unmatched keys are dropped from both sides; duplicate keys produce
    /// the cross product of their matches. The right key column is merged
    /// into the left one.
    pub fn join_inner(
        left: &DataFrame,
        right: &DataFrame,
        left_on: &str,
        right_on: &str,
    ) -> Result<DataFrame, ProcessorError> {
        let left_key = Self::require_column(left, left_on)?;
        let right_key = Self::require_column(right, right_on)?;
        if left_key.dtype() != right_key.dtype() {
            return Err(ProcessorError::JoinKeyType {
                left: left_on.to_string(),
                left_dtype: left_key.dtype().to_string(),
                right: right_on.to_string(),
                right_dtype: right_key.dtype().to_string(),
            });
        }

        let joined = left
            .clone()
            .lazy()
            .join(
                right.clone().lazy(),
                [col(left_on)],
                [col(right_on)],
                JoinArgs::new(JoinType::Inner),
            )
            .collect()?;
        Ok(joined)
    }

    /// Sort rows by `column`, largest first.
    pub fn sort_descending(df: &DataFrame, column: &str) -> Result<DataFrame, ProcessorError> {
        Self::require_column(df, column)?;
        let sorted = df
            .clone()
            .lazy()
            .sort(
                [column],
                SortMultipleOptions::default()
                    .with_order_descending(true)
                    .with_nulls_last(true),
            )
            .collect()?;
        Ok(sorted)
    }

    /// Keep rows whose `column` value is strictly below its `percentile`-th percentile.
    pub fn trim_at_percentile(
        df: &DataFrame,
        column: &str,
        percentile: f64,
    ) -> Result<DataFrame, ProcessorError> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(ProcessorError::InvalidPercentile(percentile));
        }
        let mut values = Self::numeric_values(df, column)?;
        values.sort_by(|a, b| a.total_cmp(b));
        let threshold = StatsCalculator::percentile(&values, percentile);

        let trimmed = df
            .clone()
            .lazy()
            .filter(col(column).cast(DataType::Float64).lt(lit(threshold)))
            .collect()?;
        Ok(trimmed)
    }

    /// Extract a numeric column as `f64` values, failing on missing entries.
    pub fn numeric_values(df: &DataFrame, column: &str) -> Result<Vec<f64>, ProcessorError> {
        let series = Self::require_numeric(df, column)?.cast(&DataType::Float64)?;
        Ok(series.f64()?.into_iter().flatten().collect())
    }

    /// Extract a column as text values, failing on nulls.
    pub fn text_values(df: &DataFrame, column: &str) -> Result<Vec<String>, ProcessorError> {
        let column_ref = Self::require_column(df, column)?;
        let nulls = column_ref.null_count();
        if nulls > 0 {
            return Err(ProcessorError::MissingValues {
                column: column.to_string(),
                count: nulls,
            });
        }
        let as_text = column_ref.cast(&DataType::String)?;
        Ok(as_text
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect())
    }

    /// One sub-table per distinct value of `column`, ordered by that value's text.
    pub fn split_by(df: &DataFrame, column: &str) -> Result<Vec<(String, DataFrame)>, ProcessorError> {
        let mut keys = Self::text_values(df, column)?;
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .map(|key| {
                let part = df
                    .clone()
                    .lazy()
                    .filter(col(column).cast(DataType::String).eq(lit(key.as_str())))
                    .collect()?;
                Ok((key, part))
            })
            .collect()
    }

    fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, ProcessorError> {
        df.column(name)
            .map_err(|_| ProcessorError::MissingColumn(name.to_string()))
    }

    /// Fail-fast policy for reduced columns: numeric dtype, no nulls, no NaN.
    fn require_numeric<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, ProcessorError> {
        let column = Self::require_column(df, name)?;
        if !is_numeric_dtype(column.dtype()) {
            return Err(ProcessorError::NonNumericColumn {
                column: name.to_string(),
                dtype: column.dtype().to_string(),
            });
        }

        let mut missing = column.null_count();
        if matches!(column.dtype(), DataType::Float32 | DataType::Float64) {
            let floats = column.cast(&DataType::Float64)?;
            missing += floats.f64()?.into_iter().flatten().filter(|v| v.is_nan()).count();
        }
        if missing > 0 {
            return Err(ProcessorError::MissingValues {
                column: name.to_string(),
                count: missing,
            });
        }
        Ok(column)
    }
}
