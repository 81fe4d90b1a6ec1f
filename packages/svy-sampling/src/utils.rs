// src/utils.rs

use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid significance level: {0}")]
    Validation(String),

    #[error("Design matrix is unidentified: {cols} columns for {rows} rows")]
    Dimension { rows: usize, cols: usize },

    #[error("Design matrix is singular: X'X cannot be inverted")]
    Singular,

    #[error("{0} accessed before fit()")]
    NotFitted(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, SamplingError>;

/// Read a numeric column as `f64`, casting integer columns.
pub fn numeric_column(df: &DataFrame, name: &str) -> Result<Array1<f64>> {
    let column = df
        .column(name)
        .map_err(|_| SamplingError::InvalidInput(format!("column '{}' not found", name)))?
        .cast(&DataType::Float64)?;
    let values = column.f64()?;
    if values.null_count() > 0 {
        return Err(SamplingError::InvalidInput(format!(
            "column '{}' contains {} null values",
            name,
            values.null_count()
        )));
    }
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Read any column as strings (categorical levels, stratum keys).
pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = df
        .column(name)
        .map_err(|_| SamplingError::InvalidInput(format!("column '{}' not found", name)))?
        .cast(&DataType::String)?;
    let values = column.str()?;
    values
        .into_iter()
        .map(|v| {
            v.map(str::to_string).ok_or_else(|| {
                SamplingError::InvalidInput(format!("column '{}' contains null values", name))
            })
        })
        .collect()
}

pub fn is_string_column(df: &DataFrame, name: &str) -> Result<bool> {
    let column = df
        .column(name)
        .map_err(|_| SamplingError::InvalidInput(format!("column '{}' not found", name)))?;
    Ok(column.dtype() == &DataType::String)
}

/// Map labels to dense group ids. Groups are numbered in sorted label order.
/// Returns (indices, group_names).
pub fn index_labels(labels: &[String]) -> (Vec<usize>, Vec<String>) {
    let mut ids: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        ids.entry(label.as_str()).or_insert(0);
    }
    let names: Vec<String> = ids.keys().map(|s| s.to_string()).collect();
    for (i, id) in ids.values_mut().enumerate() {
        *id = i;
    }
    let indices = labels.iter().map(|l| ids[l.as_str()]).collect();
    (indices, names)
}

/// Sum values by group
pub fn sum_by_group(values: ArrayView1<f64>, indices: &[usize], n_groups: usize) -> Array1<f64> {
    let mut sums = Array1::zeros(n_groups);

    for (i, &group_id) in indices.iter().enumerate() {
        sums[group_id] += values[i];
    }

    sums
}

pub fn count_by_group(indices: &[usize], n_groups: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_groups];
    for &group_id in indices {
        counts[group_id] += 1;
    }
    counts
}

pub fn mean(values: ArrayView1<f64>) -> f64 {
    values.mean().unwrap_or(f64::NAN)
}

/// Sample variance with n - 1 denominator.
pub fn sample_variance(values: ArrayView1<f64>) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    values.var(1.0)
}

/// Pearson correlation. NaN when either side is constant.
pub fn correlation(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let n = x.len();
    if n < 2 || y.len() != n {
        return f64::NAN;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        sxy += (xi - mx) * (yi - my);
        sxx += (xi - mx).powi(2);
        syy += (yi - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_sum_by_group() {
        let values = array![1.0, 2.0, 3.0, 4.0];
        let indices = vec![0, 0, 1, 1];
        let sums = sum_by_group(values.view(), &indices, 2);

        assert_eq!(sums[0], 3.0);
        assert_eq!(sums[1], 7.0);
        assert_eq!(count_by_group(&indices, 2), vec![2, 2]);
    }

    #[test]
    fn test_index_labels_sorted() {
        let labels: Vec<String> = ["b", "a", "c", "a"].iter().map(|s| s.to_string()).collect();
        let (idx, names) = index_labels(&labels);

        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(idx, vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_correlation_perfect() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        let y = array![3.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(correlation(x.view(), y.view()), 1.0, epsilon = 1e-12);

        let flat = array![1.0, 1.0, 1.0, 1.0];
        assert!(correlation(x.view(), flat.view()).is_nan());
    }

    #[test]
    fn test_sample_variance() {
        let v = array![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(sample_variance(v.view()), 32.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_numeric_column_casts_and_rejects_nulls() {
        let df = df!["a" => [1i64, 2, 3], "b" => [Some(1.0), None, Some(2.0)]].unwrap();
        let a = numeric_column(&df, "a").unwrap();
        assert_eq!(a, array![1.0, 2.0, 3.0]);

        assert!(matches!(numeric_column(&df, "b"), Err(SamplingError::InvalidInput(_))));
        assert!(matches!(numeric_column(&df, "missing"), Err(SamplingError::InvalidInput(_))));
    }
}
