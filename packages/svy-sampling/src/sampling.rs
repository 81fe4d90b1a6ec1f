// src/sampling.rs
//
// Seeded sample selection:
// - simple random sampling without replacement
// - stratum labels from one or more categorical columns
// - proportional allocation of a sample across strata

use polars::prelude::*;
use rand::seq::index;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::utils::{string_column, Result, SamplingError};

/// Draw `n` distinct row positions out of `population_size`.
/// Positions come back sorted so the sample keeps population order.
pub fn draw_without_replacement(population_size: usize, n: usize, seed: u64) -> Result<Vec<usize>> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    draw_with_rng(&mut rng, population_size, n)
}

/// Same as `draw_without_replacement` but continues an existing generator,
/// so consecutive strata get independent draws from one seed.
pub fn draw_with_rng(rng: &mut Xoshiro256PlusPlus, population_size: usize, n: usize) -> Result<Vec<usize>> {
    if n > population_size {
        return Err(SamplingError::InvalidInput(format!(
            "sample size {} exceeds population size {}",
            n, population_size
        )));
    }
    let mut rows = index::sample(rng, population_size, n).into_vec();
    rows.sort_unstable();
    Ok(rows)
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
    let idx = IdxCa::from_vec("idx".into(), idx);
    Ok(df.take(&idx)?)
}

/// One label per row: the string values of `columns` joined with '_'.
pub fn stratum_labels(df: &DataFrame, columns: &[String]) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(SamplingError::InvalidInput("at least one stratum column is required".into()));
    }
    let parts: Vec<Vec<String>> = columns
        .iter()
        .map(|c| string_column(df, c))
        .collect::<Result<_>>()?;

    let labels = (0..df.height())
        .map(|row| {
            parts
                .iter()
                .map(|col| col[row].as_str())
                .collect::<Vec<_>>()
                .join("_")
        })
        .collect();
    Ok(labels)
}

/// nh = round(Nh / N * n), ties to even. The realized total may differ
/// from `n` by at most one unit per stratum.
pub fn proportional_allocation(counts: &[usize], n: usize) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0; counts.len()];
    }
    counts
        .iter()
        .map(|&nh| (nh as f64 / total as f64 * n as f64).round_ties_even() as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_is_reproducible_subset() {
        let a = draw_without_replacement(1000, 100, 42).unwrap();
        let b = draw_without_replacement(1000, 100, 42).unwrap();
        let c = draw_without_replacement(1000, 100, 43).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 100);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert!(a.iter().all(|&r| r < 1000));
    }

    #[test]
    fn test_draw_too_large() {
        assert!(draw_without_replacement(10, 11, 1).is_err());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        assert!(draw_with_rng(&mut rng, 10, 11).is_err());
    }

    #[test]
    fn test_seeded_draw_matches_fresh_generator() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let first = draw_with_rng(&mut rng, 500, 30).unwrap();
        let second = draw_with_rng(&mut rng, 500, 30).unwrap();

        assert_eq!(draw_without_replacement(500, 30, 42).unwrap(), first);
        assert_ne!(first, second);
    }

    #[test]
    fn test_proportional_allocation_bounds() {
        let counts = vec![500, 300, 200];
        let nh = proportional_allocation(&counts, 100);
        assert_eq!(nh, vec![50, 30, 20]);

        let counts = vec![333, 333, 334];
        let nh = proportional_allocation(&counts, 50);
        let total: usize = nh.iter().sum();
        assert!((total as i64 - 50).abs() <= counts.len() as i64);
    }

    #[test]
    fn test_stratum_labels_join() {
        let df = df!["region" => ["north", "south"], "urban" => [1i32, 0]].unwrap();
        let labels = stratum_labels(&df, &["region".to_string(), "urban".to_string()]).unwrap();
        assert_eq!(labels, vec!["north_1", "south_0"]);
    }

    #[test]
    fn test_take_rows() {
        let df = df!["a" => [10.0, 20.0, 30.0, 40.0]].unwrap();
        let taken = take_rows(&df, &[1, 3]).unwrap();
        assert_eq!(taken.height(), 2);
        let values: Vec<f64> = taken.column("a").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(values, vec![20.0, 40.0]);
    }
}
