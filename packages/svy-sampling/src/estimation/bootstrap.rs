// src/estimation/bootstrap.rs
//! Repeated sampling from a population column: empirical distribution of the
//! sample mean and standard deviation, percentile intervals, and the sample
//! size needed for a given interval half-width.

use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::fmt;

use super::interval::{empirical_quantile, level_label, z_critical};
use crate::config::SignificanceLevels;
use crate::regression::diagnostics::{jarque_bera, JarqueBera};
use crate::sampling::draw_without_replacement;
use crate::utils::{numeric_column, Result, SamplingError};

/// Share of the population drawn per replicate when no size is given.
pub const DEFAULT_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Statistic {
    #[default]
    Mean,
    StdDev,
}

/// k replicate means and standard deviations, replicate i drawn with seed
/// `seed + i`.
#[derive(Debug, Clone)]
pub struct BootstrapDistribution {
    pub seed: u64,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    sorted_means: Vec<f64>,
    sorted_std_devs: Vec<f64>,
}

impl BootstrapDistribution {
    pub fn replicates(&self) -> usize {
        self.means.len()
    }

    pub fn values(&self, statistic: Statistic) -> &[f64] {
        match statistic {
            Statistic::Mean => &self.means,
            Statistic::StdDev => &self.std_devs,
        }
    }

    fn sorted(&self, statistic: Statistic) -> &[f64] {
        match statistic {
            Statistic::Mean => &self.sorted_means,
            Statistic::StdDev => &self.sorted_std_devs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapInterval {
    pub alpha: f64,
    pub lower: f64,
    pub upper: f64,
}

impl BootstrapInterval {
    pub fn half_width(&self) -> f64 {
        (self.upper - self.lower) / 2.0
    }

    pub fn label(&self) -> String {
        level_label(self.alpha)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSize {
    pub alpha: f64,
    pub half_width: f64,
    pub z: f64,
    /// Size before the finite population correction.
    pub n0: f64,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSummary {
    pub mean: f64,
    pub std: f64,
    pub half_widths: Vec<(f64, f64)>,
    pub jarque_bera: JarqueBera,
}

impl BootstrapSummary {
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut names = vec!["mean".to_string(), "std".to_string()];
        let mut values = vec![self.mean, self.std];
        for (alpha, d) in &self.half_widths {
            names.push(format!("d({})", level_label(*alpha)));
            values.push(*d);
        }
        names.push("JB".into());
        values.push(self.jarque_bera.statistic);
        names.push("p(JB)".into());
        values.push(self.jarque_bera.p_value);
        Ok(df!["statistic" => names, "value" => values]?)
    }
}

#[derive(Debug, Clone)]
pub struct Resampler {
    target: String,
    values: Array1<f64>,
    alpha: SignificanceLevels,
    n: usize,
    distribution: Option<BootstrapDistribution>,
}

impl Resampler {
    pub fn new(
        population: &DataFrame,
        target: &str,
        alpha: SignificanceLevels,
        n: Option<usize>,
    ) -> Result<Self> {
        let values = numeric_column(population, target)?;
        Self::from_values(target, values, alpha, n)
    }

    pub fn from_values(
        target: &str,
        values: Array1<f64>,
        alpha: SignificanceLevels,
        n: Option<usize>,
    ) -> Result<Self> {
        let population_size = values.len();
        let n = n.unwrap_or((population_size as f64 * DEFAULT_FRACTION) as usize);
        if n < 2 || n > population_size {
            return Err(SamplingError::InvalidInput(format!(
                "replicate size must lie in [2, {}], got {}",
                population_size, n
            )));
        }
        Ok(Resampler {
            target: target.to_string(),
            values,
            alpha,
            n,
            distribution: None,
        })
    }

    pub fn population_size(&self) -> usize {
        self.values.len()
    }

    pub fn sample_size(&self) -> usize {
        self.n
    }

    pub fn levels(&self) -> &SignificanceLevels {
        &self.alpha
    }

    /// Draw `k` samples of size n without replacement, seeds seed..seed+k-1.
    pub fn fit(&mut self, k: usize, seed: u64) -> Result<&BootstrapDistribution> {
        if k == 0 {
            return Err(SamplingError::InvalidInput("at least one replicate is required".into()));
        }
        let mut means = Vec::with_capacity(k);
        let mut std_devs = Vec::with_capacity(k);
        for i in 0..k as u64 {
            let rows = draw_without_replacement(self.values.len(), self.n, seed.wrapping_add(i))?;
            let sample: Array1<f64> = rows.iter().map(|&r| self.values[r]).collect();
            means.push(sample.mean().unwrap_or(f64::NAN));
            std_devs.push(sample.std(1.0));
        }
        tracing::debug!(target_column = %self.target, k, n = self.n, seed, "bootstrap distribution drawn");

        let mut sorted_means = means.clone();
        sorted_means.sort_by(f64::total_cmp);
        let mut sorted_std_devs = std_devs.clone();
        sorted_std_devs.sort_by(f64::total_cmp);

        Ok(&*self.distribution.insert(BootstrapDistribution {
            seed,
            means,
            std_devs,
            sorted_means,
            sorted_std_devs,
        }))
    }

    pub fn distribution(&self) -> Result<&BootstrapDistribution> {
        self.distribution.as_ref().ok_or(SamplingError::NotFitted("Resampler"))
    }

    /// Average of the replicate means.
    pub fn mean(&self) -> Result<f64> {
        Ok(mean_of(&self.distribution()?.means))
    }

    /// Average of the replicate standard deviations.
    pub fn std(&self) -> Result<f64> {
        Ok(mean_of(&self.distribution()?.std_devs))
    }

    /// [alpha/2, 1 - alpha/2] empirical quantiles for each level; the
    /// configured levels when `alpha` is `None`. Levels may be 1 (the median).
    pub fn interval(&self, alpha: Option<&[f64]>, statistic: Statistic) -> Result<Vec<BootstrapInterval>> {
        let dist = self.distribution()?;
        let sorted = dist.sorted(statistic);
        let levels = alpha.unwrap_or(self.alpha.as_slice());
        levels
            .iter()
            .map(|&a| {
                if !(a > 0.0 && a <= 1.0) {
                    return Err(SamplingError::Validation(format!(
                        "alpha must lie in (0, 1], got {}",
                        a
                    )));
                }
                Ok(BootstrapInterval {
                    alpha: a,
                    lower: empirical_quantile(sorted, a / 2.0),
                    upper: empirical_quantile(sorted, 1.0 - a / 2.0),
                })
            })
            .collect()
    }

    /// Half the interval width of the mean distribution, per level.
    pub fn half_width(&self, alpha: Option<&[f64]>) -> Result<Vec<(f64, f64)>> {
        Ok(self
            .interval(alpha, Statistic::Mean)?
            .iter()
            .map(|ci| (ci.alpha, ci.half_width()))
            .collect())
    }

    /// n0 = Z² S̄² / d², then n = 1 / (1/n0 + 1/N), truncated.
    pub fn required_sample_size(&self, alpha: Option<&[f64]>) -> Result<Vec<SampleSize>> {
        let dist = self.distribution()?;
        let s2 = mean_of(&dist.std_devs.iter().map(|s| s * s).collect::<Vec<_>>());
        let population = self.population_size() as f64;

        self.half_width(alpha)?
            .into_iter()
            .map(|(a, d)| {
                let z = z_critical(a)?;
                let n0 = z * z * s2 / (d * d);
                let n = (1.0 / (1.0 / n0 + 1.0 / population)).floor();
                Ok(SampleSize { alpha: a, half_width: d, z, n0, n: n as usize })
            })
            .collect()
    }

    pub fn summary(&self) -> Result<BootstrapSummary> {
        let dist = self.distribution()?;
        Ok(BootstrapSummary {
            mean: self.mean()?,
            std: self.std()?,
            half_widths: self.half_width(None)?,
            jarque_bera: jarque_bera(ArrayView1::from(&dist.means[..]))?,
        })
    }
}

impl fmt::Display for Resampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = self.distribution.as_ref().map_or(0, |d| d.replicates());
        write!(f, "Bootstrap | n={} | N={} | replicates={}", self.n, self.population_size(), k)
    }
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population() -> Array1<f64> {
        (0..500).map(|i| 1000.0 + ((i * 7919) % 500) as f64).collect()
    }

    #[test]
    fn test_fit_is_deterministic() {
        let mut a = Resampler::from_values("salary", population(), SignificanceLevels::default(), None).unwrap();
        let mut b = a.clone();
        let da = a.fit(200, 42).unwrap().clone();
        let db = b.fit(200, 42).unwrap().clone();

        assert_eq!(da.means, db.means);
        assert_eq!(da.std_devs, db.std_devs);
        assert_eq!(a.sample_size(), 50);
        assert_eq!(a.to_string(), "Bootstrap | n=50 | N=500 | replicates=200");
    }

    #[test]
    fn test_not_fitted() {
        let r = Resampler::from_values("salary", population(), SignificanceLevels::default(), None).unwrap();
        assert!(matches!(r.mean(), Err(SamplingError::NotFitted(_))));
        assert!(matches!(r.interval(None, Statistic::Mean), Err(SamplingError::NotFitted(_))));
    }

    #[test]
    fn test_intervals_nested_and_centered() {
        let mut r = Resampler::from_values("salary", population(), SignificanceLevels::default(), Some(40)).unwrap();
        r.fit(500, 7).unwrap();
        let intervals = r.interval(None, Statistic::Mean).unwrap();

        assert_eq!(intervals.len(), 3);
        // ascending alpha => nested, shrinking intervals
        for pair in intervals.windows(2) {
            assert!(pair[0].lower <= pair[1].lower && pair[1].upper <= pair[0].upper);
        }
        let m = r.mean().unwrap();
        assert!(intervals.iter().all(|ci| ci.contains(m)));
        assert!((m - 1249.5).abs() < 10.0);

        let sd = r.interval(Some(&[0.05]), Statistic::StdDev).unwrap();
        assert!(sd[0].lower > 0.0);
        assert!(r.interval(Some(&[0.0]), Statistic::Mean).is_err());
    }

    #[test]
    fn test_required_sample_size_bounded_by_population() {
        let mut r = Resampler::from_values("salary", population(), SignificanceLevels::default(), None).unwrap();
        r.fit(300, 42).unwrap();
        let sizes = r.required_sample_size(None).unwrap();

        assert_eq!(sizes.len(), 3);
        for s in &sizes {
            assert!(s.n <= r.population_size());
            assert!(s.n0 > 0.0);
            assert!(s.half_width > 0.0);
        }

        let summary = r.summary().unwrap();
        assert_eq!(summary.half_widths.len(), 3);
        assert_eq!(summary.to_frame().unwrap().height(), 7);
    }

    #[test]
    fn test_invalid_replicate_size() {
        assert!(Resampler::from_values("y", population(), SignificanceLevels::default(), Some(501)).is_err());
        assert!(Resampler::from_values("y", population(), SignificanceLevels::default(), Some(1)).is_err());
    }
}
