// src/estimation/stratified.rs
//! Stratified random sampling with proportional allocation.
//!
//! The population is split by the joined values of one or more categorical
//! columns; each stratum gets nh = round(Nh / N · n) units drawn without
//! replacement. Mean, ratio (separate and combined) and per-stratum regression
//! estimators are formed from the stratum summaries.

use ndarray::Array1;
use polars::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::bootstrap::Resampler;
use super::{EstimateReport, SurveyDesign};
use crate::config::{EstimatorOptions, SignificanceLevels, DEFAULT_SEED};
use crate::regression::{LinearModel, INTERCEPT};
use crate::sampling::{draw_with_rng, proportional_allocation, stratum_labels, take_rows};
use crate::utils::{
    correlation, count_by_group, index_labels, mean, numeric_column, sample_variance, sum_by_group, Result,
    SamplingError,
};

/// Column appended to the population holding each row's stratum label.
pub const STRATUM_COLUMN: &str = "stratum";

/// Population and sample summaries of one stratum.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub label: String,
    /// Nh
    pub population_size: usize,
    /// nh
    pub sample_size: usize,
    /// Wh = Nh / N
    pub weight: f64,
    /// fh = nh / Nh
    pub sampling_fraction: f64,
    pub population_total: f64,
    pub population_mean: f64,
    pub covariate_total: f64,
    pub covariate_mean: f64,
    pub sample_total: f64,
    pub sample_mean: f64,
    /// S2h, target variance within the sampled units.
    pub sample_variance: f64,
    pub sample_covariate_total: f64,
    pub sample_covariate_mean: f64,
    pub sample_covariate_variance: f64,
    /// Sample correlation of covariate and target; zero when either is constant.
    pub correlation: f64,
}

impl Stratum {
    /// Nh² (1 - fh) / nh
    fn total_variance_factor(&self) -> f64 {
        let big_nh = self.population_size as f64;
        big_nh * big_nh * (1.0 - self.sampling_fraction) / self.sample_size as f64
    }

    /// S2y + R² S2x - 2 R rho Sy Sx, the variance of y - R·x.
    fn ratio_residual_variance(&self, ratio: f64) -> f64 {
        let sy = self.sample_variance.sqrt();
        let sx = self.sample_covariate_variance.sqrt();
        (self.sample_variance + ratio * ratio * self.sample_covariate_variance
            - 2.0 * ratio * self.correlation * sy * sx)
            .max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StratumRatio {
    pub label: String,
    /// Yh / Xh
    pub ratio: f64,
    /// yh / xh
    pub sample_ratio: f64,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StratifiedRatioReport {
    pub strata: Vec<StratumRatio>,
    pub separate_mean: EstimateReport,
    pub separate_total: EstimateReport,
    /// ybar_st / xbar_st
    pub combined_ratio: f64,
    pub combined_mean: EstimateReport,
    pub combined_total: EstimateReport,
    /// MSE of the separate mean estimator.
    pub mse: f64,
}

impl StratifiedRatioReport {
    pub fn to_frame(&self) -> Result<DataFrame> {
        let rows = [
            ("separate_mean", &self.separate_mean),
            ("separate_total", &self.separate_total),
            ("combined_mean", &self.combined_mean),
            ("combined_total", &self.combined_total),
        ];
        Ok(df![
            "estimator" => rows.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "estimate" => rows.iter().map(|(_, r)| r.estimate).collect::<Vec<_>>(),
            "std_error" => rows.iter().map(|(_, r)| r.std_error).collect::<Vec<_>>(),
            "true_value" => rows.iter().map(|(_, r)| r.true_value).collect::<Vec<_>>(),
            "bias" => rows.iter().map(|(_, r)| r.bias).collect::<Vec<_>>(),
        ]?)
    }

    pub fn strata_frame(&self) -> Result<DataFrame> {
        let s = &self.strata;
        Ok(df![
            STRATUM_COLUMN => s.iter().map(|r| r.label.clone()).collect::<Vec<_>>(),
            "R" => s.iter().map(|r| r.ratio).collect::<Vec<_>>(),
            "R_sample" => s.iter().map(|r| r.sample_ratio).collect::<Vec<_>>(),
            "rho" => s.iter().map(|r| r.correlation).collect::<Vec<_>>(),
        ]?)
    }
}

/// Simple regression fitted inside one stratum.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumRegression {
    pub label: String,
    pub intercept: f64,
    pub slope: f64,
    /// ybarh + b_h (Xbarh - xbarh)
    pub estimate: f64,
    pub population_mean: f64,
    pub bias: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StratifiedRegressionReport {
    pub strata: Vec<StratumRegression>,
    /// Σ Wh · ybarlrh
    pub mean: EstimateReport,
    pub mse: f64,
    pub ratio_mse: Option<f64>,
}

impl StratifiedRegressionReport {
    pub fn to_frame(&self) -> Result<DataFrame> {
        Ok(df![
            "quantity" => ["mean", "se_mean", "true_mean", "bias_mean", "mse", "ratio_mse"],
            "value" => [
                Some(self.mean.estimate),
                Some(self.mean.std_error),
                Some(self.mean.true_value),
                Some(self.mean.bias),
                Some(self.mse),
                self.ratio_mse,
            ],
        ]?)
    }

    pub fn strata_frame(&self) -> Result<DataFrame> {
        let s = &self.strata;
        Ok(df![
            STRATUM_COLUMN => s.iter().map(|r| r.label.clone()).collect::<Vec<_>>(),
            INTERCEPT => s.iter().map(|r| r.intercept).collect::<Vec<_>>(),
            "slope" => s.iter().map(|r| r.slope).collect::<Vec<_>>(),
            "estimate" => s.iter().map(|r| r.estimate).collect::<Vec<_>>(),
            "population_mean" => s.iter().map(|r| r.population_mean).collect::<Vec<_>>(),
            "bias" => s.iter().map(|r| r.bias).collect::<Vec<_>>(),
        ]?)
    }
}

#[derive(Debug, Clone)]
pub struct StratifiedEstimator {
    population: DataFrame,
    sample: DataFrame,
    sample_rows: Vec<usize>,
    target: String,
    covariate: String,
    strata_columns: Vec<String>,
    options: EstimatorOptions,
    requested_size: usize,
    y_population: Array1<f64>,
    x_population: Array1<f64>,
    y_sample: Array1<f64>,
    x_sample: Array1<f64>,
    /// Stratum index of every sampled row.
    sample_groups: Vec<usize>,
    strata: Vec<Stratum>,
    ratio_mse: Option<f64>,
    regression_mse: Option<f64>,
    resampler: Option<Resampler>,
}

impl StratifiedEstimator {
    /// Label strata by `strata_columns`, allocate `n` proportionally and draw
    /// every stratum from one generator seeded with `options.seed`, strata
    /// taken in sorted label order.
    pub fn new<S: AsRef<str>>(
        population: &DataFrame,
        target: &str,
        covariate: &str,
        n: usize,
        strata_columns: &[S],
        options: EstimatorOptions,
    ) -> Result<Self> {
        let big_n = population.height();
        if n < 2 || n >= big_n {
            return Err(SamplingError::InvalidInput(format!(
                "sample size must lie in [2, {}), got {}",
                big_n, n
            )));
        }
        let strata_columns: Vec<String> = strata_columns.iter().map(|c| c.as_ref().to_string()).collect();
        let y_population = numeric_column(population, target)?;
        let x_population = numeric_column(population, covariate)?;

        let labels = stratum_labels(population, &strata_columns)?;
        let (groups, names) = index_labels(&labels);
        let n_strata = names.len();
        let counts = count_by_group(&groups, n_strata);
        let allocation = proportional_allocation(&counts, n);

        if let Some(h) = allocation.iter().position(|&nh| nh < 2) {
            return Err(SamplingError::InvalidInput(format!(
                "stratum '{}' is allocated {} units, at least 2 are required",
                names[h], allocation[h]
            )));
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_strata];
        for (row, &h) in groups.iter().enumerate() {
            members[h].push(row);
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(options.seed);
        let mut sample_rows = Vec::with_capacity(allocation.iter().sum());
        let mut sample_groups = Vec::with_capacity(sample_rows.capacity());
        for (h, rows) in members.iter().enumerate() {
            for pick in draw_with_rng(&mut rng, rows.len(), allocation[h])? {
                sample_rows.push(rows[pick]);
                sample_groups.push(h);
            }
        }

        let realized = sample_rows.len();
        if realized != n {
            tracing::warn!(requested = n, realized, "proportional allocation changed the sample size");
        }
        tracing::debug!(strata = n_strata, n = realized, seed = options.seed, "stratified sample drawn");

        let mut population = population.clone();
        population.with_column(Series::new(STRATUM_COLUMN.into(), labels))?;
        let sample = take_rows(&population, &sample_rows)?;
        let y_sample = numeric_column(&sample, target)?;
        let x_sample = numeric_column(&sample, covariate)?;

        let strata = summarize_strata(
            &names,
            &counts,
            &groups,
            &sample_groups,
            (&y_population, &x_population),
            (&y_sample, &x_sample),
        );

        Ok(StratifiedEstimator {
            population,
            sample,
            sample_rows,
            target: target.to_string(),
            covariate: covariate.to_string(),
            strata_columns,
            options,
            requested_size: n,
            y_population,
            x_population,
            y_sample,
            x_sample,
            sample_groups,
            strata,
            ratio_mse: None,
            regression_mse: None,
            resampler: None,
        })
    }

    /// The population with its stratum label column.
    pub fn population(&self) -> &DataFrame {
        &self.population
    }

    pub fn sample(&self) -> &DataFrame {
        &self.sample
    }

    pub fn sample_rows(&self) -> &[usize] {
        &self.sample_rows
    }

    pub fn strata_columns(&self) -> &[String] {
        &self.strata_columns
    }

    pub fn requested_sample_size(&self) -> usize {
        self.requested_size
    }

    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    pub fn ratio_mse(&self) -> Option<f64> {
        self.ratio_mse
    }

    pub fn regression_mse(&self) -> Option<f64> {
        self.regression_mse
    }

    pub fn strata_frame(&self) -> Result<DataFrame> {
        let s = &self.strata;
        Ok(df![
            STRATUM_COLUMN => s.iter().map(|h| h.label.clone()).collect::<Vec<_>>(),
            "Nh" => s.iter().map(|h| h.population_size as u64).collect::<Vec<_>>(),
            "nh" => s.iter().map(|h| h.sample_size as u64).collect::<Vec<_>>(),
            "Wh" => s.iter().map(|h| h.weight).collect::<Vec<_>>(),
            "fh" => s.iter().map(|h| h.sampling_fraction).collect::<Vec<_>>(),
            "ybarh" => s.iter().map(|h| h.sample_mean).collect::<Vec<_>>(),
            "S2h" => s.iter().map(|h| h.sample_variance).collect::<Vec<_>>(),
            "Ybarh" => s.iter().map(|h| h.population_mean).collect::<Vec<_>>(),
        ]?)
    }

    fn stratified_mean_value(&self) -> f64 {
        let big_n = self.population_size() as f64;
        self.strata
            .iter()
            .map(|h| h.population_size as f64 * h.sample_mean)
            .sum::<f64>()
            / big_n
    }

    /// ybar_st = Σ Nh ybarh / N with V = ((1 - f) / N) Σ Wh S2h.
    pub fn stratified_mean(&self) -> Result<EstimateReport> {
        let big_n = self.population_size() as f64;
        let f = self.sampling_fraction();
        let variance = (1.0 - f) / big_n * self.strata.iter().map(|h| h.weight * h.sample_variance).sum::<f64>();
        self.estimate_report(self.stratified_mean_value(), variance.sqrt(), self.population_mean())
    }

    pub fn stratified_total(&self) -> Result<EstimateReport> {
        let big_n = self.population_size() as f64;
        let mean = self.stratified_mean()?;
        self.estimate_report(big_n * mean.estimate, big_n * mean.std_error, self.y_population.sum())
    }

    /// Separate (per-stratum ratio) and combined (pooled ratio) estimators of
    /// the target mean and total through the covariate.
    pub fn ratio_estimate(&mut self) -> Result<StratifiedRatioReport> {
        if let Some(h) = self
            .strata
            .iter()
            .find(|h| h.covariate_total == 0.0 || h.sample_covariate_total == 0.0)
        {
            return Err(SamplingError::InvalidInput(format!(
                "covariate '{}' sums to zero in stratum '{}'",
                self.covariate, h.label
            )));
        }
        let big_n = self.population_size() as f64;
        let y_mean = self.population_mean();
        let y_total = self.y_population.sum();
        let x_total = self.x_population.sum();

        let strata: Vec<StratumRatio> = self
            .strata
            .iter()
            .map(|h| StratumRatio {
                label: h.label.clone(),
                ratio: h.population_total / h.covariate_total,
                sample_ratio: h.sample_total / h.sample_covariate_total,
                correlation: h.correlation,
            })
            .collect();

        let separate_total: f64 = self
            .strata
            .iter()
            .zip(&strata)
            .map(|(h, r)| r.sample_ratio * h.covariate_total)
            .sum();
        let separate_variance: f64 = self
            .strata
            .iter()
            .zip(&strata)
            .map(|(h, r)| h.total_variance_factor() * h.ratio_residual_variance(r.ratio))
            .sum();
        let separate_se = separate_variance.sqrt();

        let x_st = self
            .strata
            .iter()
            .map(|h| h.population_size as f64 * h.sample_covariate_mean)
            .sum::<f64>()
            / big_n;
        if x_st == 0.0 {
            return Err(SamplingError::InvalidInput(format!(
                "stratified mean of '{}' is zero",
                self.covariate
            )));
        }
        let combined_ratio = self.stratified_mean_value() / x_st;
        let combined_total = combined_ratio * x_total;
        let combined_variance: f64 = self
            .strata
            .iter()
            .map(|h| h.total_variance_factor() * h.ratio_residual_variance(combined_ratio))
            .sum();
        let combined_se = combined_variance.sqrt();

        let separate_mean = self.estimate_report(separate_total / big_n, separate_se / big_n, y_mean)?;
        let mse = separate_mean.mse();
        self.ratio_mse = Some(mse);

        Ok(StratifiedRatioReport {
            strata,
            separate_total: self.estimate_report(separate_total, separate_se, y_total)?,
            separate_mean,
            combined_ratio,
            combined_mean: self.estimate_report(combined_total / big_n, combined_se / big_n, y_mean)?,
            combined_total: self.estimate_report(combined_total, combined_se, y_total)?,
            mse,
        })
    }

    /// One simple regression of target on covariate per stratum, combined as
    /// Σ Wh (ybarh + b_h (Xbarh - xbarh)).
    ///
    /// Each stratum needs at least three sampled units: a two-point line has
    /// no residual degrees of freedom.
    pub fn regression_estimate(&mut self) -> Result<StratifiedRegressionReport> {
        if let Some(small) = self.strata.iter().find(|h| h.sample_size < 3) {
            return Err(SamplingError::InvalidInput(format!(
                "stratum '{}' has {} sampled units, regression needs at least 3",
                small.label, small.sample_size
            )));
        }
        let mut strata = Vec::with_capacity(self.strata.len());
        let mut estimate = 0.0;
        let mut variance = 0.0;

        for (h, stratum) in self.strata.iter().enumerate() {
            let rows: Vec<usize> = (0..self.sample_groups.len())
                .filter(|&i| self.sample_groups[i] == h)
                .collect();
            let x: Vec<f64> = rows.iter().map(|&i| self.x_sample[i]).collect();
            let y: Vec<f64> = rows.iter().map(|&i| self.y_sample[i]).collect();

            let frame = df![self.covariate.as_str() => x]?;
            let target = Series::new(self.target.as_str().into(), y);
            let mut model = LinearModel::new(self.options.alpha.clone());
            model.fit(&frame, &target, true, None)?;
            let fitted = model.fitted()?;
            let slope = fitted.coefficient(&self.covariate).unwrap_or(0.0);
            let intercept = fitted.coefficient(INTERCEPT).unwrap_or(0.0);

            let ybarlrh = stratum.sample_mean + slope * (stratum.covariate_mean - stratum.sample_covariate_mean);
            estimate += stratum.weight * ybarlrh;
            variance += stratum.weight * stratum.weight * (1.0 - stratum.sampling_fraction)
                / stratum.sample_size as f64
                * stratum.sample_variance
                * (1.0 - stratum.correlation * stratum.correlation);

            strata.push(StratumRegression {
                label: stratum.label.clone(),
                intercept,
                slope,
                estimate: ybarlrh,
                population_mean: stratum.population_mean,
                bias: ybarlrh - stratum.population_mean,
            });
        }

        let mean = self.estimate_report(estimate, variance.max(0.0).sqrt(), self.population_mean())?;
        let mse = mean.mse();
        self.regression_mse = Some(mse);

        Ok(StratifiedRegressionReport {
            strata,
            mean,
            mse,
            ratio_mse: self.ratio_mse,
        })
    }
}

impl SurveyDesign for StratifiedEstimator {
    fn levels(&self) -> &SignificanceLevels {
        &self.options.alpha
    }

    fn levels_mut(&mut self) -> &mut SignificanceLevels {
        &mut self.options.alpha
    }

    fn sample_size(&self) -> usize {
        self.sample_rows.len()
    }

    fn population_size(&self) -> usize {
        self.population.height()
    }

    fn population_mean(&self) -> f64 {
        mean(self.y_population.view())
    }

    fn sample_mean(&self) -> f64 {
        mean(self.y_sample.view())
    }

    fn bootstrap(&mut self, k: usize) -> Result<&Resampler> {
        if self.resampler.is_none() {
            let mut resampler = Resampler::from_values(
                &self.target,
                self.y_population.clone(),
                self.options.alpha.clone(),
                Some(self.sample_size()),
            )?;
            resampler.fit(k, DEFAULT_SEED)?;
            self.resampler = Some(resampler);
        }
        self.resampler.as_ref().ok_or(SamplingError::NotFitted("Resampler"))
    }
}

fn gather(values: &Array1<f64>, groups: &[usize], h: usize) -> Array1<f64> {
    groups
        .iter()
        .zip(values.iter())
        .filter(|(&g, _)| g == h)
        .map(|(_, &v)| v)
        .collect()
}

fn summarize_strata(
    names: &[String],
    counts: &[usize],
    population_groups: &[usize],
    sample_groups: &[usize],
    (y_population, x_population): (&Array1<f64>, &Array1<f64>),
    (y_sample, x_sample): (&Array1<f64>, &Array1<f64>),
) -> Vec<Stratum> {
    let n_strata = names.len();
    let big_n: usize = counts.iter().sum();
    let y_totals = sum_by_group(y_population.view(), population_groups, n_strata);
    let x_totals = sum_by_group(x_population.view(), population_groups, n_strata);
    let sample_counts = count_by_group(sample_groups, n_strata);

    (0..n_strata)
        .map(|h| {
            let big_nh = counts[h] as f64;
            let nh = sample_counts[h];
            let y = gather(y_sample, sample_groups, h);
            let x = gather(x_sample, sample_groups, h);
            let rho = correlation(x.view(), y.view());
            Stratum {
                label: names[h].clone(),
                population_size: counts[h],
                sample_size: nh,
                weight: big_nh / big_n as f64,
                sampling_fraction: nh as f64 / big_nh,
                population_total: y_totals[h],
                population_mean: y_totals[h] / big_nh,
                covariate_total: x_totals[h],
                covariate_mean: x_totals[h] / big_nh,
                sample_total: y.sum(),
                sample_mean: mean(y.view()),
                sample_variance: sample_variance(y.view()),
                sample_covariate_total: x.sum(),
                sample_covariate_mean: mean(x.view()),
                sample_covariate_variance: sample_variance(x.view()),
                correlation: if rho.is_finite() { rho } else { 0.0 },
            }
        })
        .collect()
}
