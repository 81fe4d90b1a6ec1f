// src/estimation/srs.rs
//! Simple random sampling without replacement: ratio and regression
//! estimators of the population mean and total.

use ndarray::Array1;
use polars::prelude::*;

use super::bootstrap::Resampler;
use super::{EstimateReport, IntervalReport, SurveyDesign};
use crate::config::{EstimatorOptions, SignificanceLevels, DEFAULT_SEED};
use crate::regression::{CoefficientTable, ColumnTag, LinearModel};
use crate::sampling::{draw_without_replacement, take_rows};
use crate::utils::{correlation, is_string_column, mean, numeric_column, sample_variance, Result, SamplingError};

/// Population vs. sample means and totals for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDescription {
    pub name: String,
    pub population_mean: f64,
    pub sample_mean: f64,
    pub population_total: f64,
    /// Sample total divided by the sampling fraction.
    pub expanded_total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptiveReport {
    pub population_size: usize,
    pub sample_size: usize,
    pub variables: Vec<VariableDescription>,
}

impl DescriptiveReport {
    pub fn to_frame(&self) -> Result<DataFrame> {
        let v = &self.variables;
        Ok(df![
            "variable" => v.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
            "population_mean" => v.iter().map(|d| d.population_mean).collect::<Vec<_>>(),
            "sample_mean" => v.iter().map(|d| d.sample_mean).collect::<Vec<_>>(),
            "population_total" => v.iter().map(|d| d.population_total).collect::<Vec<_>>(),
            "expanded_total" => v.iter().map(|d| d.expanded_total).collect::<Vec<_>>(),
        ]?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatioReport {
    pub variable: String,
    /// ΣY / ΣX over the population.
    pub population_ratio: f64,
    /// Σy / Σx over the sample.
    pub sample_ratio: f64,
    pub mean: EstimateReport,
    pub relative_bias_pct: f64,
    pub total_estimate: f64,
    pub true_total: f64,
    pub total_bias: f64,
    pub std_error_total: f64,
    pub std_error_ratio: f64,
    pub mse: f64,
}

impl RatioReport {
    pub fn to_frame(&self) -> Result<DataFrame> {
        Ok(df![
            "quantity" => [
                "R", "R_sample", "mean", "true_mean", "bias_mean", "relative_bias_pct",
                "total", "true_total", "bias_total", "se_total", "se_mean", "se_ratio", "mse",
            ],
            "value" => [
                self.population_ratio,
                self.sample_ratio,
                self.mean.estimate,
                self.mean.true_value,
                self.mean.bias,
                self.relative_bias_pct,
                self.total_estimate,
                self.true_total,
                self.total_bias,
                self.std_error_total,
                self.mean.std_error,
                self.std_error_ratio,
                self.mse,
            ],
        ]?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionReport {
    pub population_fit: CoefficientTable,
    pub sample_fit: CoefficientTable,
    /// Sample fit after significance elimination.
    pub reduced_fit: CoefficientTable,
    pub equation: String,
    /// ybar + (Xbar - xbar)·b
    pub mean: EstimateReport,
    /// Mean of the model predictions over the sample.
    pub predicted_mean: f64,
    /// Model predictions summed over the population.
    pub population_total: f64,
    /// Sample predictions summed and expanded by N / n.
    pub expanded_total: f64,
    pub true_total: f64,
    pub mse: f64,
    /// MSE of the ratio estimator, when it was run first.
    pub ratio_mse: Option<f64>,
}

impl RegressionReport {
    pub fn to_frame(&self) -> Result<DataFrame> {
        Ok(df![
            "quantity" => [
                "mean", "se_mean", "bias_mean", "predicted_mean",
                "population_total", "expanded_total", "true_total", "mse", "ratio_mse",
            ],
            "value" => [
                Some(self.mean.estimate),
                Some(self.mean.std_error),
                Some(self.mean.bias),
                Some(self.predicted_mean),
                Some(self.population_total),
                Some(self.expanded_total),
                Some(self.true_total),
                Some(self.mse),
                self.ratio_mse,
            ],
        ]?)
    }
}

#[derive(Debug, Clone)]
pub struct SrsEstimator {
    population: DataFrame,
    sample: DataFrame,
    sample_rows: Vec<usize>,
    target: String,
    covariates: Vec<String>,
    options: EstimatorOptions,
    y_population: Array1<f64>,
    y_sample: Array1<f64>,
    model: LinearModel,
    ratio_mse: Option<f64>,
    regression_mse: Option<f64>,
    resampler: Option<Resampler>,
}

impl SrsEstimator {
    /// Copies the population and draws a sample of size `n` without
    /// replacement, seeded by `options.seed`.
    pub fn new<S: AsRef<str>>(
        population: &DataFrame,
        target: &str,
        covariates: &[S],
        n: usize,
        options: EstimatorOptions,
    ) -> Result<Self> {
        let big_n = population.height();
        if n < 2 || n >= big_n {
            return Err(SamplingError::InvalidInput(format!(
                "sample size must lie in [2, {}), got {}",
                big_n, n
            )));
        }
        let covariates: Vec<String> = covariates.iter().map(|c| c.as_ref().to_string()).collect();
        for c in &covariates {
            population
                .column(c)
                .map_err(|_| SamplingError::InvalidInput(format!("covariate '{}' not found", c)))?;
        }

        let y_population = numeric_column(population, target)?;
        let sample_rows = draw_without_replacement(big_n, n, options.seed)?;
        let sample = take_rows(population, &sample_rows)?;
        let y_sample = numeric_column(&sample, target)?;
        tracing::debug!(n, population = big_n, seed = options.seed, "simple random sample drawn");

        Ok(SrsEstimator {
            population: population.clone(),
            sample,
            sample_rows,
            target: target.to_string(),
            covariates,
            model: LinearModel::new(options.alpha.clone()).with_grouped(&options.grouped),
            options,
            y_population,
            y_sample,
            ratio_mse: None,
            regression_mse: None,
            resampler: None,
        })
    }

    pub fn population(&self) -> &DataFrame {
        &self.population
    }

    pub fn sample(&self) -> &DataFrame {
        &self.sample
    }

    /// Population row positions of the sampled units.
    pub fn sample_rows(&self) -> &[usize] {
        &self.sample_rows
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn ratio_mse(&self) -> Option<f64> {
        self.ratio_mse
    }

    pub fn regression_mse(&self) -> Option<f64> {
        self.regression_mse
    }

    fn is_categorical(&self, column: &str) -> Result<bool> {
        Ok(self.options.categorical.iter().chain(&self.options.grouped).any(|c| c == column)
            || is_string_column(&self.population, column)?)
    }

    /// Target and numeric covariates: population means/totals against the
    /// sample means and sample totals expanded by 1/f.
    pub fn describe(&self) -> Result<DescriptiveReport> {
        let f = self.sampling_fraction();
        let mut names = vec![self.target.clone()];
        for c in &self.covariates {
            if !self.is_categorical(c)? {
                names.push(c.clone());
            }
        }

        let variables = names
            .into_iter()
            .map(|name| {
                let pop = numeric_column(&self.population, &name)?;
                let smp = numeric_column(&self.sample, &name)?;
                Ok(VariableDescription {
                    population_mean: mean(pop.view()),
                    sample_mean: mean(smp.view()),
                    population_total: pop.sum(),
                    expanded_total: smp.sum() / f,
                    name,
                })
            })
            .collect::<Result<_>>()?;

        Ok(DescriptiveReport {
            population_size: self.population_size(),
            sample_size: self.sample_size(),
            variables,
        })
    }

    /// Ratio estimation of the target mean and total through `variable`.
    pub fn ratio_estimate(&mut self, variable: &str) -> Result<RatioReport> {
        let x_pop = numeric_column(&self.population, variable)?;
        let x_smp = numeric_column(&self.sample, variable)?;
        let big_n = self.population_size() as f64;
        let n = self.sample_size() as f64;
        let f = self.sampling_fraction();

        let x_total = x_pop.sum();
        let x_mean = x_total / big_n;
        let x_sample_total = x_smp.sum();
        if x_total == 0.0 || x_sample_total == 0.0 {
            return Err(SamplingError::InvalidInput(format!(
                "ratio through '{}' has a zero denominator",
                variable
            )));
        }

        let y_total = self.y_population.sum();
        let y_mean = y_total / big_n;
        let r = y_total / x_total;
        let r_sample = self.y_sample.sum() / x_sample_total;

        let mean_estimate = r_sample * x_mean;
        let total_estimate = r_sample * x_total;

        // Σ(Y - R·X)² over the population
        let s: f64 = self
            .y_population
            .iter()
            .zip(x_pop.iter())
            .map(|(y, x)| (y - r * x).powi(2))
            .sum();
        let se_total = (s * big_n * big_n * (1.0 - f) / (n * (big_n - 1.0))).sqrt();
        let se_mean = (s * (1.0 - f) / (n * (big_n - 1.0))).sqrt();
        let se_ratio = (s * (1.0 - f) / (n * x_mean * x_mean * (big_n - 1.0))).sqrt();

        let mean = self.estimate_report(mean_estimate, se_mean, y_mean)?;
        let mse = mean.mse();
        self.ratio_mse = Some(mse);

        Ok(RatioReport {
            variable: variable.to_string(),
            population_ratio: r,
            sample_ratio: r_sample,
            relative_bias_pct: mean.bias / y_mean * 100.0,
            mean,
            total_estimate,
            true_total: y_total,
            total_bias: total_estimate - y_total,
            std_error_total: se_total,
            std_error_ratio: se_ratio,
            mse,
        })
    }

    /// Regression (difference) estimation of the target mean with the
    /// covariates, after eliminating those insignificant at `alpha`.
    pub fn regression_estimate(&mut self, alpha: f64) -> Result<RegressionReport> {
        let x_population = self.population.select(self.covariates.iter().map(String::as_str))?;
        let x_sample = self.sample.select(self.covariates.iter().map(String::as_str))?;
        let y_population = Series::new(self.target.as_str().into(), self.y_population.to_vec());
        let y_sample = Series::new(self.target.as_str().into(), self.y_sample.to_vec());
        let categorical = self.options.categorical.clone();

        let population_fit = self.model.fit(&x_population, &y_population, true, Some(&categorical))?;
        let sample_fit = self.model.fit(&x_sample, &y_sample, true, Some(&categorical))?;
        let reduced_fit = self.model.fit_with_elimination(alpha)?;
        let equation = self.model.equation()?;

        let design_sample = self.model.design()?.clone();
        let design_population = self.model.encode(&x_population)?;
        let b = &self.model.fitted()?.b;

        let n = self.sample_size() as f64;
        let big_n = self.population_size() as f64;
        let f = self.sampling_fraction();
        let y_mean = self.population_mean();
        let ybar = self.sample_mean();

        let shift = &design_population.column_means() - &design_sample.column_means();
        let estimate = ybar + shift.dot(b);

        // One standard error per non-constant covariate, averaged.
        let sy = sample_variance(self.y_sample.view());
        let ses: Vec<f64> = design_sample
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.tag != ColumnTag::Intercept)
            .filter_map(|(j, _)| {
                let rho = correlation(design_sample.values().column(j), self.y_sample.view());
                rho.is_finite()
                    .then(|| ((1.0 - rho * rho) * sy * (1.0 - f) / n).sqrt())
            })
            .collect();
        let std_error = if ses.is_empty() {
            (sy * (1.0 - f) / n).sqrt()
        } else {
            ses.iter().sum::<f64>() / ses.len() as f64
        };

        let mean = self.estimate_report(estimate, std_error, y_mean)?;
        let predicted_mean = self.model.predict_mean(None)?;
        let population_total = self.model.predict_total(Some(&design_population))?;
        let expanded_total = self.model.predict_total(None)? * big_n / n;
        let mse = mean.mse();
        self.regression_mse = Some(mse);

        Ok(RegressionReport {
            population_fit,
            sample_fit,
            reduced_fit,
            equation,
            mean,
            predicted_mean,
            population_total,
            expanded_total,
            true_total: self.y_population.sum(),
            mse,
            ratio_mse: self.ratio_mse,
        })
    }
}

impl SurveyDesign for SrsEstimator {
    fn levels(&self) -> &SignificanceLevels {
        &self.options.alpha
    }

    fn levels_mut(&mut self) -> &mut SignificanceLevels {
        &mut self.options.alpha
    }

    fn sample_size(&self) -> usize {
        self.sample.height()
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn proportional_population() -> DataFrame {
        let x: Vec<f64> = (0..400).map(|i| 5.0 + (i % 17) as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        df!["salary" => y, "years" => x].unwrap()
    }

    #[test]
    fn test_ratio_exact_when_proportional() {
        let pop = proportional_population();
        let mut est = SrsEstimator::new(&pop, "salary", &["years"], 40, EstimatorOptions::default()).unwrap();
        let report = est.ratio_estimate("years").unwrap();

        assert_relative_eq!(report.population_ratio, 2.0, epsilon = 1e-12);
        assert_relative_eq!(report.sample_ratio, 2.0, epsilon = 1e-12);
        assert_relative_eq!(report.mean.bias, 0.0, epsilon = 1e-9);
        assert_relative_eq!(report.total_bias, 0.0, epsilon = 1e-6);
        assert_relative_eq!(report.mean.std_error, 0.0, epsilon = 1e-12);
        assert_eq!(est.ratio_mse(), Some(report.mse));
        assert!(report.mean.intervals.intervals.iter().all(|ci| ci.contains == Some(true)));
        assert_eq!(report.to_frame().unwrap().height(), 13);
    }

    #[test]
    fn test_ratio_standard_errors_closed_form() {
        // R = 2 exactly and Σ(Y - R·X)² = 12
        let x: Vec<f64> = (1..=12).map(f64::from).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| 2.0 * v + if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let pop = df!["salary" => y, "years" => x].unwrap();
        let mut est = SrsEstimator::new(&pop, "salary", &["years"], 8, EstimatorOptions::default()).unwrap();
        let report = est.ratio_estimate("years").unwrap();

        // f = 2/3: se_mean² = 12 (1/3) / (8 · 11)
        let se_mean = (1.0_f64 / 22.0).sqrt();
        assert_relative_eq!(report.population_ratio, 2.0, epsilon = 1e-12);
        assert_relative_eq!(report.mean.std_error, se_mean, max_relative = 1e-12);
        assert_relative_eq!(report.std_error_total, 12.0 * se_mean, max_relative = 1e-12);
        assert_relative_eq!(report.std_error_ratio, se_mean / 6.5, max_relative = 1e-12);
        assert_relative_eq!(report.mse, report.mean.bias.powi(2) + 1.0 / 22.0, max_relative = 1e-12);
    }

    #[test]
    fn test_regression_standard_error_averages_covariates() {
        let m = 200;
        let x: Vec<f64> = (0..m).map(|i| (i % 17) as f64).collect();
        let z: Vec<f64> = (0..m).map(|i| ((i * 7) % 11) as f64).collect();
        let y: Vec<f64> = (0..m)
            .map(|i| 1.0 + 2.0 * x[i] + 3.0 * z[i] + ((i * 5) % 3) as f64 - 1.0)
            .collect();
        let pop = df!["salary" => y, "years" => x, "tenure" => z].unwrap();
        let mut est =
            SrsEstimator::new(&pop, "salary", &["years", "tenure"], 40, EstimatorOptions::default()).unwrap();
        let report = est.regression_estimate(0.05).unwrap();
        assert!(report.reduced_fit.get("years").is_some());
        assert!(report.reduced_fit.get("tenure").is_some());

        let ys = numeric_column(est.sample(), "salary").unwrap();
        let n = ys.len() as f64;
        let ybar = ys.sum() / n;
        let syy: f64 = ys.iter().map(|v| (v - ybar).powi(2)).sum();
        let sy = syy / (n - 1.0);
        let f = 40.0 / 200.0;
        let per_covariate = |name: &str| {
            let xs = numeric_column(est.sample(), name).unwrap();
            let xbar = xs.sum() / n;
            let sxx: f64 = xs.iter().map(|v| (v - xbar).powi(2)).sum();
            let sxy: f64 = xs.iter().zip(ys.iter()).map(|(a, b)| (a - xbar) * (b - ybar)).sum();
            let rho2 = sxy * sxy / (sxx * syy);
            ((1.0 - rho2) * sy * (1.0 - f) / n).sqrt()
        };
        let expected = (per_covariate("years") + per_covariate("tenure")) / 2.0;
        assert_relative_eq!(report.mean.std_error, expected, max_relative = 1e-9);
    }

    #[test]
    fn test_estimate_frame_carries_bias() {
        let pop = proportional_population();
        let mut est = SrsEstimator::new(&pop, "salary", &["years"], 40, EstimatorOptions::default()).unwrap();
        let report = est.ratio_estimate("years").unwrap();
        let frame = report.mean.to_frame().unwrap();

        assert_eq!(frame.height(), report.mean.intervals.intervals.len());
        let true_values = numeric_column(&frame, "true_value").unwrap();
        let biases = numeric_column(&frame, "bias").unwrap();
        assert!(true_values.iter().all(|&v| v == report.mean.true_value));
        assert!(biases.iter().all(|&v| v == report.mean.bias));
        assert!(frame.column("contains").is_ok());
    }

    #[test]
    fn test_bootstrap_seed_ignores_sample_seed() {
        let pop = proportional_population();
        let mut est =
            SrsEstimator::new(&pop, "salary", &["years"], 40, EstimatorOptions::default().with_seed(7)).unwrap();
        let distribution = est.bootstrap(20).unwrap().distribution().unwrap();
        assert_eq!(distribution.seed, DEFAULT_SEED);
    }

    #[test]
    fn test_grouped_option_reaches_model() {
        let m = 90;
        let x: Vec<f64> = (0..m).map(|i| (i % 10) as f64).collect();
        let edu: Vec<&str> = (0..m).map(|i| ["a", "b", "c"][i % 3]).collect();
        let y: Vec<f64> = (0..m)
            .map(|i| 1.0 + 2.0 * x[i] + if i % 3 == 2 { 3.0 } else { 0.0 } + if (i / 3) % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let pop = df!["salary" => y, "years" => x, "edu" => edu].unwrap();

        let fit = |options: EstimatorOptions| {
            let mut est = SrsEstimator::new(&pop, "salary", &["years", "edu"], 60, options).unwrap();
            let report = est.regression_estimate(0.05).unwrap();
            report.reduced_fit.rows.iter().map(|r| r.name.clone()).collect::<Vec<_>>()
        };
        let grouped = fit(EstimatorOptions::default().with_grouped(&["edu"]));
        assert!(grouped.contains(&"edu_b".to_string()));
        assert!(grouped.contains(&"edu_c".to_string()));

        let ungrouped = fit(EstimatorOptions::default());
        assert!(ungrouped.contains(&"edu_c".to_string()));
    }

    #[test]
    fn test_sample_is_reproducible_subset() {
        let pop = proportional_population();
        let a = SrsEstimator::new(&pop, "salary", &["years"], 50, EstimatorOptions::default()).unwrap();
        let b = SrsEstimator::new(&pop, "salary", &["years"], 50, EstimatorOptions::default()).unwrap();

        assert_eq!(a.sample_rows(), b.sample_rows());
        assert_eq!(a.sample_size(), 50);
        assert!(a.sample_rows().iter().all(|&r| r < 400));
        assert_relative_eq!(a.sampling_fraction(), 0.125);
    }

    #[test]
    fn test_invalid_construction() {
        let pop = proportional_population();
        assert!(SrsEstimator::new(&pop, "salary", &["years"], 400, EstimatorOptions::default()).is_err());
        assert!(SrsEstimator::new(&pop, "salary", &["missing"], 40, EstimatorOptions::default()).is_err());
        assert!(SrsEstimator::new(&pop, "nope", &["years"], 40, EstimatorOptions::default()).is_err());
    }

    #[test]
    fn test_describe_expands_totals() {
        let pop = proportional_population();
        let est = SrsEstimator::new(&pop, "salary", &["years"], 80, EstimatorOptions::default()).unwrap();
        let report = est.describe().unwrap();

        assert_eq!(report.variables.len(), 2);
        let salary = &report.variables[0];
        assert_relative_eq!(salary.expanded_total, salary.sample_mean * 400.0, epsilon = 1e-9);
        assert_relative_eq!(salary.population_total, salary.population_mean * 400.0, epsilon = 1e-9);
        assert_eq!(report.to_frame().unwrap().height(), 2);
    }

    #[test]
    fn test_confidence_interval_uses_n_minus_one() {
        let pop = proportional_population();
        let est = SrsEstimator::new(&pop, "salary", &["years"], 40, EstimatorOptions::default()).unwrap();
        let report = est.confidence_interval(100.0, 5.0, None).unwrap();
        let t = crate::estimation::t_critical(0.05, 39).unwrap();
        let ci = report.get(0.05).unwrap();

        assert_relative_eq!(ci.upper, 100.0 + t * 5.0, epsilon = 1e-12);
        assert!(ci.contains.is_none());
    }

    #[test]
    fn test_minimal_interval_widens_levels() {
        let pop = proportional_population();
        let mut est = SrsEstimator::new(&pop, "salary", &["years"], 40, EstimatorOptions::default()).unwrap();
        let level = est.minimal_interval(Some(400)).unwrap();

        let level = level.expect("sample mean lies inside the widest bootstrap interval");
        assert!(level > 0.0 && level < 1.0);
        assert!(est.levels().contains(1.0 - level));
        assert_eq!(est.bootstrap(10).unwrap().distribution().unwrap().replicates(), 400);
    }
}
