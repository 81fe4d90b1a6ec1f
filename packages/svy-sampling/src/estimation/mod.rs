// src/estimation/mod.rs
pub mod bootstrap;
pub mod interval;
pub mod srs;
pub mod stratified;

use polars::prelude::*;

use crate::config::SignificanceLevels;
use crate::utils::Result;

pub use bootstrap::{BootstrapDistribution, BootstrapInterval, BootstrapSummary, Resampler, SampleSize, Statistic};
pub use interval::{t_critical, t_intervals, z_critical, ConfidenceInterval, IntervalReport};
pub use srs::{DescriptiveReport, RatioReport, RegressionReport, SrsEstimator, VariableDescription};
pub use stratified::{
    StratifiedEstimator, StratifiedRatioReport, StratifiedRegressionReport, Stratum, StratumRatio,
    StratumRegression, STRATUM_COLUMN,
};

/// Replicates drawn by `minimal_interval` when none are requested.
pub const DEFAULT_MINIMAL_REPLICATES: usize = 3000;

/// Number of candidate levels scanned by `minimal_interval`.
pub const MINIMAL_GRID_POINTS: usize = 500;

/// A point estimate with its standard error, bias against the known
/// population value, and intervals at every configured level.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateReport {
    pub estimate: f64,
    pub std_error: f64,
    pub true_value: f64,
    pub bias: f64,
    pub intervals: IntervalReport,
}

impl EstimateReport {
    pub fn mse(&self) -> f64 {
        self.bias * self.bias + self.std_error * self.std_error
    }

    /// One row per interval, with the true value and bias repeated.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut frame = self.intervals.to_frame()?;
        let rows = frame.height();
        frame.with_column(Series::new("true_value".into(), vec![self.true_value; rows]))?;
        frame.with_column(Series::new("bias".into(), vec![self.bias; rows]))?;
        Ok(frame)
    }
}

/// Behaviour shared by the simple random and the stratified designs.
pub trait SurveyDesign {
    fn levels(&self) -> &SignificanceLevels;

    fn levels_mut(&mut self) -> &mut SignificanceLevels;

    /// Realized sample size n.
    fn sample_size(&self) -> usize;

    fn population_size(&self) -> usize;

    fn population_mean(&self) -> f64;

    /// Plain mean of the target over the drawn sample.
    fn sample_mean(&self) -> f64;

    /// Resampling distribution of the population target at this design's n,
    /// built with `k` replicates on first use and cached afterwards.
    fn bootstrap(&mut self, k: usize) -> Result<&Resampler>;

    fn sampling_fraction(&self) -> f64 {
        self.sample_size() as f64 / self.population_size() as f64
    }

    /// estimate ± t_{1-alpha/2, n-1} · std_error for every configured level.
    fn confidence_interval(
        &self,
        estimate: f64,
        std_error: f64,
        true_value: Option<f64>,
    ) -> Result<IntervalReport> {
        t_intervals(
            estimate,
            std_error,
            self.sample_size().saturating_sub(1),
            self.levels(),
            true_value,
        )
    }

    fn estimate_report(&self, estimate: f64, std_error: f64, true_value: f64) -> Result<EstimateReport> {
        Ok(EstimateReport {
            estimate,
            std_error,
            true_value,
            bias: estimate - true_value,
            intervals: self.confidence_interval(estimate, std_error, Some(true_value))?,
        })
    }

    /// Scan alpha from 1 down to 0.001 over a 500-point grid and return the
    /// confidence level 1 - alpha of the first bootstrap interval that holds
    /// the sample mean, i.e. the narrowest interval consistent with it. The
    /// level found is added to the configured set. `Ok(None)` when no grid
    /// point contains the sample mean.
    fn minimal_interval(&mut self, k: Option<usize>) -> Result<Option<f64>> {
        let target_mean = self.sample_mean();
        let k = k.unwrap_or(DEFAULT_MINIMAL_REPLICATES);
        let grid: Vec<f64> = (0..MINIMAL_GRID_POINTS)
            .rev()
            .map(|i| 0.001 + (1.0 - 0.001) * i as f64 / (MINIMAL_GRID_POINTS - 1) as f64)
            .collect();

        let found = {
            let resampler = self.bootstrap(k)?;
            let intervals = resampler.interval(Some(&grid), Statistic::Mean)?;
            intervals.into_iter().find(|ci| ci.contains(target_mean)).map(|ci| ci.alpha)
        };

        match found {
            Some(alpha) => {
                if alpha < 1.0 && !self.levels().contains(alpha) {
                    self.levels_mut().insert(alpha)?;
                }
                Ok(Some(1.0 - alpha))
            }
            None => {
                tracing::warn!(target_mean, "no bootstrap interval contains the sample mean");
                Ok(None)
            }
        }
    }
}
