// src/regression/diagnostics.rs

use ndarray::ArrayView1;
use polars::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};

use super::ols::LinearModel;
use crate::utils::{mean, Result, SamplingError};

/// Jarque–Bera normality test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JarqueBera {
    pub skewness: f64,
    pub kurtosis: f64,
    pub statistic: f64,
    pub p_value: f64,
}

impl JarqueBera {
    pub fn rejects_normality(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// JB = n (S² + (K - 3)² / 4) / 6 against chi-square(2). Central moments are
/// scaled by the n - 1 standard deviation.
pub fn jarque_bera(values: ArrayView1<f64>) -> Result<JarqueBera> {
    let n = values.len();
    if n < 2 {
        return Err(SamplingError::InvalidInput(
            "Jarque-Bera needs at least two observations".into(),
        ));
    }
    let m = mean(values);
    let mu3 = values.mapv(|v| (v - m).powi(3)).mean().unwrap_or(f64::NAN);
    let mu4 = values.mapv(|v| (v - m).powi(4)).mean().unwrap_or(f64::NAN);
    let sd = values.std(1.0);
    let skewness = mu3 / sd.powi(3);
    let kurtosis = mu4 / sd.powi(4);
    let statistic = n as f64 * (skewness.powi(2) + (kurtosis - 3.0).powi(2) / 4.0) / 6.0;

    let chi2 = ChiSquared::new(2.0).map_err(|e| SamplingError::Distribution(e.to_string()))?;
    let p_value = if statistic.is_finite() { chi2.sf(statistic) } else { f64::NAN };

    Ok(JarqueBera { skewness, kurtosis, statistic, p_value })
}

/// Goodness of fit of the current model on its training data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub observations: usize,
    pub r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub jarque_bera: JarqueBera,
    pub rmse: f64,
    pub mae: f64,
}

impl ModelSummary {
    pub fn to_frame(&self) -> Result<DataFrame> {
        Ok(df![
            "statistic" => ["n", "R2", "F", "p(F)", "JB", "p(JB)", "RMSE", "MAE"],
            "value" => [
                self.observations as f64,
                self.r_squared,
                self.f_statistic,
                self.f_p_value,
                self.jarque_bera.statistic,
                self.jarque_bera.p_value,
                self.rmse,
                self.mae,
            ],
        ]?)
    }
}

impl LinearModel {
    pub fn summary(&self) -> Result<ModelSummary> {
        let x = self.design()?;
        let y = self.response()?;
        let res = y - &self.predict(None)?;

        let m = y.len();
        let ssr = res.dot(&res);
        let y_mean = mean(y.view());
        let ssy = y.mapv(|v| (v - y_mean).powi(2)).sum();
        let r_squared = 1.0 - ssr / ssy;

        // regressors excluding the intercept
        let k = x.ncols() - usize::from(x.has_intercept());
        let df_denom = m.saturating_sub(x.ncols());
        let (f_statistic, f_p_value) = if k > 0 && df_denom > 0 {
            let f = (r_squared / k as f64) / ((1.0 - r_squared) / df_denom as f64);
            let dist = FisherSnedecor::new(k as f64, df_denom as f64)
                .map_err(|e| SamplingError::Distribution(e.to_string()))?;
            let p = if f.is_finite() { dist.sf(f) } else { 0.0 };
            (f, p)
        } else {
            (f64::NAN, f64::NAN)
        };

        let jarque_bera = jarque_bera(res.view())?;
        tracing::debug!(
            statistic = jarque_bera.statistic,
            p_value = jarque_bera.p_value,
            rejects_at_10pct = jarque_bera.rejects_normality(0.10),
            "residual normality"
        );

        Ok(ModelSummary {
            observations: m,
            r_squared,
            f_statistic,
            f_p_value,
            jarque_bera,
            rmse: (ssr / m as f64).sqrt(),
            mae: res.mapv(f64::abs).mean().unwrap_or(f64::NAN),
        })
    }
}
