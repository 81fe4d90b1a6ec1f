// src/estimation/interval.rs

use polars::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::config::SignificanceLevels;
use crate::utils::{Result, SamplingError};

/// Two-sided critical value t_{1 - alpha/2, df}.
pub fn t_critical(alpha: f64, df: usize) -> Result<f64> {
    if df == 0 {
        return Err(SamplingError::InvalidInput(
            "t critical value needs at least one degree of freedom".into(),
        ));
    }
    let dist = StudentsT::new(0.0, 1.0, df as f64)
        .map_err(|e| SamplingError::Distribution(e.to_string()))?;
    Ok(dist.inverse_cdf(1.0 - alpha / 2.0))
}

/// Two-sided critical value z_{1 - alpha/2}.
pub fn z_critical(alpha: f64) -> Result<f64> {
    let dist = Normal::new(0.0, 1.0).map_err(|e| SamplingError::Distribution(e.to_string()))?;
    Ok(dist.inverse_cdf(1.0 - alpha / 2.0))
}

/// "(1 - alpha)%" with one decimal, e.g. "95.0%".
pub fn level_label(alpha: f64) -> String {
    format!("{:.1}%", (1.0 - alpha) * 100.0)
}

/// Linear-interpolation quantile of an ascending slice (the pandas/R-7 rule).
pub fn empirical_quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    if lo >= n - 1 {
        return sorted[n - 1];
    }
    let frac = h - lo as f64;
    sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceInterval {
    pub alpha: f64,
    pub estimate: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
    /// Whether the known true value falls inside, when one was supplied.
    pub contains: Option<bool>,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn half_width(&self) -> f64 {
        self.width() / 2.0
    }

    pub fn label(&self) -> String {
        level_label(self.alpha)
    }
}

/// One interval per configured level, ordered by ascending alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalReport {
    pub intervals: Vec<ConfidenceInterval>,
}

impl IntervalReport {
    pub fn get(&self, alpha: f64) -> Option<&ConfidenceInterval> {
        self.intervals.iter().find(|ci| (ci.alpha - alpha).abs() < 1e-12)
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let labels: Vec<String> = self.intervals.iter().map(|ci| ci.label()).collect();
        let estimates: Vec<f64> = self.intervals.iter().map(|ci| ci.estimate).collect();
        let ses: Vec<f64> = self.intervals.iter().map(|ci| ci.std_error).collect();
        let lowers: Vec<f64> = self.intervals.iter().map(|ci| ci.lower).collect();
        let uppers: Vec<f64> = self.intervals.iter().map(|ci| ci.upper).collect();
        let widths: Vec<f64> = self.intervals.iter().map(|ci| ci.width()).collect();
        let contains: Vec<Option<bool>> = self.intervals.iter().map(|ci| ci.contains).collect();
        Ok(df![
            "interval" => labels,
            "estimate" => estimates,
            "se" => ses,
            "lower" => lowers,
            "upper" => uppers,
            "width" => widths,
            "contains" => contains,
        ]?)
    }
}

/// estimate ± t_{1-alpha/2, df} · std_error for every level.
pub fn t_intervals(
    estimate: f64,
    std_error: f64,
    df: usize,
    levels: &SignificanceLevels,
    true_value: Option<f64>,
) -> Result<IntervalReport> {
    let intervals = levels
        .iter()
        .map(|alpha| {
            let t = t_critical(alpha, df)?;
            let lower = estimate - t * std_error;
            let upper = estimate + t * std_error;
            Ok(ConfidenceInterval {
                alpha,
                estimate,
                std_error,
                lower,
                upper,
                contains: true_value.map(|v| lower <= v && v <= upper),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IntervalReport { intervals })
}
