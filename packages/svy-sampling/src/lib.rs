// src/lib.rs
//! Design-based estimation of a finite population mean and total from simple
//! random and stratified samples: ratio and regression estimators, bootstrap
//! intervals and sample-size planning, and an OLS engine with significance
//! elimination.

pub mod config;
pub mod estimation;
pub mod regression;
pub mod sampling;
pub mod utils;

pub use config::{EstimatorOptions, SignificanceLevels};
pub use estimation::{
    EstimateReport, IntervalReport, Resampler, SrsEstimator, Statistic, StratifiedEstimator, SurveyDesign,
};
pub use regression::{LinearModel, ModelSummary};
pub use utils::{Result, SamplingError};
