// src/config.rs

use crate::utils::{Result, SamplingError};

/// Levels every estimator reports, whatever the caller adds.
pub const DEFAULT_LEVELS: [f64; 3] = [0.01, 0.05, 0.10];

pub const DEFAULT_SEED: u64 = 42;

pub const DEFAULT_STRATIFIED_SEED: u64 = 1304;

/// Sorted, duplicate-free set of significance levels in (0, 1).
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceLevels {
    levels: Vec<f64>,
}

impl SignificanceLevels {
    /// Defaults merged with `extra`. Fails on the first level outside (0, 1).
    pub fn new(extra: &[f64]) -> Result<Self> {
        let mut set = Self::default();
        for &alpha in extra {
            set.insert(alpha)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, alpha: f64) -> Result<()> {
        validate_level(alpha)?;
        if !self.contains(alpha) {
            self.levels.push(alpha);
            self.levels.sort_by(f64::total_cmp);
        }
        Ok(())
    }

    pub fn contains(&self, alpha: f64) -> bool {
        self.levels.iter().any(|&a| (a - alpha).abs() < 1e-12)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.levels
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.levels.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for SignificanceLevels {
    fn default() -> Self {
        SignificanceLevels { levels: DEFAULT_LEVELS.to_vec() }
    }
}

impl TryFrom<f64> for SignificanceLevels {
    type Error = SamplingError;

    fn try_from(alpha: f64) -> Result<Self> {
        Self::new(&[alpha])
    }
}

impl TryFrom<&[f64]> for SignificanceLevels {
    type Error = SamplingError;

    fn try_from(levels: &[f64]) -> Result<Self> {
        Self::new(levels)
    }
}

impl TryFrom<Vec<f64>> for SignificanceLevels {
    type Error = SamplingError;

    fn try_from(levels: Vec<f64>) -> Result<Self> {
        Self::new(&levels)
    }
}

pub fn validate_level(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(SamplingError::Validation(format!(
            "alpha must lie strictly between 0 and 1, got {}",
            alpha
        )))
    }
}

/// Options shared by the SRS and stratified estimators.
#[derive(Debug, Clone)]
pub struct EstimatorOptions {
    pub alpha: SignificanceLevels,
    pub seed: u64,
    /// Covariates dummy-encoded by the regression estimator, on top of
    /// any string-typed covariate.
    pub categorical: Vec<String>,
    /// Categorical covariates whose dummies are kept or dropped together by
    /// significance elimination. Other dummies are pruned one at a time.
    pub grouped: Vec<String>,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        EstimatorOptions {
            alpha: SignificanceLevels::default(),
            seed: DEFAULT_SEED,
            categorical: Vec::new(),
            grouped: Vec::new(),
        }
    }
}

impl EstimatorOptions {
    pub fn stratified() -> Self {
        EstimatorOptions { seed: DEFAULT_STRATIFIED_SEED, ..Self::default() }
    }

    pub fn with_alpha(mut self, alpha: SignificanceLevels) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_categorical<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.categorical = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn with_grouped<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.grouped = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }
}
