// src/regression/ols.rs
//! Ordinary least squares with significance-based backward elimination.

use ndarray::Array1;
use polars::prelude::*;
use std::collections::BTreeMap;

use super::design::{ColumnTag, DesignColumn, DesignMatrix, Encoding};
use super::linalg::normal_equations;
use crate::config::{validate_level, SignificanceLevels};
use crate::estimation::interval::t_critical;
use crate::utils::{Result, SamplingError};

/// Levels that earn one star each in the coefficient table.
const STAR_LEVELS: [f64; 3] = [0.10, 0.05, 0.01];

/// Coefficients of the current fit. `b`, `bstd` and `tstat` are indexed like
/// `columns`.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub columns: Vec<DesignColumn>,
    pub b: Array1<f64>,
    pub bstd: Array1<f64>,
    pub tstat: Array1<f64>,
    pub sigma2: f64,
    pub df_resid: usize,
}

impl FittedModel {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.columns.iter().position(|c| c.name == name).map(|j| self.b[j])
    }

    pub fn t_value(&self, name: &str) -> Option<f64> {
        self.columns.iter().position(|c| c.name == name).map(|j| self.tstat[j])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRow {
    pub name: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub t: f64,
    /// "*", "**", "***" at 10/5/1%, empty when not significant at 10%.
    pub stars: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    pub rows: Vec<CoefficientRow>,
}

impl CoefficientTable {
    pub fn get(&self, name: &str) -> Option<&CoefficientRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let names: Vec<String> = self.rows.iter().map(|r| r.name.clone()).collect();
        let coefs: Vec<f64> = self.rows.iter().map(|r| r.coefficient).collect();
        let ses: Vec<f64> = self.rows.iter().map(|r| r.std_error).collect();
        let ts: Vec<f64> = self.rows.iter().map(|r| r.t).collect();
        let stars: Vec<String> = self.rows.iter().map(|r| r.stars.clone()).collect();
        Ok(df![
            "variable" => names,
            "coefficient" => coefs,
            "se" => ses,
            "t" => ts,
            "sig" => stars,
        ]?)
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    alpha: SignificanceLevels,
    /// Categorical covariates whose dummies are tested and dropped together.
    grouped: Vec<String>,
    target: String,
    encoding: Option<Encoding>,
    x: Option<DesignMatrix>,
    y: Option<Array1<f64>>,
    fitted: Option<FittedModel>,
}

impl LinearModel {
    pub fn new(alpha: SignificanceLevels) -> Self {
        LinearModel {
            alpha,
            grouped: Vec::new(),
            target: String::from("y"),
            encoding: None,
            x: None,
            y: None,
            fitted: None,
        }
    }

    pub fn with_grouped<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.grouped = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn levels(&self) -> &SignificanceLevels {
        &self.alpha
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Fit `y` on the covariates in `x`. String columns, the columns named in
    /// `categorical` and the grouped columns are dummy-encoded; an intercept
    /// `const` is prepended when `with_intercept` is set and `x` has none.
    pub fn fit(
        &mut self,
        x: &DataFrame,
        y: &Series,
        with_intercept: bool,
        categorical: Option<&[String]>,
    ) -> Result<CoefficientTable> {
        if x.height() != y.len() {
            return Err(SamplingError::InvalidInput(format!(
                "covariates have {} rows, target has {}",
                x.height(),
                y.len()
            )));
        }
        let encoding = Encoding::learn(x, categorical.unwrap_or(&[]), &self.grouped, with_intercept)?;
        let design = encoding.apply(x)?;

        let target = y.cast(&DataType::Float64)?;
        let target = target.f64()?;
        if target.null_count() > 0 {
            return Err(SamplingError::InvalidInput(format!(
                "target '{}' contains null values",
                y.name()
            )));
        }
        let values: Array1<f64> = target.into_no_null_iter().collect();

        self.encoding = Some(encoding);
        self.target = y.name().to_string();
        self.fit_design(design, values)
    }

    /// Fit on an already encoded design matrix.
    pub fn fit_design(&mut self, x: DesignMatrix, y: Array1<f64>) -> Result<CoefficientTable> {
        let (m, n) = (x.nrows(), x.ncols());
        if y.len() != m {
            return Err(SamplingError::InvalidInput(format!(
                "design has {} rows, target has {}",
                m,
                y.len()
            )));
        }
        if n == 0 || n >= m {
            return Err(SamplingError::Dimension { rows: m, cols: n });
        }

        let (xtx_inv, xty) = normal_equations(x.values().view(), &y)?;
        let b = xtx_inv.dot(&xty);
        let res = &y - &x.values().dot(&b);
        let df_resid = m - n;
        let sigma2 = res.dot(&res) / df_resid as f64;
        let bstd = xtx_inv.diag().mapv(|v| (v * sigma2).max(0.0).sqrt());
        let tstat = &b / &bstd;

        self.fitted = Some(FittedModel {
            columns: x.columns().to_vec(),
            b,
            bstd,
            tstat,
            sigma2,
            df_resid,
        });
        self.x = Some(x);
        self.y = Some(y);
        self.table()
    }

    /// Backward elimination at level `alpha`. Each round drops the weakest
    /// numeric covariate or ungrouped dummy with |t| below the critical value;
    /// once none is left, a grouped categorical is dropped whole if all its
    /// dummies are below it. The intercept is never dropped.
    pub fn fit_with_elimination(&mut self, alpha: f64) -> Result<CoefficientTable> {
        validate_level(alpha)?;
        let mut x = self.x.clone().ok_or(SamplingError::NotFitted("LinearModel"))?;
        let y = self.y.clone().ok_or(SamplingError::NotFitted("LinearModel"))?;
        self.fit_design(x.clone(), y.clone())?;

        loop {
            let fitted = self.fitted()?;
            let critical = t_critical(alpha, fitted.df_resid)?;

            let weakest = fitted
                .columns
                .iter()
                .zip(fitted.tstat.iter())
                .filter(|(c, t)| c.tag.is_prunable() && !(t.abs() >= critical))
                .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .map(|(c, t)| (c.name.clone(), *t));

            if let Some((name, t)) = weakest {
                if x.ncols() <= 1 {
                    break;
                }
                tracing::info!(
                    variable = %name,
                    t = t,
                    critical = critical,
                    "dropping statistically insignificant covariate"
                );
                x.retain(|c| c.name != name);
                self.fit_design(x.clone(), y.clone())?;
                continue;
            }

            let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
            for (c, t) in fitted.columns.iter().zip(fitted.tstat.iter()) {
                if let Some(group) = c.tag.joint_group() {
                    groups.entry(group).or_default().push(*t);
                }
            }
            let dropped_group = groups
                .iter()
                .find(|(_, ts)| ts.iter().all(|t| !(t.abs() >= critical)))
                .map(|(g, ts)| (g.to_string(), ts.clone()));

            match dropped_group {
                Some((group, ts)) if x.ncols() > ts.len() => {
                    tracing::info!(
                        group = %group,
                        t = ?ts,
                        critical = critical,
                        "dropping jointly insignificant categorical group"
                    );
                    x.retain(|c| c.tag.joint_group() != Some(group.as_str()));
                    self.fit_design(x.clone(), y.clone())?;
                }
                _ => break,
            }
        }

        self.table()
    }

    /// Xb for `x`, or for the training design when `x` is `None`.
    pub fn predict(&self, x: Option<&DesignMatrix>) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        let x = match x {
            Some(x) => x,
            None => self.design()?,
        };
        let names: Vec<String> = fitted.columns.iter().map(|c| c.name.clone()).collect();
        let aligned = x.select(&names)?;
        Ok(aligned.values().dot(&fitted.b))
    }

    pub fn predict_mean(&self, x: Option<&DesignMatrix>) -> Result<f64> {
        Ok(self.predict(x)?.mean().unwrap_or(f64::NAN))
    }

    pub fn predict_total(&self, x: Option<&DesignMatrix>) -> Result<f64> {
        Ok(self.predict(x)?.sum())
    }

    /// Encode another table with the fitted dummy levels, restricted to the
    /// columns the current model retains.
    pub fn encode(&self, frame: &DataFrame) -> Result<DesignMatrix> {
        let encoding = self.encoding.as_ref().ok_or(SamplingError::NotFitted("LinearModel"))?;
        let names: Vec<String> = self.fitted()?.columns.iter().map(|c| c.name.clone()).collect();
        encoding.apply(frame)?.select(&names)
    }

    /// "y = b0 + b1 *x1 + ..."
    pub fn equation(&self) -> Result<String> {
        let fitted = self.fitted()?;
        let terms: Vec<String> = fitted
            .columns
            .iter()
            .zip(fitted.b.iter())
            .map(|(c, b)| match c.tag {
                ColumnTag::Intercept => format!("{:.4}", b),
                _ => format!("{:.4} *{}", b, c.name),
            })
            .collect();
        Ok(format!("{} = {}", self.target, terms.join(" + ")))
    }

    pub fn fitted(&self) -> Result<&FittedModel> {
        self.fitted.as_ref().ok_or(SamplingError::NotFitted("LinearModel"))
    }

    pub fn design(&self) -> Result<&DesignMatrix> {
        self.x.as_ref().ok_or(SamplingError::NotFitted("LinearModel"))
    }

    pub fn response(&self) -> Result<&Array1<f64>> {
        self.y.as_ref().ok_or(SamplingError::NotFitted("LinearModel"))
    }

    pub fn table(&self) -> Result<CoefficientTable> {
        let fitted = self.fitted()?;
        let critical: Vec<f64> = STAR_LEVELS
            .iter()
            .map(|&a| t_critical(a, fitted.df_resid))
            .collect::<Result<_>>()?;

        let rows = fitted
            .columns
            .iter()
            .enumerate()
            .map(|(j, c)| {
                let t = fitted.tstat[j];
                let stars = critical.iter().filter(|&&crit| t.abs() >= crit).count();
                CoefficientRow {
                    name: c.name.clone(),
                    coefficient: fitted.b[j],
                    std_error: fitted.bstd[j],
                    t,
                    stars: "*".repeat(stars),
                }
            })
            .collect();
        Ok(CoefficientTable { rows })
    }
}
