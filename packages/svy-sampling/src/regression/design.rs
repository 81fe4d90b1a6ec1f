// src/regression/design.rs
//
// Design matrices for OLS. Every column carries a tag naming where it came
// from, so elimination can treat the dummies of a grouped categorical
// covariate as a single unit.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use std::collections::BTreeSet;

use crate::utils::{is_string_column, numeric_column, string_column, Result, SamplingError};

pub const INTERCEPT: &str = "const";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTag {
    Intercept,
    Numeric,
    /// Indicator for `level` of the categorical covariate `group`. Dummies of
    /// a `grouped` covariate are kept or dropped together.
    Dummy { group: String, level: String, grouped: bool },
}

impl ColumnTag {
    pub fn group(&self) -> Option<&str> {
        match self {
            ColumnTag::Dummy { group, .. } => Some(group),
            _ => None,
        }
    }

    /// Source covariate when this column belongs to a jointly tested group.
    pub fn joint_group(&self) -> Option<&str> {
        match self {
            ColumnTag::Dummy { group, grouped: true, .. } => Some(group),
            _ => None,
        }
    }

    /// Numeric covariates and dummies of ungrouped categoricals are pruned
    /// one column at a time.
    pub fn is_prunable(&self) -> bool {
        matches!(self, ColumnTag::Numeric | ColumnTag::Dummy { grouped: false, .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignColumn {
    pub name: String,
    pub tag: ColumnTag,
}

#[derive(Debug, Clone)]
pub struct DesignMatrix {
    columns: Vec<DesignColumn>,
    values: Array2<f64>,
}

impl DesignMatrix {
    pub fn new(columns: Vec<DesignColumn>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(SamplingError::InvalidInput(format!(
                "{} column descriptors for {} matrix columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(DesignMatrix { columns, values })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn columns(&self) -> &[DesignColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn has_intercept(&self) -> bool {
        self.columns.iter().any(|c| c.tag == ColumnTag::Intercept)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<f64>> {
        self.position(name).map(|j| self.values.column(j))
    }

    pub fn column_means(&self) -> Array1<f64> {
        self.values
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.ncols(), f64::NAN))
    }

    /// Keep only the columns whose descriptor matches `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&DesignColumn) -> bool,
    {
        let kept: Vec<usize> = (0..self.columns.len()).filter(|&j| keep(&self.columns[j])).collect();
        self.values = self.values.select(Axis(1), &kept);
        self.columns = kept.iter().map(|&j| self.columns[j].clone()).collect();
    }

    /// Re-order and subset to `names`. Every name must exist.
    pub fn select(&self, names: &[String]) -> Result<DesignMatrix> {
        let positions: Vec<usize> = names
            .iter()
            .map(|n| {
                self.position(n).ok_or_else(|| {
                    SamplingError::InvalidInput(format!("design column '{}' not present", n))
                })
            })
            .collect::<Result<_>>()?;
        Ok(DesignMatrix {
            columns: positions.iter().map(|&j| self.columns[j].clone()).collect(),
            values: self.values.select(Axis(1), &positions),
        })
    }
}

#[derive(Debug, Clone)]
enum Source {
    Numeric(String),
    /// Covariate name, the levels kept after dropping the reference, and
    /// whether its dummies form a joint group.
    Categorical(String, Vec<String>, bool),
}

/// How a table of covariates becomes a design matrix: which columns are
/// numeric, which are dummy-encoded and with which levels, and whether an
/// intercept is prepended. Learned once, then applied to any table with the
/// same covariates so population and sample matrices line up.
#[derive(Debug, Clone)]
pub struct Encoding {
    intercept: bool,
    sources: Vec<Source>,
}

impl Encoding {
    /// Columns listed in `categorical` or `grouped`, plus every string column,
    /// are dummy-encoded: levels sorted, the first dropped as reference, one
    /// indicator `<column>_<level>` per remaining level. Dummies of the
    /// columns in `grouped` are tagged as one joint group.
    pub fn learn(
        frame: &DataFrame,
        categorical: &[String],
        grouped: &[String],
        with_intercept: bool,
    ) -> Result<Self> {
        let mut sources = Vec::new();
        let mut has_intercept = false;

        for name in frame.get_column_names() {
            let name = name.as_str();
            if name == INTERCEPT {
                has_intercept = true;
                continue;
            }
            let joint = grouped.iter().any(|c| c == name);
            if joint || categorical.iter().any(|c| c == name) || is_string_column(frame, name)? {
                let levels: BTreeSet<String> = string_column(frame, name)?.into_iter().collect();
                let kept: Vec<String> = levels.into_iter().skip(1).collect();
                sources.push(Source::Categorical(name.to_string(), kept, joint));
            } else {
                sources.push(Source::Numeric(name.to_string()));
            }
        }

        Ok(Encoding {
            intercept: with_intercept || has_intercept,
            sources,
        })
    }

    pub fn apply(&self, frame: &DataFrame) -> Result<DesignMatrix> {
        let m = frame.height();
        let mut columns = Vec::new();
        let mut data: Vec<Array1<f64>> = Vec::new();

        if self.intercept {
            columns.push(DesignColumn { name: INTERCEPT.to_string(), tag: ColumnTag::Intercept });
            data.push(Array1::ones(m));
        }

        // Numeric covariates first, then each categorical block.
        for source in &self.sources {
            if let Source::Numeric(name) = source {
                columns.push(DesignColumn { name: name.clone(), tag: ColumnTag::Numeric });
                data.push(numeric_column(frame, name)?);
            }
        }
        for source in &self.sources {
            if let Source::Categorical(name, levels, joint) = source {
                let raw = string_column(frame, name)?;
                for level in levels {
                    columns.push(DesignColumn {
                        name: format!("{}_{}", name, level),
                        tag: ColumnTag::Dummy {
                            group: name.clone(),
                            level: level.clone(),
                            grouped: *joint,
                        },
                    });
                    data.push(raw.iter().map(|v| if v == level { 1.0 } else { 0.0 }).collect());
                }
            }
        }

        let mut values = Array2::zeros((m, columns.len()));
        for (j, col) in data.iter().enumerate() {
            values.column_mut(j).assign(col);
        }
        DesignMatrix::new(columns, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df![
            "years" => [12.0, 16.0, 8.0, 12.0],
            "region" => ["south", "north", "east", "north"],
        ]
        .unwrap()
    }

    #[test]
    fn test_dummy_encoding_drops_reference() {
        let enc = Encoding::learn(&frame(), &[], &["region".to_string()], true).unwrap();
        let x = enc.apply(&frame()).unwrap();

        assert_eq!(x.names(), vec!["const", "years", "region_north", "region_south"]);
        assert_eq!(x.ncols(), 4);
        assert_eq!(x.column("region_north").unwrap().to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(x.column("const").unwrap().to_vec(), vec![1.0; 4]);
        assert_eq!(
            x.columns()[2].tag,
            ColumnTag::Dummy { group: "region".into(), level: "north".into(), grouped: true }
        );
        assert_eq!(x.columns()[2].tag.joint_group(), Some("region"));
        assert!(!x.columns()[2].tag.is_prunable());
        assert!(x.columns()[1].tag.is_prunable());
    }

    #[test]
    fn test_numeric_column_listed_as_categorical() {
        let df = df!["x" => [1.0, 2.0, 3.0], "urban" => [0i32, 1, 1]].unwrap();
        let enc = Encoding::learn(&df, &["urban".to_string()], &[], false).unwrap();
        let x = enc.apply(&df).unwrap();
        assert_eq!(x.names(), vec!["x", "urban_1"]);
        assert!(x.columns()[1].tag.is_prunable());
        assert_eq!(x.columns()[1].tag.joint_group(), None);
        assert!(!x.has_intercept());
    }

    #[test]
    fn test_retain_and_select() {
        let enc = Encoding::learn(&frame(), &[], &[], true).unwrap();
        let mut x = enc.apply(&frame()).unwrap();
        x.retain(|c| c.tag.group() != Some("region"));
        assert_eq!(x.names(), vec!["const", "years"]);

        let picked = x.select(&["years".to_string()]).unwrap();
        assert_eq!(picked.column_means()[0], 12.0);
        assert!(x.select(&["region_north".to_string()]).is_err());
    }
}
