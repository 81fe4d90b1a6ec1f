// src/regression/mod.rs
pub mod design;
pub mod diagnostics;
pub mod linalg;
pub mod ols;

pub use design::{ColumnTag, DesignColumn, DesignMatrix, Encoding, INTERCEPT};
pub use diagnostics::{jarque_bera, JarqueBera, ModelSummary};
pub use ols::{CoefficientRow, CoefficientTable, FittedModel, LinearModel};
