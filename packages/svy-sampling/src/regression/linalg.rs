// src/regression/linalg.rs

use ndarray::{Array1, Array2, ArrayView2};

use crate::utils::{Result, SamplingError};

/// Pivots smaller than this fraction of the largest absolute entry are
/// treated as zero.
const RELATIVE_PIVOT_TOL: f64 = 1e-12;

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting.
pub fn invert(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();

    if a.ncols() != n {
        return Err(SamplingError::InvalidInput(
            "Matrix must be square to be inverted".to_string(),
        ));
    }

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if n == 0 || scale == 0.0 {
        return Err(SamplingError::Singular);
    }
    let tol = scale * RELATIVE_PIVOT_TOL;

    // Augmented matrix [A|I]
    let mut aug = Array2::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for k in 0..n {
        // Find pivot
        let mut max_val = aug[[k, k]].abs();
        let mut max_row = k;

        for i in (k + 1)..n {
            let val = aug[[i, k]].abs();
            if val > max_val {
                max_val = val;
                max_row = i;
            }
        }

        if max_val < tol {
            return Err(SamplingError::Singular);
        }

        if max_row != k {
            for j in 0..2 * n {
                aug.swap([k, j], [max_row, j]);
            }
        }

        let pivot = aug[[k, k]];
        for j in 0..2 * n {
            aug[[k, j]] /= pivot;
        }

        for i in 0..n {
            if i == k {
                continue;
            }
            let factor = aug[[i, k]];
            if factor == 0.0 {
                continue;
            }
            for j in k..2 * n {
                aug[[i, j]] -= factor * aug[[k, j]];
            }
        }
    }

    let mut inv = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            inv[[i, j]] = aug[[i, n + j]];
        }
    }
    Ok(inv)
}

/// Normal-equation pieces for OLS: returns ((X'X)^-1, X'y).
pub fn normal_equations(x: ArrayView2<f64>, y: &Array1<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
    let xt = x.t();
    let xtx = xt.dot(&x);
    let xty = xt.dot(y);
    let xtx_inv = invert(xtx.view())?;
    Ok((xtx_inv, xty))
}
