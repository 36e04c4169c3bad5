//! Input preparation: covariance scaling, covariate rank, imputation,
//! and kinship from genotypes.

use qtlscan_linalg::{decomposition::independent_columns, DenseMatrix};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{Result, ScanError};

/// Gower scaling: `K (n - 1) / (tr(K) - 1'K1 / n)`.
///
/// The scaled matrix has a sample variance of one under a random effect
/// with covariance K.
pub fn normalise_covariance(k: &DenseMatrix) -> Result<DenseMatrix> {
    let n = k.nrows();
    if n != k.ncols() {
        return Err(ScanError::ShapeMismatch(format!(
            "covariance is {} x {}, not square",
            n,
            k.ncols()
        )));
    }
    let c = k.trace() - k.sum() / n as f64;
    if !(c > 0.0) {
        return Err(ScanError::FittingFailure(
            "covariance has no variance to normalise".into(),
        ));
    }
    Ok(k.scale((n as f64 - 1.0) / c))
}

/// Keep the columns of `x` that are linearly independent of earlier ones.
///
/// Returns the reduced matrix and the kept column indices.
pub fn remove_dependent_cols(x: &DenseMatrix, tol: f64) -> (DenseMatrix, Vec<usize>) {
    let keep = independent_columns(x, tol);
    if keep.len() < x.ncols() {
        let dropped: Vec<usize> = (0..x.ncols()).filter(|j| !keep.contains(j)).collect();
        warn!("Columns {:?} removed because of linear dependence", dropped);
    }
    (x.select_columns(&keep), keep)
}

/// Replace non-finite entries by the mean of the finite ones in their column.
///
/// Columns with no finite entry become zero.
pub fn mean_impute(x: &DenseMatrix) -> DenseMatrix {
    let mut out = x.clone();
    let mut imputed = 0usize;
    for j in 0..x.ncols() {
        let col = x.col(j);
        let (sum, count) = col
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        for (i, v) in col.iter().enumerate() {
            if !v.is_finite() {
                out.set(i, j, mean);
                imputed += 1;
            }
        }
    }
    if imputed > 0 {
        info!("Mean-imputed {} non-finite entries", imputed);
    }
    out
}

/// Kinship `X Xᵀ / m` from the standardised columns of `x` (n x m).
///
/// Missing values are mean-imputed; constant columns are skipped.
pub fn kinship_from_genotypes(x: &DenseMatrix) -> DenseMatrix {
    let n = x.nrows();
    let x = mean_impute(x);
    let columns: Vec<Vec<f64>> = (0..x.ncols())
        .into_par_iter()
        .filter_map(|j| {
            let col = x.col(j);
            let mean = col.iter().sum::<f64>() / n as f64;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            if var < 1e-10 {
                return None;
            }
            let sd = var.sqrt();
            Some(col.iter().map(|v| (v - mean) / sd).collect())
        })
        .collect();

    info!(
        "Kinship from {} samples x {} markers ({} constant markers skipped)",
        n,
        columns.len(),
        x.ncols() - columns.len()
    );
    if columns.is_empty() {
        return DenseMatrix::zeros(n, n);
    }
    let z = DenseMatrix::from_columns(n, &columns);
    z.mat_mul(&z.transpose()).scale(1.0 / columns.len() as f64)
}
