#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Cholesky with log-determinants and triangular solves, symmetric
//! eigendecomposition through faer, a symmetric pseudo-inverse for
//! rank-deficient Gram matrices, and a Gram-Schmidt pass that flags
//! linearly dependent columns.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Singular matrix encountered")]
    SingularMatrix,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Matrix contains non-finite entries")]
    NonFinite,
}

/// Result of a Cholesky decomposition.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        // Column-major scratch buffer; element (i, j) at j * n + i.
        let mut l = vec![0.0; n * n];

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[k * n + j] * l[k * n + j];
            }
            let diag = a.get(j, j) - sum;
            if !(diag > 0.0) || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite);
            }
            let ljj = diag.sqrt();
            l[j * n + j] = ljj;

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l[k * n + i] * l[k * n + j];
                }
                l[j * n + i] = (a.get(i, j) - sum) / ljj;
            }
        }

        Ok(CholeskyDecomp {
            l: DenseMatrix::from_col_major(n, n, l),
        })
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// log |A| = 2 * sum(log L_ii).
    pub fn log_det(&self) -> f64 {
        2.0 * self.l.diag().iter().map(|d| d.ln()).sum::<f64>()
    }

    /// Forward substitution: solve L * y = b.
    pub fn solve_lower(&self, b: &[f64]) -> Vec<f64> {
        let n = self.dim();
        assert_eq!(b.len(), n);
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }
        y
    }

    /// Backward substitution: solve L' * x = y.
    pub fn solve_upper(&self, y: &[f64]) -> Vec<f64> {
        let n = self.dim();
        assert_eq!(y.len(), n);
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }
        x
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        self.solve_upper(&self.solve_lower(b))
    }

    /// Solve A * X = B column by column.
    pub fn solve_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        let mut x = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            x.set_col(j, &self.solve(&b.col(j)));
        }
        x
    }

    /// L^{-1} * B column by column.
    pub fn solve_lower_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        let mut x = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            x.set_col(j, &self.solve_lower(&b.col(j)));
        }
        x
    }

    /// A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> DenseMatrix {
        self.solve_mat(&DenseMatrix::identity(self.dim()))
    }
}

/// Eigendecomposition of a symmetric matrix, eigenvalues in descending order.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    /// Eigenvectors stored as columns, aligned with `values`.
    pub vectors: DenseMatrix,
}

impl SymmetricEigen {
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        if !a.is_finite() {
            return Err(LinalgError::NonFinite);
        }
        if n == 0 {
            return Ok(Self {
                values: Vec::new(),
                vectors: DenseMatrix::zeros(0, 0),
            });
        }

        let evd = a.as_faer().selfadjoint_eigendecomposition(faer::Side::Lower);
        let s = evd.s();
        let u = evd.u();

        // faer returns ascending eigenvalues.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&x, &y| s.column_vector().read(y).total_cmp(&s.column_vector().read(x)));

        let values = order.iter().map(|&k| s.column_vector().read(k)).collect();
        let vectors = DenseMatrix::from_fn(n, n, |i, j| u.read(i, order[j]));
        Ok(Self { values, vectors })
    }
}

/// Eigenvalues of a symmetric matrix sorted in descending order.
pub fn symmetric_eigenvalues(a: &DenseMatrix) -> Result<Vec<f64>, LinalgError> {
    Ok(SymmetricEigen::new(a)?.values)
}

/// Moore-Penrose inverse of a symmetric matrix.
///
/// Eigenvalues at or below `tol * max|λ|` are treated as zero.
pub fn pinv_symmetric(a: &DenseMatrix, tol: f64) -> Result<DenseMatrix, LinalgError> {
    let eig = SymmetricEigen::new(a)?;
    let n = a.nrows();
    let top = eig.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let cutoff = tol * top;
    let mut out = DenseMatrix::zeros(n, n);
    for (k, &val) in eig.values.iter().enumerate() {
        if val.abs() <= cutoff || val == 0.0 {
            continue;
        }
        let inv = 1.0 / val;
        for j in 0..n {
            let ujk = eig.vectors.get(j, k) * inv;
            for i in 0..n {
                out.set(i, j, out.get(i, j) + eig.vectors.get(i, k) * ujk);
            }
        }
    }
    Ok(out)
}

/// Compute the inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.inverse())
}

/// Indices of columns that are linearly independent of the columns before them.
///
/// Runs modified Gram-Schmidt left to right; a column whose residual norm
/// falls below `tol` times its original norm is dropped. All-zero columns
/// are always dropped.
pub fn independent_columns(a: &DenseMatrix, tol: f64) -> Vec<usize> {
    let m = a.nrows();
    let mut basis: Vec<Vec<f64>> = Vec::new();
    let mut keep = Vec::new();

    for j in 0..a.ncols() {
        let mut col = a.col(j);
        let original = DenseMatrix::dot(&col, &col).sqrt();
        for q in &basis {
            let r = DenseMatrix::dot(q, &col);
            for k in 0..m {
                col[k] -= r * q[k];
            }
        }
        let norm = DenseMatrix::dot(&col, &col).sqrt();
        if original == 0.0 || norm <= tol * original {
            continue;
        }
        for v in col.iter_mut() {
            *v /= norm;
        }
        basis.push(col);
        keep.push(j);
    }
    keep
}
