#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major `Mat<f64>` with the handful of operations the
//! mixed-model code leans on: products against transposes, column
//! selection, horizontal stacking, and Kronecker products for the
//! multi-trait designs.

use faer::Mat;

/// A dense column-major matrix.
///
/// Matrices with zero columns are valid and show up routinely as empty
/// designs (for example the default narrow design with no columns).
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a new dense matrix filled with a constant value.
    pub fn full(nrows: usize, ncols: usize, value: f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, |_, _| value),
        }
    }

    /// Build a matrix entry by entry.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Create a dense matrix from a flat vec (column-major order).
    pub fn from_col_major(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i]);
        Self { inner }
    }

    /// Create a dense matrix from row-major input.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Stack equal-length columns side by side.
    pub fn from_columns(nrows: usize, columns: &[Vec<f64>]) -> Self {
        for c in columns {
            assert_eq!(c.len(), nrows);
        }
        Self::from_fn(nrows, columns.len(), |i, j| columns[j][i])
    }

    /// Create an identity matrix of size n x n.
    pub fn identity(n: usize) -> Self {
        let inner = Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
        Self { inner }
    }

    /// Create a column vector from a slice.
    pub fn from_vec(data: &[f64]) -> Self {
        let n = data.len();
        let inner = Mat::from_fn(n, 1, |i, _| data[i]);
        Self { inner }
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.nrows() == 0 || self.ncols() == 0
    }

    /// Get element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    /// Set element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    /// Get a reference to the underlying faer matrix.
    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// Matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            for i in 0..n {
                result[i] += self.inner.read(i, j) * vj;
            }
        }
        result
    }

    /// Transposed matrix-vector product: self' * v.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        (0..self.ncols())
            .map(|j| (0..self.nrows()).map(|i| self.inner.read(i, j) * v[i]).sum())
            .collect()
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        if self.is_empty() || other.ncols() == 0 {
            return DenseMatrix::zeros(self.nrows(), other.ncols());
        }
        let result = &self.inner * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Cross product: self' * other.
    pub fn t_mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        if self.is_empty() || other.is_empty() {
            return DenseMatrix::zeros(self.ncols(), other.ncols());
        }
        let t = self.inner.transpose().to_owned();
        DenseMatrix { inner: &t * &other.inner }
    }

    pub fn transpose(&self) -> DenseMatrix {
        let inner = self.inner.transpose().to_owned();
        DenseMatrix { inner }
    }

    /// Extract column as a Vec<f64>.
    pub fn col(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.inner.read(i, j)).collect()
    }

    /// Extract row as a Vec<f64>.
    pub fn row(&self, i: usize) -> Vec<f64> {
        (0..self.ncols()).map(|j| self.inner.read(i, j)).collect()
    }

    /// Set an entire column from a slice.
    pub fn set_col(&mut self, j: usize, data: &[f64]) {
        assert_eq!(data.len(), self.nrows());
        for i in 0..self.nrows() {
            self.inner.write(i, j, data[i]);
        }
    }

    /// Sub-matrix holding the listed columns, in the order given.
    pub fn select_columns(&self, cols: &[usize]) -> DenseMatrix {
        Self::from_fn(self.nrows(), cols.len(), |i, j| self.inner.read(i, cols[j]))
    }

    /// Sub-matrix holding the listed rows, in the order given.
    pub fn select_rows(&self, rows: &[usize]) -> DenseMatrix {
        Self::from_fn(rows.len(), self.ncols(), |i, j| self.inner.read(rows[i], j))
    }

    /// Horizontal concatenation `[self | other]`.
    pub fn hcat(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        let c = self.ncols();
        Self::from_fn(self.nrows(), c + other.ncols(), |i, j| {
            if j < c {
                self.inner.read(i, j)
            } else {
                other.inner.read(i, j - c)
            }
        })
    }

    /// Kronecker product `self ⊗ other`.
    ///
    /// Column `x * other.ncols() + l` of the result is column `x` of `self`
    /// crossed with column `l` of `other`, which matches column-major
    /// vectorisation of a coefficient matrix with `other.ncols()` rows.
    pub fn kron(&self, other: &DenseMatrix) -> DenseMatrix {
        let (ra, ca) = (self.nrows(), self.ncols());
        let (rb, cb) = (other.nrows(), other.ncols());
        Self::from_fn(ra * rb, ca * cb, |i, j| {
            self.inner.read(i / rb, j / cb) * other.inner.read(i % rb, j % cb)
        })
    }

    /// Element-wise addition: self + other.
    pub fn add(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        Self::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner.read(i, j) + other.inner.read(i, j)
        })
    }

    /// Element-wise subtraction: self - other.
    pub fn sub(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        Self::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner.read(i, j) - other.inner.read(i, j)
        })
    }

    /// Scalar multiplication.
    pub fn scale(&self, s: f64) -> DenseMatrix {
        Self::from_fn(self.nrows(), self.ncols(), |i, j| self.inner.read(i, j) * s)
    }

    /// Add `value` to every diagonal entry.
    pub fn add_diag(&self, value: &[f64]) -> DenseMatrix {
        assert_eq!(self.nrows(), self.ncols());
        assert_eq!(value.len(), self.nrows());
        let mut out = self.clone();
        for i in 0..self.nrows() {
            out.set(i, i, self.get(i, i) + value[i]);
        }
        out
    }

    /// Diagonal of a square matrix.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.inner.read(i, i)).collect()
    }

    /// Create a diagonal matrix from a vector.
    pub fn from_diag(diag: &[f64]) -> Self {
        let n = diag.len();
        let inner = Mat::from_fn(n, n, |i, j| if i == j { diag[i] } else { 0.0 });
        Self { inner }
    }

    pub fn trace(&self) -> f64 {
        self.diag().iter().sum()
    }

    /// Sum of every entry.
    pub fn sum(&self) -> f64 {
        self.to_col_major().iter().sum()
    }

    /// True when no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        (0..self.ncols()).all(|j| (0..self.nrows()).all(|i| self.inner.read(i, j).is_finite()))
    }

    /// Largest absolute element-wise difference against `other`.
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let mut worst = 0.0f64;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                worst = worst.max((self.inner.read(i, j) - other.inner.read(i, j)).abs());
            }
        }
        worst
    }

    /// Symmetric part (A + A') / 2.
    pub fn symmetrize(&self) -> DenseMatrix {
        assert_eq!(self.nrows(), self.ncols());
        Self::from_fn(self.nrows(), self.ncols(), |i, j| {
            0.5 * (self.inner.read(i, j) + self.inner.read(j, i))
        })
    }

    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Compute X' * diag(w) * X for design matrix X and weight vector w.
    pub fn xtwx(&self, w: &[f64]) -> DenseMatrix {
        let n = self.nrows();
        let p = self.ncols();
        assert_eq!(w.len(), n);
        let mut result = DenseMatrix::zeros(p, p);
        for j in 0..p {
            for k in j..p {
                let mut s = 0.0;
                for i in 0..n {
                    s += self.inner.read(i, j) * w[i] * self.inner.read(i, k);
                }
                result.set(j, k, s);
                if j != k {
                    result.set(k, j, s);
                }
            }
        }
        result
    }

    /// Compute X' * diag(w) * v.
    pub fn xtwv(&self, w: &[f64], v: &[f64]) -> Vec<f64> {
        let n = self.nrows();
        assert_eq!(w.len(), n);
        assert_eq!(v.len(), n);
        (0..self.ncols())
            .map(|j| (0..n).map(|i| self.inner.read(i, j) * w[i] * v[i]).sum())
            .collect()
    }

    /// Flatten in column-major order.
    pub fn to_col_major(&self) -> Vec<f64> {
        let mut data = Vec::with_capacity(self.nrows() * self.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                data.push(self.inner.read(i, j));
            }
        }
        data
    }

    /// Rows as nested vectors, for serialisation.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.nrows()).map(|i| self.row(i)).collect()
    }
}

impl PartialEq for DenseMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.nrows() == other.nrows()
            && self.ncols() == other.ncols()
            && self.to_col_major() == other.to_col_major()
    }
}

impl std::fmt::Display for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.nrows() {
            for j in 0..self.ncols() {
                if j > 0 {
                    write!(f, "\t")?;
                }
                write!(f, "{:.6}", self.inner.read(i, j))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_with_no_columns() {
        let m = DenseMatrix::zeros(3, 0);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 0);
        assert!(m.is_empty());
        let prod = DenseMatrix::identity(3).mat_mul(&m);
        assert_eq!(prod.ncols(), 0);
        let cross = m.t_mat_mul(&DenseMatrix::identity(3));
        assert_eq!((cross.nrows(), cross.ncols()), (0, 3));
    }

    #[test]
    fn test_mat_mul() {
        let a = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DenseMatrix::from_row_major(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.mat_mul(&b);
        assert!((c.get(0, 0) - 58.0).abs() < 1e-10);
        assert!((c.get(0, 1) - 64.0).abs() < 1e-10);
        assert!((c.get(1, 0) - 139.0).abs() < 1e-10);
        assert!((c.get(1, 1) - 154.0).abs() < 1e-10);
    }

    #[test]
    fn test_t_mat_mul_matches_transpose() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DenseMatrix::from_row_major(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let expected = a.transpose().mat_mul(&b);
        assert!(a.t_mat_mul(&b).max_abs_diff(&expected) < 1e-12);
        let v = [1.0, -1.0, 2.0];
        assert_eq!(a.t_mat_vec(&v), a.transpose().mat_vec(&v));
    }

    #[test]
    fn test_kron_layout() {
        let a = DenseMatrix::from_row_major(2, 1, &[1.0, 2.0]);
        let b = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 5.0, 7.0]);
        let k = a.kron(&b);
        assert_eq!((k.nrows(), k.ncols()), (4, 2));
        assert_eq!(k.col(0), vec![1.0, 5.0, 2.0, 10.0]);
        assert_eq!(k.col(1), vec![3.0, 7.0, 6.0, 14.0]);
    }

    #[test]
    fn test_hcat_and_select() {
        let a = DenseMatrix::from_row_major(2, 1, &[1.0, 2.0]);
        let b = DenseMatrix::from_row_major(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let c = a.hcat(&b);
        assert_eq!(c.row(1), vec![2.0, 5.0, 6.0]);
        let s = c.select_columns(&[2, 0]);
        assert_eq!(s.row(0), vec![4.0, 1.0]);
        let r = c.select_rows(&[1]);
        assert_eq!(r.row(0), vec![2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_xtwx() {
        let x = DenseMatrix::from_row_major(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let w = vec![1.0, 2.0, 3.0];
        let result = x.xtwx(&w);
        assert!((result.get(0, 0) - 4.0).abs() < 1e-10);
        assert!((result.get(0, 1) - 3.0).abs() < 1e-10);
        assert!((result.get(1, 1) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_is_finite() {
        let mut m = DenseMatrix::identity(2);
        assert!(m.is_finite());
        m.set(1, 0, f64::NAN);
        assert!(!m.is_finite());
    }
}
