//! Economic eigendecomposition of covariance matrices.
//!
//! A positive semi-definite K is kept as `Q0 diag(S0) Q0'` where S0 holds
//! only the eigenvalues above [`ECONOMIC_QS_EPSILON`]. The complementary
//! eigenvectors Q1 are never materialised: every quadratic form against
//! `K + v I` can be written through Q0 alone, since `Q1 Q1' = I - Q0 Q0'`.

use crate::decomposition::{LinalgError, SymmetricEigen};
use crate::dense::DenseMatrix;

/// Eigenvalues at or below this are treated as zero.
pub const ECONOMIC_QS_EPSILON: f64 = 1.490_116_119_384_765_6e-8;

#[derive(Debug, Clone)]
pub struct EconomicQs {
    /// n x r eigenvectors for the retained eigenvalues.
    q0: DenseMatrix,
    /// r retained eigenvalues, descending.
    s0: Vec<f64>,
}

impl EconomicQs {
    /// Decompose a symmetric n x n covariance matrix.
    pub fn from_covariance(k: &DenseMatrix) -> Result<Self, LinalgError> {
        let eig = SymmetricEigen::new(&k.symmetrize())?;
        let keep: Vec<usize> = (0..eig.values.len())
            .filter(|&i| eig.values[i] > ECONOMIC_QS_EPSILON)
            .collect();
        Ok(Self {
            q0: eig.vectors.select_columns(&keep),
            s0: keep.iter().map(|&i| eig.values[i]).collect(),
        })
    }

    /// Decompose `G G'` for an n x m factor G without forming the n x n product.
    ///
    /// A factor of all zeros yields rank zero.
    pub fn from_factor(g: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = g.nrows();
        let gtg = g.t_mat_mul(g);
        let eig = SymmetricEigen::new(&gtg.symmetrize())?;
        let keep: Vec<usize> = (0..eig.values.len())
            .filter(|&i| eig.values[i] > ECONOMIC_QS_EPSILON)
            .collect();

        // Left singular vectors: G v / sqrt(λ).
        let v = eig.vectors.select_columns(&keep);
        let gv = g.mat_mul(&v);
        let mut q0 = DenseMatrix::zeros(n, keep.len());
        for (j, &k) in keep.iter().enumerate() {
            let scale = 1.0 / eig.values[k].sqrt();
            for i in 0..n {
                q0.set(i, j, gv.get(i, j) * scale);
            }
        }
        Ok(Self {
            q0,
            s0: keep.iter().map(|&i| eig.values[i]).collect(),
        })
    }

    /// Rank-zero decomposition over `n` samples.
    pub fn empty(n: usize) -> Self {
        Self {
            q0: DenseMatrix::zeros(n, 0),
            s0: Vec::new(),
        }
    }

    pub fn nsamples(&self) -> usize {
        self.q0.nrows()
    }

    pub fn rank(&self) -> usize {
        self.s0.len()
    }

    pub fn q0(&self) -> &DenseMatrix {
        &self.q0
    }

    pub fn s0(&self) -> &[f64] {
        &self.s0
    }

    /// Same eigenvectors with eigenvalues multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            q0: self.q0.clone(),
            s0: self.s0.iter().map(|s| s * factor).collect(),
        }
    }

    /// Q0' X.
    pub fn rotate(&self, x: &DenseMatrix) -> DenseMatrix {
        self.q0.t_mat_mul(x)
    }

    /// Q0' v.
    pub fn rotate_vec(&self, v: &[f64]) -> Vec<f64> {
        self.q0.t_mat_vec(v)
    }

    /// Reassemble Q0 diag(S0) Q0'.
    pub fn covariance(&self) -> DenseMatrix {
        let n = self.nsamples();
        let mut qs = self.q0.clone();
        for (j, &s) in self.s0.iter().enumerate() {
            for i in 0..n {
                qs.set(i, j, qs.get(i, j) * s);
            }
        }
        qs.mat_mul(&self.q0.transpose())
    }
}
