//! The scanner seam between null-model fitting and the scan loop.
//!
//! A scanner owns the sufficient statistics of a fitted null model and
//! evaluates alternative models that add candidate fixed effects. Scans
//! never mutate the scanner, so they can run in any order or in parallel.

use qtlscan_linalg::DenseMatrix;

use crate::error::Result;

/// Raw outcome of one alternative-model evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutput {
    /// Log marginal likelihood at the optimal scale.
    pub lml: f64,
    /// Covariate effects, c x p (p = 1 for a single trait).
    pub effsizes0: DenseMatrix,
    pub effsizes0_se: DenseMatrix,
    /// Candidate effects, k candidates x q design columns.
    pub effsizes1: DenseMatrix,
    pub effsizes1_se: DenseMatrix,
    /// Profiled multiplier of the null covariance.
    pub scale: f64,
}

pub trait CandidateScanner: Send + Sync {
    /// Null log marginal likelihood at the optimal scale.
    fn null_lml(&self) -> f64;

    /// Null covariate effects, c x p.
    fn null_beta(&self) -> &DenseMatrix;

    /// Covariance of `vec(null_beta)`.
    fn null_beta_covariance(&self) -> &DenseMatrix;

    /// Standard errors shaped like [`null_beta`](Self::null_beta).
    fn null_beta_se(&self) -> DenseMatrix {
        let beta = self.null_beta();
        let cov = self.null_beta_covariance();
        let se: Vec<f64> = cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect();
        DenseMatrix::from_col_major(beta.nrows(), beta.ncols(), se)
    }

    /// Test each column of `candidates` on its own.
    fn scan_all(&self, candidates: &DenseMatrix) -> Result<Vec<ScanOutput>>;

    /// Test the alternative that adds `design ⊗ candidates`.
    fn scan_with_design(&self, design: &DenseMatrix, candidates: &DenseMatrix) -> Result<ScanOutput>;
}
