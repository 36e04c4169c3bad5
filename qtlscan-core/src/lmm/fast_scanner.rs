//! Single-trait fast scanner.
//!
//! Null model `y ~ N(Xβ, s·(Q0 diag(S0) Q0' + v I))`. Everything that does
//! not depend on the candidate (the rotations of y and X, their weighted
//! cross products, and the log-determinant) is computed once; each
//! candidate then costs a rotation of its own column plus a small
//! (c + k) system.

use qtlscan_linalg::{DenseMatrix, EconomicQs};
use rayon::prelude::*;

use super::gls::{block_symmetric, profiled_lml, solve_gls, standard_errors, Spectrum};
use crate::error::{Result, ScanError};
use crate::scanner::{CandidateScanner, ScanOutput};

/// Rotations and raw cross products of (y, X).
#[derive(Debug, Clone)]
pub(crate) struct RotatedData {
    pub y: Vec<f64>,
    pub x: DenseMatrix,
    pub yq: Vec<f64>,
    pub xq: DenseMatrix,
    pub yty: f64,
    pub xtx: DenseMatrix,
    pub xty: Vec<f64>,
}

impl RotatedData {
    pub fn new(y: &[f64], x: &DenseMatrix, qs: &EconomicQs) -> Result<Self> {
        if x.nrows() != y.len() || qs.nsamples() != y.len() {
            return Err(ScanError::ShapeMismatch(format!(
                "outcome has {} samples, covariates {}, covariance {}",
                y.len(),
                x.nrows(),
                qs.nsamples()
            )));
        }
        Ok(Self {
            y: y.to_vec(),
            x: x.clone(),
            yq: qs.rotate_vec(y),
            xq: qs.rotate(x),
            yty: DenseMatrix::dot(y, y),
            xtx: x.t_mat_mul(x),
            xty: x.t_mat_vec(y),
        })
    }

    pub fn nsamples(&self) -> usize {
        self.y.len()
    }
}

/// Weighted null statistics for one covariance.
#[derive(Debug, Clone)]
pub(crate) struct NullSystem {
    pub xtsx: DenseMatrix,
    pub xtsy: Vec<f64>,
    pub ytsy: f64,
}

impl NullSystem {
    pub fn new(data: &RotatedData, spectrum: &Spectrum) -> Self {
        Self {
            xtsx: spectrum.cross(&data.xtx, &data.xq, &data.xq),
            xtsy: spectrum.cross_vec(&data.xty, &data.xq, &data.yq),
            ytsy: spectrum.quad(data.yty, &data.yq),
        }
    }
}

pub struct FastScanner {
    data: RotatedData,
    qs: EconomicQs,
    spectrum: Spectrum,
    system: NullSystem,
    null_lml: f64,
    null_beta: DenseMatrix,
    null_beta_cov: DenseMatrix,
    null_scale: f64,
}

impl FastScanner {
    /// Scanner for covariance `Q0 diag(S0) Q0' + v I` (up to scale).
    pub fn new(y: &[f64], x: &DenseMatrix, qs: &EconomicQs, v: f64) -> Result<Self> {
        let data = RotatedData::new(y, x, qs)?;
        let spectrum = Spectrum::new(qs.s0(), v, y.len())?;
        let system = NullSystem::new(&data, &spectrum);
        let sol = solve_gls(&system.xtsx, &system.xtsy, system.ytsy)?;
        let (null_lml, null_scale) = profiled_lml(y.len(), sol.rss, spectrum.log_det());
        let c = x.ncols();
        Ok(Self {
            null_beta: DenseMatrix::from_col_major(c, 1, sol.beta),
            null_beta_cov: sol.gram_inv.scale(null_scale),
            data,
            qs: qs.clone(),
            spectrum,
            system,
            null_lml,
            null_scale,
        })
    }

    pub fn null_scale(&self) -> f64 {
        self.null_scale
    }

    /// Alternative adding the columns of `w` (n x k) jointly, given `wq = Q0'w`.
    fn scan_block(&self, w: &DenseMatrix, wq: &DenseMatrix) -> Result<ScanOutput> {
        let d = &self.data;
        let c = d.x.ncols();
        let k = w.ncols();

        let xtsw = self.spectrum.cross(&d.x.t_mat_mul(w), &d.xq, wq);
        let wtsw = self.spectrum.cross(&w.t_mat_mul(w), wq, wq);
        let wtsy = self.spectrum.cross_vec(&w.t_mat_vec(&d.y), wq, &d.yq);

        let gram = block_symmetric(&self.system.xtsx, &xtsw, &wtsw);
        let mut rhs = self.system.xtsy.clone();
        rhs.extend(wtsy);

        let sol = solve_gls(&gram, &rhs, self.system.ytsy)?;
        let (lml, scale) = profiled_lml(d.nsamples(), sol.rss, self.spectrum.log_det());
        let se = standard_errors(&sol.gram_inv, scale);

        Ok(ScanOutput {
            lml,
            effsizes0: DenseMatrix::from_col_major(c, 1, sol.beta[..c].to_vec()),
            effsizes0_se: DenseMatrix::from_col_major(c, 1, se[..c].to_vec()),
            effsizes1: DenseMatrix::from_col_major(k, 1, sol.beta[c..].to_vec()),
            effsizes1_se: DenseMatrix::from_col_major(k, 1, se[c..].to_vec()),
            scale,
        })
    }

    fn check_candidates(&self, g: &DenseMatrix) -> Result<()> {
        if g.nrows() != self.data.nsamples() {
            return Err(ScanError::ShapeMismatch(format!(
                "candidates have {} rows for {} samples",
                g.nrows(),
                self.data.nsamples()
            )));
        }
        Ok(())
    }

    /// Each column of `g` tested on its own, in one batched pass.
    pub fn fast_scan(&self, g: &DenseMatrix) -> Result<Vec<ScanOutput>> {
        self.check_candidates(g)?;
        let gq = self.qs.rotate(g);
        (0..g.ncols())
            .into_par_iter()
            .map(|j| self.scan_block(&g.select_columns(&[j]), &gq.select_columns(&[j])))
            .collect()
    }

    /// All columns of `g` added jointly. `a` must have no columns.
    pub fn scan(&self, a: &DenseMatrix, g: &DenseMatrix) -> Result<ScanOutput> {
        if a.ncols() != 0 {
            return Err(ScanError::DesignUnsupported(a.ncols()));
        }
        self.check_candidates(g)?;
        self.scan_block(g, &self.qs.rotate(g))
    }
}

impl CandidateScanner for FastScanner {
    fn null_lml(&self) -> f64 {
        self.null_lml
    }

    fn null_beta(&self) -> &DenseMatrix {
        &self.null_beta
    }

    fn null_beta_covariance(&self) -> &DenseMatrix {
        &self.null_beta_cov
    }

    fn scan_all(&self, candidates: &DenseMatrix) -> Result<Vec<ScanOutput>> {
        self.fast_scan(candidates)
    }

    fn scan_with_design(&self, design: &DenseMatrix, candidates: &DenseMatrix) -> Result<ScanOutput> {
        self.scan(design, candidates)
    }
}
