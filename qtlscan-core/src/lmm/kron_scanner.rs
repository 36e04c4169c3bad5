//! Multi-trait fast scanner.
//!
//! The null covariance `C0 ⊗ K + C1 ⊗ I` is fixed at the fitted values; each
//! alternative adds `A1 ⊗ G` and profiles a common scale over the whole
//! covariance. The trait-space basis and the null normal equations are
//! built once.

use qtlscan_linalg::DenseMatrix;
use rayon::prelude::*;

use super::gls::{block_symmetric, profiled_lml, solve_gls, standard_errors};
use super::kron::{KronBasis, KronData, NullKronSystem};
use crate::error::{Result, ScanError};
use crate::scanner::{CandidateScanner, ScanOutput};

pub struct KronFastScanner {
    data: KronData,
    basis: KronBasis,
    system: NullKronSystem,
    null_lml: f64,
    null_beta: DenseMatrix,
    null_beta_cov: DenseMatrix,
    null_scale: f64,
}

impl KronFastScanner {
    pub(crate) fn new(data: KronData, c0: &DenseMatrix, c1: &DenseMatrix) -> Result<Self> {
        let basis = KronBasis::new(c0, c1, data.qs.s0(), data.nsamples())?;
        let system = data.null_system(&basis);
        let sol = solve_gls(&system.gram, &system.rhs, system.yy)?;
        let nobs = data.nsamples() * data.ntraits();
        let (null_lml, null_scale) = profiled_lml(nobs, sol.rss, basis.log_det);
        Ok(Self {
            null_beta: DenseMatrix::from_col_major(data.m.ncols(), data.a.ncols(), sol.beta),
            null_beta_cov: sol.gram_inv.scale(null_scale),
            data,
            basis,
            system,
            null_lml,
            null_scale,
        })
    }

    pub fn null_scale(&self) -> f64 {
        self.null_scale
    }

    pub fn ntraits(&self) -> usize {
        self.data.ntraits()
    }

    /// Alternative adding `a1 ⊗ g` to the null mean.
    pub fn scan(&self, a1: &DenseMatrix, g: &DenseMatrix) -> Result<ScanOutput> {
        let d = &self.data;
        if g.nrows() != d.nsamples() {
            return Err(ScanError::ShapeMismatch(format!(
                "candidates have {} rows for {} samples",
                g.nrows(),
                d.nsamples()
            )));
        }
        if a1.nrows() != d.ntraits() {
            return Err(ScanError::ShapeMismatch(format!(
                "candidate design has {} rows for {} traits",
                a1.nrows(),
                d.ntraits()
            )));
        }
        let t = &self.basis.t;
        let a1_t = t.mat_mul(a1);
        let gq = d.qs.rotate(g);
        let mtg = d.m.t_mat_mul(g);
        let gtg = g.t_mat_mul(g);
        let gty_t = g.t_mat_mul(&d.y).mat_mul(&t.transpose());

        let cross = self
            .basis
            .gram_block(&self.system.a_t, &a1_t, &mtg, &d.mq, &gq);
        let own = self.basis.gram_block(&a1_t, &a1_t, &gtg, &gq, &gq);
        let gram = block_symmetric(&self.system.gram, &cross, &own);
        let mut rhs = self.system.rhs.clone();
        rhs.extend(self.basis.rhs_block(&a1_t, &gty_t, &gq, &self.system.yq_t));

        let sol = solve_gls(&gram, &rhs, self.system.yy)?;
        let nobs = d.nsamples() * d.ntraits();
        let (lml, scale) = profiled_lml(nobs, sol.rss, self.basis.log_det);
        let se = standard_errors(&sol.gram_inv, scale);

        let (c, q0) = (d.m.ncols(), d.a.ncols());
        let (k, q1) = (g.ncols(), a1.ncols());
        let split = c * q0;
        Ok(ScanOutput {
            lml,
            effsizes0: DenseMatrix::from_col_major(c, q0, sol.beta[..split].to_vec()),
            effsizes0_se: DenseMatrix::from_col_major(c, q0, se[..split].to_vec()),
            effsizes1: DenseMatrix::from_col_major(k, q1, sol.beta[split..].to_vec()),
            effsizes1_se: DenseMatrix::from_col_major(k, q1, se[split..].to_vec()),
            scale,
        })
    }
}

impl CandidateScanner for KronFastScanner {
    fn null_lml(&self) -> f64 {
        self.null_lml
    }

    fn null_beta(&self) -> &DenseMatrix {
        &self.null_beta
    }

    fn null_beta_covariance(&self) -> &DenseMatrix {
        &self.null_beta_cov
    }

    /// One candidate at a time with a separate effect per trait.
    fn scan_all(&self, candidates: &DenseMatrix) -> Result<Vec<ScanOutput>> {
        let eye = DenseMatrix::identity(self.ntraits());
        (0..candidates.ncols())
            .into_par_iter()
            .map(|j| self.scan(&eye, &candidates.select_columns(&[j])))
            .collect()
    }

    fn scan_with_design(&self, design: &DenseMatrix, candidates: &DenseMatrix) -> Result<ScanOutput> {
        self.scan(design, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lmm::kron::{Kron2Sum, KronFit};
    use qtlscan_linalg::decomposition::inverse_spd;
    use qtlscan_linalg::CholeskyDecomp;

    fn fixture() -> (DenseMatrix, DenseMatrix, DenseMatrix, DenseMatrix, DenseMatrix) {
        let n = 8;
        let y = DenseMatrix::from_fn(n, 2, |i, j| ((i * 3 + j * 5) % 7) as f64 / 2.0 - 1.5);
        let m = DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { (i % 3) as f64 });
        let f = DenseMatrix::from_fn(n, 2, |i, j| ((i * 2 + j) % 5) as f64 / 3.0 - 0.6);
        let g = DenseMatrix::from_fn(n, 2, |i, j| ((i * i + 3 * j + 1) % 5) as f64);
        (y, DenseMatrix::identity(2), m, f, g)
    }

    fn fixed_fit() -> KronFit {
        KronFit {
            b: DenseMatrix::zeros(2, 2),
            c0: DenseMatrix::from_row_major(2, 2, &[0.5, 0.1, 0.1, 0.3]),
            c1: DenseMatrix::from_row_major(2, 2, &[0.8, 0.2, 0.2, 0.6]),
            lml: 0.0,
        }
    }

    fn dense_profiled_lml(vy: &[f64], x: &DenseMatrix, sigma: &DenseMatrix) -> f64 {
        let n = vy.len() as f64;
        let si = inverse_spd(sigma).unwrap();
        let gram = x.t_mat_mul(&si.mat_mul(x));
        let beta = inverse_spd(&gram).unwrap().mat_vec(&x.t_mat_vec(&si.mat_vec(vy)));
        let fit = x.mat_vec(&beta);
        let r: Vec<f64> = vy.iter().zip(&fit).map(|(a, b)| a - b).collect();
        let rss = DenseMatrix::dot(&r, &si.mat_vec(&r));
        let logdet = CholeskyDecomp::new(sigma).unwrap().log_det();
        -0.5 * n * ((2.0 * std::f64::consts::PI).ln() + (rss / n).ln() + 1.0) - 0.5 * logdet
    }

    #[test]
    fn test_scan_matches_dense_kronecker_gls() {
        let (y, a, m, f, g) = fixture();
        let model = Kron2Sum::new(&y, &a, &m, &f).unwrap();
        let fit = fixed_fit();
        let scanner = model.get_fast_scanner(&fit).unwrap();

        let k = f.mat_mul(&f.transpose());
        let sigma = fit.c0.kron(&k).add(&fit.c1.kron(&DenseMatrix::identity(8)));
        let vy = y.to_col_major();
        let x0 = a.kron(&m);
        let expected_null = dense_profiled_lml(&vy, &x0, &sigma);
        assert!((scanner.null_lml() - expected_null).abs() < 1e-8);

        let a1 = DenseMatrix::from_row_major(2, 1, &[1.0, -1.0]);
        let out = scanner.scan(&a1, &g).unwrap();
        let x1 = x0.hcat(&a1.kron(&g));
        let expected = dense_profiled_lml(&vy, &x1, &sigma);
        assert!((out.lml - expected).abs() < 1e-8, "{} vs {}", out.lml, expected);
        assert_eq!((out.effsizes0.nrows(), out.effsizes0.ncols()), (2, 2));
        assert_eq!((out.effsizes1.nrows(), out.effsizes1.ncols()), (2, 1));
        assert!(out.lml >= scanner.null_lml() - 1e-10);
    }

    #[test]
    fn test_scan_all_uses_identity_design() {
        let (y, a, m, f, g) = fixture();
        let model = Kron2Sum::new(&y, &a, &m, &f).unwrap();
        let scanner = model.get_fast_scanner(&fixed_fit()).unwrap();
        let all = scanner.scan_all(&g).unwrap();
        assert_eq!(all.len(), 2);
        for (j, out) in all.iter().enumerate() {
            let single = scanner
                .scan(&DenseMatrix::identity(2), &g.select_columns(&[j]))
                .unwrap();
            assert!((out.lml - single.lml).abs() < 1e-12);
            assert_eq!((out.effsizes1.nrows(), out.effsizes1.ncols()), (1, 2));
        }
    }

    #[test]
    fn test_design_row_mismatch() {
        let (y, a, m, f, g) = fixture();
        let model = Kron2Sum::new(&y, &a, &m, &f).unwrap();
        let scanner = model.get_fast_scanner(&fixed_fit()).unwrap();
        let err = scanner.scan(&DenseMatrix::identity(3), &g);
        assert!(matches!(err, Err(ScanError::ShapeMismatch(_))));
    }

    #[test]
    fn test_candidate_inside_covariate_span_matches_null() {
        let (y, a, m, f, _) = fixture();
        let model = Kron2Sum::new(&y, &a, &m, &f).unwrap();
        let scanner = model.get_fast_scanner(&fixed_fit()).unwrap();
        let a1 = DenseMatrix::from_row_major(2, 1, &[1.0, -1.0]);
        let out = scanner.scan(&a1, &m.select_columns(&[1])).unwrap();
        assert!(out.lml.is_finite());
        assert!(
            (out.lml - scanner.null_lml()).abs() < 1e-8,
            "{} vs {}",
            out.lml,
            scanner.null_lml()
        );
    }
}
