//! Gaussian mixed model with known heteroscedastic noise.
//!
//! `y ~ N(Xβ, v0 K + v1 I + diag(d))` for fixed per-sample variances `d`.
//! This is the model that the EP pseudo-observations follow; β has a
//! closed form and (v0, v1) are fitted on the log scale.

use qtlscan_linalg::{CholeskyDecomp, DenseMatrix};
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::lmm::gls::{fixed_scale_lml, solve_gls};
use crate::optim::{minimize_bfgs, BfgsOptions};

/// Bounds on log variance components.
const LOG_VARIANCE_BOUNDS: (f64, f64) = (-18.0, 12.0);

#[derive(Debug, Clone)]
pub struct NormalFit {
    pub beta: Vec<f64>,
    pub v0: f64,
    pub v1: f64,
    pub lml: f64,
}

pub struct GlmmNormal<'a> {
    y: &'a [f64],
    x: &'a DenseMatrix,
    k: Option<&'a DenseMatrix>,
    noise: &'a [f64],
}

impl<'a> GlmmNormal<'a> {
    pub fn new(
        y: &'a [f64],
        x: &'a DenseMatrix,
        k: Option<&'a DenseMatrix>,
        noise: &'a [f64],
    ) -> Result<Self> {
        let n = y.len();
        let k_rows = k.map_or(n, |k| k.nrows());
        if x.nrows() != n || noise.len() != n || k_rows != n {
            return Err(ScanError::ShapeMismatch(format!(
                "pseudo-observations {}, covariates {}, noise {}, covariance {}",
                n,
                x.nrows(),
                noise.len(),
                k_rows
            )));
        }
        Ok(Self { y, x, k, noise })
    }

    pub fn covariance(&self, v0: f64, v1: f64) -> DenseMatrix {
        let diag: Vec<f64> = self.noise.iter().map(|d| d + v1).collect();
        match self.k {
            Some(k) => k.scale(v0).add_diag(&diag),
            None => DenseMatrix::from_diag(&diag),
        }
        .symmetrize()
    }

    /// Log marginal likelihood with β at its GLS estimate.
    pub fn lml(&self, v0: f64, v1: f64) -> Result<(f64, Vec<f64>)> {
        let chol = CholeskyDecomp::new(&self.covariance(v0, v1))?;
        let wx = chol.solve_lower_mat(self.x);
        let wy = chol.solve_lower(self.y);
        let gram = wx.t_mat_mul(&wx);
        let rhs = wx.t_mat_vec(&wy);
        let sol = solve_gls(&gram, &rhs, DenseMatrix::dot(&wy, &wy))?;
        Ok((fixed_scale_lml(self.y.len(), sol.rss, chol.log_det()), sol.beta))
    }

    /// Fit (v0, v1) by BFGS on their logarithms, starting from `start`.
    ///
    /// Without a covariance matrix v0 is fixed at zero.
    pub fn fit(&self, start: (f64, f64), options: &BfgsOptions) -> Result<NormalFit> {
        let (lo, hi) = LOG_VARIANCE_BOUNDS;
        let to_log = |v: f64| v.max(lo.exp()).ln().clamp(lo, hi);
        let has_k = self.k.is_some();
        let decode = |theta: &[f64]| -> (f64, f64) {
            if has_k {
                (theta[0].clamp(lo, hi).exp(), theta[1].clamp(lo, hi).exp())
            } else {
                (0.0, theta[0].clamp(lo, hi).exp())
            }
        };
        let theta0 = if has_k {
            vec![to_log(start.0), to_log(start.1)]
        } else {
            vec![to_log(start.1)]
        };

        let cost = |theta: &[f64]| {
            let (v0, v1) = decode(theta);
            match self.lml(v0, v1) {
                Ok((l, _)) => -l,
                Err(_) => f64::INFINITY,
            }
        };
        let min = minimize_bfgs(cost, theta0, options)?;
        let (v0, v1) = decode(&min.point);
        let (lml, beta) = self.lml(v0, v1)?;
        debug!("Pseudo-observation LMM: v0={:.6}, v1={:.6}, lml={:.6}", v0, v1, lml);
        Ok(NormalFit { beta, v0, v1, lml })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtlscan_linalg::decomposition::inverse_spd;

    fn fixture() -> (Vec<f64>, DenseMatrix, DenseMatrix, Vec<f64>) {
        let n = 6;
        let y = vec![0.5, -1.2, 2.0, 0.3, 1.1, -0.4];
        let x = DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 });
        let f = DenseMatrix::from_fn(n, 2, |i, j| ((i + 2 * j) % 3) as f64 - 1.0);
        let k = f.mat_mul(&f.transpose());
        let noise = vec![0.5, 1.0, 0.2, 0.8, 0.3, 0.6];
        (y, x, k, noise)
    }

    #[test]
    fn test_lml_matches_dense_formula() {
        let (y, x, k, noise) = fixture();
        let model = GlmmNormal::new(&y, &x, Some(&k), &noise).unwrap();
        let (lml, beta) = model.lml(0.4, 0.1).unwrap();

        let sigma = model.covariance(0.4, 0.1);
        let si = inverse_spd(&sigma).unwrap();
        let gram = x.t_mat_mul(&si.mat_mul(&x));
        let b = inverse_spd(&gram).unwrap().mat_vec(&x.t_mat_vec(&si.mat_vec(&y)));
        let r: Vec<f64> = y.iter().zip(x.mat_vec(&b)).map(|(a, f)| a - f).collect();
        let quad = DenseMatrix::dot(&r, &si.mat_vec(&r));
        let ld = CholeskyDecomp::new(&sigma).unwrap().log_det();
        let expected = -0.5 * (6.0 * (2.0 * std::f64::consts::PI).ln() + ld + quad);
        assert!((lml - expected).abs() < 1e-10);
        for (a, e) in beta.iter().zip(&b) {
            assert!((a - e).abs() < 1e-10);
        }
    }

    #[test]
    fn test_fit_does_not_decrease_lml() {
        let (y, x, k, noise) = fixture();
        let model = GlmmNormal::new(&y, &x, Some(&k), &noise).unwrap();
        let start = model.lml(0.5, 0.5).unwrap().0;
        let fit = model.fit((0.5, 0.5), &BfgsOptions::default()).unwrap();
        assert!(fit.lml >= start - 1e-10);
        assert!(fit.v0 > 0.0 && fit.v1 > 0.0);
    }

    #[test]
    fn test_without_covariance_only_fits_v1() {
        let (y, x, _, noise) = fixture();
        let model = GlmmNormal::new(&y, &x, None, &noise).unwrap();
        let fit = model.fit((0.0, 0.5), &BfgsOptions::default()).unwrap();
        assert_eq!(fit.v0, 0.0);
        assert!(fit.v1 > 0.0);
    }
}
