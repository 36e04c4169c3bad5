//! GLM fit without random effects, used to start the GLMM fit.

use qtlscan_linalg::{CholeskyDecomp, DenseMatrix};
use tracing::debug;

use super::family::Family;
use crate::error::Result;

/// Fit a GLM by IRLS (Newton steps on the log-likelihood).
///
/// Working weights are the negative second derivatives of the log density
/// and the working response is `eta + d1 / w`. A step that lowers the
/// log-likelihood is halved until it does not.
pub fn fit_glm_irls(y: &[f64], x: &DenseMatrix, family: &Family, max_iter: usize) -> Result<Vec<f64>> {
    let p = x.ncols();
    let mut eta = family.initialize_eta(y);
    let mut alpha = vec![0.0; p];
    let mut loglik = f64::NEG_INFINITY;

    for iter in 0..max_iter {
        let (w, z): (Vec<f64>, Vec<f64>) = eta
            .iter()
            .zip(y.iter())
            .enumerate()
            .map(|(i, (&ei, &yi))| {
                let d = family.log_density(i, yi, ei);
                let wi = (-d.d2).max(1e-10);
                (wi, ei + d.d1 / wi)
            })
            .unzip();

        // Weighted least squares: (X'WX)^{-1} X'Wz
        let xtwx = x.xtwx(&w);
        let xtwz = x.xtwv(&w, &z);

        let proposal = match CholeskyDecomp::new(&xtwx) {
            Ok(chol) => chol.solve(&xtwz),
            Err(_) => {
                // Fallback: add small diagonal
                let mut xtwx_reg = xtwx.clone();
                for i in 0..p {
                    xtwx_reg.set(i, i, xtwx_reg.get(i, i) + 1e-6);
                }
                CholeskyDecomp::new(&xtwx_reg)?.solve(&xtwz)
            }
        };

        let mut step = 1.0;
        let mut alpha_new;
        let mut eta_new;
        let mut loglik_new;
        loop {
            alpha_new = alpha
                .iter()
                .zip(&proposal)
                .map(|(a, b)| a + step * (b - a))
                .collect::<Vec<_>>();
            eta_new = x.mat_vec(&alpha_new);
            loglik_new = family.log_likelihood(y, &eta_new);
            if (loglik_new.is_finite() && loglik_new >= loglik - 1e-10) || step < 1e-4 || iter == 0 {
                break;
            }
            step *= 0.5;
        }

        let change: f64 = alpha_new
            .iter()
            .zip(alpha.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>();

        alpha = alpha_new;
        eta = eta_new;
        loglik = loglik_new;
        debug!("IRLS iter {}: loglik={:.6}, change={:.2e}", iter, loglik, change);

        if change < 1e-8 {
            break;
        }
    }

    Ok(alpha)
}
