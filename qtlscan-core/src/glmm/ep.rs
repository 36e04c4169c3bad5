//! Expectation propagation for a GLMM with latent prior `N(m, Σ)`.
//!
//! Each likelihood term is replaced by an unnormalised Gaussian site with
//! precision `τ̃ᵢ` and natural mean `ν̃ᵢ`. Sites are refreshed in parallel
//! (all cavities from one posterior) and then damped. The posterior is
//! handled through `B = I + S̃½ Σ S̃½`, which stays well conditioned when
//! site precisions vanish.

use qtlscan_linalg::{CholeskyDecomp, DenseMatrix};
use tracing::debug;

use super::family::Family;
use super::quadrature::{GaussHermite, Moments};
use crate::error::{Result, ScanError};
use crate::util::math::{inv_mills, log_normal_cdf, max_relative_change};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Debug, Clone)]
pub struct EpConfig {
    /// Weight kept from the previous site values in each sweep.
    pub damping: f64,
    /// Maximum parallel sweeps per EP run.
    pub max_sweeps: usize,
    /// Site convergence tolerance (maximum relative change).
    pub tol: f64,
    pub quadrature_points: usize,
    /// Lower bound on site precisions.
    pub min_precision: f64,
    /// Alternations between EP and the pseudo-observation fit.
    pub max_outer: usize,
    pub outer_tol: f64,
    /// IRLS iterations for the starting coefficients.
    pub irls_max_iter: usize,
}

impl Default for EpConfig {
    fn default() -> Self {
        Self {
            damping: 0.2,
            max_sweeps: 200,
            tol: 1e-7,
            quadrature_points: 30,
            min_precision: 1e-8,
            max_outer: 30,
            outer_tol: 1e-5,
            irls_max_iter: 50,
        }
    }
}

/// Gaussian site parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EpSites {
    /// Precisions τ̃.
    pub tau: Vec<f64>,
    /// Natural means ν̃ = τ̃ μ̃.
    pub nu: Vec<f64>,
}

impl EpSites {
    pub fn new(n: usize) -> Self {
        Self {
            tau: vec![0.0; n],
            nu: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.tau.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tau.is_empty()
    }

    /// Pseudo-observations ν̃ / τ̃.
    pub fn pseudo_outcome(&self) -> Vec<f64> {
        self.nu.iter().zip(&self.tau).map(|(n, t)| n / t).collect()
    }

    /// Heteroscedastic noise variances 1 / τ̃.
    pub fn noise_variances(&self) -> Vec<f64> {
        self.tau.iter().map(|t| 1.0 / t).collect()
    }
}

/// Marginals of the Gaussian approximation to the posterior.
#[derive(Debug, Clone)]
struct Posterior {
    mean: Vec<f64>,
    variance: Vec<f64>,
    chol: CholeskyDecomp,
    sqrt_tau: Vec<f64>,
}

/// Outcome of one EP run.
#[derive(Debug, Clone, Copy)]
pub struct EpSummary {
    pub sweeps: usize,
    pub converged: bool,
}

pub struct ExpectationPropagation<'a> {
    family: &'a Family,
    y: &'a [f64],
    quadrature: GaussHermite,
    config: EpConfig,
}

impl<'a> ExpectationPropagation<'a> {
    pub fn new(family: &'a Family, y: &'a [f64], config: &EpConfig) -> Result<Self> {
        Ok(Self {
            family,
            y,
            quadrature: GaussHermite::new(config.quadrature_points)?,
            config: config.clone(),
        })
    }

    fn posterior(&self, mean: &[f64], cov: &DenseMatrix, sites: &EpSites) -> Result<Posterior> {
        let n = mean.len();
        let sqrt_tau: Vec<f64> = sites.tau.iter().map(|t| t.max(0.0).sqrt()).collect();
        let b = DenseMatrix::from_fn(n, n, |i, j| {
            let v = sqrt_tau[i] * cov.get(i, j) * sqrt_tau[j];
            if i == j {
                v + 1.0
            } else {
                v
            }
        });
        let chol = CholeskyDecomp::new(&b).map_err(|_| {
            ScanError::FittingFailure("EP posterior system is not positive definite".into())
        })?;
        // V = L⁻¹ S̃½ Σ, so the posterior covariance is Σ - V'V.
        let scaled = DenseMatrix::from_fn(n, n, |i, j| sqrt_tau[i] * cov.get(i, j));
        let v = chol.solve_lower_mat(&scaled);

        let r: Vec<f64> = (0..n).map(|i| sites.nu[i] - sites.tau[i] * mean[i]).collect();
        let vr = v.mat_vec(&r);
        let vtvr = v.t_mat_vec(&vr);
        let sr = cov.mat_vec(&r);
        let post_mean: Vec<f64> = (0..n).map(|i| mean[i] + sr[i] - vtvr[i]).collect();
        let post_var: Vec<f64> = (0..n)
            .map(|i| {
                let vv: f64 = (0..n).map(|k| v.get(k, i).powi(2)).sum();
                (cov.get(i, i) - vv).max(1e-300)
            })
            .collect();
        Ok(Posterior {
            mean: post_mean,
            variance: post_var,
            chol,
            sqrt_tau,
        })
    }

    /// Moments of `p(yᵢ | f) N(f | μ, σ²)` normalised over f.
    fn tilted(&self, i: usize, mu: f64, var: f64) -> Moments {
        let y = self.y[i];
        if self.family.is_probit() {
            let s = 2.0 * y - 1.0;
            let denom = (1.0 + var).sqrt();
            let z = s * mu / denom;
            let r = inv_mills(z);
            return Moments {
                log_z: log_normal_cdf(z),
                mean: mu + s * var * r / denom,
                variance: var - var * var * r * (z + r) / (1.0 + var),
            };
        }

        let prec = 1.0 / var;
        let mut f = mu;
        let mut curvature = -prec;
        for _ in 0..100 {
            let d = self.family.log_density(i, y, f);
            let grad = d.d1 - prec * (f - mu);
            curvature = d.d2 - prec;
            let step = (grad / curvature).clamp(-10.0, 10.0);
            f -= step;
            if step.abs() < 1e-10 {
                break;
            }
        }
        let scale = (-1.0 / curvature).sqrt();
        let log_phi = |x: f64| self.family.log_density(i, y, x).value - 0.5 * prec * (x - mu).powi(2);
        let m = self.quadrature.moments(log_phi, f, scale);
        Moments {
            log_z: m.log_z - 0.5 * (LN_2PI + var.ln()),
            ..m
        }
    }

    /// Run parallel EP sweeps from `sites` to convergence.
    pub fn run(&self, mean: &[f64], cov: &DenseMatrix, sites: &mut EpSites) -> Result<EpSummary> {
        let n = mean.len();
        if sites.len() != n || self.y.len() != n || cov.nrows() != n {
            return Err(ScanError::ShapeMismatch(format!(
                "EP with {} outcomes, {} sites, prior of size {}",
                self.y.len(),
                sites.len(),
                cov.nrows()
            )));
        }
        let keep = self.config.damping.clamp(0.0, 0.99);

        for sweep in 0..self.config.max_sweeps {
            let post = self.posterior(mean, cov, sites)?;
            let mut tau_new = sites.tau.clone();
            let mut nu_new = sites.nu.clone();
            for i in 0..n {
                let cav_tau = 1.0 / post.variance[i] - sites.tau[i];
                if !(cav_tau > 0.0) {
                    continue;
                }
                let cav_nu = post.mean[i] / post.variance[i] - sites.nu[i];
                let t = self.tilted(i, cav_nu / cav_tau, 1.0 / cav_tau);
                if !(t.variance > 0.0) || !t.mean.is_finite() {
                    continue;
                }
                let tau_i = (1.0 / t.variance - cav_tau).max(self.config.min_precision);
                let nu_i = t.mean / t.variance - cav_nu;
                tau_new[i] = keep * sites.tau[i] + (1.0 - keep) * tau_i;
                nu_new[i] = keep * sites.nu[i] + (1.0 - keep) * nu_i;
            }
            for t in tau_new.iter_mut() {
                *t = t.max(self.config.min_precision);
            }
            let change = max_relative_change(&sites.tau, &tau_new)
                .max(max_relative_change(&sites.nu, &nu_new));
            sites.tau = tau_new;
            sites.nu = nu_new;
            debug!("EP sweep {}: max relative site change {:.3e}", sweep, change);
            if change < self.config.tol {
                return Ok(EpSummary {
                    sweeps: sweep + 1,
                    converged: true,
                });
            }
        }
        Ok(EpSummary {
            sweeps: self.config.max_sweeps,
            converged: false,
        })
    }

    /// EP approximation to the log marginal likelihood at the current sites.
    ///
    /// Each site is normalised so that site x cavity integrates to the
    /// tilted normaliser; the product of sites against the prior is then a
    /// Gaussian integral.
    pub fn log_marginal(&self, mean: &[f64], cov: &DenseMatrix, sites: &EpSites) -> Result<f64> {
        let n = mean.len();
        let post = self.posterior(mean, cov, sites)?;
        let site_mean = sites.pseudo_outcome();

        let mut total = 0.0;
        for i in 0..n {
            let cav_tau = 1.0 / post.variance[i] - sites.tau[i];
            if !(cav_tau > 0.0) {
                return Err(ScanError::FittingFailure(format!(
                    "EP cavity {} has non-positive precision",
                    i
                )));
            }
            let cav_mu = (post.mean[i] / post.variance[i] - sites.nu[i]) / cav_tau;
            let cav_var = 1.0 / cav_tau;
            let t = self.tilted(i, cav_mu, cav_var);
            let v = cav_var + 1.0 / sites.tau[i];
            let log_norm = -0.5 * (LN_2PI + v.ln() + (cav_mu - site_mean[i]).powi(2) / v);
            total += t.log_z - log_norm;
        }

        // log N(μ̃ | m, Σ + S̃⁻¹) with Σ + S̃⁻¹ = S̃^-½ B S̃^-½.
        let scaled: Vec<f64> = (0..n)
            .map(|i| post.sqrt_tau[i] * (site_mean[i] - mean[i]))
            .collect();
        let w = post.chol.solve_lower(&scaled);
        let quad = DenseMatrix::dot(&w, &w);
        let log_det = post.chol.log_det() - sites.tau.iter().map(|t| t.ln()).sum::<f64>();
        total += -0.5 * (n as f64 * LN_2PI + log_det + quad);
        Ok(total)
    }
}
