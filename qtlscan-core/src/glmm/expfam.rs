//! Exponential-family GLMM fitted by expectation propagation.
//!
//! `yᵢ ~ p(yᵢ | g(zᵢ))`, `z ~ N(Xβ, v0 K + v1 I)`. EP turns the likelihood
//! into Gaussian sites; with sites fixed, the marginal likelihood in
//! (β, v0, v1) is that of a Gaussian LMM on the pseudo-observations with
//! extra noise `1/τ̃`. The fit alternates the two steps.

use qtlscan_linalg::{DenseMatrix, EconomicQs};
use tracing::{debug, info, warn};

use super::ep::{EpConfig, EpSites, ExpectationPropagation};
use super::family::Family;
use super::irls::fit_glm_irls;
use super::normal::GlmmNormal;
use crate::error::{Result, ScanError};
use crate::lmm::FastScanner;
use crate::optim::BfgsOptions;
use crate::util::math::max_relative_change;

/// Fitted GLMM null model.
#[derive(Debug, Clone)]
pub struct GlmmFit {
    pub beta: Vec<f64>,
    /// Genetic variance; `None` without a covariance matrix.
    pub v0: Option<f64>,
    pub v1: f64,
    pub sites: EpSites,
    /// EP approximation to the log marginal likelihood.
    pub lml: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub struct GlmmExpFam {
    y: Vec<f64>,
    x: DenseMatrix,
    k: Option<DenseMatrix>,
    family: Family,
    config: EpConfig,
}

impl GlmmExpFam {
    pub fn new(
        y: &[f64],
        x: &DenseMatrix,
        qs: Option<&EconomicQs>,
        family: Family,
        config: &EpConfig,
    ) -> Result<Self> {
        let n = y.len();
        if x.nrows() != n || qs.map_or(false, |q| q.nsamples() != n) {
            return Err(ScanError::ShapeMismatch(format!(
                "outcome has {} samples, covariates {}",
                n,
                x.nrows()
            )));
        }
        family.likelihood().validate_outcome(y)?;
        let k = qs.filter(|q| q.rank() > 0).map(|q| q.covariance());
        Ok(Self {
            y: y.to_vec(),
            x: x.clone(),
            k,
            family,
            config: config.clone(),
        })
    }

    fn prior_covariance(&self, v0: f64, v1: f64) -> DenseMatrix {
        let n = self.y.len();
        match &self.k {
            Some(k) => k.scale(v0).add_diag(&vec![v1; n]),
            None => DenseMatrix::from_diag(&vec![v1; n]),
        }
    }

    pub fn fit(&self) -> Result<GlmmFit> {
        let n = self.y.len();
        let has_k = self.k.is_some();
        info!(
            "Fitting {} GLMM by EP: {} samples, {} covariates",
            self.family.likelihood().name(),
            n,
            self.x.ncols()
        );

        let ep = ExpectationPropagation::new(&self.family, &self.y, &self.config)?;
        let mut beta = fit_glm_irls(&self.y, &self.x, &self.family, self.config.irls_max_iter)?;
        let mut v0 = if has_k { 0.5 } else { 0.0 };
        let mut v1 = 0.5;
        let mut sites = EpSites::new(n);
        let options = BfgsOptions::default();

        let mut converged = false;
        let mut iterations = 0;
        for outer in 0..self.config.max_outer {
            iterations = outer + 1;
            let mean = self.x.mat_vec(&beta);
            let summary = ep.run(&mean, &self.prior_covariance(v0, v1), &mut sites)?;
            if !summary.converged {
                debug!("EP did not converge in {} sweeps", summary.sweeps);
            }

            let pseudo = sites.pseudo_outcome();
            let noise = sites.noise_variances();
            let normal = GlmmNormal::new(&pseudo, &self.x, self.k.as_ref(), &noise)?;
            let next = normal.fit((v0, v1), &options)?;

            let mut old = beta.clone();
            old.extend([v0, v1]);
            let mut new = next.beta.clone();
            new.extend([next.v0, next.v1]);
            let change = max_relative_change(&old, &new);
            debug!(
                "GLMM iteration {}: v0={:.6}, v1={:.6}, change={:.3e}",
                outer, next.v0, next.v1, change
            );
            beta = next.beta;
            v0 = next.v0;
            v1 = next.v1;
            if change < self.config.outer_tol {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "GLMM did not converge after {} iterations",
                self.config.max_outer
            );
        }

        // Refresh the sites at the final parameters.
        let mean = self.x.mat_vec(&beta);
        let cov = self.prior_covariance(v0, v1);
        ep.run(&mean, &cov, &mut sites)?;
        let lml = ep.log_marginal(&mean, &cov, &sites)?;
        if !lml.is_finite() {
            return Err(ScanError::FittingFailure(
                "GLMM marginal likelihood is not finite".into(),
            ));
        }
        info!("GLMM fit: v0={:.6}, v1={:.6}, lml={:.6}", v0, v1, lml);

        Ok(GlmmFit {
            beta,
            v0: has_k.then_some(v0),
            v1,
            sites,
            lml,
            iterations,
            converged,
        })
    }

    /// Gaussian scanner on the pseudo-observations of `fit`.
    ///
    /// The pseudo-observation LMM is refitted at the final sites, and the
    /// scanner covariance is `v0 K + diag(1/τ̃) + v1 I` at those estimates,
    /// with `v1 I` the isotropic part.
    pub fn get_fast_scanner(&self, fit: &GlmmFit) -> Result<FastScanner> {
        let pseudo = fit.sites.pseudo_outcome();
        let noise = fit.sites.noise_variances();
        let normal = GlmmNormal::new(&pseudo, &self.x, self.k.as_ref(), &noise)?;
        let refit = normal.fit((fit.v0.unwrap_or(0.0), fit.v1), &BfgsOptions::default())?;
        let base = match &self.k {
            Some(k) => k.scale(refit.v0).add_diag(&noise),
            None => DenseMatrix::from_diag(&noise),
        };
        let qs = EconomicQs::from_covariance(&base.symmetrize())?;
        FastScanner::new(&pseudo, &self.x, &qs, refit.v1)
    }
}
