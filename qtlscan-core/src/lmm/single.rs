//! Maximum-likelihood fit of the single-trait LMM.
//!
//! `y ~ N(Xβ, s((1-δ)K + δI))`. For fixed δ, β and s are closed form, so
//! the fit is a one-dimensional search over logit(δ). The variance
//! components are reported as `v0 = s(1-δ)` and `v1 = sδ`.

use qtlscan_linalg::{DenseMatrix, EconomicQs};
use tracing::debug;

use super::fast_scanner::{FastScanner, NullSystem, RotatedData};
use super::gls::{profiled_lml, solve_gls, Spectrum};
use crate::error::{Result, ScanError};
use crate::optim::grid_brent_minimize;
use crate::util::math::sigmoid;

/// Configuration for the variance-ratio search.
#[derive(Debug, Clone)]
pub struct LmmConfig {
    /// Grid points over logit(δ) before Brent refinement.
    pub grid_points: usize,
    /// Bound on |logit(δ)|.
    pub logit_bound: f64,
    /// Brent tolerance.
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            grid_points: 30,
            logit_bound: 12.0,
            tol: 1e-8,
            max_iter: 200,
        }
    }
}

/// Fitted single-trait null model.
#[derive(Debug, Clone)]
pub struct LmmFit {
    pub beta: Vec<f64>,
    /// Genetic variance; `None` without a covariance matrix.
    pub v0: Option<f64>,
    pub v1: f64,
    pub delta: f64,
    pub lml: f64,
}

pub struct Lmm {
    data: RotatedData,
    qs: EconomicQs,
    has_kinship: bool,
}

impl Lmm {
    pub fn new(y: &[f64], x: &DenseMatrix, qs: Option<&EconomicQs>) -> Result<Self> {
        let has_kinship = qs.map_or(false, |q| q.rank() > 0);
        let qs = match qs {
            Some(q) => q.clone(),
            None => EconomicQs::empty(y.len()),
        };
        Ok(Self {
            data: RotatedData::new(y, x, &qs)?,
            qs,
            has_kinship,
        })
    }

    fn spectrum(&self, delta: f64) -> Result<Spectrum> {
        let s0: Vec<f64> = self.qs.s0().iter().map(|s| s * (1.0 - delta)).collect();
        Spectrum::new(&s0, delta, self.data.nsamples())
    }

    /// Profiled log marginal likelihood and its GLS pieces at `delta`.
    fn evaluate(&self, delta: f64) -> Result<(f64, f64, Vec<f64>)> {
        let spectrum = self.spectrum(delta)?;
        let system = NullSystem::new(&self.data, &spectrum);
        let sol = solve_gls(&system.xtsx, &system.xtsy, system.ytsy)?;
        let (lml, scale) = profiled_lml(self.data.nsamples(), sol.rss, spectrum.log_det());
        Ok((lml, scale, sol.beta))
    }

    /// Log marginal likelihood at variance ratio `delta` with β, s profiled.
    pub fn lml_at(&self, delta: f64) -> Result<f64> {
        Ok(self.evaluate(delta)?.0)
    }

    pub fn fit(&self, config: &LmmConfig) -> Result<LmmFit> {
        if !self.has_kinship {
            let (lml, scale, beta) = self.evaluate(1.0)?;
            return Ok(LmmFit {
                beta,
                v0: None,
                v1: scale,
                delta: 1.0,
                lml,
            });
        }

        let cost = |t: f64| match self.lml_at(sigmoid(t)) {
            Ok(l) if l.is_finite() => -l,
            _ => f64::INFINITY,
        };
        let b = config.logit_bound;
        let (t, _) = grid_brent_minimize(cost, -b, b, config.grid_points, config.tol, config.max_iter);
        let delta = sigmoid(t);
        let (lml, scale, beta) = self.evaluate(delta)?;
        if !lml.is_finite() {
            return Err(ScanError::FittingFailure(
                "single-trait LMM likelihood is not finite at the optimum".into(),
            ));
        }
        debug!("LMM fit: delta={:.6}, scale={:.6}, lml={:.6}", delta, scale, lml);

        Ok(LmmFit {
            beta,
            v0: Some(scale * (1.0 - delta)),
            v1: scale * delta,
            delta,
            lml,
        })
    }

    /// Scanner whose null covariance is the fitted `v0 K + v1 I`.
    pub fn get_fast_scanner(&self, fit: &LmmFit) -> Result<FastScanner> {
        let qs = self.qs.scaled(fit.v0.unwrap_or(0.0));
        FastScanner::new(&self.data.y, &self.data.x, &qs, fit.v1)
    }
}
