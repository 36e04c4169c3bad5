//! Multi-trait LMM with Kronecker-structured covariance.
//!
//! `vec(Y) ~ N((A ⊗ M) vec(B), C0 ⊗ K + C1 ⊗ I)` with `K = Q0 diag(S0) Q0'`.
//! Writing `C1 = L L'` and `L⁻¹ C0 L⁻ᵀ = U diag(e) U'`, the transform
//! `T = U' L⁻¹` diagonalises the covariance: in the basis `T ⊗ [Q0 Q1]` the
//! entry for trait-eigenvalue `eⱼ` and sample eigenvalue `Sᵢ` is
//! `eⱼ Sᵢ + 1` (and 1 on the complement of Q0). GLS and the
//! log-determinant are then closed form for any (C0, C1).

use qtlscan_linalg::{CholeskyDecomp, DenseMatrix, EconomicQs, SymmetricEigen};
use tracing::{debug, info};

use super::gls::{fixed_scale_lml, solve_gls, weighted_cross, GlsSolution};
use super::kron_scanner::KronFastScanner;
use crate::error::{Result, ScanError};
use crate::optim::{minimize_bfgs, BfgsOptions};

/// Jitter added to the diagonal of C1.
pub const C1_JITTER: f64 = 1e-8;

/// Configuration for the Kronecker LMM fit.
#[derive(Debug, Clone)]
pub struct KronConfig {
    /// Rank of the C0 factor.
    pub c0_rank: usize,
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for KronConfig {
    fn default() -> Self {
        Self {
            c0_rank: 1,
            tol: 1e-7,
            max_iter: 300,
        }
    }
}

/// Covariance pair expressed in the jointly diagonalising basis.
#[derive(Debug, Clone)]
pub(crate) struct KronBasis {
    /// T = U' L⁻¹, p x p.
    pub t: DenseMatrix,
    /// Eigenvalues of L⁻¹ C0 L⁻ᵀ.
    pub e: Vec<f64>,
    /// Per trait-eigenvalue shrinkage on the Q0 block: 1/(eⱼSᵢ + 1) - 1.
    pub shrink: Vec<Vec<f64>>,
    pub log_det: f64,
}

impl KronBasis {
    pub fn new(c0: &DenseMatrix, c1: &DenseMatrix, s0: &[f64], n: usize) -> Result<Self> {
        let chol = CholeskyDecomp::new(&c1.symmetrize())
            .map_err(|_| ScanError::FittingFailure("C1 is not positive definite".into()))?;
        let l_inv_c0 = chol.solve_lower_mat(&c0.symmetrize());
        let w = chol.solve_lower_mat(&l_inv_c0.transpose()).symmetrize();
        let eig = SymmetricEigen::new(&w)?;
        let e: Vec<f64> = eig.values.iter().map(|v| v.max(0.0)).collect();
        let l_inv = chol.solve_lower_mat(&DenseMatrix::identity(c1.nrows()));
        let t = eig.vectors.t_mat_mul(&l_inv);

        let shrink: Vec<Vec<f64>> = e
            .iter()
            .map(|ej| s0.iter().map(|si| 1.0 / (ej * si + 1.0) - 1.0).collect())
            .collect();
        let log_det = n as f64 * chol.log_det()
            + e.iter()
                .map(|ej| s0.iter().map(|si| (ej * si + 1.0).ln()).sum::<f64>())
                .sum::<f64>();
        Ok(Self {
            t,
            e,
            shrink,
            log_det,
        })
    }

    pub fn ntraits(&self) -> usize {
        self.e.len()
    }

    /// Gram block between terms `(Da ⊗ Ha)` and `(Db ⊗ Hb)`.
    ///
    /// `da_t = T Da`, `raw = Ha'Hb`, `aq = Q0'Ha`, `bq = Q0'Hb`.
    pub fn gram_block(
        &self,
        da_t: &DenseMatrix,
        db_t: &DenseMatrix,
        raw: &DenseMatrix,
        aq: &DenseMatrix,
        bq: &DenseMatrix,
    ) -> DenseMatrix {
        let (qa, qb) = (da_t.ncols(), db_t.ncols());
        let (ka, kb) = (raw.nrows(), raw.ncols());
        let mut out = DenseMatrix::zeros(qa * ka, qb * kb);
        for j in 0..self.ntraits() {
            let pj = weighted_cross(raw, aq, bq, &self.shrink[j], 1.0);
            for x in 0..qa {
                let ax = da_t.get(j, x);
                if ax == 0.0 {
                    continue;
                }
                for y in 0..qb {
                    let f = ax * db_t.get(j, y);
                    if f == 0.0 {
                        continue;
                    }
                    for l in 0..ka {
                        for m in 0..kb {
                            let (r, c) = (x * ka + l, y * kb + m);
                            out.set(r, c, out.get(r, c) + f * pj.get(l, m));
                        }
                    }
                }
            }
        }
        out
    }

    /// Right-hand side `(Da ⊗ Ha)' Σ⁻¹ vec(Y)`.
    ///
    /// `hty_t = Ha'Y T'` and `yq_t = Q0'Y T'`.
    pub fn rhs_block(
        &self,
        da_t: &DenseMatrix,
        hty_t: &DenseMatrix,
        aq: &DenseMatrix,
        yq_t: &DenseMatrix,
    ) -> Vec<f64> {
        let qa = da_t.ncols();
        let ka = hty_t.nrows();
        let mut out = vec![0.0; qa * ka];
        for j in 0..self.ntraits() {
            let qj: Vec<f64> = (0..ka)
                .map(|l| {
                    let mut s = hty_t.get(l, j);
                    for (i, w) in self.shrink[j].iter().enumerate() {
                        s += aq.get(i, l) * w * yq_t.get(i, j);
                    }
                    s
                })
                .collect();
            for x in 0..qa {
                let ax = da_t.get(j, x);
                for l in 0..ka {
                    out[x * ka + l] += ax * qj[l];
                }
            }
        }
        out
    }

    /// vec(Y)' Σ⁻¹ vec(Y) from `yty_t = T Y'Y T'` and `yq_t = Q0'Y T'`.
    pub fn quad_y(&self, yty_t: &DenseMatrix, yq_t: &DenseMatrix) -> f64 {
        (0..self.ntraits())
            .map(|j| {
                yty_t.get(j, j)
                    + self.shrink[j]
                        .iter()
                        .enumerate()
                        .map(|(i, w)| w * yq_t.get(i, j).powi(2))
                        .sum::<f64>()
            })
            .sum()
    }
}

/// Trait and covariate statistics reused across covariance evaluations.
#[derive(Debug, Clone)]
pub(crate) struct KronData {
    pub y: DenseMatrix,
    pub m: DenseMatrix,
    pub a: DenseMatrix,
    pub qs: EconomicQs,
    pub yq: DenseMatrix,
    pub mq: DenseMatrix,
    pub yty: DenseMatrix,
    pub mtm: DenseMatrix,
    pub mty: DenseMatrix,
}

impl KronData {
    pub fn new(y: &DenseMatrix, a: &DenseMatrix, m: &DenseMatrix, qs: &EconomicQs) -> Result<Self> {
        let (n, p) = (y.nrows(), y.ncols());
        if m.nrows() != n || qs.nsamples() != n {
            return Err(ScanError::ShapeMismatch(format!(
                "traits have {} samples, covariates {}, covariance {}",
                n,
                m.nrows(),
                qs.nsamples()
            )));
        }
        if a.nrows() != p {
            return Err(ScanError::ShapeMismatch(format!(
                "trait design has {} rows for {} traits",
                a.nrows(),
                p
            )));
        }
        Ok(Self {
            yq: qs.rotate(y),
            mq: qs.rotate(m),
            yty: y.t_mat_mul(y),
            mtm: m.t_mat_mul(m),
            mty: m.t_mat_mul(y),
            y: y.clone(),
            m: m.clone(),
            a: a.clone(),
            qs: qs.clone(),
        })
    }

    pub fn nsamples(&self) -> usize {
        self.y.nrows()
    }

    pub fn ntraits(&self) -> usize {
        self.y.ncols()
    }

    /// Null-model normal equations under `basis`.
    pub fn null_system(&self, basis: &KronBasis) -> NullKronSystem {
        let a_t = basis.t.mat_mul(&self.a);
        let yq_t = self.yq.mat_mul(&basis.t.transpose());
        let mty_t = self.mty.mat_mul(&basis.t.transpose());
        let yty_t = basis.t.mat_mul(&self.yty).mat_mul(&basis.t.transpose());
        NullKronSystem {
            gram: basis.gram_block(&a_t, &a_t, &self.mtm, &self.mq, &self.mq),
            rhs: basis.rhs_block(&a_t, &mty_t, &self.mq, &yq_t),
            yy: basis.quad_y(&yty_t, &yq_t),
            a_t,
            yq_t,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NullKronSystem {
    pub gram: DenseMatrix,
    pub rhs: Vec<f64>,
    pub yy: f64,
    pub a_t: DenseMatrix,
    pub yq_t: DenseMatrix,
}

/// Fitted multi-trait null model.
#[derive(Debug, Clone)]
pub struct KronFit {
    /// Covariate effects, c x (columns of A).
    pub b: DenseMatrix,
    pub c0: DenseMatrix,
    pub c1: DenseMatrix,
    pub lml: f64,
}

/// Unconstrained parameterisation of (C0, C1).
#[derive(Debug, Clone)]
struct CovarianceParams {
    p: usize,
    c0_rank: usize,
}

impl CovarianceParams {
    fn len(&self) -> usize {
        self.p * self.c0_rank + self.p * (self.p + 1) / 2
    }

    fn decode(&self, theta: &[f64]) -> (DenseMatrix, DenseMatrix) {
        let p = self.p;
        let r = self.c0_rank;
        let l0 = DenseMatrix::from_fn(p, r, |i, j| theta[j * p + i]);
        let c0 = l0.mat_mul(&l0.transpose());

        let mut l1 = DenseMatrix::zeros(p, p);
        let mut k = p * r;
        for j in 0..p {
            for i in j..p {
                let v = theta[k].clamp(-30.0, 30.0);
                l1.set(i, j, if i == j { v.exp() } else { v });
                k += 1;
            }
        }
        let c1 = l1.mat_mul(&l1.transpose()).add_diag(&vec![C1_JITTER; p]);
        (c0, c1)
    }

    fn encode(&self, c0: &DenseMatrix, c1: &DenseMatrix) -> Result<Vec<f64>> {
        let p = self.p;
        let mut theta = Vec::with_capacity(self.len());
        let eig = SymmetricEigen::new(&c0.symmetrize())?;
        for j in 0..self.c0_rank {
            let s = eig.values.get(j).copied().unwrap_or(0.0).max(0.0).sqrt();
            for i in 0..p {
                theta.push(if j < eig.values.len() {
                    eig.vectors.get(i, j) * s
                } else {
                    0.0
                });
            }
        }
        let l1 = CholeskyDecomp::new(&c1.symmetrize())?.l;
        for j in 0..p {
            for i in j..p {
                let v = l1.get(i, j);
                theta.push(if i == j { v.max(1e-12).ln() } else { v });
            }
        }
        Ok(theta)
    }
}

pub struct Kron2Sum {
    data: KronData,
    /// Q0 sqrt(S0) was all zeros: C0 is not identifiable and stays zero.
    has_kinship: bool,
}

impl Kron2Sum {
    /// Model for traits `y` (n x p), design `a` (p x q), covariates `m`,
    /// and genetic covariance square root `g` (n x r).
    pub fn new(y: &DenseMatrix, a: &DenseMatrix, m: &DenseMatrix, g: &DenseMatrix) -> Result<Self> {
        if g.nrows() != y.nrows() {
            return Err(ScanError::ShapeMismatch(format!(
                "covariance factor has {} rows for {} samples",
                g.nrows(),
                y.nrows()
            )));
        }
        let qs = EconomicQs::from_factor(g)?;
        let has_kinship = qs.rank() > 0;
        Ok(Self {
            data: KronData::new(y, a, m, &qs)?,
            has_kinship,
        })
    }

    fn nobs(&self) -> usize {
        self.data.nsamples() * self.data.ntraits()
    }

    /// Profiled (over B) log marginal likelihood at (C0, C1).
    pub fn lml(&self, c0: &DenseMatrix, c1: &DenseMatrix) -> Result<f64> {
        Ok(self.solve(c0, c1)?.1)
    }

    fn solve(&self, c0: &DenseMatrix, c1: &DenseMatrix) -> Result<(GlsSolution, f64)> {
        let basis = KronBasis::new(c0, c1, self.data.qs.s0(), self.data.nsamples())?;
        let system = self.data.null_system(&basis);
        let sol = solve_gls(&system.gram, &system.rhs, system.yy)?;
        let lml = fixed_scale_lml(self.nobs(), sol.rss, basis.log_det);
        Ok((sol, lml))
    }

    /// OLS residual covariance split between C0 and C1.
    fn initial_covariances(&self) -> Result<(DenseMatrix, DenseMatrix)> {
        let p = self.data.ntraits();
        let n = self.data.nsamples() as f64;
        let mtm_inv = qtlscan_linalg::decomposition::pinv_symmetric(&self.data.mtm, 1e-10)?;
        let b = mtm_inv.mat_mul(&self.data.mty);
        let resid = self.data.y.sub(&self.data.m.mat_mul(&b));
        let mut cov = resid.t_mat_mul(&resid).scale(1.0 / n);
        let floor = cov.trace() / p as f64 * 1e-3 + 1e-6;
        cov = cov.add_diag(&vec![floor; p]);
        if self.has_kinship {
            Ok((cov.scale(0.5), cov.scale(0.5)))
        } else {
            Ok((DenseMatrix::zeros(p, p), cov))
        }
    }

    pub fn fit(&self, config: &KronConfig) -> Result<KronFit> {
        let p = self.data.ntraits();
        let params = CovarianceParams {
            p,
            c0_rank: if self.has_kinship {
                config.c0_rank.clamp(1, p)
            } else {
                0
            },
        };
        let (c0_init, c1_init) = self.initial_covariances()?;
        let theta0 = params.encode(&c0_init, &c1_init)?;
        info!(
            "Fitting Kronecker LMM: {} traits, {} samples, {} covariance parameters",
            p,
            self.data.nsamples(),
            params.len()
        );

        let cost = |theta: &[f64]| -> f64 {
            let (c0, c1) = params.decode(theta);
            match self.lml(&c0, &c1) {
                Ok(l) => -l,
                Err(_) => f64::INFINITY,
            }
        };
        let options = BfgsOptions {
            tolerance: config.tol,
            max_iterations: config.max_iter,
            ..BfgsOptions::default()
        };
        let min = minimize_bfgs(cost, theta0, &options)?;
        let (c0, c1) = params.decode(&min.point);
        let (sol, lml) = self.solve(&c0, &c1)?;
        debug!("Kronecker LMM fit: lml={:.6} after {} iterations", lml, min.iterations);

        let c = self.data.m.ncols();
        let q = self.data.a.ncols();
        Ok(KronFit {
            b: DenseMatrix::from_col_major(c, q, sol.beta),
            c0,
            c1,
            lml,
        })
    }

    pub fn get_fast_scanner(&self, fit: &KronFit) -> Result<KronFastScanner> {
        KronFastScanner::new(self.data.clone(), &fit.c0, &fit.c1)
    }
}
