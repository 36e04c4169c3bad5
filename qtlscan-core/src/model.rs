//! Null-model selection and fitting.
//!
//! The likelihood and the number of traits pick one of three model
//! families. Each is fitted by maximum likelihood and handed back as a
//! boxed scanner together with its variance components.

use qtlscan_linalg::{DenseMatrix, EconomicQs};
use tracing::info;

use crate::error::{Result, ScanError};
use crate::glmm::{EpConfig, Family, GlmmExpFam};
use crate::likelihood::Likelihood;
use crate::lmm::{Kron2Sum, KronConfig, Lmm, LmmConfig};
use crate::scanner::CandidateScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    SingleTraitLmm,
    MultiTraitLmm,
    GlmmApprox,
}

impl ModelFamily {
    pub fn select(likelihood: &Likelihood, ntraits: usize) -> Result<Self> {
        match (likelihood.is_normal(), ntraits) {
            (_, 0) => Err(ScanError::ShapeMismatch("no traits to analyse".into())),
            (true, 1) => Ok(Self::SingleTraitLmm),
            (true, _) => Ok(Self::MultiTraitLmm),
            (false, 1) => Ok(Self::GlmmApprox),
            (false, p) => Err(ScanError::UnsupportedModel(format!(
                "{} likelihood supports a single trait, got {}",
                likelihood.name(),
                p
            ))),
        }
    }
}

/// Fitted null variance components.
#[derive(Debug, Clone, PartialEq)]
pub enum NullVariances {
    /// Single trait: `v0 K + v1 I`; `v0` is absent without K.
    Scalar { v0: Option<f64>, v1: f64 },
    /// Multiple traits: `C0 ⊗ K + C1 ⊗ I`.
    Matrix { c0: DenseMatrix, c1: DenseMatrix },
}

/// Fitting options for every model family.
#[derive(Debug, Clone, Default)]
pub struct FitConfig {
    pub lmm: LmmConfig,
    pub kron: KronConfig,
    pub ep: EpConfig,
}

pub struct FittedNull {
    pub scanner: Box<dyn CandidateScanner>,
    pub variances: NullVariances,
}

/// Fit the null model for traits `y` with trait design `a` and covariates `m`.
pub fn fit_null(
    y: &DenseMatrix,
    a: &DenseMatrix,
    m: &DenseMatrix,
    qs: Option<&EconomicQs>,
    likelihood: &Likelihood,
    config: &FitConfig,
) -> Result<FittedNull> {
    let family = ModelFamily::select(likelihood, y.ncols())?;
    info!("Null model: {:?}, {} samples, {} traits", family, y.nrows(), y.ncols());
    match family {
        ModelFamily::SingleTraitLmm => {
            let lmm = Lmm::new(&y.col(0), m, qs)?;
            let fit = lmm.fit(&config.lmm)?;
            Ok(FittedNull {
                scanner: Box::new(lmm.get_fast_scanner(&fit)?),
                variances: NullVariances::Scalar {
                    v0: fit.v0,
                    v1: fit.v1,
                },
            })
        }
        ModelFamily::MultiTraitLmm => {
            let n = y.nrows();
            let factor = match qs {
                Some(qs) if qs.rank() > 0 => {
                    let roots: Vec<f64> = qs.s0().iter().map(|s| s.sqrt()).collect();
                    DenseMatrix::from_fn(n, qs.rank(), |i, j| qs.q0().get(i, j) * roots[j])
                }
                _ => DenseMatrix::zeros(n, 1),
            };
            let model = Kron2Sum::new(y, a, m, &factor)?;
            let fit = model.fit(&config.kron)?;
            Ok(FittedNull {
                scanner: Box::new(model.get_fast_scanner(&fit)?),
                variances: NullVariances::Matrix {
                    c0: fit.c0,
                    c1: fit.c1,
                },
            })
        }
        ModelFamily::GlmmApprox => {
            let glmm = GlmmExpFam::new(&y.col(0), m, qs, Family::new(likelihood)?, &config.ep)?;
            let fit = glmm.fit()?;
            Ok(FittedNull {
                scanner: Box::new(glmm.get_fast_scanner(&fit)?),
                variances: NullVariances::Scalar {
                    v0: fit.v0,
                    v1: fit.v1,
                },
            })
        }
    }
}
