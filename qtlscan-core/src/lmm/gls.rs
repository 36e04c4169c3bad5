//! Generalised least squares against economically factorised covariances.
//!
//! For `Σ = Q0 diag(d) Q0' + v (I - Q0 Q0')` the inverse is
//! `Q0 diag(1/d - 1/v) Q0' + I/v`, so every cross product `a'Σ⁻¹b`
//! needs only the raw product `a'b` and the rotated `Q0'a`, `Q0'b`.

use qtlscan_linalg::{decomposition::pinv_symmetric, DenseMatrix};

use crate::error::{Result, ScanError};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Inverse weights of a covariance in the economic eigenbasis.
#[derive(Debug, Clone)]
pub(crate) struct Spectrum {
    /// 1/dᵢ - 1/v for each retained eigenvector.
    shrink: Vec<f64>,
    /// 1/v on the complement, 0 when the factorisation has full rank.
    inv_v: f64,
    log_det: f64,
}

impl Spectrum {
    /// Spectrum of `Q0 diag(s0) Q0' + v I` over `n` samples.
    pub fn new(s0: &[f64], v: f64, n: usize) -> Result<Self> {
        let rank = s0.len();
        let complement = n.saturating_sub(rank);
        if complement > 0 && !(v > 0.0) {
            return Err(ScanError::FittingFailure(format!(
                "covariance is singular: rank {} of {} with residual variance {}",
                rank, n, v
            )));
        }
        let d: Vec<f64> = s0.iter().map(|s| s + v).collect();
        if let Some(bad) = d.iter().find(|&&di| !(di > 0.0) || !di.is_finite()) {
            return Err(ScanError::FittingFailure(format!(
                "covariance eigenvalue {} is not positive",
                bad
            )));
        }
        let inv_v = if complement > 0 { 1.0 / v } else { 0.0 };
        let log_det = d.iter().map(|di| di.ln()).sum::<f64>()
            + if complement > 0 {
                complement as f64 * v.ln()
            } else {
                0.0
            };
        Ok(Self {
            shrink: d.iter().map(|di| 1.0 / di - inv_v).collect(),
            inv_v,
            log_det,
        })
    }

    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    /// a'Σ⁻¹b for matrices, from `raw = a'b` and rotations `aq`, `bq`.
    pub fn cross(&self, raw: &DenseMatrix, aq: &DenseMatrix, bq: &DenseMatrix) -> DenseMatrix {
        weighted_cross(raw, aq, bq, &self.shrink, self.inv_v)
    }

    /// a'Σ⁻¹b for a matrix `a` and vector `b`.
    pub fn cross_vec(&self, raw: &[f64], aq: &DenseMatrix, bq: &[f64]) -> Vec<f64> {
        (0..aq.ncols())
            .map(|l| {
                let mut s = self.inv_v * raw[l];
                for (i, w) in self.shrink.iter().enumerate() {
                    s += aq.get(i, l) * w * bq[i];
                }
                s
            })
            .collect()
    }

    /// a'Σ⁻¹a for a vector.
    pub fn quad(&self, raw: f64, aq: &[f64]) -> f64 {
        self.inv_v * raw
            + aq
                .iter()
                .zip(&self.shrink)
                .map(|(a, w)| a * a * w)
                .sum::<f64>()
    }
}

/// `scale * raw + aq' diag(w) bq`.
pub(crate) fn weighted_cross(
    raw: &DenseMatrix,
    aq: &DenseMatrix,
    bq: &DenseMatrix,
    w: &[f64],
    scale: f64,
) -> DenseMatrix {
    let (ka, kb) = (aq.ncols(), bq.ncols());
    let mut out = raw.scale(scale);
    for l in 0..ka {
        for m in 0..kb {
            let mut s = 0.0;
            for (i, wi) in w.iter().enumerate() {
                s += aq.get(i, l) * wi * bq.get(i, m);
            }
            out.set(l, m, out.get(l, m) + s);
        }
    }
    out
}

/// `[[a, b], [b', d]]`.
pub(crate) fn block_symmetric(a: &DenseMatrix, b: &DenseMatrix, d: &DenseMatrix) -> DenseMatrix {
    let (ka, kd) = (a.nrows(), d.nrows());
    DenseMatrix::from_fn(ka + kd, ka + kd, |i, j| match (i < ka, j < ka) {
        (true, true) => a.get(i, j),
        (true, false) => b.get(i, j - ka),
        (false, true) => b.get(j, i - ka),
        (false, false) => d.get(i - ka, j - ka),
    })
}

/// Solution of the GLS normal equations `gram * beta = rhs`.
#[derive(Debug, Clone)]
pub(crate) struct GlsSolution {
    pub beta: Vec<f64>,
    /// (X'Σ⁻¹X)⁻¹, or its pseudo-inverse when the design is rank deficient.
    pub gram_inv: DenseMatrix,
    /// r'Σ⁻¹r at the solution.
    pub rss: f64,
}

/// Eigenvalues of the equilibrated Gram matrix at or below this fraction of
/// the largest are treated as aliased directions.
const RANK_TOL: f64 = 1e-10;

/// Solve the normal equations, tolerating aliased design columns.
///
/// The Gram matrix is scaled to unit diagonal and inverted through its
/// eigenbasis, dropping directions below `RANK_TOL`. Collinear designs such
/// as an intercept next to a full set of indicators then keep the rss of
/// their column space instead of a rounding-level Cholesky pivot.
pub(crate) fn solve_gls(gram: &DenseMatrix, rhs: &[f64], yty: f64) -> Result<GlsSolution> {
    if !gram.is_finite() || rhs.iter().any(|v| !v.is_finite()) {
        return Err(ScanError::FittingFailure(
            "non-finite normal equations".into(),
        ));
    }
    let k = gram.nrows();
    let scale: Vec<f64> = gram
        .diag()
        .iter()
        .map(|&g| if g > 0.0 { 1.0 / g.sqrt() } else { 0.0 })
        .collect();
    let equilibrated = DenseMatrix::from_fn(k, k, |i, j| scale[i] * gram.get(i, j) * scale[j]);
    let pinv = pinv_symmetric(&equilibrated.symmetrize(), RANK_TOL)?;
    let gram_inv = DenseMatrix::from_fn(k, k, |i, j| scale[i] * pinv.get(i, j) * scale[j]);

    let beta = gram_inv.mat_vec(rhs);
    let rss = (yty - DenseMatrix::dot(&beta, rhs)).max(0.0);
    Ok(GlsSolution {
        beta,
        gram_inv,
        rss,
    })
}

/// Log marginal likelihood with the covariance scale profiled out.
///
/// Returns `(lml, scale)` for `nobs` observations.
pub(crate) fn profiled_lml(nobs: usize, rss: f64, log_det: f64) -> (f64, f64) {
    let nf = nobs as f64;
    let scale = (rss / nf).max(f64::MIN_POSITIVE);
    let lml = -0.5 * nf * (LN_2PI + scale.ln() + 1.0) - 0.5 * log_det;
    (lml, scale)
}

/// Log marginal likelihood at unit scale.
pub(crate) fn fixed_scale_lml(nobs: usize, rss: f64, log_det: f64) -> f64 {
    -0.5 * nobs as f64 * LN_2PI - 0.5 * log_det - 0.5 * rss
}

/// Square roots of the diagonal of `scale * cov`.
pub(crate) fn standard_errors(cov: &DenseMatrix, scale: f64) -> Vec<f64> {
    cov.diag().iter().map(|v| (scale * v).max(0.0).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtlscan_linalg::CholeskyDecomp;
    use qtlscan_linalg::EconomicQs;

    fn fixture() -> (DenseMatrix, EconomicQs) {
        let g = DenseMatrix::from_row_major(
            5,
            2,
            &[1.0, 0.2, -0.4, 0.9, 0.3, -0.7, 0.8, 0.1, -0.5, 0.6],
        );
        let k = g.mat_mul(&g.transpose());
        let qs = EconomicQs::from_covariance(&k).unwrap();
        (k, qs)
    }

    #[test]
    fn test_cross_matches_dense_inverse() {
        let (k, qs) = fixture();
        let v = 0.3;
        let sigma = k.add(&DenseMatrix::identity(5).scale(v));
        let sigma_inv = qtlscan_linalg::decomposition::inverse_spd(&sigma).unwrap();

        let a = DenseMatrix::from_row_major(5, 2, &[1.0, 0.5, 1.0, -1.0, 1.0, 2.0, 1.0, 0.0, 1.0, 1.5]);
        let spectrum = Spectrum::new(qs.s0(), v, 5).unwrap();
        let got = spectrum.cross(&a.t_mat_mul(&a), &qs.rotate(&a), &qs.rotate(&a));
        let expected = a.t_mat_mul(&sigma_inv.mat_mul(&a));
        assert!(got.max_abs_diff(&expected) < 1e-10);

        let chol = CholeskyDecomp::new(&sigma).unwrap();
        assert!((spectrum.log_det() - chol.log_det()).abs() < 1e-10);
    }

    #[test]
    fn test_singular_without_residual_variance() {
        let (_, qs) = fixture();
        assert!(matches!(
            Spectrum::new(qs.s0(), 0.0, 5),
            Err(ScanError::FittingFailure(_))
        ));
    }

    #[test]
    fn test_block_symmetric_layout() {
        let a = DenseMatrix::identity(1);
        let b = DenseMatrix::from_row_major(1, 2, &[2.0, 3.0]);
        let d = DenseMatrix::identity(2).scale(5.0);
        let m = block_symmetric(&a, &b, &d);
        assert_eq!(m.row(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(m.col(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(m.get(2, 2), 5.0);
    }

    #[test]
    fn test_solve_gls_rank_deficient_falls_back() {
        let gram = DenseMatrix::full(2, 2, 1.0);
        let sol = solve_gls(&gram, &[2.0, 2.0], 10.0).unwrap();
        assert!((sol.beta[0] - 1.0).abs() < 1e-10);
        assert!((sol.beta[1] - 1.0).abs() < 1e-10);
        assert!((sol.rss - 6.0).abs() < 1e-10);
    }

    fn least_squares(x: &DenseMatrix, y: &[f64]) -> GlsSolution {
        let gram = x.t_mat_mul(x);
        let rhs = x.t_mat_vec(y);
        solve_gls(&gram, &rhs, DenseMatrix::dot(y, y)).unwrap()
    }

    #[test]
    fn test_solve_gls_aliased_column_keeps_column_space_rss() {
        let a = [0.31, 1.7, -0.45, 2.2, 0.93, -1.1, 0.58, 1.37];
        let b = [1.9, -0.27, 0.66, 0.11, -1.43, 0.8, 2.05, -0.39];
        let y = [0.4, 1.3, -0.8, 2.9, 0.2, -0.6, 1.1, 0.75];
        // Third column is a combination of the first two up to rounding.
        let aliased: Vec<f64> = a.iter().zip(&b).map(|(p, q)| 0.7 * p + 1.3 * q).collect();

        let reduced = least_squares(&DenseMatrix::from_columns(8, &[a.to_vec(), b.to_vec()]), &y);
        let full = least_squares(
            &DenseMatrix::from_columns(8, &[a.to_vec(), b.to_vec(), aliased]),
            &y,
        );
        assert!(
            (full.rss - reduced.rss).abs() < 1e-8 * reduced.rss,
            "aliased rss {} vs reduced {}",
            full.rss,
            reduced.rss
        );
        assert!(full.beta.iter().all(|b| b.is_finite() && b.abs() < 1e3));
    }

    #[test]
    fn test_solve_gls_intercept_with_indicators() {
        // [1 | group indicators]: the intercept is the sum of the indicator columns.
        let groups = [0usize, 1, 2, 0, 1, 2, 0, 1, 2];
        let w = [0.9, 1.4, 0.6, 1.1, 0.75, 1.3, 1.05, 0.85, 1.2];
        let y = [1.2, 0.4, -0.3, 0.9, 0.7, -0.1, 1.5, 0.2, 0.3];
        let mut columns = vec![w.to_vec()];
        for g in 0..3 {
            columns.push(
                groups
                    .iter()
                    .zip(&w)
                    .map(|(&gi, wi)| if gi == g { *wi } else { 0.0 })
                    .collect(),
            );
        }
        let full = least_squares(&DenseMatrix::from_columns(9, &columns), &y);
        let indicators = least_squares(&DenseMatrix::from_columns(9, &columns[1..]), &y);
        assert!(
            (full.rss - indicators.rss).abs() < 1e-8 * indicators.rss.max(1.0),
            "{} vs {}",
            full.rss,
            indicators.rss
        );
    }

    #[test]
    fn test_solve_gls_full_rank_matches_cholesky() {
        let gram = DenseMatrix::from_row_major(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let sol = solve_gls(&gram, &[1.0, 2.0], 5.0).unwrap();
        let expected = CholeskyDecomp::new(&gram).unwrap().inverse();
        assert!(sol.gram_inv.max_abs_diff(&expected) < 1e-12);
    }
}
