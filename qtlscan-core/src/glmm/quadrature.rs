//! Gauss–Hermite quadrature for the tilted distributions of EP.
//!
//! Nodes and weights come from the Golub–Welsch algorithm: the eigenvalues
//! of the symmetric tridiagonal Jacobi matrix of the physicists' Hermite
//! recurrence are the nodes, and `√π` times the squared first eigenvector
//! components are the weights.

use qtlscan_linalg::{DenseMatrix, LinalgError, SymmetricEigen};

use crate::util::math::log_sum_exp;

/// Gauss–Hermite rule for `∫ e^{-x²} h(x) dx ≈ Σ wₖ h(xₖ)`.
#[derive(Debug, Clone)]
pub struct GaussHermite {
    nodes: Vec<f64>,
    log_weights: Vec<f64>,
}

/// Moments of a one-dimensional unnormalised density.
#[derive(Debug, Clone, Copy)]
pub struct Moments {
    pub log_z: f64,
    pub mean: f64,
    pub variance: f64,
}

impl GaussHermite {
    pub fn new(npoints: usize) -> Result<Self, LinalgError> {
        let n = npoints.max(1);
        let mut jacobi = DenseMatrix::zeros(n, n);
        for i in 1..n {
            let b = (i as f64 / 2.0).sqrt();
            jacobi.set(i, i - 1, b);
            jacobi.set(i - 1, i, b);
        }
        let eig = SymmetricEigen::new(&jacobi)?;
        let sqrt_pi = std::f64::consts::PI.sqrt();
        let mut pairs: Vec<(f64, f64)> = (0..n)
            .map(|k| {
                let v0 = eig.vectors.get(0, k);
                (eig.values[k], (sqrt_pi * v0 * v0).ln())
            })
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            nodes: pairs.iter().map(|p| p.0).collect(),
            log_weights: pairs.iter().map(|p| p.1).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// `Σ wₖ h(xₖ)`.
    pub fn integrate<F: Fn(f64) -> f64>(&self, h: F) -> f64 {
        self.nodes
            .iter()
            .zip(&self.log_weights)
            .map(|(&x, &lw)| lw.exp() * h(x))
            .sum()
    }

    /// Moments of `exp(φ(f))` by a rule centred at `center` with scale `scale`.
    ///
    /// Substitutes `f = center + √2·scale·x`, so the rule is exact when
    /// `φ` is a Gaussian log-density with that mean and standard deviation.
    pub fn moments<F: Fn(f64) -> f64>(&self, log_density: F, center: f64, scale: f64) -> Moments {
        let h = std::f64::consts::SQRT_2 * scale;
        let points: Vec<f64> = self.nodes.iter().map(|&x| center + h * x).collect();
        let log_terms: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.log_weights)
            .zip(&points)
            .map(|((&x, &lw), &f)| lw + log_density(f) + x * x)
            .collect();
        let lse = log_sum_exp(&log_terms);
        let probs: Vec<f64> = log_terms.iter().map(|t| (t - lse).exp()).collect();
        let mean: f64 = probs.iter().zip(&points).map(|(p, f)| p * f).sum();
        let variance: f64 = probs
            .iter()
            .zip(&points)
            .map(|(p, f)| p * (f - mean).powi(2))
            .sum();
        Moments {
            log_z: h.ln() + lse,
            mean,
            variance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_sqrt_pi() {
        let gh = GaussHermite::new(20).unwrap();
        let total = gh.integrate(|_| 1.0);
        assert!((total - std::f64::consts::PI.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn test_polynomial_exactness() {
        // ∫ e^{-x²} x² dx = √π / 2 and ∫ e^{-x²} x⁴ dx = 3√π / 4
        let gh = GaussHermite::new(10).unwrap();
        let sqrt_pi = std::f64::consts::PI.sqrt();
        assert!((gh.integrate(|x| x * x) - sqrt_pi / 2.0).abs() < 1e-10);
        assert!((gh.integrate(|x| x.powi(4)) - 3.0 * sqrt_pi / 4.0).abs() < 1e-10);
        assert!(gh.integrate(|x| x.powi(3)).abs() < 1e-10);
    }

    #[test]
    fn test_gaussian_moments_exact() {
        let gh = GaussHermite::new(20).unwrap();
        let (mu, sd) = (1.3, 0.7);
        let log_density = |f: f64| -0.5 * ((f - mu) / sd).powi(2);
        let m = gh.moments(log_density, 0.9, 0.8);
        let expected_log_z = (sd * (2.0 * std::f64::consts::PI).sqrt()).ln();
        assert!((m.log_z - expected_log_z).abs() < 1e-5, "log_z {}", m.log_z);
        assert!((m.mean - mu).abs() < 1e-5, "mean {}", m.mean);
        assert!((m.variance - sd * sd).abs() < 1e-5, "variance {}", m.variance);
    }
}
