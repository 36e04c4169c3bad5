//! Exponential-family observation models.
//!
//! Couples a non-Gaussian likelihood with its canonical link and exposes
//! the per-sample log density `log p(yᵢ | fᵢ)` with its first two
//! derivatives in the latent value `fᵢ`. These drive both the IRLS
//! initialisation and the tilted moments in expectation propagation.

use statrs::function::factorial::{ln_binomial, ln_factorial};

use super::link::{LinkFunction, LogLink, LogitLink, ProbitLink};
use crate::error::{Result, ScanError};
use crate::likelihood::Likelihood;
use crate::util::math::{inv_mills, log_normal_cdf, sigmoid, softplus};

/// Log density and its derivatives at one latent value.
#[derive(Debug, Clone, Copy)]
pub struct LogDensity {
    pub value: f64,
    pub d1: f64,
    pub d2: f64,
}

/// An exponential-family observation model: distribution + link function.
pub struct Family {
    likelihood: Likelihood,
    link: Box<dyn LinkFunction + Send + Sync>,
}

/// Canonical link of a likelihood (`None` for the Gaussian case).
pub fn get_link(likelihood: &Likelihood) -> Option<Box<dyn LinkFunction + Send + Sync>> {
    match likelihood {
        Likelihood::Normal => None,
        Likelihood::Bernoulli | Likelihood::Binomial { .. } => Some(Box::new(LogitLink)),
        Likelihood::Probit => Some(Box::new(ProbitLink)),
        Likelihood::Poisson => Some(Box::new(LogLink)),
    }
}

impl Family {
    pub fn new(likelihood: &Likelihood) -> Result<Self> {
        let link = get_link(likelihood).ok_or_else(|| {
            ScanError::UnsupportedModel(
                "the Gaussian likelihood is fitted by the linear mixed model".into(),
            )
        })?;
        Ok(Self {
            likelihood: likelihood.clone(),
            link,
        })
    }

    pub fn likelihood(&self) -> &Likelihood {
        &self.likelihood
    }

    pub fn link(&self) -> &dyn LinkFunction {
        self.link.as_ref()
    }

    /// Closed-form tilted moments exist for the probit model.
    pub fn is_probit(&self) -> bool {
        matches!(self.likelihood, Likelihood::Probit)
    }

    fn trials(&self, i: usize) -> f64 {
        match &self.likelihood {
            Likelihood::Binomial { trials } => trials[i],
            _ => 1.0,
        }
    }

    /// Starting latent values for IRLS.
    pub fn initialize_eta(&self, y: &[f64]) -> Vec<f64> {
        y.iter()
            .enumerate()
            .map(|(i, &yi)| {
                let mu = match &self.likelihood {
                    Likelihood::Bernoulli | Likelihood::Probit => (yi + 0.5) / 2.0,
                    Likelihood::Binomial { trials } => (yi + 0.5) / (trials[i] + 1.0),
                    Likelihood::Poisson => yi + 0.5,
                    Likelihood::Normal => yi,
                };
                self.link.link(mu)
            })
            .collect()
    }

    /// log p(yᵢ | f) with derivatives in f.
    pub fn log_density(&self, i: usize, y: f64, f: f64) -> LogDensity {
        match &self.likelihood {
            Likelihood::Bernoulli => {
                let mu = sigmoid(f);
                LogDensity {
                    value: y * f - softplus(f),
                    d1: y - mu,
                    d2: -mu * (1.0 - mu),
                }
            }
            Likelihood::Binomial { .. } => {
                let n = self.trials(i);
                let mu = sigmoid(f);
                LogDensity {
                    value: ln_binomial(n as u64, y as u64) + y * f - n * softplus(f),
                    d1: y - n * mu,
                    d2: -n * mu * (1.0 - mu),
                }
            }
            Likelihood::Poisson => {
                let lambda = f.exp();
                LogDensity {
                    value: y * f - lambda - ln_factorial(y as u64),
                    d1: y - lambda,
                    d2: -lambda,
                }
            }
            Likelihood::Probit => {
                let s = 2.0 * y - 1.0;
                let z = s * f;
                let r = inv_mills(z);
                LogDensity {
                    value: log_normal_cdf(z),
                    d1: s * r,
                    d2: -r * (z + r),
                }
            }
            Likelihood::Normal => LogDensity {
                value: -0.5 * (y - f).powi(2),
                d1: y - f,
                d2: -1.0,
            },
        }
    }

    /// Sum of log densities over all samples.
    pub fn log_likelihood(&self, y: &[f64], f: &[f64]) -> f64 {
        y.iter()
            .zip(f)
            .enumerate()
            .map(|(i, (&yi, &fi))| self.log_density(i, yi, fi).value)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_derivs(fam: &Family, y: f64, f: f64) -> (f64, f64) {
        let h = 1e-4;
        let lp = fam.log_density(0, y, f + h).value;
        let l0 = fam.log_density(0, y, f).value;
        let lm = fam.log_density(0, y, f - h).value;
        ((lp - lm) / (2.0 * h), (lp - 2.0 * l0 + lm) / (h * h))
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let cases = [
            (Likelihood::Bernoulli, 1.0),
            (Likelihood::Probit, 0.0),
            (Likelihood::Poisson, 4.0),
            (
                Likelihood::Binomial {
                    trials: vec![5.0],
                },
                2.0,
            ),
        ];
        for (lik, y) in cases.iter() {
            let fam = Family::new(lik).unwrap();
            for &f in &[-1.3, 0.0, 0.7] {
                let d = fam.log_density(0, *y, f);
                let (g1, g2) = numeric_derivs(&fam, *y, f);
                assert!(
                    (d.d1 - g1).abs() < 1e-5,
                    "{} d1 at {}: {} vs {}",
                    lik.name(),
                    f,
                    d.d1,
                    g1
                );
                assert!(
                    (d.d2 - g2).abs() < 1e-3,
                    "{} d2 at {}: {} vs {}",
                    lik.name(),
                    f,
                    d.d2,
                    g2
                );
            }
        }
    }

    #[test]
    fn test_poisson_density_normalised() {
        let fam = Family::new(&Likelihood::Poisson).unwrap();
        let f = 1.2f64;
        let total: f64 = (0..60).map(|k| fam.log_density(0, k as f64, f).value.exp()).sum();
        assert!((total - 1.0).abs() < 1e-10, "sum of pmf = {}", total);
    }

    #[test]
    fn test_normal_is_not_a_family() {
        assert!(matches!(
            Family::new(&Likelihood::Normal),
            Err(ScanError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_initial_eta_finite() {
        let fam = Family::new(&Likelihood::Bernoulli).unwrap();
        let eta = fam.initialize_eta(&[0.0, 1.0, 1.0, 0.0]);
        assert!(eta.iter().all(|e| e.is_finite()));
        assert!(eta[1] > eta[0]);
    }
}
