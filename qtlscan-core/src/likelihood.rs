//! Response distribution descriptor.
//!
//! A likelihood is named by a case-insensitive string; `binomial` also
//! carries the number of trials per sample. Validation is pure and runs
//! before any data is touched.

use serde::Serialize;

use crate::error::{Result, ScanError};
use crate::glmm::family::get_link;

/// Unvalidated likelihood request: a name plus optional binomial trials.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodSpec {
    pub name: String,
    pub trials: Option<Vec<f64>>,
}

impl LikelihoodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trials: None,
        }
    }

    pub fn binomial(trials: Vec<f64>) -> Self {
        Self {
            name: "binomial".to_string(),
            trials: Some(trials),
        }
    }
}

impl Default for LikelihoodSpec {
    fn default() -> Self {
        Self::new("normal")
    }
}

impl From<&str> for LikelihoodSpec {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for LikelihoodSpec {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A validated likelihood.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Likelihood {
    Normal,
    Bernoulli,
    Probit,
    Binomial { trials: Vec<f64> },
    Poisson,
}

impl Likelihood {
    pub const NAMES: [&'static str; 5] = ["normal", "bernoulli", "probit", "binomial", "poisson"];

    /// Validate a likelihood request.
    pub fn from_spec(spec: &LikelihoodSpec) -> Result<Self> {
        let name = spec.name.trim().to_lowercase();
        let lik = match name.as_str() {
            "normal" => Likelihood::Normal,
            "bernoulli" => Likelihood::Bernoulli,
            "probit" => Likelihood::Probit,
            "poisson" => Likelihood::Poisson,
            "binomial" => {
                let trials = spec.trials.clone().ok_or_else(|| {
                    ScanError::InvalidLikelihood("binomial requires the number of trials".into())
                })?;
                if let Some(bad) = trials
                    .iter()
                    .find(|t| !t.is_finite() || **t < 1.0 || t.fract() != 0.0)
                {
                    return Err(ScanError::InvalidLikelihood(format!(
                        "binomial trials must be positive integers (found {})",
                        bad
                    )));
                }
                Likelihood::Binomial { trials }
            }
            other => {
                return Err(ScanError::InvalidLikelihood(format!(
                    "'{}' is not one of {:?}",
                    other,
                    Self::NAMES
                )))
            }
        };
        if spec.trials.is_some() && !matches!(lik, Likelihood::Binomial { .. }) {
            return Err(ScanError::InvalidLikelihood(format!(
                "{} takes no trials",
                lik.name()
            )));
        }
        Ok(lik)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Likelihood::Normal => "normal",
            Likelihood::Bernoulli => "bernoulli",
            Likelihood::Probit => "probit",
            Likelihood::Binomial { .. } => "binomial",
            Likelihood::Poisson => "poisson",
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Likelihood::Normal)
    }

    /// Reorder per-sample auxiliary data to follow a conformed sample order.
    ///
    /// `nsamples` is the row count of the trait matrix the trials were
    /// given alongside; `rows` index into it.
    pub fn select_samples(&self, nsamples: usize, rows: &[usize]) -> Result<Self> {
        match self {
            Likelihood::Binomial { trials } => {
                if trials.len() != nsamples {
                    return Err(ScanError::ShapeMismatch(format!(
                        "binomial trials has {} entries for {} trait rows",
                        trials.len(),
                        nsamples
                    )));
                }
                let picked = rows
                    .iter()
                    .map(|&r| {
                        trials.get(r).copied().ok_or_else(|| {
                            ScanError::ShapeMismatch(format!(
                                "binomial trials has {} entries but sample row {} was requested",
                                trials.len(),
                                r
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Likelihood::Binomial { trials: picked })
            }
            other => Ok(other.clone()),
        }
    }

    /// Check that the outcome vector is in the support of the distribution.
    pub fn validate_outcome(&self, y: &[f64]) -> Result<()> {
        let fail = |reason: String| ScanError::InvalidOutcome {
            likelihood: self.name(),
            reason,
        };
        match self {
            Likelihood::Normal => Ok(()),
            Likelihood::Bernoulli | Likelihood::Probit => {
                match y.iter().find(|&&v| v != 0.0 && v != 1.0) {
                    Some(v) => Err(fail(format!("outcomes must be 0 or 1 (found {})", v))),
                    None => Ok(()),
                }
            }
            Likelihood::Poisson => match y.iter().find(|&&v| v < 0.0 || v.fract() != 0.0) {
                Some(v) => Err(fail(format!(
                    "outcomes must be non-negative integers (found {})",
                    v
                ))),
                None => Ok(()),
            },
            Likelihood::Binomial { trials } => {
                if trials.len() != y.len() {
                    return Err(ScanError::ShapeMismatch(format!(
                        "binomial trials has {} entries for {} samples",
                        trials.len(),
                        y.len()
                    )));
                }
                match y
                    .iter()
                    .zip(trials)
                    .find(|&(&k, &n)| k < 0.0 || k > n || k.fract() != 0.0)
                {
                    Some((k, n)) => Err(fail(format!(
                        "successes must be integers in [0, trials] (found {} of {})",
                        k, n
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// Observation model line printed in result summaries.
    pub fn observation_formula(&self) -> Option<String> {
        let g = get_link(self)?.formula();
        let model = match self {
            Likelihood::Normal => return None,
            Likelihood::Bernoulli | Likelihood::Probit => "Bern(μᵢ=g(zᵢ))",
            Likelihood::Binomial { .. } => "Binom(μᵢ=g(zᵢ), nᵢ)",
            Likelihood::Poisson => "Poisson(λᵢ=g(zᵢ))",
        };
        Some(format!("yᵢ ~ {}, where g(x)={}", model, g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let lik = Likelihood::from_spec(&"Poisson".into()).unwrap();
        assert_eq!(lik, Likelihood::Poisson);
        let lik = Likelihood::from_spec(&"  NORMAL ".into()).unwrap();
        assert_eq!(lik, Likelihood::Normal);
    }

    #[test]
    fn test_unknown_name_rejected() {
        let err = Likelihood::from_spec(&"gamma".into()).unwrap_err();
        assert!(matches!(err, ScanError::InvalidLikelihood(_)));
    }

    #[test]
    fn test_binomial_needs_trials() {
        let err = Likelihood::from_spec(&"binomial".into()).unwrap_err();
        assert!(matches!(err, ScanError::InvalidLikelihood(_)));
        let err = Likelihood::from_spec(&LikelihoodSpec::binomial(vec![2.0, 0.0])).unwrap_err();
        assert!(matches!(err, ScanError::InvalidLikelihood(_)));
        let ok = Likelihood::from_spec(&LikelihoodSpec::binomial(vec![2.0, 3.0])).unwrap();
        assert_eq!(ok.name(), "binomial");
    }

    #[test]
    fn test_trials_on_other_likelihood_rejected() {
        let spec = LikelihoodSpec {
            name: "poisson".into(),
            trials: Some(vec![1.0]),
        };
        assert!(matches!(
            Likelihood::from_spec(&spec),
            Err(ScanError::InvalidLikelihood(_))
        ));
    }

    #[test]
    fn test_outcome_support() {
        assert!(Likelihood::Bernoulli.validate_outcome(&[0.0, 1.0]).is_ok());
        assert!(Likelihood::Bernoulli.validate_outcome(&[0.0, 2.0]).is_err());
        assert!(Likelihood::Poisson.validate_outcome(&[0.0, 7.0]).is_ok());
        assert!(Likelihood::Poisson.validate_outcome(&[1.5]).is_err());
        let binom = Likelihood::Binomial {
            trials: vec![3.0, 3.0],
        };
        assert!(binom.validate_outcome(&[0.0, 3.0]).is_ok());
        assert!(binom.validate_outcome(&[4.0, 0.0]).is_err());
        assert!(matches!(
            binom.validate_outcome(&[1.0]),
            Err(ScanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_observation_formula() {
        assert_eq!(
            Likelihood::Poisson.observation_formula().unwrap(),
            "yᵢ ~ Poisson(λᵢ=g(zᵢ)), where g(x)=eˣ"
        );
        assert!(Likelihood::Normal.observation_formula().is_none());
    }

    #[test]
    fn test_select_samples_reorders_trials() {
        let binom = Likelihood::Binomial {
            trials: vec![1.0, 2.0, 3.0],
        };
        let picked = binom.select_samples(3, &[2, 0]).unwrap();
        assert_eq!(
            picked,
            Likelihood::Binomial {
                trials: vec![3.0, 1.0]
            }
        );
    }

    #[test]
    fn test_select_samples_rejects_extra_trials() {
        let binom = Likelihood::Binomial {
            trials: vec![2.0; 25],
        };
        let err = binom.select_samples(20, &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, ScanError::ShapeMismatch(_)), "{:?}", err);
        assert!(Likelihood::Poisson.select_samples(20, &[0]).is_ok());
    }
}
