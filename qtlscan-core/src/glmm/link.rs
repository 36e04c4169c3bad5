//! Link functions for the exponential-family likelihoods.
//!
//! Maps between the latent linear predictor (eta) and the mean (mu).

use statrs::function::erf::{erf_inv, erfc};

use crate::util::math::{log_normal_pdf, sigmoid};

/// Link function interface.
pub trait LinkFunction {
    /// Apply the link function: eta = g(mu).
    fn link(&self, mu: f64) -> f64;
    /// Apply the inverse link: mu = g^{-1}(eta).
    fn inv_link(&self, eta: f64) -> f64;
    /// Derivative of the inverse link: d(mu)/d(eta).
    fn inv_link_deriv(&self, eta: f64) -> f64;
    /// Formula of the inverse link as printed in summaries.
    fn formula(&self) -> &'static str;
}

/// Logit link for Bernoulli and binomial outcomes.
#[derive(Debug, Clone, Copy)]
pub struct LogitLink;

impl LinkFunction for LogitLink {
    fn link(&self, mu: f64) -> f64 {
        (mu / (1.0 - mu)).ln()
    }

    fn inv_link(&self, eta: f64) -> f64 {
        sigmoid(eta)
    }

    fn inv_link_deriv(&self, eta: f64) -> f64 {
        let p = self.inv_link(eta);
        p * (1.0 - p)
    }

    fn formula(&self) -> &'static str {
        "1/(1+e⁻ˣ)"
    }
}

/// Probit link: mu = Φ(eta).
#[derive(Debug, Clone, Copy)]
pub struct ProbitLink;

impl LinkFunction for ProbitLink {
    fn link(&self, mu: f64) -> f64 {
        std::f64::consts::SQRT_2 * erf_inv(2.0 * mu - 1.0)
    }

    fn inv_link(&self, eta: f64) -> f64 {
        0.5 * erfc(-eta / std::f64::consts::SQRT_2)
    }

    fn inv_link_deriv(&self, eta: f64) -> f64 {
        log_normal_pdf(eta).exp()
    }

    fn formula(&self) -> &'static str {
        "Φ(x)"
    }
}

/// Log link for Poisson counts.
#[derive(Debug, Clone, Copy)]
pub struct LogLink;

impl LinkFunction for LogLink {
    fn link(&self, mu: f64) -> f64 {
        mu.ln()
    }

    fn inv_link(&self, eta: f64) -> f64 {
        eta.exp()
    }

    fn inv_link_deriv(&self, eta: f64) -> f64 {
        eta.exp()
    }

    fn formula(&self) -> &'static str {
        "eˣ"
    }
}

/// Identity link for Gaussian traits.
#[derive(Debug, Clone, Copy)]
pub struct IdentityLink;

impl LinkFunction for IdentityLink {
    fn link(&self, mu: f64) -> f64 {
        mu
    }

    fn inv_link(&self, eta: f64) -> f64 {
        eta
    }

    fn inv_link_deriv(&self, _eta: f64) -> f64 {
        1.0
    }

    fn formula(&self) -> &'static str {
        "x"
    }
}
