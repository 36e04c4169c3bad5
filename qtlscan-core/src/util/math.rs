//! Mathematical utility functions.

use statrs::function::erf::erfc;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// log(sum(exp(values))) without overflow.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let top = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return top;
    }
    top + values.iter().map(|v| (v - top).exp()).sum::<f64>().ln()
}

/// Logistic function 1 / (1 + e^{-x}).
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// log(1 + e^x).
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Standard normal log density.
pub fn log_normal_pdf(x: f64) -> f64 {
    -0.5 * x * x - LN_SQRT_2PI
}

/// log Φ(x), accurate far into the lower tail.
pub fn log_normal_cdf(x: f64) -> f64 {
    if x > -30.0 {
        (0.5 * erfc(-x / std::f64::consts::SQRT_2)).ln()
    } else {
        // Asymptotic series: Φ(x) ≈ φ(x)/(-x) (1 - 1/x² + 3/x⁴)
        let x2 = x * x;
        log_normal_pdf(x) - (-x).ln() + (1.0 - 1.0 / x2 + 3.0 / (x2 * x2)).ln()
    }
}

/// Inverse Mills ratio φ(x) / Φ(x).
pub fn inv_mills(x: f64) -> f64 {
    (log_normal_pdf(x) - log_normal_cdf(x)).exp()
}

/// Percentile of `values` in [0, 100] with linear interpolation between ranks.
///
/// NaN entries are ignored. Returns NaN when nothing remains.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().cloned().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Relative change between two parameter vectors.
pub fn max_relative_change(old: &[f64], new: &[f64]) -> f64 {
    old.iter()
        .zip(new.iter())
        .map(|(a, b)| (a - b).abs() / (a.abs().max(b.abs()).max(1.0)))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sum_exp() {
        let a = (0.3_f64).ln();
        let b = (0.7_f64).ln();
        assert!((log_sum_exp(&[a, b]).exp() - 1.0).abs() < 1e-10);
        assert!((log_sum_exp(&[1000.0, 1000.0]) - (1000.0 + 2f64.ln())).abs() < 1e-10);
    }

    #[test]
    fn test_softplus_and_sigmoid() {
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
        assert!((softplus(800.0) - 800.0).abs() < 1e-12);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn test_log_normal_cdf_tails() {
        assert!((log_normal_cdf(0.0) - 0.5f64.ln()).abs() < 1e-12);
        // Continuity across the asymptotic switch
        let a = log_normal_cdf(-29.999);
        let b = log_normal_cdf(-30.001);
        assert!((a - b).abs() < 0.1, "{} vs {}", a, b);
        assert!(inv_mills(-40.0) > 39.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert!((percentile(&v, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 100.0) - 4.0).abs() < 1e-12);
        assert!(percentile(&[], 1.0).is_nan());
    }
}
