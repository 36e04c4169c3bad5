//! Scalar and multivariate minimisers used by the null-model fits.
//!
//! Brent's method handles the one-dimensional variance-ratio searches.
//! Multivariate problems go through `wolfe_bfgs` with central
//! finite-difference gradients.

use std::cell::RefCell;

use ndarray::Array1;
use tracing::{debug, warn};
use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::error::{Result, ScanError};

const GOLDEN: f64 = 0.381_966_011_250_105_1;

/// Minimise `f` on `[lo, hi]` with Brent's parabolic/golden-section method.
///
/// Returns the minimiser and the minimum.
pub fn brent_minimize<F>(f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> (f64, f64)
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = (lo.min(hi), lo.max(hi));
    let mut x = a + GOLDEN * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..max_iter {
        let m = 0.5 * (a + b);
        let tol1 = tol * x.abs() + 1e-10;
        let tol2 = 2.0 * tol1;
        if (x - m).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            if p.abs() < (0.5 * q * e).abs() && p > q * (a - x) && p < q * (b - x) {
                e = d;
                d = p / q;
                let u = x + d;
                if (u - a) < tol2 || (b - u) < tol2 {
                    d = if m > x { tol1 } else { -tol1 };
                }
                golden = false;
            }
        }
        if golden {
            e = if x < m { b - x } else { a - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else if d > 0.0 {
            x + tol1
        } else {
            x - tol1
        };
        let fu = f(u);

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    (x, fx)
}

/// Grid scan followed by Brent refinement around the best grid cell.
///
/// Guards against the multimodal profiles variance-ratio likelihoods can have.
pub fn grid_brent_minimize<F>(
    f: F,
    lo: f64,
    hi: f64,
    grid_points: usize,
    tol: f64,
    max_iter: usize,
) -> (f64, f64)
where
    F: Fn(f64) -> f64,
{
    let k = grid_points.max(3);
    let step = (hi - lo) / (k - 1) as f64;
    let values: Vec<f64> = (0..k)
        .map(|i| {
            let v = f(lo + step * i as f64);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        })
        .collect();
    let best = (0..k)
        .min_by(|&i, &j| values[i].total_cmp(&values[j]))
        .unwrap_or(0);
    let left = lo + step * best.saturating_sub(1) as f64;
    let right = lo + step * (best + 1).min(k - 1) as f64;
    let (x, fx) = brent_minimize(&f, left, right, tol, max_iter);
    let grid_x = lo + step * best as f64;
    if values[best] < fx {
        (grid_x, values[best])
    } else {
        (x, fx)
    }
}

/// Options for [`minimize_bfgs`].
#[derive(Debug, Clone)]
pub struct BfgsOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Relative step of the central-difference gradient.
    pub gradient_step: f64,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 200,
            gradient_step: 1e-5,
        }
    }
}

/// Outcome of a BFGS minimisation.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

/// Central finite-difference gradient.
pub fn numeric_gradient<F>(f: &F, x: &[f64], rel_step: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|k| {
            let h = rel_step * x[k].abs().max(1.0);
            probe[k] = x[k] + h;
            let up = f(&probe);
            probe[k] = x[k] - h;
            let down = f(&probe);
            probe[k] = x[k];
            (up - down) / (2.0 * h)
        })
        .collect()
}

/// Minimise `cost` from `x0` with BFGS on numeric gradients.
///
/// Non-finite costs are replaced by a large finite penalty. When the line
/// search gives up, the best point evaluated so far is returned.
pub fn minimize_bfgs<F>(cost: F, x0: Vec<f64>, options: &BfgsOptions) -> Result<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let best: RefCell<(Vec<f64>, f64)> = RefCell::new((x0.clone(), f64::INFINITY));

    let safe_cost = |x: &[f64]| -> f64 {
        let v = cost(x);
        let v = if v.is_finite() { v } else { 1e10 };
        let mut b = best.borrow_mut();
        if v < b.1 {
            *b = (x.to_vec(), v);
        }
        v
    };

    let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
        let point = x.to_vec();
        let value = safe_cost(&point);
        let grad = numeric_gradient(&safe_cost, &point, options.gradient_step);
        (value, Array1::from(grad))
    };

    let outcome = Bfgs::new(Array1::from(x0), cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run();
    match outcome {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => {
            debug!("BFGS finished in {} iterations at {:.6}", iterations, final_value);
            let (best_point, best_value) = best.into_inner();
            if best_value < final_value {
                Ok(Minimum {
                    point: best_point,
                    value: best_value,
                    iterations,
                })
            } else {
                Ok(Minimum {
                    point: final_point.to_vec(),
                    value: final_value,
                    iterations,
                })
            }
        }
        Err(e) => {
            let (point, value) = best.into_inner();
            if value.is_finite() && value < 1e10 {
                warn!("BFGS stopped early ({:?}); keeping best point found", e);
                Ok(Minimum {
                    point,
                    value,
                    iterations: options.max_iterations,
                })
            } else {
                Err(ScanError::FittingFailure(format!("BFGS failed: {:?}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brent_quadratic() {
        let (x, fx) = brent_minimize(|x| (x - 1.5).powi(2) + 2.0, -4.0, 4.0, 1e-10, 200);
        assert!((x - 1.5).abs() < 1e-6, "x = {}", x);
        assert!((fx - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_grid_brent_picks_global_basin() {
        // Two basins; the deeper one at x = 3.
        let f = |x: f64| ((x + 2.0).powi(2) - 0.5).min((x - 3.0).powi(2) - 1.0);
        let (x, _) = grid_brent_minimize(f, -5.0, 5.0, 21, 1e-10, 200);
        assert!((x - 3.0).abs() < 1e-4, "x = {}", x);
    }

    #[test]
    fn test_numeric_gradient() {
        let f = |x: &[f64]| x[0] * x[0] + 3.0 * x[1];
        let g = numeric_gradient(&f, &[2.0, -1.0], 1e-6);
        assert!((g[0] - 4.0).abs() < 1e-5);
        assert!((g[1] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let min = minimize_bfgs(f, vec![-1.2, 1.0], &BfgsOptions::default()).unwrap();
        assert!(min.value < 1e-4, "value = {}", min.value);
        assert!((min.point[0] - 1.0).abs() < 5e-2, "x = {:?}", min.point);
    }
}
