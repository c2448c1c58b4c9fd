//! Levenberg–Marquardt for small dense nonlinear least squares problems.
//!
//! Minimizes `0.5 * Σ r_i(x)²` for a residual vector `r` supplied as a closure.
//! The Jacobian is built from central differences; the damping term uses the
//! diagonal of `JᵀJ` (Marquardt scaling) so parameters of very different size
//! (amplitudes ~1e-3, energies ~1) are stepped sensibly.
//!
//! Stopping rules:
//! - `gtol`: largest gradient component `|Jᵀr|` below tolerance
//! - `ftol`: relative cost reduction of an accepted step below tolerance
//! - `xtol`: accepted step small relative to the parameter norm
//! - no damping level yields a lower cost (stationary point)
//!
//! Running out of iterations is a failure, never a silent success.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{LqcdError, Result};

/// Relative finite-difference step (≈ ε^(1/3)).
const FD_STEP: f64 = 6e-6;
/// Smallest parameter scale used for the finite-difference step.
const FD_FLOOR: f64 = 1e-3;
const DIAG_FLOOR: f64 = 1e-30;
const MIN_DAMPING: f64 = 1e-15;
const MAX_DAMPING: f64 = 1e16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub initial_damping: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
            initial_damping: 1e-3,
        }
    }
}

impl LmOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(LqcdError::config("Solver max_iterations must be > 0."));
        }
        let tolerances = [self.ftol, self.xtol, self.gtol, self.initial_damping];
        if tolerances.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(LqcdError::config(
                "Solver tolerances and damping must be finite and > 0.",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmSolution {
    pub params: Vec<f64>,
    /// `0.5 * Σ r²` at the solution.
    pub cost: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LmFailure {
    NonFiniteStart,
    NonFiniteJacobian { iteration: usize },
    NonFiniteParams,
    MaxIterations { iterations: usize, cost: f64 },
}

impl fmt::Display for LmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LmFailure::NonFiniteStart => write!(f, "residuals are not finite at the initial guess"),
            LmFailure::NonFiniteJacobian { iteration } => {
                write!(f, "non-finite Jacobian at iteration {iteration}")
            }
            LmFailure::NonFiniteParams => write!(f, "solver produced non-finite parameters"),
            LmFailure::MaxIterations { iterations, cost } => {
                write!(f, "no convergence after {iterations} iterations (cost {cost:.3e})")
            }
        }
    }
}

/// Minimize `0.5 * |r(x)|²` starting from `initial`.
pub fn levenberg_marquardt<F>(
    residuals: F,
    initial: &[f64],
    opts: &LmOptions,
) -> std::result::Result<LmSolution, LmFailure>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let n = initial.len();
    let mut x = DVector::from_column_slice(initial);
    let mut r = residuals(x.as_slice());
    let mut cost = 0.5 * r.norm_squared();
    if !cost.is_finite() {
        return Err(LmFailure::NonFiniteStart);
    }

    let mut lambda = opts.initial_damping;

    for iteration in 1..=opts.max_iterations {
        let jac = jacobian(&residuals, x.as_slice(), r.len())
            .ok_or(LmFailure::NonFiniteJacobian { iteration })?;
        let jt = jac.transpose();
        let gradient = &jt * &r;
        if gradient.amax() <= opts.gtol {
            return finish(x, cost, iteration);
        }

        let jtj = &jt * &jac;
        let scale: Vec<f64> = jtj.diagonal().iter().map(|d| d.max(DIAG_FLOOR)).collect();
        let neg_gradient = -&gradient;

        let mut accepted = false;
        while lambda <= MAX_DAMPING {
            let mut damped = jtj.clone();
            for k in 0..n {
                damped[(k, k)] += lambda * scale[k];
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let step = chol.solve(&neg_gradient);
            let candidate = &x + &step;
            let r_new = residuals(candidate.as_slice());
            let cost_new = 0.5 * r_new.norm_squared();

            if cost_new.is_finite() && cost_new < cost {
                let reduction = cost - cost_new;
                let small_step = step.norm() <= opts.xtol * (opts.xtol + x.norm());
                let small_reduction = reduction <= opts.ftol * cost;

                x = candidate;
                r = r_new;
                cost = cost_new;
                lambda = (lambda * 0.1).max(MIN_DAMPING);
                accepted = true;

                if small_step || small_reduction {
                    return finish(x, cost, iteration);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // No damping level lowers the cost any further.
            return finish(x, cost, iteration);
        }
    }

    Err(LmFailure::MaxIterations {
        iterations: opts.max_iterations,
        cost,
    })
}

fn finish(
    x: DVector<f64>,
    cost: f64,
    iterations: usize,
) -> std::result::Result<LmSolution, LmFailure> {
    if x.iter().all(|v| v.is_finite()) && cost.is_finite() {
        Ok(LmSolution {
            params: x.iter().copied().collect(),
            cost,
            iterations,
        })
    } else {
        Err(LmFailure::NonFiniteParams)
    }
}

fn jacobian<F>(residuals: &F, x: &[f64], m: usize) -> Option<DMatrix<f64>>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let mut jac = DMatrix::<f64>::zeros(m, x.len());
    let mut shifted = x.to_vec();
    for j in 0..x.len() {
        let h = FD_STEP * x[j].abs().max(FD_FLOOR);
        shifted[j] = x[j] + h;
        let up = residuals(&shifted);
        shifted[j] = x[j] - h;
        let down = residuals(&shifted);
        shifted[j] = x[j];

        for i in 0..m {
            let d = (up[i] - down[i]) / (2.0 * h);
            if !d.is_finite() {
                return None;
            }
            jac[(i, j)] = d;
        }
    }
    Some(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exponential_decay() {
        let ts: Vec<f64> = (0..12).map(|t| t as f64).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 2.0 * (-0.4 * t).exp()).collect();
        let residuals = |p: &[f64]| {
            DVector::from_iterator(
                ts.len(),
                ts.iter().zip(ys.iter()).map(|(t, y)| p[0] * (-p[1] * t).exp() - y),
            )
        };
        let sol = levenberg_marquardt(residuals, &[1.0, 0.1], &LmOptions::default()).unwrap();
        assert!((sol.params[0] - 2.0).abs() < 1e-8, "{:?}", sol.params);
        assert!((sol.params[1] - 0.4).abs() < 1e-8, "{:?}", sol.params);
        assert!(sol.cost < 1e-16);
    }

    #[test]
    fn reports_non_finite_start() {
        let residuals = |p: &[f64]| DVector::from_element(3, p[0].ln());
        let err = levenberg_marquardt(residuals, &[-1.0], &LmOptions::default()).unwrap_err();
        assert_eq!(err, LmFailure::NonFiniteStart);
    }

    #[test]
    fn reports_iteration_cap() {
        // Rosenbrock in residual form needs more than one iteration from (-1.2, 1).
        let residuals = |p: &[f64]| DVector::from_vec(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]]);
        let opts = LmOptions {
            max_iterations: 1,
            ..LmOptions::default()
        };
        let err = levenberg_marquardt(residuals, &[-1.2, 1.0], &opts).unwrap_err();
        assert!(matches!(err, LmFailure::MaxIterations { iterations: 1, .. }));
    }
}
