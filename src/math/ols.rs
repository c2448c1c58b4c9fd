//! Weighted linear least squares.
//!
//! Plateau fits solve problems of the form:
//!
//! ```text
//! minimize Σ w_i² (y_i - x_i^T β)²
//! ```
//!
//! Rows are scaled by `w_i` and the resulting ordinary least squares problem
//! is solved with an SVD, which stays well defined for tall design matrices.
//! (Nalgebra's `QR::solve` is intended for square systems and panics on
//! non-square input.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted least squares with per-row weights `w_i` (not squared).
///
/// Returns the coefficients and the weighted residual sum of squares.
pub fn solve_weighted_least_squares(
    x: &DMatrix<f64>,
    y: &[f64],
    w: &[f64],
) -> Option<(DVector<f64>, f64)> {
    if x.nrows() != y.len() || y.len() != w.len() {
        return None;
    }

    let mut xw = x.clone();
    let mut yw = DVector::<f64>::zeros(y.len());
    for i in 0..y.len() {
        for j in 0..xw.ncols() {
            xw[(i, j)] *= w[i];
        }
        yw[i] = y[i] * w[i];
    }

    let beta = solve_least_squares(&xw, &yw)?;
    let residual = &yw - &xw * &beta;
    let rss = residual.norm_squared();
    rss.is_finite().then_some((beta, rss))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weighted_constant_fit_is_weighted_mean() {
        let x = DMatrix::from_element(3, 1, 1.0);
        let y = [1.0, 2.0, 4.0];
        // Weights enter squared: effective weights 1, 4, 1.
        let w = [1.0, 2.0, 1.0];
        let (beta, rss) = solve_weighted_least_squares(&x, &y, &w).unwrap();
        let expected = (1.0 + 4.0 * 2.0 + 4.0) / 6.0;
        assert!((beta[0] - expected).abs() < 1e-12);
        let manual: f64 = y
            .iter()
            .zip(w.iter())
            .map(|(yi, wi)| (wi * (yi - expected)).powi(2))
            .sum();
        assert!((rss - manual).abs() < 1e-12);
    }
}
