//! Constant (plateau) fits, weighted by inverse errors.

use nalgebra::DMatrix;

use crate::domain::{FitResult, FitWindow};
use crate::error::{LqcdError, Result};
use crate::math::solve_weighted_least_squares;
use crate::resample::bin_average;

/// Fit a constant to `data[b, start..=end]` for every bin.
///
/// Rows are weighted by `1 / err[t]`; `err` is indexed by absolute time and
/// must be finite and strictly positive inside the window. χ² is the weighted
/// residual sum of squares divided by `dof = len - 1`.
pub fn fit_plateau(data: &DMatrix<f64>, err: &[f64], start: usize, end: usize) -> Result<FitResult> {
    let window = FitWindow::new(start, end, 1)?;
    window.check_within(data.ncols())?;
    if err.len() != data.ncols() {
        return Err(LqcdError::config(format!(
            "Error vector has {} entries for {} time slices.",
            err.len(),
            data.ncols()
        )));
    }
    let weights = inverse_errors(&err[start..=end], window)?;
    let dof = window.dof(1) as f64;
    let design = DMatrix::from_element(window.len(), 1, 1.0);

    let solve = |y: &[f64]| -> Result<(f64, f64)> {
        let (beta, rss) = solve_weighted_least_squares(&design, y, &weights).ok_or_else(|| {
            LqcdError::degenerate(format!("Plateau fit over {window} has no finite solution."))
        })?;
        Ok((beta[0], rss / dof))
    };

    let mut params = DMatrix::<f64>::zeros(data.nrows(), 1);
    let mut chi_sq = Vec::with_capacity(data.nrows());
    for b in 0..data.nrows() {
        let y: Vec<f64> = window.times().map(|t| data[(b, t)]).collect();
        let (value, chi) = solve(&y)?;
        params[(b, 0)] = value;
        chi_sq.push(chi);
    }

    let mean = bin_average(data);
    let (mean_value, _) = solve(&mean[start..=end])?;

    Ok(FitResult {
        mean_params: vec![mean_value],
        params,
        chi_sq,
        window,
    })
}

pub(crate) fn inverse_errors(err: &[f64], window: FitWindow) -> Result<Vec<f64>> {
    if let Some(bad) = err.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
        return Err(LqcdError::degenerate(format!(
            "Errors over {window} must be finite and > 0 (found {bad})."
        )));
    }
    Ok(err.iter().map(|e| 1.0 / e).collect())
}

/// Shape of a `[bin, Q, ratio, t]` array flattened to `[bin, (Q, ratio, t)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioShape {
    pub momentum_num: usize,
    pub ratio_num: usize,
    pub time_num: usize,
}

impl RatioShape {
    pub fn series_num(&self) -> usize {
        self.momentum_num * self.ratio_num
    }

    pub fn columns(&self) -> usize {
        self.series_num() * self.time_num
    }
}

/// Plateau-fit every `(Q, ratio)` time series.
///
/// `vals` is `[bin, (Q, ratio, t)]` and `err` the matching flattened
/// `(Q, ratio, t)` errors. Returns `[bin, (Q, ratio)]`.
pub fn fit_gen_form_factor(
    vals: &DMatrix<f64>,
    err: &[f64],
    shape: RatioShape,
    start: usize,
    end: usize,
) -> Result<DMatrix<f64>> {
    if vals.ncols() != shape.columns() || err.len() != shape.columns() {
        return Err(LqcdError::config(format!(
            "Ratio data has {} columns and {} errors, expected {}.",
            vals.ncols(),
            err.len(),
            shape.columns()
        )));
    }
    let t_num = shape.time_num;
    let mut out = DMatrix::<f64>::zeros(vals.nrows(), shape.series_num());
    for s in 0..shape.series_num() {
        let series = vals.columns(s * t_num, t_num).into_owned();
        let fit = fit_plateau(&series, &err[s * t_num..(s + 1) * t_num], start, end)?;
        out.set_column(s, &fit.params.column(0));
    }
    Ok(out)
}
