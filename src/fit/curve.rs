//! Fitted curves evaluated on dense time grids, per bin.

use nalgebra::DMatrix;

use crate::domain::{FitMethod, FitResult};
use crate::error::{LqcdError, Result};
use crate::fit::grid::linspace;
use crate::fit::ThreepSeries;
use crate::models::{one_state_twop, two_state_meff, two_state_threep, two_state_twop};
use crate::resample::{bin_average, calc_error};

/// Number of abscissae used when no count is given.
pub const CURVE_POINTS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub ts: Vec<f64>,
    /// `[bin, point]`
    pub values: DMatrix<f64>,
}

impl Curve {
    /// Bin average and jackknife error at every abscissa.
    pub fn summary(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        Ok((bin_average(&self.values), calc_error(&self.values)?))
    }
}

fn evaluate(fit: &FitResult, ts: Vec<f64>, f: impl Fn(f64, &[f64]) -> f64) -> Curve {
    let values = DMatrix::from_fn(fit.bin_num(), ts.len(), |b, i| {
        let p: Vec<f64> = fit.params.row(b).iter().copied().collect();
        f(ts[i], &p)
    });
    Curve { ts, values }
}

/// Curve of a two-point-type fit over its own window.
///
/// One- and two-state two-point fits evaluate the correlator model; the
/// two-state effective-mass fit evaluates the effective-mass model.
pub fn fitted_curve(method: FitMethod, fit: &FitResult, t_ext: usize, points: usize) -> Result<Curve> {
    let expected = match method {
        FitMethod::OneStateTwop => 2,
        FitMethod::TwoStateTwop => 4,
        FitMethod::TwoStateMeff => 3,
    };
    if fit.params.ncols() != expected {
        return Err(LqcdError::config(format!(
            "{} expects {expected} parameters, fit has {}.",
            method.display_name(),
            fit.params.ncols()
        )));
    }
    let ts = linspace(fit.window.start as f64, fit.window.end as f64, points)?;
    Ok(match method {
        FitMethod::OneStateTwop => evaluate(fit, ts, |t, p| one_state_twop(t, t_ext, p[0], p[1])),
        FitMethod::TwoStateTwop => {
            evaluate(fit, ts, |t, p| two_state_twop(t, t_ext, p[0], p[1], p[2], p[3]))
        }
        FitMethod::TwoStateMeff => evaluate(fit, ts, |t, p| two_state_meff(t, t_ext, p[0], p[1], p[2])),
    })
}

/// Effective-mass curve implied by a two-state two-point fit `(c0, c1, E0, E1)`.
pub fn meff_curve_from_twop_fit(fit: &FitResult, t_ext: usize, points: usize) -> Result<Curve> {
    if fit.params.ncols() != 4 {
        return Err(LqcdError::config(format!(
            "Two-state two-point fit has 4 parameters, got {}.",
            fit.params.ncols()
        )));
    }
    let ts = linspace(fit.window.start as f64, fit.window.end as f64, points)?;
    Ok(evaluate(fit, ts, |t, p| two_state_meff(t, t_ext, p[1] / p[0], p[2], p[3])))
}

/// Three-point curves, one per sink time, over each sink's insertion range.
pub fn threep_curves(
    fit: &FitResult,
    series: &[ThreepSeries],
    e0: &[f64],
    e1: &[f64],
    t_ext: usize,
    points: usize,
) -> Result<Vec<Curve>> {
    if fit.params.ncols() != 3 {
        return Err(LqcdError::config(format!(
            "Three-point fit has 3 parameters, got {}.",
            fit.params.ncols()
        )));
    }
    if e0.len() != fit.bin_num() || e1.len() != fit.bin_num() {
        return Err(LqcdError::config("Energies and three-point fit differ in bin count."));
    }
    series
        .iter()
        .map(|s| {
            let (Some(&first), Some(&last)) = (s.insertion_times.first(), s.insertion_times.last())
            else {
                return Err(LqcdError::config(format!(
                    "tsink {} has no insertion times.",
                    s.tsink
                )));
            };
            let ts = linspace(first as f64, last as f64, points)?;
            let values = DMatrix::from_fn(fit.bin_num(), ts.len(), |b, i| {
                let p = fit.params.row(b);
                two_state_threep(ts[i], s.tsink, t_ext, p[0], p[1], p[2], e0[b], e1[b])
            });
            Ok(Curve { ts, values })
        })
        .collect()
}
