//! Effective masses from two-point functions.
//!
//! Both functions take `[bin, t]` data and return `[bin, t]` with `NaN` at
//! the slices where the effective mass is undefined, so time indices keep
//! their meaning downstream.

use nalgebra::DMatrix;

use crate::error::{LqcdError, Result};
use crate::models::sym_meff;

/// `ln(C(t) / C(t+1))`; the last slice is `NaN`.
pub fn meff(twop: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let t_num = twop.ncols();
    if t_num < 2 {
        return Err(LqcdError::config(format!(
            "Effective mass needs at least two time slices, got {t_num}."
        )));
    }
    Ok(DMatrix::from_fn(twop.nrows(), t_num, |b, t| {
        if t + 1 < t_num {
            (twop[(b, t)] / twop[(b, t + 1)]).ln()
        } else {
            f64::NAN
        }
    }))
}

/// Symmetric (cosh) effective mass of folded `[bin, 0..=T/2]` data.
///
/// The last folded slice is the midpoint `C(T/2)`. `t = 0` and `t = T/2` are
/// `NaN`.
pub fn meff_from_sym_twop(folded: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let t_num = folded.ncols();
    if t_num < 3 {
        return Err(LqcdError::config(format!(
            "Symmetric effective mass needs at least three folded slices, got {t_num}."
        )));
    }
    let last = t_num - 1;
    Ok(DMatrix::from_fn(folded.nrows(), t_num, |b, t| {
        if t == 0 || t == last {
            f64::NAN
        } else {
            sym_meff(folded[(b, t - 1)], folded[(b, t + 1)], folded[(b, last)])
        }
    }))
}
