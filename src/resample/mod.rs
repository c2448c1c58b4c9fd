//! Jackknife resampling and error estimation.
//!
//! Arrays keep the sample axis (configuration or bin) as rows; any trailing
//! axes are flattened into columns, so every routine here works column-wise
//! regardless of the original shape.
//!
//! - `jackknife`: leave-one-bin-out means over contiguous bins
//! - `jackknife_bin_subset`: the same for an explicit list of global bins,
//!   used when bins are sharded across workers
//! - `calc_error`: jackknife error `std * (N-1)/sqrt(N)`
//! - `fold`: average a periodic correlator with its time reflection

use nalgebra::DMatrix;

use crate::domain::{CorrelatorSample, JackknifeBinSet};
use crate::error::{LqcdError, Result};

/// Jackknife every contiguous bin of `bin_size` configurations.
pub fn jackknife(sample: &CorrelatorSample, bin_size: usize) -> Result<JackknifeBinSet> {
    let bin_num = check_binning(sample.config_num(), bin_size)?;
    let bins: Vec<usize> = (0..bin_num).collect();
    jackknife_bin_subset(sample, bin_size, &bins)
}

/// Jackknife only the given global bin indices, in the order supplied.
///
/// Bin boundaries are always those of the full ensemble, so shards computed on
/// different workers concatenate to the result of [`jackknife`].
pub fn jackknife_bin_subset(
    sample: &CorrelatorSample,
    bin_size: usize,
    bins: &[usize],
) -> Result<JackknifeBinSet> {
    let values = jackknife_rows(sample.values(), bin_size, bins)?;
    Ok(JackknifeBinSet {
        values,
        momentum_num: sample.momentum_num(),
        time_extent: sample.time_extent(),
        bin_size,
    })
}

/// Row-level jackknife on a `[config, ...]` matrix.
pub fn jackknife_rows(values: &DMatrix<f64>, bin_size: usize, bins: &[usize]) -> Result<DMatrix<f64>> {
    let config_num = values.nrows();
    let bin_num = check_binning(config_num, bin_size)?;
    if let Some(&bad) = bins.iter().find(|&&b| b >= bin_num) {
        return Err(LqcdError::config(format!(
            "Bin index {bad} out of range ({bin_num} bins)."
        )));
    }

    let total = values.row_sum();
    let denom = (config_num - bin_size) as f64;

    let mut out = DMatrix::<f64>::zeros(bins.len(), values.ncols());
    for (row, &b) in bins.iter().enumerate() {
        let bin_sum = values.rows(b * bin_size, bin_size).row_sum();
        for c in 0..values.ncols() {
            out[(row, c)] = (total[c] - bin_sum[c]) / denom;
        }
    }
    Ok(out)
}

fn check_binning(config_num: usize, bin_size: usize) -> Result<usize> {
    if bin_size == 0 {
        return Err(LqcdError::config("Bin size must be > 0."));
    }
    if config_num % bin_size != 0 {
        return Err(LqcdError::config(format!(
            "Number of configurations {config_num} not evenly divided by bin size {bin_size}."
        )));
    }
    let bin_num = config_num / bin_size;
    if bin_num < 2 {
        return Err(LqcdError::config(format!(
            "Jackknife needs at least two bins ({config_num} configurations, bin size {bin_size})."
        )));
    }
    Ok(bin_num)
}

/// Average over the sample axis (rows).
pub fn bin_average(values: &DMatrix<f64>) -> Vec<f64> {
    values.row_mean().iter().copied().collect()
}

/// Jackknife error of every column, with `N = values.nrows()`.
///
/// Uses the population standard deviation scaled by `(N-1)/sqrt(N)`.
pub fn calc_error(values: &DMatrix<f64>) -> Result<Vec<f64>> {
    let n = values.nrows();
    if n == 0 {
        return Err(LqcdError::config("Cannot compute an error without bins."));
    }
    // sqrt(var) * (N-1)/sqrt(N) == |x - mean| * (N-1)/N
    let factor = (n as f64 - 1.0) / n as f64;
    Ok(values
        .column_iter()
        .map(|col| col.add_scalar(-col.mean()).norm() * factor)
        .collect())
}

/// Jackknife error of one per-bin quantity.
pub fn calc_error_slice(bins: &[f64]) -> Result<f64> {
    let column = DMatrix::from_column_slice(bins.len(), 1, bins);
    Ok(calc_error(&column)?[0])
}

/// Fold `[bin, t]` data of a periodic correlator with even extent `T`.
///
/// Returns `[bin, T/2 + 1]` with `fold[t] = (C[t] + C[T-t]) / 2` for
/// `0 < t < T/2`; `t = 0` and `t = T/2` are copied unchanged.
pub fn fold(values: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let t_ext = values.ncols();
    if t_ext < 2 || t_ext % 2 != 0 {
        return Err(LqcdError::config(format!(
            "Cannot fold a time axis of odd or tiny length {t_ext}."
        )));
    }
    let half = t_ext / 2;
    Ok(DMatrix::from_fn(values.nrows(), half + 1, |b, t| {
        if t == 0 || t == half {
            values[(b, t)]
        } else {
            0.5 * (values[(b, t)] + values[(b, t_ext - t)])
        }
    }))
}
