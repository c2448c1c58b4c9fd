//! Exponential-model fits of two- and three-point functions.
//!
//! Every fit follows the same two-step procedure:
//!
//! 1. fit the bin-averaged data from a fixed initial guess
//! 2. refit each bin independently (in parallel), seeded with the mean fit
//!
//! All fits weight residuals by one window-wide error vector computed from
//! the full bin ensemble. It is computed once before the refit sweep and only
//! read afterwards. A bin that fails to converge fails the whole call.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{FitResult, FitWindow};
use crate::error::{LqcdError, Result};
use crate::math::{LmFailure, LmOptions, levenberg_marquardt};
use crate::models::{one_state_twop, two_state_meff, two_state_threep, two_state_twop};
use crate::resample::{bin_average, calc_error};

/// Initial `(G, E)` of the one-state fit.
pub const ONE_STATE_GUESS: [f64; 2] = [0.1, 0.1];
/// Initial `(c0, c1, E0, E1)` of the two-state two-point fit.
pub const TWO_STATE_TWOP_GUESS: [f64; 4] = [1e-3, 1e-3, 0.1, 1.0];
/// Initial `(a00, a01, a11)` of the three-point fit.
pub const THREEP_GUESS: [f64; 3] = [1.0, 1.0, 1.0];
/// Initial `c` of the two-state effective-mass fit.
const MEFF_C_GUESS: f64 = 0.5;
/// Initial gap `E1 - E0` of the two-state effective-mass fit.
const MEFF_GAP_GUESS: f64 = 0.5;

/// Which data a single least-squares solve runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Mean,
    Bin(usize),
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Mean => write!(f, "bin average"),
            Sample::Bin(b) => write!(f, "bin {b}"),
        }
    }
}

/// Window data shared by the mean fit and every bin refit.
struct FitProblem {
    /// `[bin, point]`
    bins: DMatrix<f64>,
    mean: Vec<f64>,
    err: Vec<f64>,
}

impl FitProblem {
    /// Select `columns` of `[bin, t]` data and compute their jackknife errors.
    fn from_columns(data: &DMatrix<f64>, columns: &[usize], context: &str) -> Result<Self> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= data.ncols()) {
            return Err(LqcdError::config(format!(
                "{context}: time {bad} outside {} available slices.",
                data.ncols()
            )));
        }
        let bins = data.select_columns(columns.iter());
        let err = calc_error(&bins)?;
        if let Some(bad) = err.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return Err(LqcdError::degenerate(format!(
                "{context}: jackknife errors must be finite and > 0 (found {bad})."
            )));
        }
        let mean = bin_average(&bins);
        Ok(Self { bins, mean, err })
    }

    fn point_num(&self) -> usize {
        self.err.len()
    }
}

fn convergence(sample: Sample, failure: LmFailure) -> LqcdError {
    LqcdError::FitConvergence {
        sample: sample.to_string(),
        reason: failure.to_string(),
    }
}

/// Leaves the parameters of a model without label-swap symmetry untouched.
fn unordered(_: &mut [f64]) {}

/// `(c0, c1, E0, E1)` with the lighter state first.
///
/// The two-state correlator is unchanged under `(c0, E0) <-> (c1, E1)`.
pub fn order_twop_states(p: &mut [f64]) {
    if p[2] > p[3] {
        p.swap(0, 1);
        p.swap(2, 3);
    }
}

/// `(c, E0, E1)` with the lighter state first.
///
/// The effective mass is unchanged under `(c, E0, E1) -> (1/c, E1, E0)`.
pub fn order_meff_states(p: &mut [f64]) {
    if p[1] > p[2] && p[0].is_finite() && p[0] != 0.0 {
        p[0] = p[0].recip();
        p.swap(1, 2);
    }
}

/// Mean-first fit followed by parallel per-bin refits.
///
/// `model(sample, i, params)` predicts point `i` of the window for `sample`.
/// `order` maps every solution, mean and per bin, onto one canonical labeling
/// of equivalent parameter sets.
fn fit_mean_and_bins<M>(
    problem: &FitProblem,
    model: M,
    guess: &[f64],
    order: fn(&mut [f64]),
    window: FitWindow,
    opts: &LmOptions,
) -> Result<FitResult>
where
    M: Fn(Sample, usize, &[f64]) -> f64 + Sync,
{
    let n = problem.point_num();
    let param_num = guess.len();
    if n <= param_num {
        return Err(LqcdError::degenerate(format!(
            "{n} points over {window} cannot constrain {param_num} parameters."
        )));
    }
    let dof = (n - param_num) as f64;

    let solve = |sample: Sample, y: &[f64], start: &[f64]| -> Result<(Vec<f64>, f64)> {
        let residuals = |p: &[f64]| {
            DVector::from_iterator(n, (0..n).map(|i| (model(sample, i, p) - y[i]) / problem.err[i]))
        };
        let mut solution = levenberg_marquardt(residuals, start, opts).map_err(|e| convergence(sample, e))?;
        order(&mut solution.params);
        Ok((solution.params, solution.cost / dof))
    };

    let (mean_params, _) = solve(Sample::Mean, &problem.mean, guess)?;

    let per_bin: Vec<(Vec<f64>, f64)> = (0..problem.bins.nrows())
        .into_par_iter()
        .map(|b| {
            let y: Vec<f64> = problem.bins.row(b).iter().copied().collect();
            solve(Sample::Bin(b), &y, &mean_params)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut params = DMatrix::<f64>::zeros(per_bin.len(), param_num);
    let mut chi_sq = Vec::with_capacity(per_bin.len());
    for (b, (p, chi)) in per_bin.into_iter().enumerate() {
        for (k, v) in p.into_iter().enumerate() {
            params[(b, k)] = v;
        }
        chi_sq.push(chi);
    }

    Ok(FitResult {
        mean_params,
        params,
        chi_sq,
        window,
    })
}

fn window_columns(window: FitWindow) -> Vec<usize> {
    window.times().collect()
}

/// One-state fit `G * (e^{-Et} + e^{-E(T-t)})` of `twop[bin, t]` over `[start, end]`.
///
/// Parameters are `(G, E)`.
pub fn one_state_fit_twop(
    twop: &DMatrix<f64>,
    start: usize,
    end: usize,
    t_ext: usize,
    opts: &LmOptions,
) -> Result<FitResult> {
    let window = FitWindow::new(start, end, 2)?;
    let problem = FitProblem::from_columns(twop, &window_columns(window), "one-state two-point fit")?;
    let times: Vec<f64> = window.times().map(|t| t as f64).collect();
    fit_mean_and_bins(
        &problem,
        |_, i, p| one_state_twop(times[i], t_ext, p[0], p[1]),
        &ONE_STATE_GUESS,
        unordered,
        window,
        opts,
    )
}

/// Two-state fit of `twop[bin, t]`; parameters are `(c0, c1, E0, E1)`.
///
/// Every solution is reported with `E0 <= E1`.
pub fn two_state_fit_twop(
    twop: &DMatrix<f64>,
    start: usize,
    end: usize,
    t_ext: usize,
    opts: &LmOptions,
) -> Result<FitResult> {
    let window = FitWindow::new(start, end, 4)?;
    let problem = FitProblem::from_columns(twop, &window_columns(window), "two-state two-point fit")?;
    let times: Vec<f64> = window.times().map(|t| t as f64).collect();
    fit_mean_and_bins(
        &problem,
        |_, i, p| two_state_twop(times[i], t_ext, p[0], p[1], p[2], p[3]),
        &TWO_STATE_TWOP_GUESS,
        order_twop_states,
        window,
        opts,
    )
}

/// Two-state fit of the symmetric effective mass `meff[bin, t]`.
///
/// Parameters are `(c, E0, E1)` with `c = c1/c0`. The mean fit starts from
/// `c = 0.5`, `E0` = the window average of the bin-averaged effective mass and
/// `E1 = E0 + 0.5`. Every solution is reported with `E0 <= E1`.
pub fn two_state_fit_meff(
    meff: &DMatrix<f64>,
    start: usize,
    end: usize,
    t_ext: usize,
    opts: &LmOptions,
) -> Result<FitResult> {
    let window = FitWindow::new(start, end, 3)?;
    let problem = FitProblem::from_columns(meff, &window_columns(window), "two-state effective-mass fit")?;
    let plateau = problem.mean.iter().sum::<f64>() / problem.point_num() as f64;
    let guess = [MEFF_C_GUESS, plateau, plateau + MEFF_GAP_GUESS];
    let times: Vec<f64> = window.times().map(|t| t as f64).collect();
    fit_mean_and_bins(
        &problem,
        |_, i, p| two_state_meff(times[i], t_ext, p[0], p[1], p[2]),
        &guess,
        order_meff_states,
        window,
        opts,
    )
}

/// Insertion times `neglect ..= tsink - neglect` used for one sink time.
pub fn insertion_times(tsink: usize, neglect: usize) -> Result<Vec<usize>> {
    if 2 * neglect > tsink {
        return Err(LqcdError::config(format!(
            "Cannot neglect {neglect} slices at each end of tsink {tsink}."
        )));
    }
    Ok((neglect..=tsink - neglect).collect())
}

/// Three-point data for one sink time.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreepSeries {
    pub tsink: usize,
    /// `[bin, ti]` indexed by absolute insertion time.
    pub data: DMatrix<f64>,
    pub insertion_times: Vec<usize>,
}

/// Joint two-state fit of three-point functions at several sink times.
///
/// The energies are fixed from a two-point fit: the mean fit uses the
/// bin-averaged `E0`, `E1`; bin `b` uses `e0[b]`, `e1[b]`. Parameters are
/// `(a00, a01, a11)` and `dof` is the total number of insertion times minus 3.
/// The returned window spans the smallest to largest insertion time.
pub fn two_state_fit_threep(
    series: &[ThreepSeries],
    e0: &[f64],
    e1: &[f64],
    t_ext: usize,
    opts: &LmOptions,
) -> Result<FitResult> {
    let bin_num = e0.len();
    if series.is_empty() || bin_num == 0 || e1.len() != bin_num {
        return Err(LqcdError::config(format!(
            "Three-point fit needs sink times and matching energies ({} E0 bins, {} E1 bins).",
            e0.len(),
            e1.len()
        )));
    }

    let mut points: Vec<(usize, f64)> = Vec::new();
    let mut stacked: Vec<DMatrix<f64>> = Vec::with_capacity(series.len());
    for s in series {
        if s.data.nrows() != bin_num {
            return Err(LqcdError::config(format!(
                "tsink {} has {} bins, energies have {bin_num}.",
                s.tsink,
                s.data.nrows()
            )));
        }
        if let Some(&bad) = s.insertion_times.iter().find(|&&ti| ti >= s.data.ncols()) {
            return Err(LqcdError::config(format!(
                "Insertion time {bad} outside tsink {} data ({} slices).",
                s.tsink,
                s.data.ncols()
            )));
        }
        stacked.push(s.data.select_columns(s.insertion_times.iter()));
        points.extend(s.insertion_times.iter().map(|&ti| (s.tsink, ti as f64)));
    }
    if points.is_empty() {
        return Err(LqcdError::degenerate("Three-point fit has no insertion times."));
    }

    let mut all = DMatrix::<f64>::zeros(bin_num, points.len());
    let mut col = 0;
    for block in &stacked {
        all.columns_mut(col, block.ncols()).copy_from(block);
        col += block.ncols();
    }
    let columns: Vec<usize> = (0..points.len()).collect();
    let problem = FitProblem::from_columns(&all, &columns, "two-state three-point fit")?;

    let e0_mean = e0.iter().sum::<f64>() / bin_num as f64;
    let e1_mean = e1.iter().sum::<f64>() / bin_num as f64;

    let all_ti = series.iter().flat_map(|s| s.insertion_times.iter().copied());
    let window = FitWindow {
        start: all_ti.clone().min().unwrap_or(0),
        end: all_ti.max().unwrap_or(0),
    };

    fit_mean_and_bins(
        &problem,
        |sample, i, p| {
            let (energy0, energy1) = match sample {
                Sample::Mean => (e0_mean, e1_mean),
                Sample::Bin(b) => (e0[b], e1[b]),
            };
            let (tsink, ti) = points[i];
            two_state_threep(ti, tsink, t_ext, p[0], p[1], p[2], energy0, energy1)
        },
        &THREEP_GUESS,
        unordered,
        window,
        opts,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const T_EXT: usize = 32;

    /// `[bin, t]` with every bin an exact model evaluation.
    fn exact_bins(bin_num: usize, t_num: usize, f: impl Fn(usize, f64) -> f64) -> DMatrix<f64> {
        DMatrix::from_fn(bin_num, t_num, |b, t| f(b, t as f64))
    }

    #[test]
    fn one_state_recovers_noiseless_parameters() {
        // Per-bin amplitudes differ so the jackknife errors are non-zero.
        let scale = |b: usize| 1.0 + 0.01 * b as f64;
        let twop = exact_bins(8, 17, |b, t| one_state_twop(t, T_EXT, 0.05 * scale(b), 0.3));
        let fit = one_state_fit_twop(&twop, 3, 15, T_EXT, &LmOptions::default()).unwrap();

        assert_eq!(fit.bin_num(), 8);
        for b in 0..8 {
            assert_relative_eq!(fit.params[(b, 0)], 0.05 * scale(b), max_relative = 1e-7);
            assert_relative_eq!(fit.params[(b, 1)], 0.3, max_relative = 1e-7);
            assert!(fit.chi_sq[b] < 1e-12, "bin {b}: {}", fit.chi_sq[b]);
        }
        assert_relative_eq!(fit.mean_params[1], 0.3, max_relative = 1e-7);
    }

    #[test]
    fn two_state_recovers_noiseless_parameters() {
        let truth = [1.2e-3, 0.8e-3, 0.12, 0.9];
        let scale = |b: usize| 1.0 + 0.02 * b as f64;
        let twop = exact_bins(6, 17, |b, t| {
            two_state_twop(t, T_EXT, truth[0] * scale(b), truth[1] * scale(b), truth[2], truth[3])
        });
        let fit = two_state_fit_twop(&twop, 1, 16, T_EXT, &LmOptions::default()).unwrap();

        for b in 0..6 {
            assert_relative_eq!(fit.params[(b, 0)], truth[0] * scale(b), max_relative = 1e-5);
            assert_relative_eq!(fit.params[(b, 1)], truth[1] * scale(b), max_relative = 1e-5);
            assert_relative_eq!(fit.params[(b, 2)], truth[2], max_relative = 1e-5);
            assert_relative_eq!(fit.params[(b, 3)], truth[3], max_relative = 1e-5);
            assert!(fit.chi_sq[b] < 1e-10);
        }
    }

    #[test]
    fn two_state_twop_reports_the_ground_state_first() {
        // Equal amplitudes make both labelings equally good minima.
        let scale = |b: usize| 1.0 + 0.01 * b as f64;
        let twop = exact_bins(10, 17, |b, t| {
            two_state_twop(t, T_EXT, 0.05 * scale(b), 0.05 * scale(b), 0.3, 0.9)
        });
        let fit = two_state_fit_twop(&twop, 1, 15, T_EXT, &LmOptions::default()).unwrap();

        assert!(fit.mean_params[2] < fit.mean_params[3], "{:?}", fit.mean_params);
        assert_relative_eq!(fit.mean_params[2], 0.3, max_relative = 1e-4);
        assert_relative_eq!(fit.mean_params[3], 0.9, max_relative = 1e-4);
        for b in 0..10 {
            assert!(fit.params[(b, 2)] < fit.params[(b, 3)], "bin {b}");
            assert_relative_eq!(fit.params[(b, 2)], 0.3, max_relative = 1e-4);
            assert_relative_eq!(fit.params[(b, 3)], 0.9, max_relative = 1e-4);
        }
    }

    #[test]
    fn two_state_meff_reports_the_ground_state_first() {
        let e0 = |b: usize| 0.35 + 1e-3 * b as f64;
        let meff = exact_bins(6, 17, |b, t| {
            if t < 1.0 || t > 15.0 {
                f64::NAN
            } else {
                two_state_meff(t, T_EXT, 1.0, e0(b), 1.1)
            }
        });
        let fit = two_state_fit_meff(&meff, 2, 14, T_EXT, &LmOptions::default()).unwrap();
        assert!(fit.mean_params[1] < fit.mean_params[2], "{:?}", fit.mean_params);
        for b in 0..6 {
            assert!(fit.params[(b, 1)] < fit.params[(b, 2)], "bin {b}");
            assert_relative_eq!(fit.params[(b, 1)], e0(b), max_relative = 1e-4);
        }
    }

    #[test]
    fn swapped_states_are_relabeled() {
        let mut twop = [0.2, 0.05, 0.9, 0.3];
        order_twop_states(&mut twop);
        assert_eq!(twop, [0.05, 0.2, 0.3, 0.9]);

        let mut meff = [4.0, 1.1, 0.35];
        order_meff_states(&mut meff);
        assert_eq!(meff, [0.25, 0.35, 1.1]);
        // Both labelings describe the same effective mass.
        for t in 2..14 {
            let t = t as f64;
            assert_relative_eq!(
                two_state_meff(t, T_EXT, 4.0, 1.1, 0.35),
                two_state_meff(t, T_EXT, 0.25, 0.35, 1.1),
                max_relative = 1e-10
            );
        }

        let mut ordered = [0.5, 0.3, 0.9];
        order_meff_states(&mut ordered);
        assert_eq!(ordered, [0.5, 0.3, 0.9]);
    }

    #[test]
    fn two_state_meff_fit_recovers_energies() {
        let (c, e1) = (0.6, 1.1);
        let e0 = |b: usize| 0.35 + 1e-3 * b as f64;
        let meff = exact_bins(6, 17, |b, t| {
            if t < 1.0 || t > 15.0 {
                f64::NAN
            } else {
                two_state_meff(t, T_EXT, c, e0(b), e1)
            }
        });
        let fit = two_state_fit_meff(&meff, 2, 14, T_EXT, &LmOptions::default()).unwrap();
        for b in 0..6 {
            assert_relative_eq!(fit.params[(b, 1)], e0(b), max_relative = 1e-5);
        }
        assert_eq!(fit.window, FitWindow { start: 2, end: 14 });
    }

    #[test]
    fn threep_fit_recovers_amplitudes() {
        let (e0, e1) = (0.4, 1.0);
        let amps = [2.0, 0.5, 0.3];
        let scale = |b: usize| 1.0 + 0.01 * b as f64;
        let bin_num = 5;
        let series: Vec<ThreepSeries> = [8usize, 10, 12]
            .iter()
            .map(|&tsink| ThreepSeries {
                tsink,
                data: DMatrix::from_fn(bin_num, tsink + 1, |b, ti| {
                    scale(b) * two_state_threep(ti as f64, tsink, T_EXT, amps[0], amps[1], amps[2], e0, e1)
                }),
                insertion_times: insertion_times(tsink, 2).unwrap(),
            })
            .collect();
        let e0s = vec![e0; bin_num];
        let e1s = vec![e1; bin_num];
        let fit = two_state_fit_threep(&series, &e0s, &e1s, T_EXT, &LmOptions::default()).unwrap();
        for b in 0..bin_num {
            for k in 0..3 {
                assert_relative_eq!(fit.params[(b, k)], amps[k] * scale(b), max_relative = 1e-6);
            }
        }
        assert_eq!(fit.window, FitWindow { start: 2, end: 10 });
    }

    #[test]
    fn insertion_times_trim_both_ends() {
        assert_eq!(insertion_times(8, 2).unwrap(), vec![2, 3, 4, 5, 6]);
        assert!(insertion_times(3, 2).is_err());
    }

    #[test]
    fn identical_bins_have_no_usable_errors() {
        let twop = exact_bins(4, 17, |_, t| one_state_twop(t, T_EXT, 0.05, 0.3));
        let err = one_state_fit_twop(&twop, 3, 15, T_EXT, &LmOptions::default()).unwrap_err();
        assert!(matches!(err, LqcdError::DegenerateFit(_)));
    }

    #[test]
    fn solver_failure_is_reported_per_sample() {
        let scale = |b: usize| 1.0 + 0.01 * b as f64;
        let twop = exact_bins(4, 17, |b, t| one_state_twop(t, T_EXT, 0.05 * scale(b), 0.3));
        let opts = LmOptions {
            max_iterations: 1,
            ..LmOptions::default()
        };
        let err = one_state_fit_twop(&twop, 3, 15, T_EXT, &opts).unwrap_err();
        match err {
            LqcdError::FitConvergence { sample, .. } => assert_eq!(sample, "bin average"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
