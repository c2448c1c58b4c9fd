//! Fit-range search: pick a window where two mass estimates agree.
//!
//! For every plateau start (outer loop) and exponential-fit start (inner
//! loop), the effective mass is plateau-fit over `[meff_start, range_end]`
//! and the configured exponential model over `[twop_start, range_end]`. The
//! first pair whose bin-averaged masses satisfy
//!
//! ```text
//! 0.5 * err(mEff plateau) > |m1 - m2| / (0.5 * (m1 + m2))
//! ```
//!
//! is returned. The search is greedy; later candidates are never examined
//! once a pair is accepted.
//!
//! With `check_fit` set, a window whose plateau or exponential fit fails
//! (no convergence or degenerate data) is skipped like any other rejected
//! candidate. Without it, the first failure is returned.

use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::domain::{FitConfiguration, FitMethod, FitResult};
use crate::error::{LqcdError, NoConsistentFitError, Result};
use crate::fit::fitter::{one_state_fit_twop, two_state_fit_meff, two_state_fit_twop};
use crate::fit::plateau::fit_plateau;
use crate::resample::calc_error;

/// Accepted window pair and the fits that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub method: FitMethod,
    /// Exponential fit over `[twop_start, range_end]`.
    pub fit: FitResult,
    /// Plateau fit of the effective mass over `[meff_start, range_end]`.
    pub meff_fit: FitResult,
    pub twop_start: usize,
    pub meff_start: usize,
}

impl SearchOutcome {
    /// Per-bin ground-state energy of the exponential fit.
    pub fn energy(&self) -> Vec<f64> {
        self.fit.param(self.method.energy_index())
    }
}

/// `|m1 - m2| / (0.5 * (m1 + m2))`.
pub fn relative_difference(m1: f64, m2: f64) -> f64 {
    (m1 - m2).abs() / (0.5 * (m1 + m2))
}

/// Search for consistent effective-mass and exponential-fit windows.
///
/// `meff` is the `[bin, t]` effective mass and `twop` the folded `[bin, t]`
/// two-point function on the same time axis (`T = 2 * (twop.ncols() - 1)`).
pub fn meff_twop_fit(
    meff: &DMatrix<f64>,
    twop: &DMatrix<f64>,
    config: &FitConfiguration,
) -> Result<SearchOutcome> {
    if meff.nrows() != twop.nrows() || meff.ncols() != twop.ncols() {
        return Err(LqcdError::config(format!(
            "Effective mass {:?} and two-point function {:?} differ in shape.",
            meff.shape(),
            twop.shape()
        )));
    }
    if twop.ncols() < 2 {
        return Err(LqcdError::config("Folded two-point function needs at least two slices."));
    }
    config.validate(meff.ncols())?;

    let t_ext = 2 * (twop.ncols() - 1);
    let range_end = config.fit_range_end;
    let method = config.method();
    let meff_starts = config.meff_starts();
    let twop_starts = config.twop_starts();
    let meff_err = calc_error(meff)?;

    let mut last_estimates = None;

    for &meff_start in &meff_starts {
        let meff_fit = match fit_plateau(meff, &meff_err, meff_start, range_end) {
            Ok(fit) => fit,
            Err(err) if config.check_fit && is_fit_failure(&err) => {
                debug!(meff_start, error = %err, "rejecting effective-mass window");
                continue;
            }
            Err(err) => return Err(err),
        };
        let plateau_bins = meff_fit.param(0);
        let plateau_avg = mean(&plateau_bins);
        let plateau_err = crate::resample::calc_error_slice(&plateau_bins)?;

        for &twop_start in &twop_starts {
            let attempt = match method {
                FitMethod::OneStateTwop => {
                    one_state_fit_twop(twop, twop_start, range_end, t_ext, &config.solver)
                }
                FitMethod::TwoStateTwop => {
                    two_state_fit_twop(twop, twop_start, range_end, t_ext, &config.solver)
                }
                FitMethod::TwoStateMeff => {
                    two_state_fit_meff(meff, twop_start, range_end, t_ext, &config.solver)
                }
            };
            let fit = match attempt {
                Ok(fit) => fit,
                Err(err) if config.check_fit && is_fit_failure(&err) => {
                    debug!(meff_start, twop_start, error = %err, "rejecting fit candidate");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let energy_avg = mean(&fit.param(method.energy_index()));
            last_estimates = Some((plateau_avg, energy_avg));

            let accepted = if config.check_fit {
                let rel_diff = relative_difference(plateau_avg, energy_avg);
                debug!(meff_start, twop_start, plateau_avg, energy_avg, rel_diff, plateau_err, "fit candidate");
                0.5 * plateau_err > rel_diff
            } else {
                true
            };

            if accepted {
                info!(
                    method = method.display_name(),
                    meff_start,
                    twop_start,
                    range_end,
                    mass = energy_avg,
                    "accepted fit window"
                );
                return Ok(SearchOutcome {
                    method,
                    fit,
                    meff_fit,
                    twop_start,
                    meff_start,
                });
            }
        }
    }

    Err(NoConsistentFitError {
        method,
        meff_starts,
        twop_starts,
        range_end,
        last_estimates,
    }
    .into())
}

/// Failures that disqualify one candidate window rather than the search.
fn is_fit_failure(err: &LqcdError) -> bool {
    matches!(err, LqcdError::FitConvergence { .. } | LqcdError::DegenerateFit(_))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::one_state_twop;
    use crate::physics::meff_from_sym_twop;

    const T_EXT: usize = 32;

    /// Folded one-state correlator with per-bin energies `energy(b)`.
    fn folded_twop(bin_num: usize, energy: impl Fn(usize) -> f64) -> DMatrix<f64> {
        DMatrix::from_fn(bin_num, T_EXT / 2 + 1, |b, t| one_state_twop(t as f64, T_EXT, 0.05, energy(b)))
    }

    fn config(starts: Vec<usize>) -> FitConfiguration {
        FitConfiguration {
            fit_range_end: 14,
            meff_start_candidates: Some(starts),
            twop_start_candidates: Some(vec![2, 3, 4]),
            ..FitConfiguration::default()
        }
    }

    #[test]
    fn agreeing_estimators_accept_the_first_pair() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        let meff = meff_from_sym_twop(&twop).unwrap();
        let outcome = meff_twop_fit(&meff, &twop, &config(vec![6, 7, 8])).unwrap();
        assert_eq!(outcome.meff_start, 6);
        assert_eq!(outcome.twop_start, 2);
        assert_eq!(outcome.method, FitMethod::OneStateTwop);
        let energy = mean(&outcome.energy());
        assert!((energy - 0.309).abs() < 1e-6, "{energy}");
    }

    #[test]
    fn disagreeing_estimators_report_no_consistent_fit() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        // Effective mass shifted far outside its own error.
        let meff = meff_from_sym_twop(&twop).unwrap().map(|m| m + 0.1);
        let err = meff_twop_fit(&meff, &twop, &config(vec![6, 7])).unwrap_err();
        match err {
            LqcdError::NoConsistentFit(e) => {
                assert_eq!(e.meff_starts, vec![6, 7]);
                assert_eq!(e.twop_starts, vec![2, 3, 4]);
                assert_eq!(e.range_end, 14);
                let (plateau, energy) = e.last_estimates.unwrap();
                assert!(plateau - energy > 0.05);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unchecked_search_returns_the_first_candidate() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        let meff = meff_from_sym_twop(&twop).unwrap().map(|m| m + 0.1);
        let cfg = FitConfiguration {
            check_fit: false,
            ..config(vec![9, 10])
        };
        let outcome = meff_twop_fit(&meff, &twop, &cfg).unwrap();
        assert_eq!((outcome.meff_start, outcome.twop_start), (9, 2));
    }

    #[test]
    fn undefined_effective_mass_window_is_skipped() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        // The symmetric effective mass is undefined at t = 0.
        let meff = meff_from_sym_twop(&twop).unwrap();
        assert!(meff[(0, 0)].is_nan());
        let outcome = meff_twop_fit(&meff, &twop, &config(vec![0, 6, 7, 8])).unwrap();
        assert_eq!((outcome.meff_start, outcome.twop_start), (6, 2));
    }

    #[test]
    fn too_short_exponential_window_is_skipped() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        let meff = meff_from_sym_twop(&twop).unwrap();
        let cfg = FitConfiguration {
            twop_start_candidates: Some(vec![13, 2]),
            ..config(vec![6])
        };
        let outcome = meff_twop_fit(&meff, &twop, &cfg).unwrap();
        assert_eq!((outcome.meff_start, outcome.twop_start), (6, 2));
    }

    #[test]
    fn only_failing_windows_report_no_estimates() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        let meff = meff_from_sym_twop(&twop).unwrap();
        match meff_twop_fit(&meff, &twop, &config(vec![0])).unwrap_err() {
            LqcdError::NoConsistentFit(e) => {
                assert_eq!(e.meff_starts, vec![0]);
                assert!(e.last_estimates.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unchecked_search_propagates_fit_failures() {
        let twop = folded_twop(10, |b| 0.3 + 2e-3 * b as f64);
        let meff = meff_from_sym_twop(&twop).unwrap();
        let cfg = FitConfiguration {
            check_fit: false,
            solver: crate::math::LmOptions {
                max_iterations: 1,
                ..Default::default()
            },
            ..config(vec![6])
        };
        assert!(matches!(
            meff_twop_fit(&meff, &twop, &cfg),
            Err(LqcdError::FitConvergence { .. })
        ));

        let cfg = FitConfiguration {
            check_fit: false,
            ..config(vec![0])
        };
        assert!(matches!(meff_twop_fit(&meff, &twop, &cfg), Err(LqcdError::DegenerateFit(_))));
    }

    #[test]
    fn relative_difference_is_symmetric() {
        assert!((relative_difference(0.3, 0.33) - relative_difference(0.33, 0.3)).abs() < 1e-15);
        assert!((relative_difference(1.0, 3.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn shape_mismatch_is_a_configuration_error() {
        let twop = folded_twop(4, |_| 0.3);
        let meff = DMatrix::zeros(3, twop.ncols());
        assert!(matches!(
            meff_twop_fit(&meff, &twop, &config(vec![6])),
            Err(LqcdError::Configuration(_))
        ));
    }
}
