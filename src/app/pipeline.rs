//! Shared analysis pipelines used by the CLI subcommands and integration tests.
//!
//! Two-point analysis:
//! jackknife -> (fold + symmetric mEff | plain mEff) -> window search / plateau -> summaries
//!
//! Form-factor decomposition:
//! ratio plateau fits (one worker per bin block) -> kinematic tensor per Q²
//! group -> SVD -> combine with ratios -> summaries
//!
//! Three-point analysis:
//! two-state two-point fit -> joint three-point fit per neglected range -> curves

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{info, warn};

use crate::collective::Collective;
use crate::decomp::{FormFactorCombiner, KinematicFactors, SvdDiagnostics, combine_form_factors, svd_decompose};
use crate::domain::{
    CorrelatorSample, FitConfiguration, FitMethod, FitResult, FitWindow, FormFactorKind, JackknifeBinSet,
    ObservableArray, Particle,
};
use crate::error::{LqcdError, Result};
use crate::fit::{
    CURVE_POINTS, Curve, RatioShape, ThreepSeries, fit_gen_form_factor, fit_plateau, fitted_curve, insertion_times,
    meff_curve_from_twop_fit, meff_twop_fit, threep_curves, two_state_fit_threep, two_state_fit_twop,
};
use crate::math::LmOptions;
use crate::physics::{QsqGroups, meff, meff_from_sym_twop};
use crate::resample::{bin_average, calc_error, fold, jackknife};

/// Bin mean and jackknife error per time slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub ts: Vec<f64>,
    pub mean: Vec<f64>,
    pub error: Vec<f64>,
}

impl SeriesSummary {
    fn from_bins(ts: Vec<f64>, bins: &DMatrix<f64>) -> Result<Self> {
        Ok(Self {
            ts,
            mean: bin_average(bins),
            error: calc_error(bins)?,
        })
    }

    fn from_curve(curve: Curve) -> Result<Self> {
        let (mean, error) = curve.summary()?;
        Ok(Self {
            ts: curve.ts,
            mean,
            error,
        })
    }
}

fn observables(fit: &FitResult) -> Result<Vec<ObservableArray>> {
    (0..fit.params.ncols())
        .map(|k| ObservableArray::from_bins(fit.param(k)))
        .collect()
}

/// Plateau fit of the effective mass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateauSummary {
    pub window: FitWindow,
    pub value: ObservableArray,
    pub chi_sq: ObservableArray,
}

impl PlateauSummary {
    fn from_fit(fit: &FitResult) -> Result<Self> {
        Ok(Self {
            window: fit.window,
            value: ObservableArray::from_bins(fit.param(0))?,
            chi_sq: ObservableArray::from_bins(fit.chi_sq.clone())?,
        })
    }
}

/// Exponential fit accepted by the window search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExponentialSummary {
    pub method: FitMethod,
    pub window: FitWindow,
    pub params: Vec<ObservableArray>,
    pub energy: ObservableArray,
    pub chi_sq: ObservableArray,
    pub curve: SeriesSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwopAnalysis {
    pub particle: Particle,
    pub bin_num: usize,
    pub time_extent: usize,
    /// Effective mass per time slice (`NaN` where undefined).
    pub meff: SeriesSummary,
    pub plateau: PlateauSummary,
    /// Present for mesons, whose folded correlators go through the window search.
    pub exponential: Option<ExponentialSummary>,
}

/// Jackknife `samples` and analyze the resulting bins.
pub fn analyze_twop(
    samples: &CorrelatorSample,
    bin_size: usize,
    particle: Particle,
    config: &FitConfiguration,
) -> Result<TwopAnalysis> {
    let bins = jackknife(samples, bin_size)?;
    analyze_twop_bins(&bins, particle, config)
}

/// Two-point analysis of already resampled bins (first momentum only).
pub fn analyze_twop_bins(
    bins: &JackknifeBinSet,
    particle: Particle,
    config: &FitConfiguration,
) -> Result<TwopAnalysis> {
    let twop = bins.momentum(0)?;
    let t_ext = bins.time_extent();

    let (meff_bins, plateau_fit, exponential) = if particle.is_meson() {
        let folded = fold(&twop)?;
        let meff_bins = meff_from_sym_twop(&folded)?;
        let outcome = meff_twop_fit(&meff_bins, &folded, config)?;

        let curve = fitted_curve(outcome.method, &outcome.fit, t_ext, CURVE_POINTS)?;
        let exponential = ExponentialSummary {
            method: outcome.method,
            window: outcome.fit.window,
            energy: ObservableArray::from_bins(outcome.energy())?,
            params: observables(&outcome.fit)?,
            chi_sq: ObservableArray::from_bins(outcome.fit.chi_sq.clone())?,
            curve: SeriesSummary::from_curve(curve)?,
        };
        (meff_bins, outcome.meff_fit, Some(exponential))
    } else {
        let meff_bins = meff(&twop)?;
        config.validate(meff_bins.ncols())?;
        let start = config.meff_starts().first().copied().ok_or_else(|| {
            LqcdError::config("No effective-mass fit start configured.")
        })?;
        let meff_err = calc_error(&meff_bins)?;
        let plateau = fit_plateau(&meff_bins, &meff_err, start, config.fit_range_end)?;
        (meff_bins, plateau, None)
    };

    let ts: Vec<f64> = (0..meff_bins.ncols()).map(|t| t as f64).collect();
    let analysis = TwopAnalysis {
        particle,
        bin_num: bins.bin_num(),
        time_extent: t_ext,
        meff: SeriesSummary::from_bins(ts, &meff_bins)?,
        plateau: PlateauSummary::from_fit(&plateau_fit)?,
        exponential,
    };
    info!(
        ?particle,
        bins = analysis.bin_num,
        mass = analysis.plateau.value.mean,
        mass_err = analysis.plateau.value.error,
        "two-point analysis finished"
    );
    Ok(analysis)
}

/// Decomposed form factors of one Q² group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QsqFormFactors {
    pub qsq: i64,
    pub momentum_num: usize,
    pub form_factors: [ObservableArray; 2],
    pub diagnostics: SvdDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormFactorAnalysis {
    pub kind: FormFactorKind,
    pub labels: [String; 2],
    pub groups: Vec<QsqFormFactors>,
}

/// Inputs of [`decompose_form_factors`].
#[derive(Debug, Clone, Copy)]
pub struct RatioFits<'a> {
    /// `[bin, (Q, ratio)]`
    pub values: &'a DMatrix<f64>,
    /// `(Q, ratio)`
    pub errors: &'a [f64],
    pub ratio_num: usize,
}

/// Plateau window `[tsink/2 - 2, tsink/2 + 2]` of the ratio fits.
pub fn ratio_window(tsink: usize) -> Result<FitWindow> {
    let mid = tsink / 2;
    if mid < 2 || mid + 2 > tsink {
        return Err(LqcdError::config(format!(
            "Sink time {tsink} is too short for a ratio plateau around tsink/2."
        )));
    }
    FitWindow::new(mid - 2, mid + 2, 1)
}

/// Ratio plateau fits and their jackknife errors, held by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedRatios {
    /// `[bin, (Q, ratio)]`
    pub values: DMatrix<f64>,
    /// `(Q, ratio)`
    pub errors: Vec<f64>,
    pub ratio_num: usize,
    pub window: FitWindow,
}

impl FittedRatios {
    pub fn as_inputs(&self) -> RatioFits<'_> {
        RatioFits {
            values: &self.values,
            errors: &self.errors,
            ratio_num: self.ratio_num,
        }
    }
}

/// Plateau-fit the `[bin, (Q, ratio, t)]` ratios held by this worker.
///
/// `local` holds this worker's bins, in global order across ranks. The time
/// errors are computed from every worker's bins; the per-bin fits are
/// gathered on the coordinator, which also computes their errors. Workers
/// get `None`.
pub fn fit_ratios<C: Collective + ?Sized>(
    local: &DMatrix<f64>,
    shape: RatioShape,
    tsink: usize,
    comm: &C,
) -> Result<Option<FittedRatios>> {
    if shape.time_num != tsink + 1 {
        return Err(LqcdError::config(format!(
            "Ratio series have {} time slices, tsink {tsink} needs {}.",
            shape.time_num,
            tsink + 1
        )));
    }
    let window = ratio_window(tsink)?;

    let all = comm.all_gather_rows(local)?;
    let time_err = calc_error(&all)?;
    let local_fit = fit_gen_form_factor(local, &time_err, shape, window.start, window.end)?;

    let Some(values) = comm.gather_rows(&local_fit)? else {
        return Ok(None);
    };
    let errors = calc_error(&values)?;
    info!(%window, bins = values.nrows(), series = shape.series_num(), "ratio plateau fits finished");
    Ok(Some(FittedRatios {
        values,
        errors,
        ratio_num: shape.ratio_num,
        window,
    }))
}

/// Separate two form factors per Q² group by SVD.
///
/// The kinematic rows are divided by the ratio errors before the
/// decomposition, matching weighted combiners such as
/// [`crate::decomp::ErrorWeightedCombiner`].
pub fn decompose_form_factors(
    ratios: RatioFits<'_>,
    groups: &QsqGroups,
    kind: FormFactorKind,
    kinematics: &dyn KinematicFactors,
    combiner: &dyn FormFactorCombiner,
) -> Result<FormFactorAnalysis> {
    let ratio_num = ratios.ratio_num;
    let columns = groups.momentum_num() * ratio_num;
    if ratio_num == 0 || ratios.values.ncols() != columns || ratios.errors.len() != columns {
        return Err(LqcdError::config(format!(
            "Ratio fits have {} columns and {} errors, expected {} momenta x {ratio_num} ratios.",
            ratios.values.ncols(),
            ratios.errors.len(),
            groups.momentum_num()
        )));
    }
    if let Some(bad) = ratios.errors.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
        return Err(LqcdError::degenerate(format!(
            "Ratio errors must be finite and > 0 (found {bad})."
        )));
    }
    let bin_num = ratios.values.nrows();

    let mut out = Vec::with_capacity(groups.len());
    for (g, &(start, end)) in groups.ranges().iter().enumerate() {
        let first = start * ratio_num;
        let rows = (end - start + 1) * ratio_num;
        let errors = &ratios.errors[first..first + rows];

        let tensor: Vec<DMatrix<f64>> = (0..bin_num)
            .map(|b| {
                DMatrix::from_fn(rows, 2, |row, j| {
                    let q = start + row / ratio_num;
                    let r = row % ratio_num;
                    kinematics.row(b, q, r)[j] / errors[row]
                })
            })
            .collect();

        let decomposition = svd_decompose(&tensor)?;
        let diagnostics = decomposition.diagnostics;
        let qsq = groups.qsq()[g];
        if diagnostics.low_confidence() {
            warn!(
                qsq,
                rank = diagnostics.rank,
                condition = diagnostics.condition_number,
                underdetermined = diagnostics.underdetermined,
                "low-confidence form-factor decomposition"
            );
        }

        let group_ratios = ratios.values.columns(first, rows).into_owned();
        let per_bin = combine_form_factors(&decomposition, &group_ratios, errors, combiner)?;
        let a = ObservableArray::from_bins(per_bin.iter().map(|f| f[0]).collect())?;
        let b = ObservableArray::from_bins(per_bin.iter().map(|f| f[1]).collect())?;

        out.push(QsqFormFactors {
            qsq,
            momentum_num: end - start + 1,
            form_factors: [a, b],
            diagnostics,
        });
    }

    info!(?kind, groups = out.len(), bins = bin_num, "form-factor decomposition finished");
    Ok(FormFactorAnalysis {
        kind,
        labels: kind.labels().map(String::from),
        groups: out,
    })
}

/// Window and solver settings of the three-point analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreepSettings {
    /// Two-state two-point fit window on the folded correlator.
    pub twop_window: (usize, usize),
    /// Slices dropped at each end of every sink's insertion range; one joint
    /// fit per entry.
    pub neglect: Vec<usize>,
    pub solver: LmOptions,
}

/// Two-state two-point fit feeding the three-point fits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumSummary {
    pub window: FitWindow,
    /// `(c0, c1, E0, E1)`
    pub params: Vec<ObservableArray>,
    pub chi_sq: ObservableArray,
    /// Effective mass implied by the fit.
    pub meff_curve: SeriesSummary,
}

/// Fitted three-point curve at one sink time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkCurve {
    pub tsink: usize,
    pub curve: SeriesSummary,
}

/// Joint three-point fit with one neglected range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreepFitSummary {
    pub neglect: usize,
    pub window: FitWindow,
    /// `(a00, a01, a11)`
    pub amplitudes: Vec<ObservableArray>,
    pub chi_sq: ObservableArray,
    pub curves: Vec<SinkCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreepAnalysis {
    pub bin_num: usize,
    pub time_extent: usize,
    pub spectrum: SpectrumSummary,
    pub fits: Vec<ThreepFitSummary>,
}

/// Two-state analysis of three-point functions at several sink times.
///
/// `twop` is the unfolded `[bin, t]` two-point function and `threep` holds
/// `(tsink, [bin, ti])` for `ti = 0..=tsink`. The energies of every bin come
/// from a two-state fit of the folded two-point function.
pub fn analyze_threep(
    twop: &DMatrix<f64>,
    threep: &[(usize, DMatrix<f64>)],
    settings: &ThreepSettings,
) -> Result<ThreepAnalysis> {
    let t_ext = twop.ncols();
    let folded = fold(twop)?;
    let (start, end) = settings.twop_window;
    let twop_fit = two_state_fit_twop(&folded, start, end, t_ext, &settings.solver)?;
    let e0 = twop_fit.param(2);
    let e1 = twop_fit.param(3);
    let spectrum = SpectrumSummary {
        window: twop_fit.window,
        params: observables(&twop_fit)?,
        chi_sq: ObservableArray::from_bins(twop_fit.chi_sq.clone())?,
        meff_curve: SeriesSummary::from_curve(meff_curve_from_twop_fit(&twop_fit, t_ext, CURVE_POINTS)?)?,
    };

    if settings.neglect.is_empty() {
        return Err(LqcdError::config("No neglected ranges for the three-point fit."));
    }
    let fits = settings
        .neglect
        .iter()
        .map(|&neglect| {
            let series = threep
                .iter()
                .map(|(tsink, data)| {
                    Ok(ThreepSeries {
                        tsink: *tsink,
                        data: data.clone(),
                        insertion_times: insertion_times(*tsink, neglect)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let fit = two_state_fit_threep(&series, &e0, &e1, t_ext, &settings.solver)?;
            let curves = threep_curves(&fit, &series, &e0, &e1, t_ext, CURVE_POINTS)?
                .into_iter()
                .zip(&series)
                .map(|(curve, s)| {
                    Ok(SinkCurve {
                        tsink: s.tsink,
                        curve: SeriesSummary::from_curve(curve)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ThreepFitSummary {
                neglect,
                window: fit.window,
                amplitudes: observables(&fit)?,
                chi_sq: ObservableArray::from_bins(fit.chi_sq.clone())?,
                curves,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        bins = twop.nrows(),
        energy = spectrum.params[2].mean,
        fits = fits.len(),
        "three-point analysis finished"
    );
    Ok(ThreepAnalysis {
        bin_num: twop.nrows(),
        time_extent: t_ext,
        spectrum,
        fits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::SingleProcess;
    use crate::data::{
        Noise, SyntheticKinematics, ThreepEnsemble, TwopEnsemble, generate_form_factor_ensemble, ratio_series,
    };
    use crate::decomp::ErrorWeightedCombiner;

    fn ensemble(seed: u64) -> CorrelatorSample {
        TwopEnsemble {
            config_num: 100,
            time_extent: 32,
            ground: (0.05, 0.3),
            excited: None,
            noise: Noise::Relative(0.01),
            seed,
        }
        .generate()
        .unwrap()
    }

    #[test]
    fn meson_analysis_runs_the_window_search() {
        let config = FitConfiguration {
            fit_range_end: 14,
            meff_start_candidates: Some(vec![5, 6, 7]),
            twop_start_candidates: Some(vec![3]),
            check_fit: false,
            ..FitConfiguration::default()
        };
        let analysis = analyze_twop(&ensemble(3), 10, Particle::Pion, &config).unwrap();
        assert_eq!(analysis.bin_num, 10);
        assert_eq!(analysis.meff.mean.len(), 17);
        let exp = analysis.exponential.expect("mesons run the exponential fit");
        assert_eq!(exp.method, FitMethod::OneStateTwop);
        assert!((exp.energy.mean - 0.3).abs() < 0.01, "{}", exp.energy.mean);
        assert_eq!(exp.curve.ts.len(), CURVE_POINTS);
    }

    #[test]
    fn nucleon_analysis_is_plateau_only() {
        let config = FitConfiguration {
            fit_range_end: 12,
            meff_start_candidates: Some(vec![4]),
            ..FitConfiguration::default()
        };
        let analysis = analyze_twop(&ensemble(5), 10, Particle::Nucleon, &config).unwrap();
        assert!(analysis.exponential.is_none());
        assert_eq!(analysis.plateau.window, FitWindow { start: 4, end: 12 });
        assert!(analysis.meff.mean[31].is_nan());
    }

    #[test]
    fn decomposition_recovers_synthetic_form_factors() {
        let momenta = crate::physics::momentum_list(2);
        let ens = generate_form_factor_ensemble(&momenta, 3, 8, 0.02, 11).unwrap();
        let errors = calc_error(&ens.ratio_fit).unwrap();
        let kinematics = SyntheticKinematics { momenta: momenta.clone() };
        let analysis = decompose_form_factors(
            RatioFits {
                values: &ens.ratio_fit,
                errors: &errors,
                ratio_num: 3,
            },
            &ens.groups,
            FormFactorKind::Electromagnetic,
            &kinematics,
            &ErrorWeightedCombiner,
        )
        .unwrap();

        assert_eq!(analysis.labels, ["GE".to_string(), "GM".to_string()]);
        assert_eq!(analysis.groups.len(), 3);
        for (g, group) in analysis.groups.iter().enumerate() {
            for ff in 0..2 {
                let truth = bin_average(&ens.truth[ff].columns(g, 1).into_owned())[0];
                assert!(
                    (group.form_factors[ff].mean - truth).abs() < 1e-9,
                    "Q²={} ff {ff}: {} vs {truth}",
                    group.qsq,
                    group.form_factors[ff].mean
                );
            }
            assert!(!group.diagnostics.low_confidence());
        }
    }

    #[test]
    fn decomposition_rejects_zero_errors() {
        let momenta = crate::physics::momentum_list(1);
        let ens = generate_form_factor_ensemble(&momenta, 2, 4, 0.02, 1).unwrap();
        let errors = vec![0.0; ens.ratio_fit.ncols()];
        let err = decompose_form_factors(
            RatioFits {
                values: &ens.ratio_fit,
                errors: &errors,
                ratio_num: 2,
            },
            &ens.groups,
            FormFactorKind::OneDerivative,
            &SyntheticKinematics { momenta },
            &ErrorWeightedCombiner,
        )
        .unwrap_err();
        assert!(matches!(err, LqcdError::DegenerateFit(_)));
    }

    #[test]
    fn ratio_window_is_centered_on_half_the_sink() {
        assert_eq!(ratio_window(12).unwrap(), FitWindow { start: 4, end: 8 });
        assert_eq!(ratio_window(5).unwrap(), FitWindow { start: 0, end: 4 });
        assert!(ratio_window(3).is_err());
    }

    #[test]
    fn flat_ratio_series_fit_to_their_plateaus() {
        let momenta = crate::physics::momentum_list(1);
        let ens = generate_form_factor_ensemble(&momenta, 2, 6, 0.02, 4).unwrap();
        let (series, shape) = ratio_series(&ens, 10, 0.0).unwrap();
        let fitted = fit_ratios(&series, shape, 10, &SingleProcess).unwrap().unwrap();

        assert_eq!(fitted.window, FitWindow { start: 3, end: 7 });
        assert_eq!(fitted.values.shape(), ens.ratio_fit.shape());
        for (a, b) in fitted.values.iter().zip(ens.ratio_fit.iter()) {
            assert!((a - b).abs() < 1e-12 * b.abs().max(1.0));
        }
        assert_eq!(fitted.errors.len(), shape.series_num());
        assert!(fit_ratios(&series, shape, 9, &SingleProcess).is_err());
    }

    #[test]
    fn threep_analysis_recovers_the_amplitudes() {
        let samples = ThreepEnsemble {
            config_num: 50,
            time_extent: 32,
            twop: [1.2e-3, 0.8e-3, 0.3, 0.9],
            amplitudes: [2.0, 0.5, 0.3],
            tsinks: vec![8, 10, 12],
            noise: Noise::Relative(1e-5),
            seed: 21,
        }
        .generate()
        .unwrap();
        let twop = jackknife(&samples.twop, 5).unwrap().momentum(0).unwrap();
        let threep: Vec<(usize, DMatrix<f64>)> = samples
            .threep
            .iter()
            .map(|(tsink, s)| (*tsink, jackknife(s, 5).unwrap().momentum(0).unwrap()))
            .collect();
        let settings = ThreepSettings {
            twop_window: (2, 15),
            neglect: vec![2, 3],
            solver: LmOptions::default(),
        };
        let analysis = analyze_threep(&twop, &threep, &settings).unwrap();

        assert_eq!(analysis.bin_num, 10);
        let energy = &analysis.spectrum.params[2];
        assert!((energy.mean - 0.3).abs() < 1e-3, "E0 = {}", energy.mean);
        assert!(analysis.spectrum.params[3].mean > energy.mean);
        assert_eq!(analysis.fits.len(), 2);
        let fit = &analysis.fits[1];
        assert_eq!(fit.neglect, 3);
        assert_eq!(fit.window, FitWindow { start: 3, end: 9 });
        assert!((fit.amplitudes[0].mean - 2.0).abs() < 0.02, "a00 = {}", fit.amplitudes[0].mean);
        assert_eq!(fit.curves.len(), 3);
        assert_eq!(fit.curves[2].tsink, 12);
        assert_eq!(fit.curves[0].curve.ts.len(), CURVE_POINTS);
    }
}
