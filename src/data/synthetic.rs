//! Seeded synthetic ensembles for tests and demos.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::decomp::KinematicFactors;
use crate::domain::CorrelatorSample;
use crate::error::{LqcdError, Result};
use crate::fit::RatioShape;
use crate::models::{two_state_threep, two_state_twop};
use crate::physics::QsqGroups;

/// Gaussian noise added to every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Noise {
    /// Fixed standard deviation.
    Absolute(f64),
    /// Standard deviation proportional to the noiseless value.
    Relative(f64),
}

impl Noise {
    fn sigma(self, value: f64) -> f64 {
        match self {
            Noise::Absolute(s) => s,
            Noise::Relative(r) => r * value.abs(),
        }
    }

    fn scale(self) -> f64 {
        match self {
            Noise::Absolute(s) | Noise::Relative(s) => s,
        }
    }
}

/// Periodic two-point ensemble with up to two states.
#[derive(Debug, Clone, PartialEq)]
pub struct TwopEnsemble {
    pub config_num: usize,
    pub time_extent: usize,
    /// `(amplitude, energy)` of the ground state.
    pub ground: (f64, f64),
    /// `(amplitude, energy)` of the first excited state, if any.
    pub excited: Option<(f64, f64)>,
    pub noise: Noise,
    pub seed: u64,
}

fn standard_normal() -> Result<Normal<f64>> {
    Normal::new(0.0, 1.0).map_err(|e| LqcdError::config(format!("Noise distribution error: {e}")))
}

impl TwopEnsemble {
    pub fn validate(&self) -> Result<()> {
        if self.config_num == 0 || self.time_extent < 4 || self.time_extent % 2 != 0 {
            return Err(LqcdError::config(format!(
                "Synthetic ensemble needs configurations and an even time extent >= 4 (got {} x {}).",
                self.config_num, self.time_extent
            )));
        }
        let scale = self.noise.scale();
        if !(scale.is_finite() && scale >= 0.0) {
            return Err(LqcdError::config(format!("Invalid noise level {scale}.")));
        }
        Ok(())
    }

    /// Noiseless correlator at time `t`.
    pub fn exact(&self, t: f64) -> f64 {
        let (c0, e0) = self.ground;
        let (c1, e1) = self.excited.unwrap_or((0.0, 0.0));
        two_state_twop(t, self.time_extent, c0, c1, e0, e1)
    }

    /// `[config, t]` samples over the full time extent.
    pub fn generate(&self) -> Result<CorrelatorSample> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = standard_normal()?;
        let exact: Vec<f64> = (0..self.time_extent).map(|t| self.exact(t as f64)).collect();
        let values = DMatrix::from_fn(self.config_num, self.time_extent, |_, t| {
            exact[t] + self.noise.sigma(exact[t]) * normal.sample(&mut rng)
        });
        CorrelatorSample::from_time_series(values)
    }
}

/// Deterministic kinematic coefficients for synthetic form-factor data.
///
/// Row `(q, r)` is `[1 + r/4, (r + 1)/10 + p_{r mod 3}/2]`, which is full rank
/// for any momentum once two ratios are present.
pub fn synthetic_kinematic_row(momentum: [i64; 3], ratio: usize) -> [f64; 2] {
    [
        1.0 + 0.25 * ratio as f64,
        0.1 * (ratio + 1) as f64 + 0.5 * momentum[ratio % 3] as f64,
    ]
}

/// [`KinematicFactors`] built from [`synthetic_kinematic_row`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticKinematics {
    pub momenta: Vec<[i64; 3]>,
}

impl KinematicFactors for SyntheticKinematics {
    fn row(&self, _bin: usize, momentum: usize, ratio: usize) -> [f64; 2] {
        synthetic_kinematic_row(self.momenta[momentum], ratio)
    }
}

/// Dipole-like form factors `(A, B)` used as the synthetic truth.
pub fn synthetic_form_factors(qsq: i64) -> [f64; 2] {
    let a = 1.0 / (1.0 + 0.1 * qsq as f64).powi(2);
    [a, 2.5 * a]
}

/// Fitted ratios of a synthetic form-factor analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct FormFactorEnsemble {
    pub momenta: Vec<[i64; 3]>,
    pub groups: QsqGroups,
    pub ratio_num: usize,
    /// `[bin, (Q, ratio)]`
    pub ratio_fit: DMatrix<f64>,
    /// `[bin, Q²]` true form factors per bin.
    pub truth: Vec<DMatrix<f64>>,
}

/// Generate per-bin ratios `K(q, r) · [A_b, B_b]`.
///
/// Each bin's form factors scatter around [`synthetic_form_factors`] with
/// relative width `spread`, so the jackknife errors are non-zero.
pub fn generate_form_factor_ensemble(
    momenta: &[[i64; 3]],
    ratio_num: usize,
    bin_num: usize,
    spread: f64,
    seed: u64,
) -> Result<FormFactorEnsemble> {
    if ratio_num == 0 || bin_num < 2 {
        return Err(LqcdError::config(format!(
            "Synthetic form factors need ratios and at least two bins (got {ratio_num}, {bin_num})."
        )));
    }
    if !(spread.is_finite() && spread > 0.0) {
        return Err(LqcdError::config(format!("Invalid spread {spread}.")));
    }
    let groups = QsqGroups::from_momenta(momenta)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = standard_normal()?;

    // truth[ff][bin, qsq]
    let mut truth = vec![DMatrix::<f64>::zeros(bin_num, groups.len()); 2];
    for b in 0..bin_num {
        for (g, &q2) in groups.qsq().iter().enumerate() {
            let exact = synthetic_form_factors(q2);
            for (ff, value) in exact.iter().enumerate() {
                truth[ff][(b, g)] = value * (1.0 + spread * normal.sample(&mut rng));
            }
        }
    }

    let mut ratio_fit = DMatrix::<f64>::zeros(bin_num, momenta.len() * ratio_num);
    for (g, &(start, end)) in groups.ranges().iter().enumerate() {
        for q in start..=end {
            for r in 0..ratio_num {
                let k = synthetic_kinematic_row(momenta[q], r);
                for b in 0..bin_num {
                    ratio_fit[(b, q * ratio_num + r)] = k[0] * truth[0][(b, g)] + k[1] * truth[1][(b, g)];
                }
            }
        }
    }

    Ok(FormFactorEnsemble {
        momenta: momenta.to_vec(),
        groups,
        ratio_num,
        ratio_fit,
        truth,
    })
}

/// Energy gap of the excited-state contamination in [`ratio_series`].
const RATIO_CONTAMINATION_GAP: f64 = 0.5;

/// Expand fitted ratios into `[bin, (Q, ratio, t)]` series for `t = 0..=tsink`.
///
/// Every series is `R_b * (1 + contamination * (e^{-Δt} + e^{-Δ(tsink-t)}))`,
/// so a zero contamination gives flat plateaus at the ensemble's ratio fits.
pub fn ratio_series(ensemble: &FormFactorEnsemble, tsink: usize, contamination: f64) -> Result<(DMatrix<f64>, RatioShape)> {
    if !contamination.is_finite() {
        return Err(LqcdError::config(format!("Invalid contamination {contamination}.")));
    }
    let shape = RatioShape {
        momentum_num: ensemble.momenta.len(),
        ratio_num: ensemble.ratio_num,
        time_num: tsink + 1,
    };
    let ts = tsink as f64;
    let profile: Vec<f64> = (0..shape.time_num)
        .map(|t| {
            let t = t as f64;
            1.0 + contamination
                * ((-RATIO_CONTAMINATION_GAP * t).exp() + (-RATIO_CONTAMINATION_GAP * (ts - t)).exp())
        })
        .collect();
    let values = DMatrix::from_fn(ensemble.ratio_fit.nrows(), shape.columns(), |b, col| {
        ensemble.ratio_fit[(b, col / shape.time_num)] * profile[col % shape.time_num]
    });
    Ok((values, shape))
}

/// Two-point and three-point ensembles sharing one two-state spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreepEnsemble {
    pub config_num: usize,
    pub time_extent: usize,
    /// `(c0, c1, E0, E1)` of the two-point function.
    pub twop: [f64; 4],
    /// `(a00, a01, a11)` of the three-point function.
    pub amplitudes: [f64; 3],
    pub tsinks: Vec<usize>,
    pub noise: Noise,
    pub seed: u64,
}

/// Samples drawn from a [`ThreepEnsemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThreepSamples {
    /// `[config, t]` over the full time extent.
    pub twop: CorrelatorSample,
    /// `(tsink, [config, ti])` with `ti = 0..=tsink`.
    pub threep: Vec<(usize, CorrelatorSample)>,
}

impl ThreepEnsemble {
    pub fn validate(&self) -> Result<()> {
        let twop = TwopEnsemble {
            config_num: self.config_num,
            time_extent: self.time_extent,
            ground: (self.twop[0], self.twop[2]),
            excited: Some((self.twop[1], self.twop[3])),
            noise: self.noise,
            seed: self.seed,
        };
        twop.validate()?;
        if self.tsinks.is_empty() {
            return Err(LqcdError::config("No sink times for the three-point ensemble."));
        }
        if let Some(bad) = self.tsinks.iter().find(|&&ts| ts == 0 || ts >= self.time_extent) {
            return Err(LqcdError::config(format!(
                "Sink time {bad} outside (0, {}).",
                self.time_extent
            )));
        }
        Ok(())
    }

    pub fn generate(&self) -> Result<ThreepSamples> {
        self.validate()?;
        let [c0, c1, e0, e1] = self.twop;
        let [a00, a01, a11] = self.amplitudes;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = standard_normal()?;
        let mut noisy = |exact: &[f64]| {
            DMatrix::from_fn(self.config_num, exact.len(), |_, t| {
                exact[t] + self.noise.sigma(exact[t]) * normal.sample(&mut rng)
            })
        };

        let exact: Vec<f64> = (0..self.time_extent)
            .map(|t| two_state_twop(t as f64, self.time_extent, c0, c1, e0, e1))
            .collect();
        let twop = CorrelatorSample::from_time_series(noisy(&exact))?;

        let threep = self
            .tsinks
            .iter()
            .map(|&tsink| {
                let exact: Vec<f64> = (0..=tsink)
                    .map(|ti| two_state_threep(ti as f64, tsink, self.time_extent, a00, a01, a11, e0, e1))
                    .collect();
                Ok((tsink, CorrelatorSample::from_time_series(noisy(&exact))?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ThreepSamples { twop, threep })
    }
}
