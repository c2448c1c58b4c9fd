//! Shared domain types.
//!
//! These types are passed between pipeline stages by value:
//!
//! - correlator ensembles and their jackknife bins (`CorrelatorSample`, `JackknifeBinSet`)
//! - fit windows and per-bin fit outputs (`FitWindow`, `FitResult`)
//! - bin-averaged observables (`ObservableArray`)
//! - analysis configuration and selector enums

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{LqcdError, Result};
use crate::math::LmOptions;

/// Raw correlator samples indexed by `(configuration, momentum, time)`.
///
/// Rows are configurations; columns hold the flattened `momentum × time`
/// axes, momentum-major. A correlator without a momentum axis has
/// `momentum_num == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatorSample {
    values: DMatrix<f64>,
    momentum_num: usize,
    time_extent: usize,
}

impl CorrelatorSample {
    pub fn new(values: DMatrix<f64>, momentum_num: usize, time_extent: usize) -> Result<Self> {
        if momentum_num == 0 || time_extent == 0 {
            return Err(LqcdError::config("Correlator axes must be non-empty."));
        }
        if values.ncols() != momentum_num * time_extent {
            return Err(LqcdError::config(format!(
                "Correlator has {} columns, expected {momentum_num} momenta x {time_extent} times.",
                values.ncols()
            )));
        }
        if values.nrows() == 0 {
            return Err(LqcdError::config("Correlator has no configurations."));
        }
        Ok(Self {
            values,
            momentum_num,
            time_extent,
        })
    }

    /// Single-momentum correlator from `[config, t]` data.
    pub fn from_time_series(values: DMatrix<f64>) -> Result<Self> {
        let t = values.ncols();
        Self::new(values, 1, t)
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn config_num(&self) -> usize {
        self.values.nrows()
    }

    pub fn momentum_num(&self) -> usize {
        self.momentum_num
    }

    pub fn time_extent(&self) -> usize {
        self.time_extent
    }
}

/// Leave-one-bin-out means indexed by `(bin, momentum, time)`.
#[derive(Debug, Clone, PartialEq)]
pub struct JackknifeBinSet {
    pub(crate) values: DMatrix<f64>,
    pub(crate) momentum_num: usize,
    pub(crate) time_extent: usize,
    pub(crate) bin_size: usize,
}

impl JackknifeBinSet {
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn bin_num(&self) -> usize {
        self.values.nrows()
    }

    pub fn bin_size(&self) -> usize {
        self.bin_size
    }

    pub fn momentum_num(&self) -> usize {
        self.momentum_num
    }

    pub fn time_extent(&self) -> usize {
        self.time_extent
    }

    /// `[bin, t]` slice for one momentum index.
    pub fn momentum(&self, index: usize) -> Result<DMatrix<f64>> {
        if index >= self.momentum_num {
            return Err(LqcdError::config(format!(
                "Momentum index {index} out of range ({} momenta).",
                self.momentum_num
            )));
        }
        let start = index * self.time_extent;
        Ok(self.values.columns(start, self.time_extent).into_owned())
    }
}

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitWindow {
    pub start: usize,
    pub end: usize,
}

impl FitWindow {
    /// Validate a window for a model with `param_num` parameters.
    pub fn new(start: usize, end: usize, param_num: usize) -> Result<Self> {
        if end <= start {
            return Err(LqcdError::degenerate(format!(
                "Fit window [{start}, {end}] must satisfy end > start."
            )));
        }
        let window = Self { start, end };
        if window.len() <= param_num {
            return Err(LqcdError::degenerate(format!(
                "Fit window [{start}, {end}] has {} points, need more than {param_num} parameters.",
                window.len()
            )));
        }
        Ok(window)
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn dof(&self, param_num: usize) -> usize {
        self.len().saturating_sub(param_num)
    }

    pub fn times(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }

    /// Ensure the window fits inside a time axis of length `time_extent`.
    pub fn check_within(&self, time_extent: usize) -> Result<()> {
        if self.end >= time_extent {
            return Err(LqcdError::config(format!(
                "Fit window end {} outside time extent {time_extent}.",
                self.end
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Per-bin output of a plateau or exponential fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Parameters of the fit to the bin-averaged data (the per-bin seed).
    pub mean_params: Vec<f64>,
    /// `[bin, param]`.
    pub params: DMatrix<f64>,
    /// χ²/dof per bin.
    pub chi_sq: Vec<f64>,
    pub window: FitWindow,
}

impl FitResult {
    pub fn bin_num(&self) -> usize {
        self.params.nrows()
    }

    /// Per-bin values of one parameter.
    pub fn param(&self, index: usize) -> Vec<f64> {
        self.params.column(index).iter().copied().collect()
    }
}

/// Bin mean and jackknife error of a derived quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableArray {
    pub mean: f64,
    pub error: f64,
    pub bins: Vec<f64>,
}

impl ObservableArray {
    pub fn from_bins(bins: Vec<f64>) -> Result<Self> {
        let error = crate::resample::calc_error_slice(&bins)?;
        let mean = bins.iter().sum::<f64>() / bins.len() as f64;
        Ok(Self { mean, error, bins })
    }
}

/// Which estimator is compared to the effective-mass plateau.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    OneStateTwop,
    TwoStateTwop,
    TwoStateMeff,
}

impl FitMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            FitMethod::OneStateTwop => "one-state two-point fit",
            FitMethod::TwoStateTwop => "two-state two-point fit",
            FitMethod::TwoStateMeff => "two-state effective-mass fit",
        }
    }

    /// Column holding the ground-state energy in the fit parameters.
    pub fn energy_index(self) -> usize {
        match self {
            FitMethod::OneStateTwop => 1,
            FitMethod::TwoStateTwop => 2,
            FitMethod::TwoStateMeff => 1,
        }
    }
}

/// Data the two-state fit runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum FitType {
    #[serde(rename = "mEff")]
    #[value(name = "mEff", alias = "meff")]
    Meff,
    #[serde(rename = "twop")]
    #[value(name = "twop")]
    Twop,
}

impl FromStr for FitType {
    type Err = LqcdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mEff" | "meff" => Ok(FitType::Meff),
            "twop" => Ok(FitType::Twop),
            other => Err(LqcdError::config(format!(
                "Fit type '{other}' is not supported (expected mEff or twop)."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Particle {
    Pion,
    Kaon,
    Nucleon,
}

impl Particle {
    /// Mesons have time-symmetric two-point functions and are folded.
    pub fn is_meson(self) -> bool {
        !matches!(self, Particle::Nucleon)
    }
}

impl FromStr for Particle {
    type Err = LqcdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pion" => Ok(Particle::Pion),
            "kaon" => Ok(Particle::Kaon),
            "nucleon" => Ok(Particle::Nucleon),
            other => Err(LqcdError::config(format!(
                "Particle '{other}' is not supported (pion, kaon, nucleon)."
            ))),
        }
    }
}

/// Pair of form factors separated by the SVD decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum FormFactorKind {
    #[serde(rename = "EM")]
    #[value(name = "EM")]
    Electromagnetic,
    #[serde(rename = "1D")]
    #[value(name = "1D")]
    OneDerivative,
}

impl FormFactorKind {
    pub fn labels(self) -> [&'static str; 2] {
        match self {
            FormFactorKind::Electromagnetic => ["GE", "GM"],
            FormFactorKind::OneDerivative => ["A20", "A22"],
        }
    }
}

impl FromStr for FormFactorKind {
    type Err = LqcdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EM" => Ok(FormFactorKind::Electromagnetic),
            "1D" => Ok(FormFactorKind::OneDerivative),
            other => Err(LqcdError::config(format!(
                "Form factor '{other}' is not supported (EM, 1D)."
            ))),
        }
    }
}

/// Options of the effective-mass / two-point consistency search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfiguration {
    pub two_state_fit: bool,
    /// Last time slice of every fit window.
    pub fit_range_end: usize,
    /// Plateau-fit start times; derived from `fit_range_end` when unset.
    pub meff_start_candidates: Option<Vec<usize>>,
    /// Exponential-fit start times; `1..5` when unset.
    pub twop_start_candidates: Option<Vec<usize>>,
    pub fit_type: FitType,
    /// When false, the first candidate pair is returned unchecked.
    pub check_fit: bool,
    pub solver: LmOptions,
}

impl Default for FitConfiguration {
    fn default() -> Self {
        Self {
            two_state_fit: false,
            fit_range_end: 15,
            meff_start_candidates: None,
            twop_start_candidates: None,
            fit_type: FitType::Meff,
            check_fit: true,
            solver: LmOptions::default(),
        }
    }
}

impl FitConfiguration {
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn method(&self) -> FitMethod {
        match (self.two_state_fit, self.fit_type) {
            (false, _) => FitMethod::OneStateTwop,
            (true, FitType::Twop) => FitMethod::TwoStateTwop,
            (true, FitType::Meff) => FitMethod::TwoStateMeff,
        }
    }

    pub fn meff_starts(&self) -> Vec<usize> {
        match &self.meff_start_candidates {
            Some(starts) => starts.clone(),
            None => crate::fit::default_meff_starts(self.fit_range_end),
        }
    }

    pub fn twop_starts(&self) -> Vec<usize> {
        match &self.twop_start_candidates {
            Some(starts) => starts.clone(),
            None => crate::fit::default_twop_starts(),
        }
    }

    /// Check candidate ranges against a time axis of length `time_extent`.
    pub fn validate(&self, time_extent: usize) -> Result<()> {
        if self.fit_range_end >= time_extent {
            return Err(LqcdError::config(format!(
                "Fit range end {} outside time extent {time_extent}.",
                self.fit_range_end
            )));
        }
        let meff = self.meff_starts();
        let twop = self.twop_starts();
        if meff.is_empty() || twop.is_empty() {
            return Err(LqcdError::config(format!(
                "Empty fit-start candidates (mEff {meff:?}, two-point {twop:?})."
            )));
        }
        if let Some(bad) = meff.iter().chain(twop.iter()).find(|&&s| s >= self.fit_range_end) {
            return Err(LqcdError::config(format!(
                "Fit start {bad} is not below range end {}.",
                self.fit_range_end
            )));
        }
        self.solver.validate()
    }
}
