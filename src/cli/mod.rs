//! Command-line parsing for the jackknife analysis driver.
//!
//! Parsing and dispatch stay separate from the resampling and fitting code;
//! every subcommand builds its inputs from seeded synthetic ensembles.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{FitType, FormFactorKind, Particle};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "lqcdjk", version, about = "Jackknife resampling and fitting for lattice QCD correlators")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Two-point analysis: jackknife, effective mass, window search and fitted curves.
    Twop(TwopArgs),
    /// Three-point analysis: two-state spectrum, joint three-point fits and curves.
    Threep(ThreepArgs),
    /// Ratio plateau fits and SVD decomposition of fitted ratios into two form factors per Q².
    FormFactor(FormFactorArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Print the result as JSON instead of a text report.
    #[arg(long)]
    pub json: bool,

    /// Write the JSON result to a file as well.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct TwopArgs {
    /// Particle whose two-point function is generated.
    #[arg(short = 'p', long, value_enum, default_value_t = Particle::Pion)]
    pub particle: Particle,

    /// Number of gauge configurations.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub configs: usize,

    /// Configurations per jackknife bin.
    #[arg(short = 'b', long, default_value_t = 10)]
    pub bin_size: usize,

    /// Lattice time extent.
    #[arg(short = 't', long, default_value_t = 32)]
    pub time_extent: usize,

    /// Ground-state amplitude.
    #[arg(long, default_value_t = 0.05)]
    pub amplitude: f64,

    /// Ground-state energy.
    #[arg(long, default_value_t = 0.3)]
    pub energy: f64,

    /// Excited-state amplitude (requires --excited-energy).
    #[arg(long, requires = "excited_energy")]
    pub excited_amplitude: Option<f64>,

    /// Excited-state energy (requires --excited-amplitude).
    #[arg(long, requires = "excited_amplitude")]
    pub excited_energy: Option<f64>,

    /// Absolute Gaussian noise per sample.
    #[arg(long, default_value_t = 1e-4)]
    pub noise: f64,

    /// Treat --noise as relative to the exact correlator.
    #[arg(long)]
    pub relative_noise: bool,

    /// Random seed for the ensemble.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// JSON fit configuration; flags below override its fields.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Use a two-state fit instead of the one-state two-point fit.
    #[arg(long)]
    pub two_state: bool,

    /// Data the two-state fit runs on.
    #[arg(long, value_enum)]
    pub fit_type: Option<FitType>,

    /// Last time slice of every fit window.
    #[arg(long)]
    pub fit_range_end: Option<usize>,

    /// Plateau-fit start candidates.
    #[arg(long, value_delimiter = ',')]
    pub meff_starts: Option<Vec<usize>>,

    /// Exponential-fit start candidates.
    #[arg(long, value_delimiter = ',')]
    pub twop_starts: Option<Vec<usize>>,

    /// Accept the first window pair without the consistency check.
    #[arg(long)]
    pub no_check_fit: bool,

    /// Spread the configurations over this many in-process workers.
    #[arg(short = 'w', long, default_value_t = 1)]
    pub workers: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ThreepArgs {
    /// Number of gauge configurations.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub configs: usize,

    /// Configurations per jackknife bin.
    #[arg(short = 'b', long, default_value_t = 10)]
    pub bin_size: usize,

    /// Lattice time extent.
    #[arg(short = 't', long, default_value_t = 32)]
    pub time_extent: usize,

    /// Two-point parameters c0,c1,E0,E1.
    #[arg(long, value_delimiter = ',', default_values_t = [1.2e-3, 0.8e-3, 0.3, 0.9])]
    pub twop: Vec<f64>,

    /// Three-point amplitudes a00,a01,a11.
    #[arg(long, value_delimiter = ',', default_values_t = [2.0, 0.5, 0.3])]
    pub amplitudes: Vec<f64>,

    /// Sink times of the three-point functions.
    #[arg(long, value_delimiter = ',', default_values_t = [8, 10, 12])]
    pub tsinks: Vec<usize>,

    /// Insertion slices dropped at each end; one fit per value.
    #[arg(long, value_delimiter = ',', default_values_t = [2, 3])]
    pub neglect: Vec<usize>,

    /// First slice of the two-state two-point fit.
    #[arg(long, default_value_t = 2)]
    pub twop_start: usize,

    /// Last slice of the two-state two-point fit.
    #[arg(long, default_value_t = 15)]
    pub twop_end: usize,

    /// Relative Gaussian noise per sample.
    #[arg(long, default_value_t = 1e-4)]
    pub noise: f64,

    /// Treat --noise as an absolute standard deviation.
    #[arg(long)]
    pub absolute_noise: bool,

    /// Random seed for the ensemble.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct FormFactorArgs {
    /// Form-factor pair to separate.
    #[arg(short = 'k', long, value_enum, default_value_t = FormFactorKind::Electromagnetic)]
    pub kind: FormFactorKind,

    /// Number of jackknife bins.
    #[arg(long, default_value_t = 20)]
    pub bins: usize,

    /// Ratios per momentum.
    #[arg(long, default_value_t = 4)]
    pub ratios: usize,

    /// Largest Q² (lattice units) of the momentum list.
    #[arg(long, default_value_t = 3)]
    pub max_qsq: i64,

    /// Relative bin-to-bin spread of the synthetic form factors.
    #[arg(long, default_value_t = 0.02)]
    pub spread: f64,

    /// Source-sink separation of the ratio series.
    #[arg(long, default_value_t = 12)]
    pub tsink: usize,

    /// Relative excited-state contamination at the source and sink.
    #[arg(long, default_value_t = 0.0)]
    pub contamination: f64,

    /// Spread the ratio bins over this many in-process workers.
    #[arg(short = 'w', long, default_value_t = 1)]
    pub workers: usize,

    /// Random seed for the ensemble.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub output: OutputArgs,
}
