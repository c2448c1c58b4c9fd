//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - installs the log subscriber
//! - parses CLI arguments
//! - generates synthetic ensembles
//! - runs the two-point, three-point or form-factor pipeline
//! - prints reports and writes optional JSON output

use std::thread;

use clap::Parser;
use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::app::pipeline::{FittedRatios, ThreepSettings, fit_ratios};
use crate::cli::{Command, FormFactorArgs, OutputArgs, ThreepArgs, TwopArgs};
use crate::collective::{BinPartition, Collective, SingleProcess, ThreadWorld, distributed_jackknife};
use crate::data::{Noise, SyntheticKinematics, ThreepEnsemble, TwopEnsemble, generate_form_factor_ensemble, ratio_series};
use crate::decomp::ErrorWeightedCombiner;
use crate::domain::{CorrelatorSample, FitConfiguration, JackknifeBinSet};
use crate::error::{LqcdError, Result};
use crate::fit::RatioShape;
use crate::math::LmOptions;
use crate::physics::momentum_list;
use crate::resample::jackknife;

pub mod pipeline;

/// Entry point for the `lqcdjk` binary.
pub fn run() -> Result<()> {
    init_tracing();
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Twop(args) => handle_twop(args),
        Command::Threep(args) => handle_threep(args),
        Command::FormFactor(args) => handle_form_factor(args),
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded in another process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_twop(args: TwopArgs) -> Result<()> {
    let config = fit_config_from_args(&args)?;
    let ensemble = TwopEnsemble {
        config_num: args.configs,
        time_extent: args.time_extent,
        ground: (args.amplitude, args.energy),
        excited: args.excited_amplitude.zip(args.excited_energy),
        noise: noise(args.noise, args.relative_noise),
        seed: args.seed,
    };
    let samples = ensemble.generate()?;
    info!(
        configs = samples.config_num(),
        time_extent = samples.time_extent(),
        seed = args.seed,
        "generated two-point ensemble"
    );

    let bins = if args.workers > 1 {
        threaded_jackknife(&samples, args.bin_size, args.workers)?
    } else {
        jackknife(&samples, args.bin_size)?
    };

    let analysis = pipeline::analyze_twop_bins(&bins, args.particle, &config)?;
    emit(&args.output, &analysis, || crate::report::format_twop_report(&analysis))
}

fn noise(level: f64, relative: bool) -> Noise {
    if relative { Noise::Relative(level) } else { Noise::Absolute(level) }
}

fn fixed_len<const N: usize>(values: &[f64], flag: &str) -> Result<[f64; N]> {
    values
        .try_into()
        .map_err(|_| LqcdError::config(format!("{flag} takes {N} values, got {}.", values.len())))
}

fn handle_threep(args: ThreepArgs) -> Result<()> {
    let ensemble = ThreepEnsemble {
        config_num: args.configs,
        time_extent: args.time_extent,
        twop: fixed_len(&args.twop, "--twop")?,
        amplitudes: fixed_len(&args.amplitudes, "--amplitudes")?,
        tsinks: args.tsinks.clone(),
        noise: noise(args.noise, !args.absolute_noise),
        seed: args.seed,
    };
    let samples = ensemble.generate()?;
    info!(
        configs = args.configs,
        tsinks = ?args.tsinks,
        seed = args.seed,
        "generated three-point ensemble"
    );

    let twop = jackknife(&samples.twop, args.bin_size)?.momentum(0)?;
    let threep = samples
        .threep
        .iter()
        .map(|(tsink, sample)| Ok((*tsink, jackknife(sample, args.bin_size)?.momentum(0)?)))
        .collect::<Result<Vec<_>>>()?;
    let settings = ThreepSettings {
        twop_window: (args.twop_start, args.twop_end),
        neglect: args.neglect.clone(),
        solver: LmOptions::default(),
    };

    let analysis = pipeline::analyze_threep(&twop, &threep, &settings)?;
    emit(&args.output, &analysis, || crate::report::format_threep_report(&analysis))
}

fn handle_form_factor(args: FormFactorArgs) -> Result<()> {
    let momenta = momentum_list(args.max_qsq);
    let ensemble = generate_form_factor_ensemble(&momenta, args.ratios, args.bins, args.spread, args.seed)?;
    let (series, shape) = ratio_series(&ensemble, args.tsink, args.contamination)?;
    info!(
        momenta = momenta.len(),
        qsq_groups = ensemble.groups.len(),
        bins = args.bins,
        tsink = args.tsink,
        "generated ratio series"
    );

    let fitted = if args.workers > 1 {
        threaded_ratio_fits(&series, shape, args.tsink, args.workers)?
    } else {
        fit_ratios(&series, shape, args.tsink, &SingleProcess)?
            .ok_or_else(|| LqcdError::Collective("single process returned no ratio fits".into()))?
    };

    let kinematics = SyntheticKinematics { momenta };
    let analysis = pipeline::decompose_form_factors(
        fitted.as_inputs(),
        &ensemble.groups,
        args.kind,
        &kinematics,
        &ErrorWeightedCombiner,
    )?;
    emit(&args.output, &analysis, || crate::report::format_form_factor_report(&analysis))
}

fn emit<T: Serialize>(output: &OutputArgs, result: &T, text: impl FnOnce() -> String) -> Result<()> {
    if output.json {
        println!("{}", crate::report::to_json(result)?);
    } else {
        println!("{}", text());
    }
    if let Some(path) = &output.output {
        crate::report::write_json(path, result)?;
        info!(path = %path.display(), "wrote JSON result");
    }
    Ok(())
}

/// Merge the optional JSON configuration file with CLI overrides.
pub fn fit_config_from_args(args: &TwopArgs) -> Result<FitConfiguration> {
    let mut config = match &args.config {
        Some(path) => FitConfiguration::from_json_path(path)?,
        None => FitConfiguration::default(),
    };
    if args.two_state {
        config.two_state_fit = true;
    }
    if let Some(fit_type) = args.fit_type {
        config.fit_type = fit_type;
    }
    if let Some(end) = args.fit_range_end {
        config.fit_range_end = end;
    }
    if let Some(starts) = &args.meff_starts {
        config.meff_start_candidates = Some(starts.clone());
    }
    if let Some(starts) = &args.twop_starts {
        config.twop_start_candidates = Some(starts.clone());
    }
    if args.no_check_fit {
        config.check_fit = false;
    }
    debug!(?config, "fit configuration");
    Ok(config)
}

/// Jackknife `samples` with each configuration block owned by one thread.
pub fn threaded_jackknife(samples: &CorrelatorSample, bin_size: usize, workers: usize) -> Result<JackknifeBinSet> {
    let partition = BinPartition::new(samples.config_num(), bin_size, workers)?;
    let members = ThreadWorld::new(workers);

    let results: Vec<Result<JackknifeBinSet>> = thread::scope(|scope| {
        let handles: Vec<_> = members
            .into_iter()
            .enumerate()
            .map(|(rank, member)| {
                let partition = &partition;
                scope.spawn(move || {
                    let range = partition.config_range(rank);
                    let local = CorrelatorSample::new(
                        samples.values().rows(range.start, range.len()).into_owned(),
                        samples.momentum_num(),
                        samples.time_extent(),
                    )?;
                    distributed_jackknife(&local, partition, &member)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(LqcdError::Collective("worker thread panicked".into())))
            })
            .collect()
    });

    // Every member holds the full bin set; keep the coordinator's.
    results
        .into_iter()
        .next()
        .ok_or_else(|| LqcdError::Collective("no workers".into()))?
}

/// Ratio plateau fits with the `[bin, (Q, ratio, t)]` rows spread over threads.
///
/// Each worker fits the bins its partition owns; the coordinator's gathered
/// fits are returned.
pub fn threaded_ratio_fits(
    series: &DMatrix<f64>,
    shape: RatioShape,
    tsink: usize,
    workers: usize,
) -> Result<FittedRatios> {
    // Bins are already formed: spread them like unit-size bins of configurations.
    let partition = BinPartition::new(series.nrows(), 1, workers)?;
    let members = ThreadWorld::new(workers);

    let results: Vec<Result<Option<FittedRatios>>> = thread::scope(|scope| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let partition = &partition;
                scope.spawn(move || {
                    let local = series.select_rows(partition.bins(member.rank()));
                    fit_ratios(&local, shape, tsink, &member)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(LqcdError::Collective("worker thread panicked".into())))
            })
            .collect()
    });

    let mut coordinator = None;
    for result in results {
        if let Some(fitted) = result? {
            coordinator.get_or_insert(fitted);
        }
    }
    coordinator.ok_or_else(|| LqcdError::Collective("coordinator returned no ratio fits".into()))
}
