//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - correlator ensembles and jackknife bin sets
//! - fit windows and fit outputs (`FitWindow`, `FitResult`, `ObservableArray`)
//! - configuration and selector enums (`FitConfiguration`, `Particle`, `FormFactorKind`)

pub mod types;

pub use types::*;
