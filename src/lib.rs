//! `lqcdjk` library crate.
//!
//! The binary (`lqcdjk`) is a thin wrapper around this library so that:
//!
//! - resampling and fitting are testable without spawning processes
//! - the pipelines can be driven from other front ends or collective backends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod collective;
pub mod data;
pub mod decomp;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod physics;
pub mod report;
pub mod resample;
