//! Input data sources.
//!
//! Currently only seeded synthetic ensembles; file readers are out of scope.

pub mod synthetic;

pub use synthetic::*;
