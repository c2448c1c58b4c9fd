//! Exponential correlator models.
//!
//! Models are implemented as small, pure functions of one time value so that
//! fitting and curve code can stay generic.

pub mod model;

pub use model::*;
