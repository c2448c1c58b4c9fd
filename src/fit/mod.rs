//! Fitting engine.
//!
//! Responsibilities:
//!
//! - plateau fits of effective masses and ratios
//! - mean-first / per-bin exponential fits of two- and three-point functions
//! - the effective-mass / two-point window search
//! - dense fitted curves for output

pub mod curve;
pub mod fitter;
pub mod grid;
pub mod plateau;
pub mod selection;

pub use curve::*;
pub use fitter::*;
pub use grid::*;
pub use plateau::*;
pub use selection::*;
