//! Physics helpers shared by the pipelines: effective masses and
//! momentum-transfer bookkeeping.

pub mod effective_mass;
pub mod momentum;

pub use effective_mass::*;
pub use momentum::*;
