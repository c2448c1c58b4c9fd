//! Crate-wide error type.
//!
//! Every fallible operation returns [`LqcdError`]. The variants follow the
//! analysis error taxonomy: configuration problems abort the calling analysis,
//! fit failures are scoped to one fit call, and a missing consistent fit window
//! is a reported condition the caller is expected to handle.

use thiserror::Error;

use crate::domain::FitMethod;

/// No `(mEff start, two-point start)` pair passed the agreement check.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "no consistent fit found ({}) for mEff starts {meff_starts:?}, two-point starts {twop_starts:?}, range end {range_end}{}",
    .method.display_name(),
    estimates_suffix(.last_estimates)
)]
pub struct NoConsistentFitError {
    /// Which estimator was compared against the effective-mass plateau.
    pub method: FitMethod,
    /// Plateau-fit start times that were tried.
    pub meff_starts: Vec<usize>,
    /// Exponential-fit start times that were tried.
    pub twop_starts: Vec<usize>,
    /// Last time slice of every window.
    pub range_end: usize,
    /// Bin-averaged plateau mass and exponential-fit energy of the last pair
    /// that produced both estimates, if any did.
    pub last_estimates: Option<(f64, f64)>,
}

fn estimates_suffix(last_estimates: &Option<(f64, f64)>) -> String {
    match last_estimates {
        Some((plateau, energy)) => format!("; last estimates mEff={plateau:.6}, E={energy:.6}"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum LqcdError {
    /// Invalid input shapes, partitions or selector strings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The fit window cannot support the model (too few points, bad errors).
    #[error("degenerate fit: {0}")]
    DegenerateFit(String),

    /// The nonlinear solver did not converge for a bin.
    #[error("fit did not converge for {sample}: {reason}")]
    FitConvergence { sample: String, reason: String },

    #[error(transparent)]
    NoConsistentFit(#[from] NoConsistentFitError),

    /// Singular-value decomposition produced unusable output.
    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// A cross-worker exchange failed; fatal to the analysis.
    #[error("collective failed: {0}")]
    Collective(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LqcdError {
    pub fn config(message: impl Into<String>) -> Self {
        LqcdError::Configuration(message.into())
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        LqcdError::DegenerateFit(message.into())
    }

    /// Process exit code used by the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            LqcdError::Configuration(_) => 2,
            LqcdError::DegenerateFit(_) => 3,
            LqcdError::FitConvergence { .. } => 4,
            LqcdError::NoConsistentFit(_) => 5,
            LqcdError::NumericalDegeneracy(_) => 6,
            LqcdError::Io(_) | LqcdError::Json(_) => 7,
            LqcdError::Collective(_) => 8,
        }
    }
}

pub type Result<T> = std::result::Result<T, LqcdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_consistent_fit_message_names_the_ranges() {
        let err = NoConsistentFitError {
            method: FitMethod::OneStateTwop,
            meff_starts: vec![7, 8],
            twop_starts: vec![1, 2],
            range_end: 15,
            last_estimates: Some((0.5, 0.3)),
        };
        let msg = LqcdError::from(err).to_string();
        assert!(msg.contains("[7, 8]"), "{msg}");
        assert!(msg.contains("range end 15"), "{msg}");
        assert!(msg.contains("mEff=0.500000"), "{msg}");
    }

    #[test]
    fn no_consistent_fit_without_estimates_ends_at_the_range() {
        let err = NoConsistentFitError {
            method: FitMethod::TwoStateMeff,
            meff_starts: vec![0],
            twop_starts: vec![2],
            range_end: 14,
            last_estimates: None,
        };
        let msg = err.to_string();
        assert!(msg.ends_with("range end 14"), "{msg}");
        assert!(msg.contains(FitMethod::TwoStateMeff.display_name()), "{msg}");
    }

    #[test]
    fn exit_codes_are_distinct_per_family() {
        let codes = [
            LqcdError::config("x").exit_code(),
            LqcdError::degenerate("x").exit_code(),
            LqcdError::NumericalDegeneracy("x".into()).exit_code(),
        ];
        assert_eq!(codes, [2, 3, 6]);
    }
}
