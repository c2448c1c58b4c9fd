//! SVD decomposition of overdetermined form-factor systems.
//!
//! For one Q² group every bin carries a kinematic matrix `K` (rows: momentum ×
//! ratio, columns: the two form factors). With `K = U S Vᵀ` (economy form) the
//! decomposition matrix is
//!
//! ```text
//! D = (V S⁺ Uᵀ)ᵀ = U S⁺ Vᵀ        shape [rows, 2]
//! ```
//!
//! so contracting column `j` of `D` with the observed ratios gives the
//! least-squares, minimum-norm estimate of form factor `j`. `S⁺` drops singular
//! values below `RCOND * s_max`, so rank-deficient systems still produce a
//! result; [`SvdDiagnostics`] reports how trustworthy it is.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{LqcdError, Result};

/// Relative cutoff of the pseudo-inverse.
pub const RCOND: f64 = 1e-15;
/// Condition numbers above this are flagged as low confidence.
pub const MAX_CONDITION: f64 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SvdDiagnostics {
    /// Number of singular values kept by the pseudo-inverse.
    pub rank: usize,
    /// `s_max / s_min`; infinite when a singular value vanishes.
    pub condition_number: f64,
    /// Fewer rows than form factors.
    pub underdetermined: bool,
}

impl SvdDiagnostics {
    pub fn low_confidence(&self) -> bool {
        self.underdetermined || self.rank < 2 || !(self.condition_number <= MAX_CONDITION)
    }

    /// Worst-case combination over bins.
    fn worst(self, other: Self) -> Self {
        Self {
            rank: self.rank.min(other.rank),
            condition_number: self.condition_number.max(other.condition_number),
            underdetermined: self.underdetermined || other.underdetermined,
        }
    }
}

/// Per-bin decomposition matrices of one Q² group.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    /// `[rows, 2]` per bin.
    pub matrices: Vec<DMatrix<f64>>,
    /// Worst case over all bins.
    pub diagnostics: SvdDiagnostics,
}

/// `D = (V S⁺ Uᵀ)ᵀ` of one kinematic matrix.
pub fn decomposition_matrix(kinematic: &DMatrix<f64>) -> Result<(DMatrix<f64>, SvdDiagnostics)> {
    let (rows, cols) = kinematic.shape();
    if rows == 0 || cols == 0 {
        return Err(LqcdError::NumericalDegeneracy("empty kinematic matrix".into()));
    }
    if kinematic.iter().any(|v| !v.is_finite()) {
        return Err(LqcdError::NumericalDegeneracy(
            "kinematic matrix has non-finite entries".into(),
        ));
    }

    let svd = kinematic
        .clone()
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or_else(|| LqcdError::NumericalDegeneracy("SVD did not converge".into()))?;
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(LqcdError::NumericalDegeneracy("SVD factors missing".into()));
    };
    let s = &svd.singular_values;

    let s_max = s.iter().copied().fold(0.0, f64::max);
    let s_min = s.iter().copied().fold(f64::INFINITY, f64::min);
    let cutoff = RCOND * s_max;
    let inv: Vec<f64> = s.iter().map(|&v| if v > cutoff { 1.0 / v } else { 0.0 }).collect();
    let rank = inv.iter().filter(|v| **v != 0.0).count();

    // U diag(S⁺) Vᵀ
    let mut scaled_u = u.clone();
    for (k, factor) in inv.iter().enumerate() {
        for r in 0..scaled_u.nrows() {
            scaled_u[(r, k)] *= factor;
        }
    }
    let decomp = scaled_u * v_t;

    let diagnostics = SvdDiagnostics {
        rank,
        condition_number: if s_min > 0.0 { s_max / s_min } else { f64::INFINITY },
        underdetermined: rows < cols,
    };
    Ok((decomp, diagnostics))
}

/// Decompose every bin of one Q² group in parallel.
pub fn svd_decompose(kinematic: &[DMatrix<f64>]) -> Result<Decomposition> {
    let Some(first) = kinematic.first() else {
        return Err(LqcdError::config("No bins to decompose."));
    };
    let shape = first.shape();
    if let Some(bad) = kinematic.iter().find(|k| k.shape() != shape) {
        return Err(LqcdError::config(format!(
            "Kinematic matrices differ in shape across bins ({shape:?} vs {:?}).",
            bad.shape()
        )));
    }

    let per_bin: Vec<(DMatrix<f64>, SvdDiagnostics)> = kinematic
        .par_iter()
        .map(decomposition_matrix)
        .collect::<Result<Vec<_>>>()?;

    let mut matrices = Vec::with_capacity(per_bin.len());
    let mut diagnostics: Option<SvdDiagnostics> = None;
    for (matrix, diag) in per_bin {
        matrices.push(matrix);
        diagnostics = Some(match diagnostics {
            Some(acc) => acc.worst(diag),
            None => diag,
        });
    }
    let diagnostics = diagnostics.ok_or_else(|| LqcdError::config("No bins to decompose."))?;
    Ok(Decomposition {
        matrices,
        diagnostics,
    })
}

/// Kinematic coefficients mapping the two form factors onto one ratio.
pub trait KinematicFactors {
    /// Coefficients of form factors `(A, B)` for `bin`, momentum index
    /// `momentum` and ratio index `ratio`.
    fn row(&self, bin: usize, momentum: usize, ratio: usize) -> [f64; 2];
}

/// Contracts a decomposition matrix with observed ratios.
pub trait FormFactorCombiner: Sync {
    /// Two form factors of one bin from `D[rows, 2]`, the bin's ratios and the
    /// ratio errors (all indexed by row).
    fn combine(&self, decomp: &DMatrix<f64>, ratios: &[f64], errors: &[f64]) -> [f64; 2];
}

/// `F_j = Σ_r D[r, j] · ratio[r] / err[r]`.
///
/// Pairs with kinematic matrices whose rows were divided by the same errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorWeightedCombiner;

impl FormFactorCombiner for ErrorWeightedCombiner {
    fn combine(&self, decomp: &DMatrix<f64>, ratios: &[f64], errors: &[f64]) -> [f64; 2] {
        let mut out = [0.0; 2];
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = (0..decomp.nrows())
                .map(|r| decomp[(r, j)] * ratios[r] / errors[r])
                .sum();
        }
        out
    }
}

/// Apply `combiner` bin by bin; `ratios` is `[bin, rows]`.
pub fn combine_form_factors(
    decomposition: &Decomposition,
    ratios: &DMatrix<f64>,
    errors: &[f64],
    combiner: &dyn FormFactorCombiner,
) -> Result<Vec<[f64; 2]>> {
    let bin_num = decomposition.matrices.len();
    let rows = decomposition.matrices.first().map_or(0, |m| m.nrows());
    if ratios.nrows() != bin_num || ratios.ncols() != rows || errors.len() != rows {
        return Err(LqcdError::config(format!(
            "Ratios {:?} and {} errors do not match {bin_num} bins x {rows} rows.",
            ratios.shape(),
            errors.len()
        )));
    }
    Ok(decomposition
        .matrices
        .par_iter()
        .enumerate()
        .map(|(b, d)| {
            let row: Vec<f64> = ratios.row(b).iter().copied().collect();
            combiner.combine(d, &row, errors)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decomposition_is_transposed_pseudo_inverse() {
        let k = DMatrix::from_row_slice(4, 2, &[1.0, 0.5, 0.2, 1.0, 2.0, -0.3, 0.7, 0.7]);
        let (d, diag) = decomposition_matrix(&k).unwrap();
        assert_eq!(d.shape(), (4, 2));
        assert_eq!(diag.rank, 2);
        assert!(!diag.low_confidence());
        // Dᵀ K = I for full column rank.
        let identity = d.transpose() * &k;
        assert_relative_eq!(identity, DMatrix::identity(2, 2), epsilon = 1e-12);
    }

    #[test]
    fn recovers_form_factors_from_weighted_system() {
        let bins: Vec<(f64, f64)> = vec![(0.9, 2.1), (1.0, 2.0), (1.1, 1.9)];
        let raw = DMatrix::from_row_slice(5, 2, &[1.0, 0.1, 0.3, 1.2, 0.8, -0.4, 0.0, 1.0, 1.5, 0.5]);
        let errors = [0.1, 0.2, 0.05, 0.3, 0.15];
        let weighted = DMatrix::from_fn(5, 2, |r, c| raw[(r, c)] / errors[r]);

        let decomposition = svd_decompose(&vec![weighted; bins.len()]).unwrap();
        let ratios = DMatrix::from_fn(bins.len(), 5, |b, r| raw[(r, 0)] * bins[b].0 + raw[(r, 1)] * bins[b].1);
        let ff = combine_form_factors(&decomposition, &ratios, &errors, &ErrorWeightedCombiner).unwrap();
        for (b, (a, bb)) in bins.iter().enumerate() {
            assert_relative_eq!(ff[b][0], *a, epsilon = 1e-10);
            assert_relative_eq!(ff[b][1], *bb, epsilon = 1e-10);
        }
    }

    #[test]
    fn single_row_is_flagged_underdetermined() {
        let k = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let (d, diag) = decomposition_matrix(&k).unwrap();
        assert!(diag.underdetermined);
        assert_eq!(diag.rank, 1);
        assert!(diag.low_confidence());
        // Minimum-norm solution of a + 2b = 5 is (1, 2).
        assert_relative_eq!(d[(0, 0)] * 5.0, 1.0, epsilon = 1e-12);
        assert_relative_eq!(d[(0, 1)] * 5.0, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn rank_deficient_matrix_is_not_fatal() {
        let k = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, -1.0, -2.0]);
        let decomposition = svd_decompose(&[k]).unwrap();
        assert_eq!(decomposition.diagnostics.rank, 1);
        assert!(decomposition.diagnostics.condition_number > MAX_CONDITION);
        assert!(decomposition.diagnostics.low_confidence());
    }

    #[test]
    fn non_finite_input_is_numerical_degeneracy() {
        let k = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, 0.0, 1.0]);
        assert!(matches!(
            decomposition_matrix(&k),
            Err(LqcdError::NumericalDegeneracy(_))
        ));
    }
}
