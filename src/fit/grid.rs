//! Candidate fit-start grids and dense abscissae for fitted curves.

use crate::error::{LqcdError, Result};

/// Default plateau-fit starts for windows ending at `range_end`.
///
/// Long windows start later (`10..range_end-10`); short ones use
/// `7..range_end-5`. May be empty for very short ranges.
pub fn default_meff_starts(range_end: usize) -> Vec<usize> {
    if range_end > 25 {
        (10..range_end - 10).collect()
    } else {
        (7..range_end.saturating_sub(5)).collect()
    }
}

/// Default exponential-fit starts: `1..5`.
pub fn default_twop_starts() -> Vec<usize> {
    (1..5).collect()
}

/// `steps` evenly spaced points from `start` to `end` (inclusive).
pub fn linspace(start: f64, end: f64, steps: usize) -> Result<Vec<f64>> {
    if !(start.is_finite() && end.is_finite()) {
        return Err(LqcdError::config(format!(
            "Invalid curve range: start={start}, end={end}."
        )));
    }
    if steps < 2 {
        return Err(LqcdError::config("Curve needs at least 2 points."));
    }
    let step = (end - start) / (steps as f64 - 1.0);
    let mut out: Vec<f64> = (0..steps).map(|i| start + step * i as f64).collect();
    out[steps - 1] = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meff_starts_depend_on_range_end() {
        assert_eq!(default_meff_starts(15), vec![7, 8, 9]);
        assert_eq!(default_meff_starts(25), (7..20).collect::<Vec<_>>());
        assert_eq!(default_meff_starts(30), (10..20).collect::<Vec<_>>());
        assert!(default_meff_starts(10).is_empty());
        assert!(default_meff_starts(3).is_empty());
    }

    #[test]
    fn linspace_includes_endpoints() {
        let v = linspace(2.0, 12.0, 100).unwrap();
        assert_eq!(v.len(), 100);
        assert!((v[0] - 2.0).abs() < 1e-12);
        assert_eq!(v[99], 12.0);
        assert!(linspace(0.0, 1.0, 1).is_err());
    }
}
