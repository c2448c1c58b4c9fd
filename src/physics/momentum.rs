//! Momentum and Q² bookkeeping.

use serde::Serialize;

use crate::error::{LqcdError, Result};

/// Momenta grouped by equal `Q² = px² + py² + pz²` (lattice units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QsqGroups {
    qsq: Vec<i64>,
    /// Inclusive `(start, end)` momentum indices of each group.
    ranges: Vec<(usize, usize)>,
}

impl QsqGroups {
    /// Group momenta that are already sorted by non-decreasing `Q²`.
    pub fn from_momenta(momenta: &[[i64; 3]]) -> Result<Self> {
        if momenta.is_empty() {
            return Err(LqcdError::config("No momenta to group."));
        }
        let mut qsq: Vec<i64> = Vec::new();
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for (i, p) in momenta.iter().enumerate() {
            let q2 = p.iter().map(|c| c * c).sum::<i64>();
            match qsq.last() {
                Some(&prev) if q2 == prev => {
                    if let Some(range) = ranges.last_mut() {
                        range.1 = i;
                    }
                }
                Some(&prev) if q2 < prev => {
                    return Err(LqcdError::config(format!(
                        "Momentum {i} {p:?} has Q²={q2} below previous Q²={prev}; momenta must be ordered."
                    )));
                }
                _ => {
                    qsq.push(q2);
                    ranges.push((i, i));
                }
            }
        }
        Ok(Self { qsq, ranges })
    }

    pub fn len(&self) -> usize {
        self.qsq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qsq.is_empty()
    }

    pub fn qsq(&self) -> &[i64] {
        &self.qsq
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    /// Total number of momenta covered by the groups.
    pub fn momentum_num(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.1 + 1)
    }

    /// Number of momenta in group `g`, `None` past the last group.
    pub fn group_size(&self, g: usize) -> Option<usize> {
        self.ranges.get(g).map(|&(start, end)| end - start + 1)
    }
}

/// Integer momenta with components in `-2..=2` and `Q² <= max_qsq`, ordered by
/// `Q²` and then lexicographically.
pub fn momentum_list(max_qsq: i64) -> Vec<[i64; 3]> {
    let mut out: Vec<[i64; 3]> = Vec::new();
    for px in -2..=2i64 {
        for py in -2..=2i64 {
            for pz in -2..=2i64 {
                if px * px + py * py + pz * pz <= max_qsq {
                    out.push([px, py, pz]);
                }
            }
        }
    }
    out.sort_by_key(|p| (p.iter().map(|c| c * c).sum::<i64>(), *p));
    out
}
