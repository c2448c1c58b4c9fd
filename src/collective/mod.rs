//! Worker partitioning and collective exchanges.
//!
//! Workers never share mutable state; they meet only at explicit collective
//! calls with a fixed participant set. Rank 0 is the coordinator.

pub mod partition;
pub mod world;

pub use partition::*;
pub use world::*;

use nalgebra::DMatrix;

use crate::domain::{CorrelatorSample, JackknifeBinSet};
use crate::error::{LqcdError, Result};
use crate::resample::jackknife_bin_subset;

/// Stack row blocks in order; all blocks must have the same column count.
pub fn concat_rows(parts: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
    let Some(first) = parts.first() else {
        return Err(LqcdError::Collective("nothing to concatenate".into()));
    };
    let cols = first.ncols();
    if let Some(bad) = parts.iter().find(|p| p.ncols() != cols) {
        return Err(LqcdError::Collective(format!(
            "row blocks have {} and {cols} columns",
            bad.ncols()
        )));
    }
    let rows: usize = parts.iter().map(|p| p.nrows()).sum();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for part in parts {
        out.rows_mut(offset, part.nrows()).copy_from(part);
        offset += part.nrows();
    }
    Ok(out)
}

/// Jackknife an ensemble whose configurations are spread over workers.
///
/// `local` holds this worker's configurations (`partition.config_range`).
/// Raw rows are all-gathered first so bins that straddle a worker boundary use
/// the same boundaries everywhere; each worker then resamples only its own
/// bins and the bins are all-gathered in global order.
pub fn distributed_jackknife<C: Collective + ?Sized>(
    local: &CorrelatorSample,
    partition: &BinPartition,
    comm: &C,
) -> Result<JackknifeBinSet> {
    if comm.size() != partition.worker_num() {
        return Err(LqcdError::config(format!(
            "Partition is for {} workers, collective has {}.",
            partition.worker_num(),
            comm.size()
        )));
    }
    let expected = partition.config_range(comm.rank()).len();
    if local.config_num() != expected {
        return Err(LqcdError::config(format!(
            "Worker {} holds {} configurations, partition assigns {expected}.",
            comm.rank(),
            local.config_num()
        )));
    }

    let all = comm.all_gather_rows(local.values())?;
    let full = CorrelatorSample::new(all, local.momentum_num(), local.time_extent())?;
    let mine = jackknife_bin_subset(&full, partition.bin_size(), partition.bins(comm.rank()))?;
    let bins = comm.all_gather_rows(mine.values())?;
    Ok(JackknifeBinSet {
        values: bins,
        momentum_num: local.momentum_num(),
        time_extent: local.time_extent(),
        bin_size: partition.bin_size(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::jackknife;

    #[test]
    fn concat_rows_stacks_in_order() {
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let b = DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let out = concat_rows(&[a, b]).unwrap();
        assert_eq!(out, DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert!(concat_rows(&[]).is_err());
        assert!(concat_rows(&[DMatrix::zeros(1, 2), DMatrix::zeros(1, 3)]).is_err());
    }

    #[test]
    fn distributed_jackknife_matches_single_process() {
        let values = DMatrix::from_fn(20, 4, |r, c| ((r * 5 + c * 7) % 13) as f64 * 0.1 + c as f64);
        let sample = CorrelatorSample::from_time_series(values.clone()).unwrap();
        let expected = jackknife(&sample, 4).unwrap();

        // 20 configs over 4 workers, bin size 4: bins straddle worker boundaries.
        let partition = BinPartition::new(20, 4, 4).unwrap();
        let results: Vec<JackknifeBinSet> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadWorld::new(4)
                .into_iter()
                .map(|member| {
                    let partition = &partition;
                    let values = &values;
                    scope.spawn(move || {
                        let range = partition.config_range(member.rank());
                        let local = CorrelatorSample::from_time_series(
                            values.rows(range.start, range.len()).into_owned(),
                        )
                        .unwrap();
                        distributed_jackknife(&local, partition, &member).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result.values(), expected.values());
        }
    }

    #[test]
    fn single_process_is_a_trivial_world() {
        let sample = CorrelatorSample::from_time_series(DMatrix::from_fn(6, 2, |r, c| (r + c) as f64)).unwrap();
        let partition = BinPartition::new(6, 2, 1).unwrap();
        let jk = distributed_jackknife(&sample, &partition, &SingleProcess).unwrap();
        assert_eq!(jk.values(), jackknife(&sample, 2).unwrap().values());
    }
}
