//! Static assignment of configurations and jackknife bins to workers.

use std::ops::Range;

use serde::Serialize;

use crate::error::{LqcdError, Result};

/// Worker `r` owns configurations `[r*n, (r+1)*n)` with
/// `n = config_num / worker_num`, and every global bin whose first
/// configuration it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinPartition {
    config_num: usize,
    bin_size: usize,
    worker_num: usize,
    bins: Vec<Vec<usize>>,
}

impl BinPartition {
    pub fn new(config_num: usize, bin_size: usize, worker_num: usize) -> Result<Self> {
        if bin_size == 0 || worker_num == 0 {
            return Err(LqcdError::config("Bin size and worker count must be > 0."));
        }
        if config_num % bin_size != 0 {
            return Err(LqcdError::config(format!(
                "Number of configurations {config_num} not evenly divided by bin size {bin_size}."
            )));
        }
        if config_num % worker_num != 0 {
            return Err(LqcdError::config(format!(
                "Number of configurations {config_num} not evenly divided by number of workers {worker_num}."
            )));
        }
        let per_worker = config_num / worker_num;
        let bins = (0..worker_num)
            .map(|r| {
                (r * per_worker..(r + 1) * per_worker)
                    .filter(|c| c % bin_size == 0)
                    .map(|c| c / bin_size)
                    .collect()
            })
            .collect();
        Ok(Self {
            config_num,
            bin_size,
            worker_num,
            bins,
        })
    }

    pub fn config_num(&self) -> usize {
        self.config_num
    }

    pub fn bin_size(&self) -> usize {
        self.bin_size
    }

    pub fn worker_num(&self) -> usize {
        self.worker_num
    }

    pub fn bin_num(&self) -> usize {
        self.config_num / self.bin_size
    }

    /// Configurations held by worker `rank`.
    pub fn config_range(&self, rank: usize) -> Range<usize> {
        let per_worker = self.config_num / self.worker_num;
        rank * per_worker..(rank + 1) * per_worker
    }

    /// Global bins resampled by worker `rank`, ascending.
    pub fn bins(&self, rank: usize) -> &[usize] {
        self.bins.get(rank).map_or(&[][..], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_follow_their_first_configuration() {
        let p = BinPartition::new(12, 3, 4).unwrap();
        assert_eq!(p.bin_num(), 4);
        assert_eq!(p.bins(0), &[0]);
        assert_eq!(p.bins(1), &[1]);
        assert_eq!(p.bins(2), &[2]);
        assert_eq!(p.bins(3), &[3]);
        assert_eq!(p.config_range(2), 6..9);

        let p = BinPartition::new(12, 2, 2).unwrap();
        assert_eq!(p.bins(0), &[0, 1, 2]);
        assert_eq!(p.bins(1), &[3, 4, 5]);
    }

    #[test]
    fn straddling_bins_belong_to_their_first_worker() {
        // 20 configs, 4 workers of 5, bins of 4 -> first configs 0,4,8,12,16
        let p = BinPartition::new(20, 4, 4).unwrap();
        assert_eq!(p.bins(0), &[0, 1]);
        assert_eq!(p.bins(1), &[2]);
        assert_eq!(p.bins(3), &[4]);
        let total: usize = (0..4).map(|r| p.bins(r).len()).sum();
        assert_eq!(total, p.bin_num());
    }

    #[test]
    fn rejects_indivisible_partitions() {
        assert!(matches!(BinPartition::new(10, 3, 2), Err(LqcdError::Configuration(_))));
        assert!(matches!(BinPartition::new(10, 2, 3), Err(LqcdError::Configuration(_))));
        assert!(BinPartition::new(10, 0, 1).is_err());
    }
}
