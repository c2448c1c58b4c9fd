//! Collective operations over a fixed set of workers.

use std::sync::{Arc, Barrier, Mutex};

use nalgebra::DMatrix;

use crate::collective::concat_rows;
use crate::error::{LqcdError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receives gathered results and runs post-processing.
    Coordinator,
    Worker,
}

/// Row-wise collective exchanges of `[row, column]` blocks.
///
/// Every member must make the same sequence of calls. A failure on any member
/// is returned as [`LqcdError::Collective`] and is not retried.
pub trait Collective {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn role(&self) -> Role {
        if self.rank() == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }

    /// Every member receives all blocks stacked in rank order.
    fn all_gather_rows(&self, local: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    /// The coordinator receives all blocks stacked in rank order; workers get `None`.
    fn gather_rows(&self, local: &DMatrix<f64>) -> Result<Option<DMatrix<f64>>>;
}

/// One worker that is also the coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_rows(&self, local: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Ok(local.clone())
    }

    fn gather_rows(&self, local: &DMatrix<f64>) -> Result<Option<DMatrix<f64>>> {
        Ok(Some(local.clone()))
    }
}

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Option<DMatrix<f64>>>>,
}

/// In-process world whose members run on separate threads.
#[derive(Debug)]
pub struct ThreadWorld;

impl ThreadWorld {
    /// Create `size` members; hand one to each thread.
    pub fn new(size: usize) -> Vec<ThreadMember> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![None; size]),
        });
        (0..size)
            .map(|rank| ThreadMember {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct ThreadMember {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

fn poisoned<T>(_: T) -> LqcdError {
    LqcdError::Collective("a worker panicked during an exchange".into())
}

impl ThreadMember {
    /// Publish `contribution`, wait for everyone, then read all slots.
    ///
    /// Both barriers are always reached so a failing member never leaves the
    /// others blocked.
    fn exchange<T>(
        &self,
        contribution: Option<DMatrix<f64>>,
        read: impl FnOnce(&[Option<DMatrix<f64>>]) -> Result<T>,
    ) -> Result<T> {
        let written = self
            .shared
            .slots
            .lock()
            .map(|mut slots| slots[self.rank] = contribution)
            .map_err(poisoned);
        self.shared.barrier.wait();
        let out = written.and_then(|()| {
            let slots = self.shared.slots.lock().map_err(poisoned)?;
            read(&slots)
        });
        self.shared.barrier.wait();
        out
    }
}

fn stack_all(slots: &[Option<DMatrix<f64>>]) -> Result<DMatrix<f64>> {
    let parts: Vec<DMatrix<f64>> = slots
        .iter()
        .enumerate()
        .map(|(rank, slot)| {
            slot.clone()
                .ok_or_else(|| LqcdError::Collective(format!("worker {rank} contributed nothing")))
        })
        .collect::<Result<_>>()?;
    concat_rows(&parts)
}

impl Collective for ThreadMember {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_rows(&self, local: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.exchange(Some(local.clone()), stack_all)
    }

    fn gather_rows(&self, local: &DMatrix<f64>) -> Result<Option<DMatrix<f64>>> {
        let coordinator = self.role() == Role::Coordinator;
        self.exchange(Some(local.clone()), |slots| {
            if coordinator { stack_all(slots).map(Some) } else { Ok(None) }
        })
    }
}
