//! Partition communication.
//!
//! Every partition of a decomposed mesh owns one [`Communicator`]. Reductions are
//! collective: all ranks must call them in the same order, otherwise the run
//! deadlocks. Halo exchange is pairwise and matched in posting order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("rank {rank}: neighbour rank {neighbour} is outside a universe of {size}")]
    NoSuchRank {
        rank: usize,
        neighbour: usize,
        size: usize,
    },
    #[error("halo exchange with rank {0} disconnected")]
    Disconnected(usize),
    #[error("serial run has no neighbour rank {0} to exchange with")]
    Serial(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    pub fn identity(self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocking all-reduce of a single value.
    fn reduce(&self, value: f64, op: ReduceOp) -> f64;

    /// Post values to a neighbouring rank. Never blocks.
    fn send(&self, neighbour: usize, values: &[f64]) -> Result<(), CommError>;

    /// Receive the next message posted by `neighbour` to this rank.
    fn receive(&self, neighbour: usize) -> Result<Vec<f64>, CommError>;

    fn exchange(&self, neighbour: usize, values: &[f64]) -> Result<Vec<f64>, CommError> {
        self.send(neighbour, values)?;
        self.receive(neighbour)
    }

    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    fn is_parallel(&self) -> bool {
        self.size() > 1
    }
}

/// Single-partition communicator: reductions are the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn reduce(&self, value: f64, _op: ReduceOp) -> f64 {
        value
    }

    fn send(&self, neighbour: usize, _values: &[f64]) -> Result<(), CommError> {
        Err(CommError::Serial(neighbour))
    }

    fn receive(&self, neighbour: usize) -> Result<Vec<f64>, CommError> {
        Err(CommError::Serial(neighbour))
    }
}

struct ReductionSlots {
    barrier: Barrier,
    values: Mutex<Vec<f64>>,
}

/// In-process communicator, one per thread.
///
/// Reductions go through a shared slot table guarded by a barrier; halo
/// messages travel over one unbounded channel per ordered rank pair.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    slots: Arc<ReductionSlots>,
    outboxes: Vec<Sender<Vec<f64>>>,
    inboxes: Vec<Mutex<Receiver<Vec<f64>>>>,
}

impl ThreadComm {
    /// Build a universe of `size` connected communicators, indexed by rank.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let slots = Arc::new(ReductionSlots {
            barrier: Barrier::new(size),
            values: Mutex::new(vec![0.0; size]),
        });

        // channels[src][dst]
        let mut senders: Vec<Vec<Sender<Vec<f64>>>> = Vec::with_capacity(size);
        let mut receivers: Vec<Vec<Option<Receiver<Vec<f64>>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for src in 0..size {
            let mut row = Vec::with_capacity(size);
            for dst in 0..size {
                let (tx, rx) = mpsc::channel();
                row.push(tx);
                receivers[dst][src] = Some(rx);
            }
            senders.push(row);
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| ThreadComm {
                rank,
                size,
                slots: Arc::clone(&slots),
                outboxes,
                inboxes: inboxes
                    .into_iter()
                    .flatten()
                    .map(Mutex::new)
                    .collect(),
            })
            .collect()
    }

    fn check_rank(&self, neighbour: usize) -> Result<(), CommError> {
        if neighbour >= self.size {
            return Err(CommError::NoSuchRank {
                rank: self.rank,
                neighbour,
                size: self.size,
            });
        }
        Ok(())
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reduce(&self, value: f64, op: ReduceOp) -> f64 {
        {
            let mut values = self
                .slots
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            values[self.rank] = value;
        }
        self.slots.barrier.wait();
        let result = {
            let values = self
                .slots
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            values.iter().fold(op.identity(), |acc, &v| op.apply(acc, v))
        };
        // Nobody may overwrite a slot before every rank has read the table.
        self.slots.barrier.wait();
        result
    }

    fn send(&self, neighbour: usize, values: &[f64]) -> Result<(), CommError> {
        self.check_rank(neighbour)?;
        self.outboxes[neighbour]
            .send(values.to_vec())
            .map_err(|_| CommError::Disconnected(neighbour))
    }

    fn receive(&self, neighbour: usize) -> Result<Vec<f64>, CommError> {
        self.check_rank(neighbour)?;
        let inbox = self.inboxes[neighbour]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inbox.recv().map_err(|_| CommError::Disconnected(neighbour))
    }
}
