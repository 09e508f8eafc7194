//! Message passing between the ranks of a decomposed run.
//!
//! Each rank runs on its own thread. Point-to-point messages travel over channels and are
//! matched by source and tag; reductions rendezvous on a shared barrier, so every rank must
//! perform the same sequence of reductions.

mod decompose;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex, PoisonError};

pub use decompose::{decompose, reconstruct, SubDomain};

use crate::{Float, FvError, FvResult};

struct Message {
    source: usize,
    tag: usize,
    data: Vec<Float>,
}

struct Reducer {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<Float>>>,
}

struct RankComm {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receiver: Mutex<Receiver<Message>>,
    pending: Mutex<HashMap<(usize, usize), VecDeque<Vec<Float>>>>,
    reducer: Arc<Reducer>,
    n_reductions: AtomicUsize,
}

/// Communicator of one rank; the default is a serial run with a single rank.
#[derive(Clone, Default)]
pub struct Comm {
    inner: Option<Arc<RankComm>>,
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl Comm {
    pub fn serial() -> Self {
        Self::default()
    }

    /// Communicators for `n_ranks` ranks sharing one world.
    pub fn world(n_ranks: usize) -> Vec<Self> {
        let reducer = Arc::new(Reducer {
            barrier: Barrier::new(n_ranks),
            slots: Mutex::new(vec![Vec::new(); n_ranks]),
        });
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..n_ranks).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                inner: Some(Arc::new(RankComm {
                    rank,
                    senders: senders.clone(),
                    receiver: Mutex::new(receiver),
                    pending: Mutex::new(HashMap::new()),
                    reducer: reducer.clone(),
                    n_reductions: AtomicUsize::new(0),
                })),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.rank)
    }

    pub fn size(&self) -> usize {
        self.inner.as_ref().map_or(1, |inner| inner.senders.len())
    }

    pub fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    pub fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Number of reductions this rank has taken part in.
    pub fn n_reductions(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.n_reductions.load(Ordering::Relaxed))
    }

    /// Non-blocking send.
    pub fn send(&self, dest: usize, tag: usize, data: Vec<Float>) -> FvResult<()> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| FvError::Parallel("send on a serial communicator".to_owned()))?;
        let sender = inner
            .senders
            .get(dest)
            .ok_or_else(|| FvError::Parallel(format!("no rank {dest}")))?;
        sender
            .send(Message {
                source: inner.rank,
                tag,
                data,
            })
            .map_err(|_| FvError::Parallel(format!("rank {dest} has hung up")))
    }

    /// Blocks until the next message from `source` with `tag` arrives.
    pub fn receive(&self, source: usize, tag: usize) -> FvResult<Vec<Float>> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| FvError::Parallel("receive on a serial communicator".to_owned()))?;
        let key = (source, tag);
        if let Some(data) = inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Ok(data);
        }
        let receiver = inner.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let message = receiver
                .recv()
                .map_err(|_| FvError::Parallel(format!("rank {source} has hung up")))?;
            if (message.source, message.tag) == key {
                return Ok(message.data);
            }
            inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry((message.source, message.tag))
                .or_default()
                .push_back(message.data);
        }
    }

    fn reduce(&self, values: &[Float], op: ReduceOp) -> Vec<Float> {
        let Some(inner) = self.inner.as_ref() else {
            return values.to_vec();
        };
        inner.n_reductions.fetch_add(1, Ordering::Relaxed);
        let reducer = &inner.reducer;
        reducer
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[inner.rank] = values.to_vec();
        reducer.barrier.wait();
        let result = {
            let slots = reducer.slots.lock().unwrap_or_else(PoisonError::into_inner);
            (0..values.len())
                .map(|i| {
                    let items = slots.iter().map(|slot| slot[i]);
                    match op {
                        ReduceOp::Sum => items.sum(),
                        ReduceOp::Max => items.fold(Float::NEG_INFINITY, Float::max),
                        ReduceOp::Min => items.fold(Float::INFINITY, Float::min),
                    }
                })
                .collect()
        };
        // Nobody may overwrite a slot before everyone has read it.
        reducer.barrier.wait();
        result
    }

    pub fn sum(&self, value: Float) -> Float {
        self.reduce(&[value], ReduceOp::Sum)[0]
    }

    pub fn sum_many(&self, values: &[Float]) -> Vec<Float> {
        self.reduce(values, ReduceOp::Sum)
    }

    pub fn max(&self, value: Float) -> Float {
        self.reduce(&[value], ReduceOp::Max)[0]
    }

    pub fn min(&self, value: Float) -> Float {
        self.reduce(&[value], ReduceOp::Min)[0]
    }

    pub fn sum_usize(&self, value: usize) -> usize {
        self.sum(value as Float).round() as usize
    }

    pub fn any(&self, value: bool) -> bool {
        self.max(if value { 1. } else { 0. }) > 0.5
    }
}

/// Runs `f` on `n_ranks` threads, each with its own communicator, and collects the results in
/// rank order. A panic on any rank is propagated.
pub fn run_parallel<R, F>(n_ranks: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Comm) -> R + Sync,
{
    let comms = Comm::world(n_ranks);
    std::thread::scope(|scope| {
        let handles = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial() {
        let comm = Comm::serial();
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.sum(3.), 3.);
        assert!(comm.send(0, 0, vec![]).is_err());
    }

    #[test]
    fn test_reductions() {
        let results = run_parallel(3, |comm| {
            let rank = comm.rank() as Float;
            (
                comm.sum(rank),
                comm.max(rank),
                comm.min(rank),
                comm.sum_many(&[1., rank]),
                comm.n_reductions(),
            )
        });
        for (sum, max, min, many, n_reductions) in results {
            assert_eq!(sum, 3.);
            assert_eq!(max, 2.);
            assert_eq!(min, 0.);
            assert_eq!(many, vec![3., 3.]);
            assert_eq!(n_reductions, 4);
        }
    }

    #[test]
    fn test_out_of_order_messages() {
        let results = run_parallel(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 7, vec![7.]).unwrap();
                comm.send(1, 3, vec![3.]).unwrap();
                Vec::new()
            } else {
                let three = comm.receive(0, 3).unwrap();
                let seven = comm.receive(0, 7).unwrap();
                [three, seven].concat()
            }
        });
        assert_eq!(results[1], vec![3., 7.]);
    }
}
