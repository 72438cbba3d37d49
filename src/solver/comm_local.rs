//! In-process communicator: one thread per rank.
//!
//! `LocalCluster::run` spawns `n` threads, hands each a `LocalComm`, and
//! collects their results. Collectives meet at a generation counter guarded
//! by a `parking_lot` mutex/condvar pair. Lets multi-rank models run in ordinary tests
//! without an MPI launcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::comm::CommunicationBackend;

const ABORT_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Round {
    accum: Vec<f64>,
    arrived: usize,
    generation: u64,
    result: Vec<f64>,
}

struct Shared {
    size: usize,
    round: Mutex<Round>,
    ready: Condvar,
    /// Sub-communicators keyed by (split sequence number, member ranks),
    /// with the number of members that have not picked theirs up yet.
    splits: Mutex<HashMap<(u64, Vec<usize>), (Arc<Shared>, usize)>>,
    /// Set when any rank of the cluster panics so peers stop waiting.
    aborted: Arc<AtomicBool>,
}

impl Shared {
    fn new(size: usize, aborted: Arc<AtomicBool>) -> Self {
        Self {
            size,
            round: Mutex::new(Round::default()),
            ready: Condvar::new(),
            splits: Mutex::new(HashMap::new()),
            aborted,
        }
    }
}

/// One rank's handle on a thread cluster.
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
    split_seq: AtomicU64,
}

impl LocalComm {
    fn new(shared: Arc<Shared>, rank: usize) -> Self {
        Self {
            shared,
            rank,
            split_seq: AtomicU64::new(0),
        }
    }

    /// Combine `local` with every other rank's contribution using `op`.
    fn reduce(&self, local: &mut [f64], op: fn(f64, f64) -> f64) {
        let shared = &self.shared;
        let mut round = shared.round.lock();
        if round.arrived == 0 {
            round.accum = local.to_vec();
        } else {
            if round.accum.len() < local.len() {
                round.accum.resize(local.len(), 0.0);
            }
            for (a, v) in round.accum.iter_mut().zip(local.iter()) {
                *a = op(*a, *v);
            }
        }
        round.arrived += 1;

        if round.arrived == shared.size {
            round.result = std::mem::take(&mut round.accum);
            round.arrived = 0;
            round.generation += 1;
            shared.ready.notify_all();
        } else {
            let generation = round.generation;
            while round.generation == generation {
                if shared.aborted.load(Ordering::SeqCst) {
                    drop(round);
                    panic!("rank {}: a peer rank panicked during a collective", self.rank);
                }
                shared.ready.wait_for(&mut round, ABORT_POLL);
            }
        }

        for (dst, src) in local.iter_mut().zip(round.result.iter()) {
            *dst = *src;
        }
    }
}

impl CommunicationBackend for LocalComm {
    fn all_reduce_sum(&self, local: f64) -> f64 {
        let mut buf = [local];
        self.reduce(&mut buf, |a, b| a + b);
        buf[0]
    }

    fn all_reduce_max(&self, local: f64) -> f64 {
        let mut buf = [local];
        self.reduce(&mut buf, f64::max);
        buf[0]
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) {
        self.reduce(local, |a, b| a + b);
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.reduce(&mut [], |a, _| a);
    }

    fn split(&self, member: bool) -> Option<Box<dyn CommunicationBackend>> {
        let mut flags = vec![0.0; self.shared.size];
        if member {
            flags[self.rank] = 1.0;
        }
        self.all_reduce_sum_vec(&mut flags);
        let seq = self.split_seq.fetch_add(1, Ordering::SeqCst);
        if !member {
            return None;
        }

        let members: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, f)| **f > 0.5)
            .map(|(r, _)| r)
            .collect();
        let sub_rank = members.iter().position(|&r| r == self.rank)?;
        let shared = {
            let mut splits = self.shared.splits.lock();
            let key = (seq, members.clone());
            let (shared, pending) = splits.entry(key.clone()).or_insert_with(|| {
                (
                    Arc::new(Shared::new(members.len(), self.shared.aborted.clone())),
                    members.len(),
                )
            });
            let shared = shared.clone();
            *pending -= 1;
            if *pending == 0 {
                splits.remove(&key);
            }
            shared
        };
        Some(Box::new(LocalComm::new(shared, sub_rank)))
    }
}

/// Marks the cluster aborted if its rank unwinds.
struct AbortGuard(Arc<AtomicBool>);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

/// Runs a closure on `n` thread-backed ranks.
pub struct LocalCluster;

impl LocalCluster {
    /// Run `f` once per rank and return the results in rank order. A panic on
    /// any rank is re-raised on the caller after all ranks stop.
    pub fn run<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let aborted = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared::new(n.max(1), aborted.clone()));
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n.max(1))
                .map(|rank| {
                    let comm = LocalComm::new(shared.clone(), rank);
                    let guard = AbortGuard(aborted.clone());
                    let f = &f;
                    scope.spawn(move || {
                        let _guard = guard;
                        f(comm)
                    })
                })
                .collect();
            let results: Vec<std::thread::Result<T>> =
                handles.into_iter().map(|h| h.join()).collect();
            results
                .into_iter()
                .map(|r| r.unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}
