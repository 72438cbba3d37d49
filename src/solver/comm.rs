//! Communication backend abstraction for distributed models.
//!
//! Provides a trait for cross-rank coordination (reductions, sub-communicator
//! splits) and a no-op single-process implementation.

/// Abstraction over inter-process communication.
///
/// Implementations: `SingleProcessComm` (no-op), `LocalComm` (threads, see
/// `comm_local`), `MpiComm` (via mpi crate).
///
/// Every method is collective: all ranks of the communicator must call it in
/// the same order.
pub trait CommunicationBackend {
    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> f64;

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> f64;

    /// This process's rank within the communicator.
    fn rank(&self) -> usize;

    /// Total number of ranks in the communicator.
    fn num_ranks(&self) -> usize;

    /// Element-wise sum of a vector across all ranks, in place.
    ///
    /// Each rank contributes its local values (zeros for values it does not
    /// own). After the call, every rank holds the global sum.
    fn all_reduce_sum_vec(&self, local: &mut [f64]);

    /// Synchronization barrier.
    fn barrier(&self);

    /// Split off a sub-communicator holding the ranks that pass
    /// `member = true`. Non-members get `None`. Rank order is preserved.
    fn split(&self, member: bool) -> Option<Box<dyn CommunicationBackend>>;
}

/// Give every rank `root`'s copy of `data`.
pub fn broadcast_from(comm: &dyn CommunicationBackend, root: usize, data: &mut [f64]) {
    if comm.num_ranks() == 1 {
        return;
    }
    if comm.rank() != root {
        data.iter_mut().for_each(|v| *v = 0.0);
    }
    comm.all_reduce_sum_vec(data);
}

/// No-op communication backend for single-process execution.
pub struct SingleProcessComm;

impl CommunicationBackend for SingleProcessComm {
    fn all_reduce_sum(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_max(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_sum_vec(&self, _local: &mut [f64]) {
        // Single process: vector is already complete.
    }

    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn split(&self, member: bool) -> Option<Box<dyn CommunicationBackend>> {
        member.then(|| Box::new(SingleProcessComm) as Box<dyn CommunicationBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_all_reduce_sum() {
        let comm = SingleProcessComm;
        assert_eq!(comm.all_reduce_sum(42.0), 42.0);
        assert_eq!(comm.all_reduce_sum(-1.5), -1.5);
    }

    #[test]
    fn single_process_all_reduce_max() {
        let comm = SingleProcessComm;
        assert_eq!(comm.all_reduce_max(42.0), 42.0);
    }

    #[test]
    fn single_process_rank_and_size() {
        let comm = SingleProcessComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.num_ranks(), 1);
    }

    #[test]
    fn single_process_split() {
        let comm = SingleProcessComm;
        assert!(comm.split(false).is_none());
        let sub = comm.split(true).unwrap();
        assert_eq!(sub.num_ranks(), 1);
    }

    #[test]
    fn broadcast_on_one_rank_keeps_data() {
        let mut data = vec![1.0, 2.0];
        broadcast_from(&SingleProcessComm, 0, &mut data);
        assert_eq!(data, vec![1.0, 2.0]);
    }
}
