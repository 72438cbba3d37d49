//! MPI communication backend for distributed models.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! Implements `CommunicationBackend` using `mpi::traits::*`.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```

use super::comm::CommunicationBackend;
use mpi::collective::SystemOperation;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;

/// MPI-based communication backend.
///
/// Wraps the world communicator or a communicator split from it.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap the world communicator.
    ///
    /// Panics if MPI has not been initialized via `mpi::initialize()`.
    pub fn new() -> Self {
        Self {
            comm: SimpleCommunicator::world(),
        }
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationBackend for MpiComm {
    fn all_reduce_sum(&self, local: f64) -> f64 {
        let mut global = 0.0f64;
        self.comm
            .all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    fn all_reduce_max(&self, local: f64) -> f64 {
        let mut global = 0.0f64;
        self.comm
            .all_reduce_into(&local, &mut global, SystemOperation::max());
        global
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) {
        let send = local.to_vec();
        self.comm
            .all_reduce_into(&send[..], local, SystemOperation::sum());
    }

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        self.comm.size() as usize
    }

    fn barrier(&self) {
        self.comm.barrier();
    }

    fn split(&self, member: bool) -> Option<Box<dyn CommunicationBackend>> {
        let color = if member {
            Color::with_value(1)
        } else {
            Color::undefined()
        };
        self.comm
            .split_by_color(color)
            .map(|comm| Box::new(MpiComm { comm }) as Box<dyn CommunicationBackend>)
    }
}
