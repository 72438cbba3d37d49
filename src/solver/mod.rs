//! Model execution: communicators and nonlinear solvers.

pub mod comm;
pub mod comm_local;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod nonlinear;
