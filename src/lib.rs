//! Model coupling: systems declare variables, groups promote and connect
//! them, and a `Problem` resolves the tree so values can be read and
//! written by promoted or absolute name, with units and source indices.

pub mod component;
pub mod config;
pub mod error;
pub mod expr;
pub mod group;
pub mod indices;
pub mod jacobian;
pub mod model;
pub mod names;
pub mod output;
pub mod problem;
pub mod recorder;
pub mod solver;
pub mod stats;
pub mod transfer;
pub mod units;
pub mod vector;

pub use component::{Component, ExecComp, IndepVarComp, Io, VarMeta};
pub use error::{CouplerError, Result};
pub use group::{Group, InputDefaults, PromoteKind, Promotes};
pub use indices::SrcIndices;
pub use problem::{GetOpts, Problem, SetOpts};
pub use recorder::{CaseReader, RecordingOptions, SqliteRecorder};
pub use solver::nonlinear::NonlinearSolver;
pub use vector::Value;
