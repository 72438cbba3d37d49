//! Nonlinear solvers: how a group executes its children.
//!
//! `RunOnce` transfers into each child and runs it, in order. The block
//! solvers repeat that sweep until the group's outputs stop changing:
//! Gauss-Seidel transfers right before each child runs, Jacobi transfers
//! everything first and then runs every child.

use std::collections::HashMap;
use std::time::Instant;

use crate::component::{Component, ComponentInputs, ComponentOutputs, Io};
use crate::error::{CouplerError, Result};
use crate::model::Model;
use crate::solver::comm::CommunicationBackend;
use crate::stats::Stats;
use crate::transfer;
use crate::vector::Vectors;

/// Iteration controls for the block solvers.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    pub maxiter: usize,
    pub atol: f64,
    pub rtol: f64,
    /// 0 is silent, 1 logs convergence, 2 logs every iteration.
    pub iprint: u32,
    pub err_on_non_converge: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            maxiter: 10,
            atol: 1e-10,
            rtol: 1e-10,
            iprint: 1,
            err_on_non_converge: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum NonlinearSolver {
    #[default]
    RunOnce,
    BlockGaussSeidel(SolverOptions),
    BlockJacobi(SolverOptions),
}

impl NonlinearSolver {
    pub fn block_gauss_seidel() -> Self {
        NonlinearSolver::BlockGaussSeidel(SolverOptions::default())
    }

    pub fn block_jacobi() -> Self {
        NonlinearSolver::BlockJacobi(SolverOptions::default())
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            NonlinearSolver::RunOnce => "NL: RUNONCE",
            NonlinearSolver::BlockGaussSeidel(_) => "NL: NLBGS",
            NonlinearSolver::BlockJacobi(_) => "NL: NLBJ",
        }
    }
}

/// Everything a model run touches.
pub struct Exec<'a> {
    pub model: &'a Model,
    pub components: &'a [Option<Box<dyn Component>>],
    pub comms: &'a [Option<Box<dyn CommunicationBackend>>],
    pub world: &'a dyn CommunicationBackend,
    pub vectors: &'a mut Vectors,
    pub stats: Option<&'a mut Stats>,
}

impl<'a> Exec<'a> {
    fn rank(&self) -> usize {
        self.world.rank()
    }

    fn comm_for(&self, sys: usize) -> &'a dyn CommunicationBackend {
        transfer::comm_for(self.model, self.comms, self.world, sys)
    }

    /// Run a system if it is local to this rank.
    pub fn run_system(&mut self, sys: usize) -> Result<()> {
        if !self.model.systems[sys].ranks.contains(&self.rank()) {
            return Ok(());
        }
        if self.model.systems[sys].is_group {
            self.run_group(sys)
        } else {
            self.run_component(sys)
        }
    }

    /// Transfer every connection of `group` and below, without running
    /// anything.
    pub fn transfer_all(&mut self, group: usize) {
        if !self.model.systems[group].ranks.contains(&self.rank()) {
            return;
        }
        let model = self.model;
        for k in 0..model.systems[group].transfers.len() {
            self.transfer_child(group, k);
        }
        for &child in &model.systems[group].children {
            if model.systems[child].is_group {
                self.transfer_all(child);
            }
        }
    }

    fn transfer_child(&mut self, group: usize, k: usize) {
        let model = self.model;
        let targets = &model.systems[group].transfers[k];
        if targets.is_empty() {
            return;
        }
        let comm = self.comm_for(group);
        let rank = self.rank();
        let Vectors {
            inputs, outputs, ..
        } = &mut *self.vectors;
        transfer::transfer(
            model,
            inputs,
            outputs,
            comm,
            rank,
            targets,
            self.stats.as_deref_mut(),
        );
    }

    fn run_group(&mut self, group: usize) -> Result<()> {
        let model = self.model;
        match &model.systems[group].solver {
            NonlinearSolver::RunOnce => {
                if model.systems[group].parallel {
                    self.sweep_jacobi(group)
                } else {
                    self.sweep_gauss_seidel(group)
                }
            }
            NonlinearSolver::BlockGaussSeidel(opts) => self.iterate(group, opts, false),
            NonlinearSolver::BlockJacobi(opts) => self.iterate(group, opts, true),
        }
    }

    fn sweep_gauss_seidel(&mut self, group: usize) -> Result<()> {
        let model = self.model;
        let children = &model.systems[group].children;
        for (k, &child) in children.iter().enumerate() {
            self.transfer_child(group, k);
            self.run_system(child)?;
        }
        Ok(())
    }

    fn sweep_jacobi(&mut self, group: usize) -> Result<()> {
        let model = self.model;
        let children = &model.systems[group].children;
        for k in 0..children.len() {
            self.transfer_child(group, k);
        }
        for &child in children {
            self.run_system(child)?;
        }
        Ok(())
    }

    fn iterate(&mut self, group: usize, opts: &SolverOptions, jacobi: bool) -> Result<()> {
        let model = self.model;
        let info = &model.systems[group];
        let comm = self.comm_for(group);
        let rank = self.rank();
        let owned: Vec<usize> = info
            .var_range
            .clone()
            .filter(|&v| model.vars[v].io == Io::Output && model.vars[v].owner == rank)
            .collect();
        let solver_name = info.solver.name();

        let mut norm0 = 1.0;
        for iter in 0..opts.maxiter {
            let _span = tracing::debug_span!("block_iter", system = %info.pathname, iter).entered();
            let before: Vec<f64> = owned
                .iter()
                .flat_map(|&v| self.vectors.outputs[model.vars[v].range()].to_vec())
                .collect();

            if jacobi {
                self.sweep_jacobi(group)?;
            } else {
                self.sweep_gauss_seidel(group)?;
            }

            let after = owned
                .iter()
                .flat_map(|&v| self.vectors.outputs[model.vars[v].range()].iter().copied());
            let local: f64 = before.iter().zip(after).map(|(b, a)| (a - b) * (a - b)).sum();
            let norm = comm.all_reduce_sum(local).sqrt();
            if iter == 0 && norm > 0.0 {
                norm0 = norm;
            }
            if let Some(ref mut s) = self.stats {
                s.solver_iterations += 1;
            }
            if opts.iprint > 1 {
                tracing::info!(system = %info.pathname, solver = solver_name, iter, norm, "iteration");
            }

            if norm < opts.atol || norm / norm0 < opts.rtol {
                if opts.iprint > 0 {
                    tracing::info!(
                        system = %info.pathname,
                        solver = solver_name,
                        iterations = iter + 1,
                        "converged"
                    );
                }
                return Ok(());
            }
        }

        let msg = format!(
            "Solver '{}' on system '{}' failed to converge in {} iterations.",
            solver_name, info.pathname, opts.maxiter
        );
        if opts.err_on_non_converge {
            return Err(CouplerError::Solve(msg));
        }
        tracing::warn!("{}", msg);
        Ok(())
    }

    fn run_component(&mut self, sys: usize) -> Result<()> {
        let components = self.components;
        let Some(comp) = components.get(sys).and_then(|c| c.as_deref()) else {
            return Ok(());
        };
        let t = self.stats.as_ref().map(|_| Instant::now());
        let model = self.model;
        let info = &model.systems[sys];

        let mut ins = HashMap::new();
        let mut outs = HashMap::new();
        for v in info.var_range.clone() {
            let var = &model.vars[v];
            match var.io {
                Io::Input => ins.insert(var.local_name.clone(), self.vectors.inputs[var.range()].to_vec()),
                Io::Output => outs.insert(var.local_name.clone(), self.vectors.outputs[var.range()].to_vec()),
            };
        }
        let inputs = ComponentInputs::new(ins);
        let mut outputs = ComponentOutputs::new(outs);
        comp.compute(&inputs, &mut outputs)
            .map_err(|e| CouplerError::Solve(format!("{}: {}", model.msginfo(sys), e)))?;

        let mut computed = outputs.into_values();
        for v in info.var_range.clone() {
            let var = &model.vars[v];
            if var.io != Io::Output {
                continue;
            }
            if let Some(vals) = computed.remove(&var.local_name) {
                if vals.len() == var.size {
                    self.vectors.outputs[var.range()].copy_from_slice(&vals);
                }
            }
        }

        if let Some(ref mut s) = self.stats {
            s.component_runs += 1;
            if let Some(t) = t {
                s.compute += t.elapsed();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_run_once() {
        assert_eq!(NonlinearSolver::default(), NonlinearSolver::RunOnce);
        assert_eq!(NonlinearSolver::default().name(), "NL: RUNONCE");
    }

    #[test]
    fn block_solver_defaults() {
        match NonlinearSolver::block_gauss_seidel() {
            NonlinearSolver::BlockGaussSeidel(opts) => {
                assert_eq!(opts.maxiter, 10);
                assert_eq!(opts.atol, 1e-10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
