//! Partial derivative storage.
//!
//! Sub-jacobians are dense row-major blocks keyed by absolute
//! (output, wrt) variable pairs, allocated for every declared partial.

use std::collections::BTreeMap;

use crate::component::Io;
use crate::error::{CouplerError, Result};
use crate::model::Model;

/// One declared partial: `rows x cols` values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SubJac {
    pub rows: usize,
    pub cols: usize,
    pub val: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Jacobian {
    subjacs: BTreeMap<(usize, usize), SubJac>,
}

impl Jacobian {
    pub fn new(model: &Model) -> Self {
        let subjacs = model
            .declared_partials
            .iter()
            .map(|&(of, wrt)| {
                let (rows, cols) = (model.vars[of].size, model.vars[wrt].size);
                (
                    (of, wrt),
                    SubJac {
                        rows,
                        cols,
                        val: vec![0.0; rows * cols],
                    },
                )
            })
            .collect();
        Self { subjacs }
    }

    pub fn get(&self, of: usize, wrt: usize) -> Option<&SubJac> {
        self.subjacs.get(&(of, wrt))
    }

    pub fn get_mut(&mut self, of: usize, wrt: usize) -> Option<&mut SubJac> {
        self.subjacs.get_mut(&(of, wrt))
    }

    pub fn len(&self) -> usize {
        self.subjacs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjacs.is_empty()
    }
}

/// A system-scoped view of the jacobian.
pub struct JacobianMut<'a> {
    model: &'a Model,
    system: usize,
    jac: &'a mut Jacobian,
}

impl<'a> JacobianMut<'a> {
    pub(crate) fn new(model: &'a Model, system: usize, jac: &'a mut Jacobian) -> Self {
        Self { model, system, jac }
    }

    fn not_found(of: &str, wrt: &str) -> CouplerError {
        CouplerError::NotFound(format!(
            "Variable name pair ('{}', '{}') not found.",
            of, wrt
        ))
    }

    fn key(&self, of: &str, wrt: &str) -> Result<(usize, usize)> {
        let of_var = self
            .model
            .resolve_scoped(self.system, of, Io::Output)
            .and_then(|v| v.first().copied())
            .ok_or_else(|| Self::not_found(of, wrt))?;
        let wrt_var = match self.model.resolve_scoped(self.system, wrt, Io::Input) {
            Some(vars) if vars.len() > 1 => {
                return Err(CouplerError::Ambiguous(
                    self.model.ambiguous_input_msg(self.system, wrt, &vars),
                ))
            }
            Some(vars) => vars[0],
            None => self
                .model
                .resolve_scoped(self.system, wrt, Io::Output)
                .and_then(|v| v.first().copied())
                .ok_or_else(|| Self::not_found(of, wrt))?,
        };
        if self.jac.get(of_var, wrt_var).is_none() {
            return Err(Self::not_found(of, wrt));
        }
        Ok((of_var, wrt_var))
    }

    /// Dense row-major values of the partial of `of` with respect to `wrt`.
    pub fn get(&self, of: &str, wrt: &str) -> Result<&[f64]> {
        let (o, w) = self.key(of, wrt)?;
        self.jac
            .get(o, w)
            .map(|s| s.val.as_slice())
            .ok_or_else(|| Self::not_found(of, wrt))
    }

    pub fn set(&mut self, of: &str, wrt: &str, val: &[f64]) -> Result<()> {
        let (o, w) = self.key(of, wrt)?;
        let sub = self
            .jac
            .get_mut(o, w)
            .ok_or_else(|| Self::not_found(of, wrt))?;
        if val.len() == sub.val.len() {
            sub.val.copy_from_slice(val);
        } else if val.len() == 1 {
            sub.val.iter_mut().for_each(|v| *v = val[0]);
        } else {
            return Err(CouplerError::Value(format!(
                "Partial ('{}', '{}') has shape ({}, {}) but was given {} values.",
                of,
                wrt,
                sub.rows,
                sub.cols,
                val.len()
            )));
        }
        Ok(())
    }
}
