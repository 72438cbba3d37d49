//! Flat value storage and system-scoped views over it.
//!
//! Inputs, outputs and residuals each live in one `Vec<f64>`; a variable
//! owns the slice `offset..offset + size`. `VectorMut` resolves names the
//! way a system sees them: promoted name first, then the absolute name
//! relative to the system.

use crate::component::Io;
use crate::error::{CouplerError, Result};
use crate::model::Model;

/// A value handed to set operations. Scalars broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Array(Vec<f64>),
}

impl Value {
    /// Expand to exactly `size` values.
    pub fn fit(self, size: usize, name: &str) -> Result<Vec<f64>> {
        match self {
            Value::Scalar(v) => Ok(vec![v; size]),
            Value::Array(v) if v.len() == size => Ok(v),
            Value::Array(v) if v.len() == 1 => Ok(vec![v[0]; size]),
            Value::Array(v) => Err(CouplerError::Value(format!(
                "Failed to set value of '{}': could not broadcast {} values into size {}.",
                name,
                v.len(),
                size
            ))),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(v)
    }
}

impl From<&Vec<f64>> for Value {
    fn from(v: &Vec<f64>) -> Self {
        Value::Array(v.clone())
    }
}

impl From<&[f64]> for Value {
    fn from(v: &[f64]) -> Self {
        Value::Array(v.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    fn from(v: [f64; N]) -> Self {
        Value::Array(v.to_vec())
    }
}

/// The nonlinear vectors of a model.
#[derive(Debug, Clone)]
pub struct Vectors {
    pub inputs: Vec<f64>,
    pub outputs: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl Vectors {
    /// Allocate and fill with declared initial values.
    pub fn new(model: &Model) -> Self {
        let mut inputs = vec![0.0; model.input_size];
        let mut outputs = vec![0.0; model.output_size];
        for var in &model.vars {
            let dst = match var.io {
                Io::Input => &mut inputs,
                Io::Output => &mut outputs,
            };
            let n = var.size.min(var.init.len());
            dst[var.offset..var.offset + n].copy_from_slice(&var.init[..n]);
        }
        Self {
            inputs,
            residuals: vec![0.0; model.output_size],
            outputs,
        }
    }
}

/// Which vector a view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecKind {
    Inputs,
    Outputs,
    Residuals,
}

impl VecKind {
    fn io(self) -> Io {
        match self {
            VecKind::Inputs => Io::Input,
            VecKind::Outputs | VecKind::Residuals => Io::Output,
        }
    }
}

/// Mutable view of one vector as seen from a system.
pub struct VectorMut<'a> {
    model: &'a Model,
    system: usize,
    kind: VecKind,
    data: &'a mut [f64],
    rank: usize,
}

impl<'a> VectorMut<'a> {
    pub(crate) fn new(
        model: &'a Model,
        system: usize,
        kind: VecKind,
        data: &'a mut [f64],
        rank: usize,
    ) -> Self {
        Self {
            model,
            system,
            kind,
            data,
            rank,
        }
    }

    pub fn kind(&self) -> VecKind {
        self.kind
    }

    fn resolve(&self, name: &str, suggest: bool) -> Result<usize> {
        let io = self.kind.io();
        match self.model.resolve_scoped(self.system, name, io) {
            Some(vars) if vars.len() == 1 => Ok(vars[0]),
            Some(vars) => Err(CouplerError::Ambiguous(
                self.model.ambiguous_input_msg(self.system, name, &vars),
            )),
            None => {
                let suffix = if suggest {
                    self.model.suggestion_suffix(self.system, name)
                } else {
                    String::new()
                };
                Err(CouplerError::NotFound(format!(
                    "{}: Variable name '{}' not found.{}",
                    self.model.msginfo(self.system),
                    name,
                    suffix
                )))
            }
        }
    }

    fn local_range(&self, var: usize) -> Result<std::ops::Range<usize>> {
        let info = &self.model.vars[var];
        if !info.is_local(self.rank) {
            return Err(CouplerError::Remote(format!(
                "{}: Variable '{}' is not local to rank {}.",
                self.model.msginfo(self.system),
                info.abs,
                self.rank
            )));
        }
        Ok(info.range())
    }

    /// Values of `name`.
    pub fn get(&self, name: &str) -> Result<&[f64]> {
        let var = self.resolve(name, true)?;
        let range = self.local_range(var)?;
        Ok(&self.data[range])
    }

    /// Overwrite `name`. Scalars broadcast.
    pub fn set(&mut self, name: &str, val: impl Into<Value>) -> Result<()> {
        let var = self.resolve(name, false)?;
        let range = self.local_range(var)?;
        let vals = val.into().fit(range.len(), name)?;
        self.data[range].copy_from_slice(&vals);
        Ok(())
    }

    /// True when `name` resolves to exactly one variable in this view.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name, false).is_ok()
    }

    /// Absolute names covered by this view.
    pub fn names(&self) -> Vec<&str> {
        let io = self.kind.io();
        self.model.systems[self.system]
            .var_range
            .clone()
            .filter(|&v| self.model.vars[v].io == io)
            .map(|v| self.model.vars[v].abs.as_str())
            .collect()
    }
}

/// Inputs, outputs and residuals of a system.
pub struct NonlinearVectorsMut<'a> {
    pub inputs: VectorMut<'a>,
    pub outputs: VectorMut<'a>,
    pub residuals: VectorMut<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_broadcast() {
        assert_eq!(Value::from(2.0).fit(3, "x").unwrap(), vec![2.0; 3]);
        assert_eq!(Value::from(vec![1.0]).fit(2, "x").unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let err = Value::from(vec![1.0, 2.0]).fit(3, "x").unwrap_err();
        assert!(matches!(err, CouplerError::Value(_)));
    }
}
