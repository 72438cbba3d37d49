//! Components: the leaves of a model tree.
//!
//! A component declares its inputs and outputs during setup and maps input
//! values to output values in `compute`. `IndepVarComp` only owns outputs;
//! `ExecComp` evaluates algebraic statements.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use num_complex::Complex64;

use crate::error::{CouplerError, Result};
use crate::expr::{self, Statement};
use crate::names;

/// Complex-step size used for `ExecComp` partials.
const COMPLEX_STEP: f64 = 1e-40;

/// Variable direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Io {
    Input,
    Output,
}

impl fmt::Display for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Io::Input => write!(f, "input"),
            Io::Output => write!(f, "output"),
        }
    }
}

/// Declared metadata for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VarMeta {
    /// Initial value, flattened.
    pub val: Vec<f64>,
    pub shape: Vec<usize>,
    pub units: Option<String>,
    pub desc: String,
}

impl Default for VarMeta {
    fn default() -> Self {
        Self::scalar(1.0)
    }
}

impl VarMeta {
    pub fn scalar(val: f64) -> Self {
        Self {
            val: vec![val],
            shape: vec![1],
            units: None,
            desc: String::new(),
        }
    }

    pub fn array(val: impl Into<Vec<f64>>) -> Self {
        let val = val.into();
        let shape = vec![val.len()];
        Self {
            val,
            shape,
            units: None,
            desc: String::new(),
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::array(vec![0.0; n])
    }

    /// Reshape, filling with ones when the current value does not fit.
    pub fn shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = shape.into();
        let size: usize = self.shape.iter().product();
        if self.val.len() != size {
            self.val = if self.val.len() == 1 {
                vec![self.val[0]; size]
            } else {
                vec![1.0; size]
            };
        }
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn desc(mut self, desc: &str) -> Self {
        self.desc = desc.to_string();
        self
    }

    pub fn size(&self) -> usize {
        self.val.len()
    }
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub io: Io,
    pub meta: VarMeta,
}

/// Collects variable and partial declarations from `Component::setup`.
#[derive(Debug, Default)]
pub struct VarDecls {
    vars: Vec<VarDecl>,
    partials: Vec<(String, String)>,
}

impl VarDecls {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, name: &str, io: Io, meta: VarMeta) -> Result<()> {
        if !names::is_valid_name(name) {
            return Err(CouplerError::Setup(format!(
                "'{}' is not a valid {} name.",
                name, io
            )));
        }
        if self.vars.iter().any(|v| v.name == name) {
            return Err(CouplerError::Setup(format!(
                "Variable name '{}' already exists.",
                name
            )));
        }
        self.vars.push(VarDecl {
            name: name.to_string(),
            io,
            meta,
        });
        Ok(())
    }

    pub fn add_input(&mut self, name: &str, meta: VarMeta) -> Result<()> {
        self.add(name, Io::Input, meta)
    }

    pub fn add_output(&mut self, name: &str, meta: VarMeta) -> Result<()> {
        self.add(name, Io::Output, meta)
    }

    /// Declare a sub-jacobian d(of)/d(wrt). Both names are local.
    pub fn declare_partials(&mut self, of: &str, wrt: &str) {
        self.partials.push((of.to_string(), wrt.to_string()));
    }

    pub fn vars(&self) -> &[VarDecl] {
        &self.vars
    }

    pub fn partials(&self) -> &[(String, String)] {
        &self.partials
    }
}

/// Input values handed to `compute`, keyed by local name.
#[derive(Debug, Default, Clone)]
pub struct ComponentInputs {
    values: HashMap<String, Vec<f64>>,
}

impl ComponentInputs {
    pub fn new(values: HashMap<String, Vec<f64>>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Result<&[f64]> {
        self.values
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CouplerError::NotFound(format!("Input '{}' not found.", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.values.iter()
    }
}

/// Output values written by `compute`, keyed by local name.
#[derive(Debug, Default, Clone)]
pub struct ComponentOutputs {
    values: HashMap<String, Vec<f64>>,
}

impl ComponentOutputs {
    pub fn new(values: HashMap<String, Vec<f64>>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Result<&[f64]> {
        self.values
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CouplerError::NotFound(format!("Output '{}' not found.", name)))
    }

    /// Overwrite an output. A single value broadcasts over the output.
    pub fn set(&mut self, name: &str, val: &[f64]) -> Result<()> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| CouplerError::NotFound(format!("Output '{}' not found.", name)))?;
        if val.len() == slot.len() {
            slot.copy_from_slice(val);
        } else if val.len() == 1 {
            slot.iter_mut().for_each(|v| *v = val[0]);
        } else {
            return Err(CouplerError::Value(format!(
                "Output '{}' has size {} but was given {} values.",
                name,
                slot.len(),
                val.len()
            )));
        }
        Ok(())
    }

    pub fn into_values(self) -> HashMap<String, Vec<f64>> {
        self.values
    }
}

/// Sub-jacobians written by `compute_partials`, dense row-major.
#[derive(Debug, Default, Clone)]
pub struct Partials {
    entries: HashMap<(String, String), Vec<f64>>,
}

impl Partials {
    /// Preallocate declared entries with their `(rows, cols)` sizes.
    pub fn new(declared: impl IntoIterator<Item = ((String, String), usize)>) -> Self {
        Self {
            entries: declared
                .into_iter()
                .map(|(key, size)| (key, vec![0.0; size]))
                .collect(),
        }
    }

    pub fn set(&mut self, of: &str, wrt: &str, val: &[f64]) -> Result<()> {
        let slot = self
            .entries
            .get_mut(&(of.to_string(), wrt.to_string()))
            .ok_or_else(|| {
                CouplerError::NotFound(format!(
                    "Variable name pair ('{}', '{}') not found.",
                    of, wrt
                ))
            })?;
        if slot.len() != val.len() {
            return Err(CouplerError::Value(format!(
                "Partial ('{}', '{}') has {} entries but was given {}.",
                of,
                wrt,
                slot.len(),
                val.len()
            )));
        }
        slot.copy_from_slice(val);
        Ok(())
    }

    pub fn into_entries(self) -> HashMap<(String, String), Vec<f64>> {
        self.entries
    }
}

/// A leaf system with declared inputs and outputs.
pub trait Component {
    /// Class name used in messages, e.g. `ExecComp`.
    fn class_name(&self) -> &str {
        "Component"
    }

    fn setup(&mut self, vars: &mut VarDecls) -> Result<()>;

    fn compute(&self, inputs: &ComponentInputs, outputs: &mut ComponentOutputs) -> Result<()>;

    fn compute_partials(&self, _inputs: &ComponentInputs, _partials: &mut Partials) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IndepVarComp
// ---------------------------------------------------------------------------

/// Component whose outputs are set by the user.
#[derive(Debug, Clone, Default)]
pub struct IndepVarComp {
    outputs: Vec<(String, VarMeta)>,
}

impl IndepVarComp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `add_output`.
    pub fn output(mut self, name: &str, meta: VarMeta) -> Self {
        self.add_output(name, meta);
        self
    }

    pub fn add_output(&mut self, name: &str, meta: VarMeta) {
        self.outputs.push((name.to_string(), meta));
    }
}

impl Component for IndepVarComp {
    fn class_name(&self) -> &str {
        "IndepVarComp"
    }

    fn setup(&mut self, vars: &mut VarDecls) -> Result<()> {
        for (name, meta) in &self.outputs {
            vars.add_output(name, meta.clone())?;
        }
        Ok(())
    }

    fn compute(&self, _inputs: &ComponentInputs, _outputs: &mut ComponentOutputs) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExecComp
// ---------------------------------------------------------------------------

/// Component defined by algebraic statements such as `y=2*x`.
#[derive(Debug, Clone)]
pub struct ExecComp {
    exprs: Vec<String>,
    var_meta: HashMap<String, VarMeta>,
    statements: Vec<Statement>,
    /// Inputs referenced by each statement, parallel to `statements`.
    statement_inputs: Vec<Vec<String>>,
}

impl ExecComp {
    pub fn new(expr: &str) -> Self {
        Self::multi([expr])
    }

    pub fn multi<'a>(exprs: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            exprs: exprs.into_iter().map(str::to_string).collect(),
            var_meta: HashMap::new(),
            statements: Vec::new(),
            statement_inputs: Vec::new(),
        }
    }

    /// Metadata for a variable used in the statements.
    pub fn with_var(mut self, name: &str, meta: VarMeta) -> Self {
        self.var_meta.insert(name.to_string(), meta);
        self
    }

    fn complex_inputs(inputs: &ComponentInputs) -> HashMap<String, Vec<Complex64>> {
        inputs
            .iter()
            .map(|(name, vals)| {
                (
                    name.clone(),
                    vals.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
                )
            })
            .collect()
    }
}

impl Component for ExecComp {
    fn class_name(&self) -> &str {
        "ExecComp"
    }

    fn setup(&mut self, vars: &mut VarDecls) -> Result<()> {
        self.statements = self
            .exprs
            .iter()
            .map(|e| expr::parse_statement(e))
            .collect::<Result<_>>()?;

        let outputs: BTreeSet<String> = self.statements.iter().map(|s| s.target.clone()).collect();
        if outputs.len() != self.statements.len() {
            return Err(CouplerError::Setup(
                "ExecComp: an output is assigned more than once.".into(),
            ));
        }

        let mut inputs = BTreeSet::new();
        self.statement_inputs.clear();
        for stmt in &self.statements {
            let mut refs = BTreeSet::new();
            stmt.expr.collect_names(&mut refs);
            if let Some(both) = refs.iter().find(|r| outputs.contains(*r)) {
                return Err(CouplerError::Setup(format!(
                    "ExecComp: variable '{}' is used as both an input and an output.",
                    both
                )));
            }
            inputs.extend(refs.iter().cloned());
            self.statement_inputs.push(refs.into_iter().collect());
        }

        for name in self.var_meta.keys() {
            if !inputs.contains(name) && !outputs.contains(name) {
                return Err(CouplerError::Setup(format!(
                    "ExecComp: metadata given for '{}' which is not used in the expressions.",
                    name
                )));
            }
        }

        for name in &inputs {
            let meta = self.var_meta.get(name).cloned().unwrap_or_default();
            vars.add_input(name, meta)?;
        }
        for (stmt, refs) in self.statements.iter().zip(&self.statement_inputs) {
            let meta = self.var_meta.get(&stmt.target).cloned().unwrap_or_default();
            vars.add_output(&stmt.target, meta)?;
            for wrt in refs {
                vars.declare_partials(&stmt.target, wrt);
            }
        }
        Ok(())
    }

    fn compute(&self, inputs: &ComponentInputs, outputs: &mut ComponentOutputs) -> Result<()> {
        let vars = Self::complex_inputs(inputs);
        for stmt in &self.statements {
            let result: Vec<f64> = stmt.expr.eval(&vars)?.iter().map(|c| c.re).collect();
            outputs.set(&stmt.target, &result)?;
        }
        Ok(())
    }

    fn compute_partials(&self, inputs: &ComponentInputs, partials: &mut Partials) -> Result<()> {
        let mut vars = Self::complex_inputs(inputs);
        for (stmt, refs) in self.statements.iter().zip(&self.statement_inputs) {
            let n_out = stmt.expr.eval(&vars)?.len();
            for wrt in refs {
                let n_in = vars.get(wrt).map(Vec::len).unwrap_or(0);
                let mut n_rows = n_out;
                let mut columns = Vec::with_capacity(n_in);
                for j in 0..n_in {
                    if let Some(v) = vars.get_mut(wrt) {
                        v[j].im = COMPLEX_STEP;
                    }
                    let res = stmt.expr.eval(&vars);
                    if let Some(v) = vars.get_mut(wrt) {
                        v[j].im = 0.0;
                    }
                    let col: Vec<f64> = res?.iter().map(|c| c.im / COMPLEX_STEP).collect();
                    n_rows = col.len();
                    columns.push(col);
                }
                // Columns were computed one input element at a time; store row-major.
                let out_size = outputs_size_hint(partials, &stmt.target, wrt, n_in).unwrap_or(n_rows);
                let mut dense = vec![0.0; out_size * n_in];
                for (j, col) in columns.iter().enumerate() {
                    for i in 0..out_size {
                        let v = if col.len() == 1 { col[0] } else { col[i] };
                        dense[i * n_in + j] = v;
                    }
                }
                partials.set(&stmt.target, wrt, &dense)?;
            }
        }
        Ok(())
    }
}

/// Row count of a declared partial, recovered from its allocated size.
fn outputs_size_hint(partials: &Partials, of: &str, wrt: &str, n_in: usize) -> Option<usize> {
    if n_in == 0 {
        return None;
    }
    partials
        .entries
        .get(&(of.to_string(), wrt.to_string()))
        .map(|v| v.len() / n_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup(comp: &mut dyn Component) -> VarDecls {
        let mut decls = VarDecls::new();
        comp.setup(&mut decls).unwrap();
        decls
    }

    #[test]
    fn exec_comp_declares_inputs_and_outputs() {
        let mut comp = ExecComp::new("y=2*x");
        let decls = setup(&mut comp);
        let names: Vec<(&str, Io)> = decls.vars().iter().map(|v| (v.name.as_str(), v.io)).collect();
        assert_eq!(names, vec![("x", Io::Input), ("y", Io::Output)]);
        assert_eq!(decls.partials(), &[("y".to_string(), "x".to_string())]);
    }

    #[test]
    fn exec_comp_computes_arrays() {
        let mut comp = ExecComp::new("y=x*2.")
            .with_var("x", VarMeta::zeros(3))
            .with_var("y", VarMeta::zeros(3));
        setup(&mut comp);
        let inputs = ComponentInputs::new(HashMap::from([("x".to_string(), vec![1.0, 2.0, 3.0])]));
        let mut outputs = ComponentOutputs::new(HashMap::from([("y".to_string(), vec![0.0; 3])]));
        comp.compute(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs.get("y").unwrap(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn exec_comp_complex_step_partials() {
        let mut comp = ExecComp::new("y=x**2")
            .with_var("x", VarMeta::array(vec![1.0, 3.0]))
            .with_var("y", VarMeta::zeros(2));
        setup(&mut comp);
        let inputs = ComponentInputs::new(HashMap::from([("x".to_string(), vec![1.0, 3.0])]));
        let mut partials = Partials::new([(("y".to_string(), "x".to_string()), 4)]);
        comp.compute_partials(&inputs, &mut partials).unwrap();
        let entries = partials.into_entries();
        let jac = &entries[&("y".to_string(), "x".to_string())];
        assert_relative_eq!(jac[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(jac[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(jac[2], 0.0, epsilon = 1e-12);
        assert_relative_eq!(jac[3], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn exec_comp_rejects_output_on_rhs() {
        let mut comp = ExecComp::multi(["y=2*x", "z=y+1"]);
        let err = comp.setup(&mut VarDecls::new()).unwrap_err();
        assert!(err.to_string().contains("both an input and an output"));
    }

    #[test]
    fn exec_comp_rejects_unknown_metadata() {
        let mut comp = ExecComp::new("y=2*x").with_var("q", VarMeta::scalar(0.0));
        assert!(comp.setup(&mut VarDecls::new()).is_err());
    }

    #[test]
    fn var_meta_shape_broadcasts_scalar() {
        let meta = VarMeta::scalar(2.0).shape([2, 2]);
        assert_eq!(meta.val, vec![2.0; 4]);
        assert_eq!(meta.size(), 4);
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let mut decls = VarDecls::new();
        decls.add_input("x", VarMeta::default()).unwrap();
        assert!(decls.add_output("x", VarMeta::default()).is_err());
    }
}
