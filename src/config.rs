//! TOML model files.
//!
//! ```toml
//! name = "paraboloid"
//!
//! [[model.subsystems]]
//! name = "indep"
//! kind = "indep"
//! promotes = ["x"]
//! outputs = [{ name = "x", val = [1.0, 2.0, 3.0], units = "ft" }]
//!
//! [[model.subsystems]]
//! name = "C1"
//! kind = "exec"
//! exprs = ["y = 2*x"]
//! promotes_inputs = ["x"]
//! src_indices = [0, 1]
//! vars.x = { val = [0.0, 0.0], units = "ft" }
//! vars.y = { val = [0.0, 0.0] }
//!
//! [[set]]
//! name = "x"
//! val = [24.0, 36.0, 48.0]
//! units = "inch"
//! ```
//!
//! Groups (`kind = "group"` or `"parallel"`) nest `subsystems`,
//! `connections`, `late_promotes`, `input_defaults` and `solver` the same
//! way the top-level `model` table does.

use std::collections::BTreeMap;
use std::path::Path;

use serde_derive::Deserialize;

use crate::component::{ExecComp, IndepVarComp, VarMeta};
use crate::error::{CouplerError, Result};
use crate::group::{Group, InputDefaults, PromoteKind, Promotes};
use crate::indices::SrcIndices;
use crate::problem::{problem_in, Problem, SetOpts};
use crate::recorder::SqliteRecorder;
use crate::solver::comm::{CommunicationBackend, SingleProcessComm};
use crate::solver::nonlinear::{NonlinearSolver, SolverOptions};
use crate::vector::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValConfig {
    Scalar(f64),
    Array(Vec<f64>),
}

impl ValConfig {
    fn to_vec(&self) -> Vec<f64> {
        match self {
            ValConfig::Scalar(v) => vec![*v],
            ValConfig::Array(v) => v.clone(),
        }
    }
}

impl From<&ValConfig> for Value {
    fn from(v: &ValConfig) -> Self {
        match v {
            ValConfig::Scalar(x) => Value::Scalar(*x),
            ValConfig::Array(a) => Value::Array(a.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaConfig {
    pub val: Option<ValConfig>,
    pub units: Option<String>,
    pub shape: Option<Vec<usize>>,
    pub desc: Option<String>,
}

impl MetaConfig {
    fn to_meta(&self) -> VarMeta {
        let mut meta = match &self.val {
            Some(ValConfig::Scalar(v)) => VarMeta::scalar(*v),
            Some(ValConfig::Array(a)) => VarMeta::array(a.clone()),
            None => VarMeta::default(),
        };
        if let Some(shape) = &self.shape {
            meta = meta.shape(shape.clone());
        }
        if let Some(u) = &self.units {
            meta = meta.units(u);
        }
        if let Some(d) = &self.desc {
            meta = meta.desc(d);
        }
        meta
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    #[serde(flatten)]
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    Indep,
    Exec,
    Group,
    Parallel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub src: String,
    pub tgt: String,
    pub src_indices: Option<Vec<i64>>,
}

/// `promotes()` issued after a subsystem was added.
#[derive(Debug, Clone, Deserialize)]
pub struct LatePromotesConfig {
    pub subsystem: String,
    #[serde(default)]
    pub any: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub src_indices: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub val: Option<ValConfig>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    RunOnce,
    BlockGaussSeidel,
    BlockJacobi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    pub kind: SolverKind,
    pub maxiter: Option<usize>,
    pub atol: Option<f64>,
    pub rtol: Option<f64>,
    pub iprint: Option<u32>,
    pub err_on_non_converge: Option<bool>,
}

impl SolverConfig {
    fn to_solver(&self) -> NonlinearSolver {
        let defaults = SolverOptions::default();
        let opts = SolverOptions {
            maxiter: self.maxiter.unwrap_or(defaults.maxiter),
            atol: self.atol.unwrap_or(defaults.atol),
            rtol: self.rtol.unwrap_or(defaults.rtol),
            iprint: self.iprint.unwrap_or(defaults.iprint),
            err_on_non_converge: self.err_on_non_converge.unwrap_or(defaults.err_on_non_converge),
        };
        match self.kind {
            SolverKind::RunOnce => NonlinearSolver::RunOnce,
            SolverKind::BlockGaussSeidel => NonlinearSolver::BlockGaussSeidel(opts),
            SolverKind::BlockJacobi => NonlinearSolver::BlockJacobi(opts),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub subsystems: Vec<SubsystemConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub late_promotes: Vec<LatePromotesConfig>,
    #[serde(default)]
    pub input_defaults: BTreeMap<String, DefaultsConfig>,
    pub solver: Option<SolverConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsystemConfig {
    pub name: String,
    pub kind: SystemKind,
    #[serde(default)]
    pub promotes: Vec<String>,
    #[serde(default)]
    pub promotes_inputs: Vec<String>,
    #[serde(default)]
    pub promotes_outputs: Vec<String>,
    /// Applied to the inputs promoted by this entry.
    pub src_indices: Option<Vec<i64>>,
    /// `indep` outputs.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    /// `exec` statements.
    #[serde(default)]
    pub exprs: Vec<String>,
    /// `exec` per-variable metadata.
    #[serde(default)]
    pub vars: BTreeMap<String, MetaConfig>,
    #[serde(flatten)]
    pub group: GroupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetConfig {
    pub name: String,
    pub val: ValConfig,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub file: String,
    pub record_inputs: Option<bool>,
    pub record_outputs: Option<bool>,
    pub includes: Option<Vec<String>>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProblemConfig {
    pub name: Option<String>,
    #[serde(default)]
    pub model: GroupConfig,
    #[serde(default)]
    pub set: Vec<SetConfig>,
    pub recording: Option<RecordingConfig>,
}

fn promotes_for(sub: &SubsystemConfig) -> Promotes {
    let mut p = Promotes::none()
        .with(PromoteKind::Any, sub.promotes.iter().map(String::as_str))
        .with(PromoteKind::Inputs, sub.promotes_inputs.iter().map(String::as_str))
        .with(PromoteKind::Outputs, sub.promotes_outputs.iter().map(String::as_str));
    if let Some(ind) = &sub.src_indices {
        p = p.with_src_indices(SrcIndices::new(ind.clone()));
    }
    p
}

fn build_group(cfg: &GroupConfig, parallel: bool) -> Result<Group> {
    let mut group = if parallel { Group::parallel() } else { Group::new() };
    for sub in &cfg.subsystems {
        let promotes = promotes_for(sub);
        match sub.kind {
            SystemKind::Indep => {
                let mut comp = IndepVarComp::new();
                for out in &sub.outputs {
                    comp.add_output(&out.name, out.meta.to_meta());
                }
                group.add_subsystem(&sub.name, comp, promotes);
            }
            SystemKind::Exec => {
                if sub.exprs.is_empty() {
                    return Err(CouplerError::Config(format!(
                        "exec subsystem '{}' has no exprs",
                        sub.name
                    )));
                }
                let mut comp = ExecComp::multi(sub.exprs.iter().map(String::as_str));
                for (name, meta) in &sub.vars {
                    comp = comp.with_var(name, meta.to_meta());
                }
                group.add_subsystem(&sub.name, comp, promotes);
            }
            SystemKind::Group | SystemKind::Parallel => {
                let child = build_group(&sub.group, sub.kind == SystemKind::Parallel)?;
                group.add_subsystem(&sub.name, child, promotes);
            }
        }
    }
    for conn in &cfg.connections {
        group.connect(
            &conn.src,
            &conn.tgt,
            conn.src_indices.clone().map(SrcIndices::new),
        );
    }
    for late in &cfg.late_promotes {
        let mut p = Promotes::none()
            .with(PromoteKind::Any, late.any.iter().map(String::as_str))
            .with(PromoteKind::Inputs, late.inputs.iter().map(String::as_str))
            .with(PromoteKind::Outputs, late.outputs.iter().map(String::as_str));
        if let Some(ind) = &late.src_indices {
            p = p.with_src_indices(SrcIndices::new(ind.clone()));
        }
        group.promotes(&late.subsystem, p);
    }
    for (name, d) in &cfg.input_defaults {
        group.set_input_defaults(
            name,
            InputDefaults {
                val: d.val.as_ref().map(ValConfig::to_vec),
                units: d.units.clone(),
            },
        );
    }
    if let Some(solver) = &cfg.solver {
        group.set_nonlinear_solver(solver.to_solver());
    }
    Ok(group)
}

/// Parse a model file's text.
pub fn parse_config(text: &str) -> Result<ProblemConfig> {
    toml::from_str(text).map_err(|e| CouplerError::Config(e.to_string()))
}

/// Build, set up and initialize a problem from a parsed config. Relative
/// paths (recorder files) resolve under `work_dir`.
pub fn build_problem(cfg: &ProblemConfig, work_dir: &Path) -> Result<Problem> {
    build_problem_with(cfg, work_dir, SingleProcessComm)
}

/// Like [`build_problem`], running on `comm`.
pub fn build_problem_with(
    cfg: &ProblemConfig,
    work_dir: &Path,
    comm: impl CommunicationBackend + 'static,
) -> Result<Problem> {
    let model = build_group(&cfg.model, false)?;
    let name = cfg.name.as_deref().unwrap_or("problem");
    let mut problem = problem_in(model, name, work_dir).with_comm(comm);

    if let Some(rec) = &cfg.recording {
        problem.add_recorder(SqliteRecorder::new(&rec.file));
        let opts = problem.recording_options_mut();
        if let Some(v) = rec.record_inputs {
            opts.record_inputs = v;
        }
        if let Some(v) = rec.record_outputs {
            opts.record_outputs = v;
        }
        if let Some(inc) = &rec.includes {
            opts.includes = inc.clone();
        }
        opts.excludes = rec.excludes.clone();
    }

    problem.setup()?;
    for set in &cfg.set {
        let opts = SetOpts {
            units: set.units.clone(),
            indices: None,
        };
        problem.set_val_with(&set.name, Value::from(&set.val), &opts)?;
    }
    Ok(problem)
}

/// Load a model file and return a set-up problem with its `set` values
/// applied.
pub fn load_problem(path: impl AsRef<Path>) -> Result<Problem> {
    load_problem_with(path, SingleProcessComm)
}

/// Load a model file and set it up on `comm`.
pub fn load_problem_with(
    path: impl AsRef<Path>,
    comm: impl CommunicationBackend + 'static,
) -> Result<Problem> {
    let path = path.as_ref();
    let _span = tracing::info_span!("load_problem", path = %path.display()).entered();
    let text = std::fs::read_to_string(path)?;
    let cfg = parse_config(&text)?;
    let work_dir = path.parent().unwrap_or_else(|| Path::new("."));
    build_problem_with(&cfg, work_dir, comm)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name = "cfg_demo"

[[model.subsystems]]
name = "indep"
kind = "indep"
promotes = ["x"]
outputs = [{ name = "x", val = [1.0, 2.0, 3.0], units = "ft" }]

[[model.subsystems]]
name = "G"
kind = "group"
promotes_inputs = ["x"]

[[model.subsystems.subsystems]]
name = "C1"
kind = "exec"
exprs = ["y = 2*x"]
promotes_inputs = ["x"]
vars.x = { val = [0.0, 0.0, 0.0], units = "inch" }
vars.y = { val = [0.0, 0.0, 0.0] }

[[set]]
name = "indep.x"
val = 2.0
"#;

    #[test]
    fn parses_nested_groups() {
        let cfg = parse_config(DOC).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("cfg_demo"));
        assert_eq!(cfg.model.subsystems.len(), 2);
        assert_eq!(cfg.model.subsystems[1].kind, SystemKind::Group);
        assert_eq!(cfg.model.subsystems[1].group.subsystems[0].name, "C1");
    }

    #[test]
    fn builds_and_runs() {
        let cfg = parse_config(DOC).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut p = build_problem(&cfg, dir.path()).unwrap();
        p.run_model().unwrap();
        // 2 ft on every element, read as inches and doubled.
        let y = p.get_val("G.C1.y").unwrap();
        assert!(y.iter().all(|v| (v - 48.0).abs() < 1e-9));
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            parse_config("model = 3"),
            Err(CouplerError::Config(_))
        ));
    }
}
