//! The top-level object users drive: owns the model, its values and its
//! recorders.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::component::{Component, ComponentInputs, Io, Partials};
use crate::error::{CouplerError, Result};
use crate::group::Group;
use crate::indices::SrcIndices;
use crate::jacobian::{Jacobian, JacobianMut};
use crate::model::{self, Model};
use crate::recorder::{Case, CaseData, CaseRecorder, RecordingOptions, VarRecordMeta};
use crate::solver::comm::{broadcast_from, CommunicationBackend, SingleProcessComm};
use crate::solver::nonlinear::Exec;
use crate::stats::Stats;
use crate::transfer;
use crate::units;
use crate::vector::{NonlinearVectorsMut, Value, VecKind, VectorMut, Vectors};

/// Options for `get_val_with`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetOpts {
    /// Return values in these units.
    pub units: Option<String>,
    /// Flat indices into the value.
    pub indices: Option<SrcIndices>,
    /// `Some(true)` fetches the value from its owning rank (collective).
    pub get_remote: Option<bool>,
    /// Read connected inputs through their source.
    pub from_src: bool,
}

impl Default for GetOpts {
    fn default() -> Self {
        Self {
            units: None,
            indices: None,
            get_remote: None,
            from_src: true,
        }
    }
}

impl GetOpts {
    pub fn units(units: &str) -> Self {
        Self::default().with_units(units)
    }

    pub fn remote() -> Self {
        Self {
            get_remote: Some(true),
            ..Self::default()
        }
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn with_indices(mut self, indices: impl Into<SrcIndices>) -> Self {
        self.indices = Some(indices.into());
        self
    }

    pub fn with_remote(mut self, get_remote: bool) -> Self {
        self.get_remote = Some(get_remote);
        self
    }

    pub fn with_from_src(mut self, from_src: bool) -> Self {
        self.from_src = from_src;
        self
    }
}

/// Options for `set_val_with`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOpts {
    /// Units of the value being set.
    pub units: Option<String>,
    /// Flat indices of the variable to overwrite.
    pub indices: Option<SrcIndices>,
}

impl SetOpts {
    pub fn units(units: &str) -> Self {
        Self {
            units: Some(units.to_string()),
            indices: None,
        }
    }

    pub fn with_indices(mut self, indices: impl Into<SrcIndices>) -> Self {
        self.indices = Some(indices.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Configured,
    Setup,
    FinalSetup,
}

/// What a user-facing name resolved to.
#[derive(Debug, Clone)]
enum Target {
    Output(usize),
    Input(usize),
    /// Several inputs sharing one promoted name and one source; values are
    /// presented in `units`.
    Promoted {
        src: usize,
        inputs: Vec<usize>,
        units: Option<String>,
    },
}

struct Runtime {
    model: Model,
    components: Vec<Option<Box<dyn Component>>>,
    comms: Vec<Option<Box<dyn CommunicationBackend>>>,
    vectors: Vectors,
    jacobian: Jacobian,
}

pub struct Problem {
    name: String,
    work_dir: PathBuf,
    model_def: Option<Group>,
    comm: Box<dyn CommunicationBackend>,
    rt: Option<Runtime>,
    stage: Stage,
    recorders: Vec<Box<dyn CaseRecorder>>,
    /// Recorders before this index have been started.
    started: usize,
    recording_options: RecordingOptions,
    warnings: Vec<String>,
}

impl Problem {
    pub fn new(model: Group) -> Self {
        Self {
            name: "problem".to_string(),
            work_dir: PathBuf::from("."),
            model_def: Some(model),
            comm: Box::new(SingleProcessComm),
            rt: None,
            stage: Stage::Configured,
            recorders: Vec::new(),
            started: 0,
            recording_options: RecordingOptions::default(),
            warnings: Vec::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_comm(mut self, comm: impl CommunicationBackend + 'static) -> Self {
        self.comm = Box::new(comm);
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comm(&self) -> &dyn CommunicationBackend {
        self.comm.as_ref()
    }

    /// Directory for this problem's files: `{work_dir}/{name}_out`.
    pub fn outputs_dir(&self) -> PathBuf {
        self.work_dir.join(format!("{}_out", self.name))
    }

    /// The resolved model, after `setup()`.
    pub fn model(&self) -> Result<&Model> {
        Ok(&self.runtime("model")?.model)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn add_recorder(&mut self, recorder: impl CaseRecorder + 'static) {
        self.recorders.push(Box::new(recorder));
    }

    pub fn recording_options_mut(&mut self) -> &mut RecordingOptions {
        &mut self.recording_options
    }

    fn warn(&mut self, msg: String) {
        tracing::warn!("{}", msg);
        self.warnings.push(msg);
    }

    fn runtime(&self, op: &str) -> Result<&Runtime> {
        self.rt.as_ref().ok_or_else(|| self.not_set_up(op))
    }

    fn not_set_up(&self, op: &str) -> CouplerError {
        CouplerError::State(format!(
            "Problem '{}': '{}' cannot be called before setup().",
            self.name, op
        ))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Resolve names, connections and ranks, and allocate values.
    pub fn setup(&mut self) -> Result<()> {
        let _span = tracing::info_span!("setup", problem = %self.name).entered();
        let t = Instant::now();
        let group = self.model_def.take().ok_or_else(|| {
            CouplerError::State(format!(
                "Problem '{}': setup() has already been called.",
                self.name
            ))
        })?;

        let built = model::build(group, self.comm.num_ranks()).map_err(|errors| {
            CouplerError::Setup(format!(
                "\nCollected errors for problem '{}':\n   {}",
                self.name,
                errors.join("\n   ")
            ))
        })?;
        for w in built.warnings {
            self.warnings.push(w);
        }
        let model = built.model;

        // Sub-communicators, parents before children.
        let rank = self.comm.rank();
        let mut comms: Vec<Option<Box<dyn CommunicationBackend>>> =
            (0..model.systems.len()).map(|_| None).collect();
        for sys in 0..model.systems.len() {
            let info = &model.systems[sys];
            let Some(parent) = info.parent else {
                continue;
            };
            if !info.own_comm || !model.systems[parent].ranks.contains(&rank) {
                continue;
            }
            let parent_comm = transfer::comm_for(&model, &comms, self.comm.as_ref(), parent);
            let sub = parent_comm.split(info.ranks.contains(&rank));
            comms[sys] = sub;
        }

        let vectors = Vectors::new(&model);
        let jacobian = Jacobian::new(&model);
        tracing::info!(
            inputs = model.input_size,
            outputs = model.output_size,
            partials = jacobian.len(),
            elapsed_ms = t.elapsed().as_millis() as u64,
            "setup complete"
        );
        self.rt = Some(Runtime {
            model,
            components: built.components,
            comms,
            vectors,
            jacobian,
        });
        self.stage = Stage::Setup;
        Ok(())
    }

    /// Populate inputs from their sources and start recorders.
    pub fn final_setup(&mut self) -> Result<()> {
        if self.stage == Stage::FinalSetup {
            return self.start_recorders();
        }
        let _span = tracing::info_span!("final_setup", problem = %self.name).entered();
        let rt = self.rt.as_mut().ok_or_else(|| {
            CouplerError::State(format!(
                "Problem '{}': 'final_setup' cannot be called before setup().",
                self.name
            ))
        })?;
        {
            let mut exec = Exec {
                model: &rt.model,
                components: &rt.components,
                comms: &rt.comms,
                world: self.comm.as_ref(),
                vectors: &mut rt.vectors,
                stats: None,
            };
            exec.transfer_all(0);
        }

        self.start_recorders()?;
        self.stage = Stage::FinalSetup;
        Ok(())
    }

    pub fn run_model(&mut self) -> Result<()> {
        self.run_model_with(None)
    }

    pub fn run_model_with(&mut self, mut stats: Option<&mut Stats>) -> Result<()> {
        if self.stage < Stage::FinalSetup {
            self.final_setup()?;
        }
        let _span = tracing::info_span!("run_model", problem = %self.name).entered();
        let t = Instant::now();
        let rt = self
            .rt
            .as_mut()
            .ok_or_else(|| CouplerError::State("run_model() called before setup().".into()))?;
        {
            let mut exec = Exec {
                model: &rt.model,
                components: &rt.components,
                comms: &rt.comms,
                world: self.comm.as_ref(),
                vectors: &mut rt.vectors,
                stats: stats.as_deref_mut(),
            };
            exec.run_system(0)?;
        }
        if let Some(s) = stats {
            s.add_phase("run_model", t.elapsed());
        }
        tracing::info!(elapsed_ms = t.elapsed().as_millis() as u64, "run_model complete");
        Ok(())
    }

    /// Fill the declared partials of every local component.
    pub fn compute_partials(&mut self) -> Result<()> {
        let rank = self.comm.rank();
        let name = self.name.clone();
        let rt = self.rt.as_mut().ok_or_else(|| {
            CouplerError::State(format!(
                "Problem '{}': 'compute_partials' cannot be called before setup().",
                name
            ))
        })?;
        let model = &rt.model;
        for (sys, comp) in rt.components.iter().enumerate() {
            let Some(comp) = comp.as_deref() else {
                continue;
            };
            if !model.systems[sys].ranks.contains(&rank) {
                continue;
            }
            let range = model.systems[sys].var_range.clone();
            let declared: Vec<(usize, usize)> = model
                .declared_partials
                .iter()
                .copied()
                .filter(|(of, _)| range.contains(of))
                .collect();
            if declared.is_empty() {
                continue;
            }
            let inputs = ComponentInputs::new(
                range
                    .clone()
                    .filter(|&v| model.vars[v].io == Io::Input)
                    .map(|v| {
                        let var = &model.vars[v];
                        (var.local_name.clone(), rt.vectors.inputs[var.range()].to_vec())
                    })
                    .collect(),
            );
            let mut partials = Partials::new(declared.iter().map(|&(of, wrt)| {
                let (o, w) = (&model.vars[of], &model.vars[wrt]);
                ((o.local_name.clone(), w.local_name.clone()), o.size * w.size)
            }));
            comp.compute_partials(&inputs, &mut partials)
                .map_err(|e| CouplerError::Solve(format!("{}: {}", model.msginfo(sys), e)))?;
            let mut entries = partials.into_entries();
            for (of, wrt) in declared {
                let key = (
                    model.vars[of].local_name.clone(),
                    model.vars[wrt].local_name.clone(),
                );
                if let (Some(vals), Some(sub)) = (entries.remove(&key), rt.jacobian.get_mut(of, wrt)) {
                    sub.val = vals;
                }
            }
        }
        Ok(())
    }

    /// Start recorders added since the last call. Only rank 0 writes.
    fn start_recorders(&mut self) -> Result<()> {
        if self.started == self.recorders.len() {
            return Ok(());
        }
        if self.comm.rank() == 0 {
            let rt = self.runtime("record")?;
            let meta: Vec<VarRecordMeta> = rt
                .model
                .vars
                .iter()
                .map(|v| VarRecordMeta {
                    abs: v.abs.clone(),
                    prom: v.prom.clone(),
                    io: v.io,
                    units: v.units.clone(),
                    size: v.size,
                })
                .collect();
            let dir = self.outputs_dir();
            for rec in &mut self.recorders[self.started..] {
                rec.startup(&dir, &meta)?;
            }
        }
        self.started = self.recorders.len();
        Ok(())
    }

    /// Record the current values under `case_name`. Collective.
    pub fn record(&mut self, case_name: &str) -> Result<()> {
        if self.stage < Stage::FinalSetup {
            self.final_setup()?;
        }
        self.start_recorders()?;
        let rt = self.runtime("record")?;
        let mut case = CaseData {
            name: case_name.to_string(),
            ..CaseData::default()
        };
        for (v, var) in rt.model.vars.iter().enumerate() {
            if !self.recording_options.wants(&var.prom, var.io) {
                continue;
            }
            let vals = self.read(var.io, v, Some(true))?;
            match var.io {
                Io::Input => case.inputs.insert(var.abs.clone(), vals),
                Io::Output => case.outputs.insert(var.abs.clone(), vals),
            };
        }
        if self.comm.rank() == 0 {
            for rec in &mut self.recorders {
                rec.record(&case)?;
            }
        }
        Ok(())
    }

    /// Shut down every recorder.
    pub fn cleanup(&mut self) -> Result<()> {
        for rec in &mut self.recorders {
            rec.shutdown()?;
        }
        Ok(())
    }

    /// Set outputs and inputs from a recorded case.
    pub fn load_case(&mut self, case: &Case) -> Result<()> {
        let targets: Vec<(Target, Vec<f64>)> = {
            let model = &self.runtime("load_case")?.model;
            let outputs = case.outputs.iter().filter_map(|(abs, vals)| {
                model
                    .var_index(abs)
                    .filter(|&v| model.vars[v].io == Io::Output)
                    .map(|v| (Target::Output(v), vals.clone()))
            });
            let inputs = case.inputs.iter().filter_map(|(abs, vals)| {
                model
                    .var_index(abs)
                    .filter(|&v| model.vars[v].io == Io::Input)
                    .map(|v| (Target::Input(v), vals.clone()))
            });
            outputs.chain(inputs).collect()
        };
        for (target, vals) in targets {
            self.set_target(target, Value::Array(vals), &SetOpts::default(), "")?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    fn system_index(&self, path: &str) -> Result<usize> {
        self.runtime("system")?
            .model
            .system_index(path)
            .ok_or_else(|| CouplerError::NotFound(format!("System '{}' not found.", path)))
    }

    /// Inputs, outputs and residuals as seen from the system at `path`.
    pub fn nonlinear_vectors_mut(&mut self, path: &str) -> Result<NonlinearVectorsMut<'_>> {
        let sys = self.system_index(path)?;
        let rank = self.comm.rank();
        let rt = self.rt.as_mut().ok_or_else(|| CouplerError::State("not set up".into()))?;
        let model = &rt.model;
        let Vectors {
            inputs,
            outputs,
            residuals,
        } = &mut rt.vectors;
        Ok(NonlinearVectorsMut {
            inputs: VectorMut::new(model, sys, VecKind::Inputs, inputs, rank),
            outputs: VectorMut::new(model, sys, VecKind::Outputs, outputs, rank),
            residuals: VectorMut::new(model, sys, VecKind::Residuals, residuals, rank),
        })
    }

    /// Partials as seen from the system at `path`.
    pub fn jacobian_mut(&mut self, path: &str) -> Result<JacobianMut<'_>> {
        let sys = self.system_index(path)?;
        let rt = self.rt.as_mut().ok_or_else(|| CouplerError::State("not set up".into()))?;
        Ok(JacobianMut::new(&rt.model, sys, &mut rt.jacobian))
    }

    /// A handle for get/set with names relative to the system at `path`.
    pub fn system(&mut self, path: &str) -> Result<SystemHandle<'_>> {
        let sys = self.system_index(path)?;
        Ok(SystemHandle { problem: self, sys })
    }

    // -----------------------------------------------------------------------
    // Get / set
    // -----------------------------------------------------------------------

    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        self.get_val_with(name, &GetOpts::default())
    }

    pub fn get_val_with(&self, name: &str, opts: &GetOpts) -> Result<Vec<f64>> {
        let target = self.resolve(0, name)?;
        self.get_target(&target, opts)
    }

    pub fn set_val(&mut self, name: &str, val: impl Into<Value>) -> Result<()> {
        self.set_val_with(name, val, &SetOpts::default())
    }

    pub fn set_val_with(&mut self, name: &str, val: impl Into<Value>, opts: &SetOpts) -> Result<()> {
        let target = self.resolve(0, name)?;
        self.set_target(target, val.into(), opts, name)
    }

    /// Resolve a name in the scope of system `sys`.
    fn resolve(&self, sys: usize, name: &str) -> Result<Target> {
        let model = &self.runtime("get_val/set_val")?.model;
        if let Some(vars) = model.resolve_scoped(sys, name, Io::Output) {
            return Ok(Target::Output(vars[0]));
        }
        if let Some(vars) = model.resolve_scoped(sys, name, Io::Input) {
            return promoted_inputs(model, sys, name, vars);
        }
        // Absolute names are accepted anywhere.
        if let Some(v) = model.var_index(name) {
            return Ok(match model.vars[v].io {
                Io::Output => Target::Output(v),
                Io::Input => Target::Input(v),
            });
        }
        Err(CouplerError::NotFound(format!(
            "{}: Variable '{}' not found.{}",
            model.msginfo(sys),
            name,
            model.suggestion_suffix(sys, name)
        )))
    }

    /// Values of one variable, fetched from its owner when asked to.
    fn read(&self, io: Io, var: usize, get_remote: Option<bool>) -> Result<Vec<f64>> {
        let rt = self.runtime("get_val")?;
        let info = &rt.model.vars[var];
        let data = match io {
            Io::Input => &rt.vectors.inputs,
            Io::Output => &rt.vectors.outputs,
        };
        let rank = self.comm.rank();
        if get_remote == Some(true) {
            let mut buf = if info.is_local(rank) {
                data[info.range()].to_vec()
            } else {
                vec![0.0; info.size]
            };
            broadcast_from(self.comm.as_ref(), info.owner, &mut buf);
            return Ok(buf);
        }
        if !info.is_local(rank) {
            return Err(CouplerError::Remote(format!(
                "{}: Variable '{}' is not local to rank {}. You can retrieve values from other \
                 processes using `get_val(<name>, get_remote=True)`.",
                rt.model.msginfo(0),
                info.abs,
                rank
            )));
        }
        Ok(data[info.range()].to_vec())
    }

    fn get_target(&self, target: &Target, opts: &GetOpts) -> Result<Vec<f64>> {
        let model = &self.runtime("get_val")?.model;
        let (mut vals, units) = match target {
            Target::Output(v) => (
                self.read(Io::Output, *v, opts.get_remote)?,
                model.vars[*v].units.clone(),
            ),
            Target::Input(v) => {
                let info = &model.vars[*v];
                match model.conn(*v).filter(|_| opts.from_src) {
                    Some(conn) => {
                        let src = self.read(Io::Output, conn.src, opts.get_remote)?;
                        let mut vals: Vec<f64> = match &conn.indices {
                            Some(idx) => idx.iter().map(|&i| src[i]).collect(),
                            None => src,
                        };
                        conn.conv.apply_all(&mut vals);
                        (vals, info.units.clone())
                    }
                    None => (self.read(Io::Input, *v, opts.get_remote)?, info.units.clone()),
                }
            }
            Target::Promoted { src, units, .. } => {
                let mut vals = self.read(Io::Output, *src, opts.get_remote)?;
                units::convert_values(
                    &mut vals,
                    model.vars[*src].units.as_deref(),
                    units.as_deref(),
                )?;
                (vals, units.clone())
            }
        };

        if opts.units.is_some() {
            units::convert_values(&mut vals, units.as_deref(), opts.units.as_deref())?;
        }
        if let Some(ind) = &opts.indices {
            let idx = ind.resolve(vals.len())?;
            vals = idx.into_iter().map(|i| vals[i]).collect();
        }
        Ok(vals)
    }

    fn set_target(&mut self, target: Target, val: Value, opts: &SetOpts, name: &str) -> Result<()> {
        let rank = self.comm.rank();
        let rt = self.rt.as_mut().ok_or_else(|| {
            CouplerError::State("set_val cannot be called before setup().".into())
        })?;
        let model = &rt.model;
        let vectors = &mut rt.vectors;

        let (size, var_units) = match &target {
            Target::Output(v) | Target::Input(v) => (model.vars[*v].size, model.vars[*v].units.clone()),
            Target::Promoted { src, units, .. } => (model.vars[*src].size, units.clone()),
        };
        let label = if name.is_empty() {
            match &target {
                Target::Output(v) | Target::Input(v) => model.vars[*v].abs.clone(),
                Target::Promoted { src, .. } => model.vars[*src].abs.clone(),
            }
        } else {
            name.to_string()
        };
        let positions: Vec<usize> = match &opts.indices {
            Some(ind) => ind.resolve(size)?,
            None => (0..size).collect(),
        };
        let mut vals = val.fit(positions.len(), &label)?;
        if opts.units.is_some() {
            units::convert_values(&mut vals, opts.units.as_deref(), var_units.as_deref())?;
        }

        match target {
            Target::Output(v) => {
                let info = &model.vars[v];
                if info.is_local(rank) {
                    let data = &mut vectors.outputs[info.range()];
                    for (&p, &x) in positions.iter().zip(&vals) {
                        data[p] = x;
                    }
                }
            }
            Target::Input(v) => {
                let info = &model.vars[v];
                let conn = model.conn(v);
                // Every rank takes the same branch so replicated sources stay equal.
                let partial = info.ranks.len() < model.num_ranks;
                if partial && conn.map(|c| c.has_src_indices).unwrap_or(false) {
                    if info.is_local(rank) {
                        return Ok(());
                    }
                    let msg = format!(
                        "{}: Cannot set the value of '{}': Setting the value of a remote connected \
                         input with src_indices is currently not supported, you must call \
                         `run_model()` to have the outputs populate their corresponding inputs.",
                        model.msginfo(0),
                        info.abs
                    );
                    self.warn(msg);
                    return Ok(());
                }
                if info.is_local(rank) {
                    let data = &mut vectors.inputs[info.range()];
                    for (&p, &x) in positions.iter().zip(&vals) {
                        data[p] = x;
                    }
                }
                if let Some(conn) = conn {
                    let src = &model.vars[conn.src];
                    if src.is_local(rank) {
                        let mut src_vals = vals.clone();
                        conn.conv.inverse().apply_all(&mut src_vals);
                        let data = &mut vectors.outputs[src.range()];
                        for (&p, &x) in positions.iter().zip(&src_vals) {
                            let sp = conn.indices.as_ref().map(|ind| ind[p]).unwrap_or(p);
                            data[sp] = x;
                        }
                    }
                }
            }
            Target::Promoted { src, inputs, units } => {
                let src_info = &model.vars[src];
                if src_info.is_local(rank) {
                    let mut src_vals = vals.clone();
                    units::convert_values(&mut src_vals, units.as_deref(), src_info.units.as_deref())?;
                    let data = &mut vectors.outputs[src_info.range()];
                    for (&p, &x) in positions.iter().zip(&src_vals) {
                        data[p] = x;
                    }
                }
                for v in inputs {
                    let info = &model.vars[v];
                    let direct = model.conn(v).map(|c| c.indices.is_none()).unwrap_or(true);
                    if !direct || !info.is_local(rank) || info.size != size {
                        continue;
                    }
                    let mut in_vals = vals.clone();
                    units::convert_values(&mut in_vals, units.as_deref(), info.units.as_deref())?;
                    let data = &mut vectors.inputs[info.range()];
                    for (&p, &x) in positions.iter().zip(&in_vals) {
                        data[p] = x;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Target for a promoted input name: a single input, or several sharing a
/// source that can stand for all of them.
fn promoted_inputs(model: &Model, sys: usize, name: &str, vars: Vec<usize>) -> Result<Target> {
    if vars.len() == 1 {
        return Ok(Target::Input(vars[0]));
    }
    let srcs: Vec<Option<usize>> = vars.iter().map(|&v| model.conn(v).map(|c| c.src)).collect();
    let same_src = srcs.windows(2).all(|w| w[0] == w[1]);
    if let (true, Some(src)) = (same_src, srcs[0]) {
        if model.is_auto_ivc(src) {
            return Ok(Target::Promoted {
                src,
                units: model.vars[src].units.clone(),
                inputs: vars,
            });
        }
        let first = &model.vars[vars[0]];
        let uniform = vars.iter().all(|&v| {
            model.vars[v].units == first.units
                && model.conn(v).map(|c| c.indices.is_none()).unwrap_or(false)
        });
        if uniform {
            return Ok(Target::Promoted {
                src,
                units: first.units.clone(),
                inputs: vars,
            });
        }
    }
    Err(CouplerError::Ambiguous(model.ambiguous_input_msg(sys, name, &vars)))
}

/// Get/set scoped to one system.
pub struct SystemHandle<'a> {
    problem: &'a mut Problem,
    sys: usize,
}

impl SystemHandle<'_> {
    pub fn pathname(&self) -> &str {
        self.problem
            .rt
            .as_ref()
            .map(|rt| rt.model.systems[self.sys].pathname.as_str())
            .unwrap_or("")
    }

    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        self.get_val_with(name, &GetOpts::default())
    }

    pub fn get_val_with(&self, name: &str, opts: &GetOpts) -> Result<Vec<f64>> {
        let target = self.problem.resolve(self.sys, name)?;
        self.problem.get_target(&target, opts)
    }

    pub fn set_val(&mut self, name: &str, val: impl Into<Value>) -> Result<()> {
        self.set_val_with(name, val, &SetOpts::default())
    }

    pub fn set_val_with(&mut self, name: &str, val: impl Into<Value>, opts: &SetOpts) -> Result<()> {
        let target = self.problem.resolve(self.sys, name)?;
        self.problem.set_target(target, val.into(), opts, name)
    }
}

/// Convenience for config files and the CLI: a problem rooted in `dir`.
pub fn problem_in(model: Group, name: &str, dir: &Path) -> Problem {
    Problem::new(model).named(name).with_work_dir(dir)
}
