//! Model resolution.
//!
//! Consumes a `Group` tree and produces an immutable `Model` ready for value
//! storage and execution.
//!
//! 1. Flatten the tree in pre-order, run component setup, register variables
//!    under absolute names (`g.c.x`).
//! 2. Promote bottom-up: each group maps its children's names into its own
//!    namespace, stacking any promote-level src_indices on the inputs.
//! 3. Resolve explicit connections per group, then implicit connections
//!    (same promoted name at the model), then create `_auto_ivc` sources for
//!    every input still without one.
//! 4. Compose src_indices against source sizes, check sizes and units, and
//!    assign each connection to the group that transfers it.
//! 5. Assign ranks (parallel groups split their ranks between children) and
//!    lay out the flat value vectors.
//!
//! Errors are collected rather than returned one at a time so a single
//! `setup()` reports everything wrong with a model.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use crate::component::{Component, Io, VarDecls};
use crate::group::{Connection, Group, InputDefaults, PromoteKind, Promotes, System};
use crate::indices::{self, SrcIndices};
use crate::names;
use crate::solver::nonlinear::NonlinearSolver;
use crate::units::{self, UnitConversion};

/// Path and local name prefix of the automatic source component.
pub const AUTO_IVC: &str = "_auto_ivc";

/// A resolved system (group or component).
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Dotted path; empty for the model.
    pub pathname: String,
    pub name: String,
    pub class_name: String,
    pub parent: Option<usize>,
    /// Children in execution order.
    pub children: Vec<usize>,
    pub is_group: bool,
    pub parallel: bool,
    pub solver: NonlinearSolver,
    /// Variables declared at or below this system.
    pub var_range: Range<usize>,
    /// Promoted input names (relative to this system) to variables.
    pub prom_in: BTreeMap<String, Vec<usize>>,
    /// Promoted output names (relative to this system) to variables.
    pub prom_out: BTreeMap<String, usize>,
    /// World ranks this system is local on.
    pub ranks: Vec<usize>,
    /// True when `ranks` differs from the parent's and a sub-communicator is needed.
    pub own_comm: bool,
    /// For groups: per child position, the inputs this group transfers into it.
    pub transfers: Vec<Vec<usize>>,
}

/// A resolved variable.
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub abs: String,
    pub local_name: String,
    pub io: Io,
    /// Owning component's system index.
    pub comp: usize,
    pub size: usize,
    pub shape: Vec<usize>,
    pub units: Option<String>,
    pub init: Vec<f64>,
    pub desc: String,
    /// Promoted name at the model.
    pub prom: String,
    /// Offset into the flat vector of its io kind.
    pub offset: usize,
    pub ranks: Vec<usize>,
    /// Lowest rank the variable is local on.
    pub owner: usize,
}

impl VarInfo {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }

    pub fn is_local(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }
}

/// Resolved connection feeding one input.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    pub src: usize,
    /// Flat source positions, one per input element.
    pub indices: Option<Vec<usize>>,
    /// Source units to input units.
    pub conv: UnitConversion,
    pub has_src_indices: bool,
    /// Group that performs the transfer.
    pub lca: usize,
}

/// Immutable result of setup.
#[derive(Debug, Clone)]
pub struct Model {
    pub systems: Vec<SystemInfo>,
    pub vars: Vec<VarInfo>,
    pub conns: Vec<Option<ConnInfo>>,
    pub declared_partials: Vec<(usize, usize)>,
    pub input_size: usize,
    pub output_size: usize,
    pub num_ranks: usize,
    abs_index: HashMap<String, usize>,
    path_index: HashMap<String, usize>,
}

/// What `build` hands back to the problem.
pub struct BuildOutput {
    pub model: Model,
    /// Component objects indexed by system; `None` for groups and `_auto_ivc`.
    pub components: Vec<Option<Box<dyn Component>>>,
    pub warnings: Vec<String>,
}

impl Model {
    /// Message prefix for a system: `<model> <class Group>` or `'g' <class Group>`.
    pub fn msginfo(&self, sys: usize) -> String {
        msginfo(&self.systems[sys])
    }

    pub fn system_index(&self, path: &str) -> Option<usize> {
        self.path_index.get(path).copied()
    }

    pub fn var_index(&self, abs: &str) -> Option<usize> {
        self.abs_index.get(abs).copied()
    }

    pub fn conn(&self, input: usize) -> Option<&ConnInfo> {
        self.conns.get(input).and_then(Option::as_ref)
    }

    /// Absolute names of one io kind in declaration order.
    pub fn var_names(&self, io: Io) -> Vec<&str> {
        self.vars
            .iter()
            .filter(|v| v.io == io)
            .map(|v| v.abs.as_str())
            .collect()
    }

    pub fn is_auto_ivc(&self, var: usize) -> bool {
        self.vars[var].comp == self.auto_ivc_system().unwrap_or(usize::MAX)
    }

    pub fn auto_ivc_system(&self) -> Option<usize> {
        self.system_index(AUTO_IVC)
    }

    /// Resolve `name` inside system `sys`: promoted name first, then the
    /// absolute name relative to the system.
    pub fn resolve_scoped(&self, sys: usize, name: &str, io: Io) -> Option<Vec<usize>> {
        let info = &self.systems[sys];
        let promoted = match io {
            Io::Input => info.prom_in.get(name).cloned(),
            Io::Output => info.prom_out.get(name).map(|&v| vec![v]),
        };
        if promoted.is_some() {
            return promoted;
        }
        let abs = names::join(&info.pathname, name);
        self.var_index(&abs)
            .filter(|&v| self.vars[v].io == io && info.var_range.contains(&v))
            .map(|v| vec![v])
    }

    /// Promoted names visible in `sys` close to `name`, for "did you mean".
    pub fn suggestions(&self, sys: usize, name: &str) -> Vec<String> {
        let info = &self.systems[sys];
        let candidates = info
            .prom_in
            .keys()
            .chain(info.prom_out.keys())
            .filter(|n| !n.starts_with(AUTO_IVC))
            .map(String::as_str);
        names::suggest(name, candidates)
    }

    /// ` Perhaps you meant ...` suffix, empty when nothing is close.
    pub fn suggestion_suffix(&self, sys: usize, name: &str) -> String {
        let close = self.suggestions(sys, name);
        if close.is_empty() {
            String::new()
        } else {
            format!(
                " Perhaps you meant one of the following variables: {}.",
                names::quoted_list(&close)
            )
        }
    }

    /// Error text for a promoted input name shared by several inputs.
    pub fn ambiguous_input_msg(&self, sys: usize, name: &str, inputs: &[usize]) -> String {
        let abs: Vec<&str> = inputs.iter().map(|&v| self.vars[v].abs.as_str()).collect();
        format!(
            "{}: The promoted name {} is invalid because it refers to multiple inputs: [{}]. \
             Access the value from the connected output variable {} instead.",
            self.msginfo(sys),
            name,
            abs.join(" ,"),
            name
        )
    }

    /// Position of the child of `group` whose subtree holds `var`.
    fn child_position(&self, group: usize, var: usize) -> Option<usize> {
        self.systems[group]
            .children
            .iter()
            .position(|&c| self.systems[c].var_range.contains(&var))
    }
}

fn msginfo(info: &SystemInfo) -> String {
    if info.pathname.is_empty() {
        format!("<model> <class {}>", info.class_name)
    } else {
        format!("'{}' <class {}>", info.pathname, info.class_name)
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Pending {
    promotes: Vec<Promotes>,
    connections: Vec<Connection>,
    input_defaults: BTreeMap<String, InputDefaults>,
    partials: Vec<(String, String)>,
}

struct Builder {
    systems: Vec<SystemInfo>,
    pending: Vec<Pending>,
    vars: Vec<VarInfo>,
    components: Vec<Option<Box<dyn Component>>>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Resolve a model tree. Returns every error found, or the model.
pub fn build(root: Group, num_ranks: usize) -> std::result::Result<BuildOutput, Vec<String>> {
    let _span = tracing::info_span!("model_setup").entered();
    let mut b = Builder {
        systems: Vec::new(),
        pending: Vec::new(),
        vars: Vec::new(),
        components: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    b.flatten("", String::new(), None, System::Group(root), Vec::new());

    let mut stacks: Vec<Vec<SrcIndices>> = vec![Vec::new(); b.vars.len()];
    let mut explicit: Vec<Option<usize>> = vec![None; b.vars.len()];
    for sys in (0..b.systems.len()).rev() {
        b.promote(sys, &mut stacks);
        b.connect_explicit(sys, &mut stacks, &mut explicit);
    }

    let mut src_of = b.connect_implicit(&explicit);
    b.create_auto_ivc(&stacks, &mut src_of);
    stacks.resize(b.vars.len(), Vec::new());

    b.assign_ranks(num_ranks);
    let partials = b.resolve_partials();

    let mut model = b.finish_layout(num_ranks, partials);
    b.resolve_connections(&mut model, &stacks, &src_of);

    if !b.errors.is_empty() {
        return Err(b.errors);
    }

    tracing::info!(
        systems = model.systems.len(),
        inputs = model.var_names(Io::Input).len(),
        outputs = model.var_names(Io::Output).len(),
        "model resolved"
    );

    Ok(BuildOutput {
        model,
        components: b.components,
        warnings: b.warnings,
    })
}

impl Builder {
    fn flatten(
        &mut self,
        name: &str,
        parent_path: String,
        parent: Option<usize>,
        system: System,
        promotes: Vec<Promotes>,
    ) {
        let idx = self.systems.len();
        let pathname = if parent.is_none() {
            String::new()
        } else {
            names::join(&parent_path, name)
        };
        let class_name = system.class_name();
        let var_start = self.vars.len();

        self.systems.push(SystemInfo {
            pathname: pathname.clone(),
            name: name.to_string(),
            class_name,
            parent,
            children: Vec::new(),
            is_group: matches!(system, System::Group(_)),
            parallel: false,
            solver: NonlinearSolver::RunOnce,
            var_range: var_start..var_start,
            prom_in: BTreeMap::new(),
            prom_out: BTreeMap::new(),
            ranks: Vec::new(),
            own_comm: false,
            transfers: Vec::new(),
        });
        self.pending.push(Pending {
            promotes,
            ..Pending::default()
        });
        if let Some(p) = parent {
            self.systems[p].children.push(idx);
        }

        match system {
            System::Group(group) => {
                self.components.push(None);
                let Group {
                    subsystems,
                    connections,
                    input_defaults,
                    parallel,
                    nonlinear_solver,
                    dangling_promotes,
                } = group;
                self.systems[idx].parallel = parallel;
                self.systems[idx].solver = nonlinear_solver;
                self.pending[idx].connections = connections;
                self.pending[idx].input_defaults = input_defaults;

                let info = msginfo(&self.systems[idx]);
                for missing in dangling_promotes {
                    self.errors.push(format!(
                        "{}: Could not find subsystem '{}' for promotes.",
                        info, missing
                    ));
                }
                let mut seen = BTreeSet::new();
                for sub in subsystems {
                    if !names::is_valid_name(&sub.name) {
                        self.errors.push(format!(
                            "{}: '{}' is not a valid sub-system name.",
                            info, sub.name
                        ));
                        continue;
                    }
                    if !seen.insert(sub.name.clone()) {
                        self.errors.push(format!(
                            "{}: Subsystem name '{}' is already used.",
                            info, sub.name
                        ));
                        continue;
                    }
                    self.flatten(
                        &sub.name,
                        pathname.clone(),
                        Some(idx),
                        sub.system,
                        sub.promotes,
                    );
                }
            }
            System::Component(mut comp) => {
                let mut decls = VarDecls::new();
                if let Err(e) = comp.setup(&mut decls) {
                    self.errors
                        .push(format!("{}: {}", msginfo(&self.systems[idx]), e));
                }
                for decl in decls.vars() {
                    self.vars.push(VarInfo {
                        abs: names::join(&pathname, &decl.name),
                        local_name: decl.name.clone(),
                        io: decl.io,
                        comp: idx,
                        size: decl.meta.size(),
                        shape: decl.meta.shape.clone(),
                        units: decl.meta.units.clone(),
                        init: decl.meta.val.clone(),
                        desc: decl.meta.desc.clone(),
                        prom: String::new(),
                        offset: 0,
                        ranks: Vec::new(),
                        owner: 0,
                    });
                    if let Some(u) = &decl.meta.units {
                        if let Err(e) = units::parse_units(u) {
                            self.errors.push(format!(
                                "{}: {}",
                                msginfo(&self.systems[idx]),
                                e
                            ));
                        }
                    }
                }
                self.pending[idx].partials = decls.partials().to_vec();
                self.components.push(Some(comp));
            }
        }

        self.systems[idx].var_range = var_start..self.vars.len();
    }

    /// Fill `prom_in`/`prom_out` for one system from its children.
    fn promote(&mut self, sys: usize, stacks: &mut [Vec<SrcIndices>]) {
        if !self.systems[sys].is_group {
            let range = self.systems[sys].var_range.clone();
            for v in range {
                let local = self.vars[v].local_name.clone();
                match self.vars[v].io {
                    Io::Input => {
                        self.systems[sys].prom_in.insert(local, vec![v]);
                    }
                    Io::Output => {
                        self.systems[sys].prom_out.insert(local, v);
                    }
                }
            }
            return;
        }

        let children = self.systems[sys].children.clone();
        for ch in children {
            let specs = self.pending[ch].promotes.clone();
            let mut matched: Vec<Vec<bool>> =
                specs.iter().map(|s| vec![false; s.entries.len()]).collect();
            let child_name = self.systems[ch].name.clone();

            let child_in = self.systems[ch].prom_in.clone();
            for (name, vars) in child_in {
                let (promoted, src_indices) = promoted_name(&specs, &name, Io::Input, &mut matched);
                let gname = promoted.unwrap_or_else(|| names::join(&child_name, &name));
                if let Some(ind) = src_indices {
                    for &v in &vars {
                        stacks[v].push(ind.clone());
                    }
                }
                self.systems[sys].prom_in.entry(gname).or_default().extend(vars);
            }

            let child_out = self.systems[ch].prom_out.clone();
            for (name, var) in child_out {
                let (promoted, _) = promoted_name(&specs, &name, Io::Output, &mut matched);
                let gname = promoted.unwrap_or_else(|| names::join(&child_name, &name));
                if let Some(&existing) = self.systems[sys].prom_out.get(&gname) {
                    self.errors.push(format!(
                        "{}: Output name '{}' refers to multiple outputs: {}.",
                        msginfo(&self.systems[sys]),
                        gname,
                        names::quoted_list(&[&self.vars[existing].abs, &self.vars[var].abs])
                    ));
                    continue;
                }
                self.systems[sys].prom_out.insert(gname, var);
            }

            let mut unmatched: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
            for (spec, flags) in specs.iter().zip(&matched) {
                for (entry, hit) in spec.entries.iter().zip(flags) {
                    if !hit {
                        unmatched
                            .entry(entry.kind.label())
                            .or_default()
                            .push(entry.pattern.clone());
                    }
                }
            }
            for (label, patterns) in unmatched {
                self.errors.push(format!(
                    "{}: '{}' failed to find any matches for the following names or patterns: {}.",
                    msginfo(&self.systems[ch]),
                    label,
                    names::quoted_list(&patterns)
                ));
            }
        }
    }

    fn connect_explicit(
        &mut self,
        sys: usize,
        stacks: &mut [Vec<SrcIndices>],
        explicit: &mut [Option<usize>],
    ) {
        let connections = std::mem::take(&mut self.pending[sys].connections);
        let info = msginfo(&self.systems[sys]);
        for conn in connections {
            let src = match self.systems[sys].prom_out.get(&conn.src) {
                Some(&s) => s,
                None => {
                    let why = if self.systems[sys].prom_in.contains_key(&conn.src) {
                        format!(
                            "'{}' is an input. All connections must be from an output to an input.",
                            conn.src
                        )
                    } else {
                        format!("'{}' doesn't exist.", conn.src)
                    };
                    self.errors.push(format!(
                        "{}: Attempted to connect from '{}' to '{}', but {}",
                        info, conn.src, conn.tgt, why
                    ));
                    continue;
                }
            };
            let targets = match self.systems[sys].prom_in.get(&conn.tgt) {
                Some(t) => t.clone(),
                None => {
                    let why = if self.systems[sys].prom_out.contains_key(&conn.tgt) {
                        format!(
                            "'{}' is an output. All connections must be from an output to an input.",
                            conn.tgt
                        )
                    } else {
                        format!("'{}' doesn't exist.", conn.tgt)
                    };
                    self.errors.push(format!(
                        "{}: Attempted to connect from '{}' to '{}', but {}",
                        info, conn.src, conn.tgt, why
                    ));
                    continue;
                }
            };
            for tgt in targets {
                if self.vars[tgt].comp == self.vars[src].comp {
                    self.errors.push(format!(
                        "{}: Output and input are in the same System for connection from '{}' to '{}'.",
                        info, conn.src, conn.tgt
                    ));
                    continue;
                }
                if let Some(prev) = explicit[tgt] {
                    self.errors.push(format!(
                        "{}: Input '{}' cannot be connected to '{}' because it's already connected to '{}'.",
                        info, self.vars[tgt].abs, self.vars[src].abs, self.vars[prev].abs
                    ));
                    continue;
                }
                explicit[tgt] = Some(src);
                if let Some(ind) = &conn.src_indices {
                    stacks[tgt].push(ind.clone());
                }
            }
        }
    }

    /// Implicit connections through shared promoted names at the model.
    fn connect_implicit(&mut self, explicit: &[Option<usize>]) -> Vec<Option<usize>> {
        let mut src_of: Vec<Option<usize>> = vec![None; self.vars.len()];
        let root_in = self.systems[0].prom_in.clone();
        let info = msginfo(&self.systems[0]);
        for (prom, inputs) in &root_in {
            let implicit = self.systems[0].prom_out.get(prom).copied();
            for &tgt in inputs {
                match (explicit[tgt], implicit) {
                    (Some(s), Some(o)) if s != o => {
                        self.errors.push(format!(
                            "{}: Input '{}' cannot be connected to '{}' because it's already connected to '{}'.",
                            info, self.vars[tgt].abs, self.vars[o].abs, self.vars[s].abs
                        ));
                    }
                    (Some(s), _) => src_of[tgt] = Some(s),
                    (None, Some(o)) => {
                        if self.vars[o].comp == self.vars[tgt].comp {
                            self.errors.push(format!(
                                "{}: Output and input are in the same System for connection from '{}' to '{}'.",
                                info, self.vars[o].abs, self.vars[tgt].abs
                            ));
                        } else {
                            src_of[tgt] = Some(o);
                        }
                    }
                    (None, None) => {}
                }
            }
        }
        src_of
    }

    /// Promoted name of `var` inside group `sys`.
    fn prom_name_in(&self, sys: usize, var: usize) -> Option<String> {
        self.systems[sys]
            .prom_in
            .iter()
            .find(|(_, vars)| vars.contains(&var))
            .map(|(name, _)| name.clone())
    }

    /// Merge `set_input_defaults` from the lowest group holding all `inputs`
    /// up to the model. Lower groups take precedence.
    fn find_input_defaults(&self, inputs: &[usize]) -> (InputDefaults, usize, String) {
        let mut common =
            names::common_ancestor(inputs.iter().map(|&v| self.vars[v].abs.as_str()));
        let mut sys = loop {
            match self.systems.iter().position(|s| s.pathname == common) {
                Some(i) if self.systems[i].is_group => break i,
                _ if common.is_empty() => break 0,
                _ => {
                    common = match common.rsplit_once('.') {
                        Some((parent, _)) => parent.to_string(),
                        None => String::new(),
                    };
                }
            }
        };
        let hint_sys = sys;
        let hint_name = self
            .prom_name_in(hint_sys, inputs[0])
            .unwrap_or_else(|| self.vars[inputs[0]].prom.clone());

        let mut merged = InputDefaults::default();
        loop {
            if let Some(name) = self.prom_name_in(sys, inputs[0]) {
                if let Some(d) = self.pending[sys].input_defaults.get(&name) {
                    if merged.val.is_none() {
                        merged.val = d.val.clone();
                    }
                    if merged.units.is_none() {
                        merged.units = d.units.clone();
                    }
                }
            }
            match self.systems[sys].parent {
                Some(p) => sys = p,
                None => break,
            }
        }
        (merged, hint_sys, hint_name)
    }

    fn create_auto_ivc(&mut self, stacks: &[Vec<SrcIndices>], src_of: &mut Vec<Option<usize>>) {
        let root_in = self.systems[0].prom_in.clone();
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (prom, inputs) in root_in {
            let open: Vec<usize> = inputs.into_iter().filter(|&t| src_of[t].is_none()).collect();
            if !open.is_empty() {
                groups.push((prom, open));
            }
        }
        if groups.is_empty() {
            return;
        }

        // Model-level promoted names are needed for default lookups.
        for (prom, inputs) in &groups {
            for &t in inputs {
                self.vars[t].prom = prom.clone();
            }
        }

        let auto = self.systems.len();
        let var_start = self.vars.len();
        self.systems.push(SystemInfo {
            pathname: AUTO_IVC.to_string(),
            name: AUTO_IVC.to_string(),
            class_name: "_AutoIndepVarComp".to_string(),
            parent: Some(0),
            children: Vec::new(),
            is_group: false,
            parallel: false,
            solver: NonlinearSolver::RunOnce,
            var_range: var_start..var_start,
            prom_in: BTreeMap::new(),
            prom_out: BTreeMap::new(),
            ranks: Vec::new(),
            own_comm: false,
            transfers: Vec::new(),
        });
        self.pending.push(Pending::default());
        self.components.push(None);
        self.systems[0].children.insert(0, auto);

        let root_info = msginfo(&self.systems[0]);
        for (n, (prom, mut inputs)) in groups.into_iter().enumerate() {
            inputs.sort_by(|a, b| self.vars[*a].abs.cmp(&self.vars[*b].abs));
            let (defaults, hint_sys, hint_name) = self.find_input_defaults(&inputs);
            let mut differ: Vec<&str> = Vec::new();

            let unit_set: BTreeSet<Option<String>> =
                inputs.iter().map(|&t| self.vars[t].units.clone()).collect();
            let src_units = match &defaults.units {
                Some(u) => Some(u.clone()),
                None if unit_set.len() > 1 => {
                    differ.push("units");
                    None
                }
                None => unit_set.into_iter().next().flatten(),
            };

            let plain: Vec<usize> = inputs
                .iter()
                .copied()
                .filter(|&t| stacks[t].is_empty())
                .collect();
            let val = match &defaults.val {
                Some(v) => v.clone(),
                None => match plain.first() {
                    Some(&first) => {
                        let same_size = plain.iter().all(|&t| self.vars[t].size == self.vars[first].size);
                        if plain.len() == inputs.len()
                            && same_size
                            && plain.iter().any(|&t| self.vars[t].init != self.vars[first].init)
                        {
                            differ.push("val");
                        }
                        let mut val = self.vars[first].init.clone();
                        if let Err(e) = units::convert_values(
                            &mut val,
                            self.vars[first].units.as_deref(),
                            src_units.as_deref(),
                        ) {
                            self.errors.push(format!("{}: {}", root_info, e));
                        }
                        val
                    }
                    None => {
                        self.errors.push(format!(
                            "{}: The source shape for the inputs promoted to '{}' cannot be determined \
                             because all of them have src_indices. Call <group>.set_input_defaults('{}', val=?) \
                             to specify the source value.",
                            root_info, prom, hint_name
                        ));
                        continue;
                    }
                },
            };

            if !differ.is_empty() {
                let abs: Vec<&str> = inputs.iter().map(|&t| self.vars[t].abs.as_str()).collect();
                let args: Vec<String> = differ.iter().map(|d| format!("{}=?", d)).collect();
                let group_desc = if self.systems[hint_sys].pathname.is_empty() {
                    "the model".to_string()
                } else {
                    format!("the Group named '{}'", self.systems[hint_sys].pathname)
                };
                self.errors.push(format!(
                    "{}: The following inputs, {}, promoted to '{}', are connected but their metadata \
                     entries {} differ. Call <group>.set_input_defaults('{}', {}), where <group> is {} \
                     to remove the ambiguity.",
                    root_info,
                    names::quoted_list(&abs),
                    prom,
                    names::quoted_list(&differ),
                    hint_name,
                    args.join(", "),
                    group_desc
                ));
            }

            let local = format!("v{}", n);
            let abs = names::join(AUTO_IVC, &local);
            let var = self.vars.len();
            self.vars.push(VarInfo {
                abs: abs.clone(),
                local_name: local.clone(),
                io: Io::Output,
                comp: auto,
                size: val.len(),
                shape: vec![val.len()],
                units: src_units,
                init: val,
                desc: String::new(),
                prom: abs.clone(),
                offset: 0,
                ranks: Vec::new(),
                owner: 0,
            });
            self.systems[auto].prom_out.insert(local, var);
            self.systems[0].prom_out.insert(abs, var);
            src_of.resize(self.vars.len(), None);
            for t in inputs {
                src_of[t] = Some(var);
            }
        }

        let end = self.vars.len();
        self.systems[auto].var_range = var_start..end;
        self.systems[0].var_range = 0..end;
    }

    fn assign_ranks(&mut self, num_ranks: usize) {
        self.systems[0].ranks = (0..num_ranks.max(1)).collect();
        for sys in 0..self.systems.len() {
            let ranks = self.systems[sys].ranks.clone();
            let children = self.systems[sys].children.clone();
            if self.systems[sys].parallel && !children.is_empty() {
                let k = children.len();
                if ranks.len() >= k {
                    let base = ranks.len() / k;
                    let extra = ranks.len() % k;
                    let mut start = 0;
                    for (i, &ch) in children.iter().enumerate() {
                        let count = base + usize::from(i < extra);
                        self.systems[ch].ranks = ranks[start..start + count].to_vec();
                        start += count;
                    }
                } else {
                    for (i, &ch) in children.iter().enumerate() {
                        self.systems[ch].ranks = vec![ranks[i % ranks.len()]];
                    }
                }
            } else {
                for &ch in &children {
                    self.systems[ch].ranks = ranks.clone();
                }
            }
            for &ch in &children {
                self.systems[ch].own_comm = self.systems[ch].ranks != ranks;
            }
        }
        for var in &mut self.vars {
            var.ranks = self.systems[var.comp].ranks.clone();
            var.owner = var.ranks.iter().copied().min().unwrap_or(0);
        }
    }

    fn resolve_partials(&mut self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for sys in 0..self.systems.len() {
            let declared = std::mem::take(&mut self.pending[sys].partials);
            if declared.is_empty() {
                continue;
            }
            let path = self.systems[sys].pathname.clone();
            let find = |b: &Builder, name: &str, io: Io| {
                let abs = names::join(&path, name);
                b.vars.iter().position(|v| v.abs == abs && v.io == io)
            };
            for (of, wrt) in declared {
                let of_var = find(self, &of, Io::Output);
                let wrt_var = find(self, &wrt, Io::Input).or_else(|| find(self, &wrt, Io::Output));
                match (of_var, wrt_var) {
                    (Some(o), Some(w)) => out.push((o, w)),
                    (None, _) => self.errors.push(format!(
                        "{}: No matches were found for of='{}'.",
                        msginfo(&self.systems[sys]),
                        of
                    )),
                    (_, None) => self.errors.push(format!(
                        "{}: No matches were found for wrt='{}'.",
                        msginfo(&self.systems[sys]),
                        wrt
                    )),
                }
            }
        }
        out
    }

    fn finish_layout(&mut self, num_ranks: usize, partials: Vec<(usize, usize)>) -> Model {
        // Model-level promoted names for every variable.
        let root_in = self.systems[0].prom_in.clone();
        for (prom, vars) in root_in {
            for v in vars {
                self.vars[v].prom = prom.clone();
            }
        }
        let root_out = self.systems[0].prom_out.clone();
        for (prom, v) in root_out {
            self.vars[v].prom = prom;
        }

        let (mut in_off, mut out_off) = (0, 0);
        for var in &mut self.vars {
            match var.io {
                Io::Input => {
                    var.offset = in_off;
                    in_off += var.size;
                }
                Io::Output => {
                    var.offset = out_off;
                    out_off += var.size;
                }
            }
        }

        for sys in &mut self.systems {
            if sys.is_group {
                sys.transfers = vec![Vec::new(); sys.children.len()];
            }
        }

        let abs_index = self
            .vars
            .iter()
            .enumerate()
            .map(|(i, v)| (v.abs.clone(), i))
            .collect();
        let path_index = self
            .systems
            .iter()
            .enumerate()
            .map(|(i, s)| (s.pathname.clone(), i))
            .collect();

        Model {
            systems: self.systems.clone(),
            vars: self.vars.clone(),
            conns: vec![None; self.vars.len()],
            declared_partials: partials,
            input_size: in_off,
            output_size: out_off,
            num_ranks: num_ranks.max(1),
            abs_index,
            path_index,
        }
    }

    /// Compose indices, check sizes and units, and assign transfers.
    fn resolve_connections(
        &mut self,
        model: &mut Model,
        stacks: &[Vec<SrcIndices>],
        src_of: &[Option<usize>],
    ) {
        for tgt in 0..model.vars.len() {
            if model.vars[tgt].io != Io::Input {
                continue;
            }
            let Some(src) = src_of.get(tgt).copied().flatten() else {
                continue;
            };
            let tgt_info = msginfo(&model.systems[model.vars[tgt].comp]);
            let (src_abs, tgt_abs) = (model.vars[src].abs.clone(), model.vars[tgt].abs.clone());

            let indices = match indices::compose(&stacks[tgt], model.vars[src].size) {
                Ok(ind) => ind,
                Err(e) => {
                    self.errors.push(format!("{}: {}", tgt_info, e));
                    continue;
                }
            };
            let selected = indices.as_ref().map(Vec::len).unwrap_or(model.vars[src].size);
            if selected != model.vars[tgt].size {
                let msg = if indices.is_some() {
                    format!(
                        "{}: The source indices for the connection from '{}' to '{}' select {} values \
                         but the input has size {}.",
                        tgt_info, src_abs, tgt_abs, selected, model.vars[tgt].size
                    )
                } else {
                    format!(
                        "{}: The source and target shapes do not match for the connection from '{}' to '{}'. \
                         The source size is {} but the target size is {}.",
                        tgt_info, src_abs, tgt_abs, selected, model.vars[tgt].size
                    )
                };
                self.errors.push(msg);
                continue;
            }

            let src_units = model.vars[src].units.clone();
            let tgt_units = model.vars[tgt].units.clone();
            let conv = match (&src_units, &tgt_units) {
                (Some(su), Some(tu)) => match units::conversion(su, tu) {
                    Ok(c) => c,
                    Err(_) => {
                        self.errors.push(format!(
                            "{}: Output units of '{}' for '{}' are incompatible with input units of '{}' for '{}'.",
                            tgt_info, su, src_abs, tu, tgt_abs
                        ));
                        continue;
                    }
                },
                (Some(su), None) if !model.is_auto_ivc(src) => {
                    self.warn(format!(
                        "{}: Output '{}' with units of '{}' is connected to input '{}' which has no units.",
                        msginfo(&model.systems[0]),
                        src_abs,
                        su,
                        tgt_abs
                    ));
                    UnitConversion::IDENTITY
                }
                (None, Some(tu)) if !model.is_auto_ivc(src) => {
                    self.warn(format!(
                        "{}: Input '{}' with units of '{}' is connected to output '{}' which has no units.",
                        msginfo(&model.systems[0]),
                        tgt_abs,
                        tu,
                        src_abs
                    ));
                    UnitConversion::IDENTITY
                }
                _ => UnitConversion::IDENTITY,
            };

            let src_path = &model.systems[model.vars[src].comp].pathname;
            let tgt_path = &model.systems[model.vars[tgt].comp].pathname;
            let lca_path = common_path(src_path, tgt_path);
            let lca = if model.is_auto_ivc(src) {
                0
            } else {
                model.system_index(&lca_path).unwrap_or(0)
            };
            if let Some(k) = model.child_position(lca, tgt) {
                model.systems[lca].transfers[k].push(tgt);
            }

            model.conns[tgt] = Some(ConnInfo {
                src,
                indices,
                conv,
                has_src_indices: !stacks[tgt].is_empty(),
                lca,
            });
        }
    }

    fn warn(&mut self, msg: String) {
        tracing::warn!("{}", msg);
        self.warnings.push(msg);
    }
}

/// First promote entry matching `name`; marks every matching entry.
fn promoted_name(
    specs: &[Promotes],
    name: &str,
    io: Io,
    matched: &mut [Vec<bool>],
) -> (Option<String>, Option<SrcIndices>) {
    let mut result: (Option<String>, Option<SrcIndices>) = (None, None);
    for (si, spec) in specs.iter().enumerate() {
        for (ei, entry) in spec.entries.iter().enumerate() {
            let applies = match entry.kind {
                PromoteKind::Any => true,
                PromoteKind::Inputs => io == Io::Input,
                PromoteKind::Outputs => io == Io::Output,
            };
            if !applies || !names::glob_match(&entry.pattern, name) {
                continue;
            }
            matched[si][ei] = true;
            if result.0.is_none() {
                result.0 = Some(entry.rename.clone().unwrap_or_else(|| name.to_string()));
                if io == Io::Input {
                    result.1 = spec.src_indices.clone();
                }
            }
        }
    }
    result
}

/// Deepest common system path of two system paths.
fn common_path(a: &str, b: &str) -> String {
    if a.is_empty() || b.is_empty() {
        return String::new();
    }
    a.split('.')
        .zip(b.split('.'))
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect::<Vec<_>>()
        .join(".")
}
