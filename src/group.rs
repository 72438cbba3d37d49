//! Groups: the interior nodes of a model tree.
//!
//! A group owns subsystems, promotes their variables to its own namespace,
//! and connects outputs to inputs. Nothing is resolved here; `model::build`
//! consumes the tree during `Problem::setup`.

use std::collections::BTreeMap;

use crate::component::{Component, ExecComp, IndepVarComp};
use crate::indices::SrcIndices;
use crate::solver::nonlinear::NonlinearSolver;

/// A subsystem: either a nested group or a component.
pub enum System {
    Group(Group),
    Component(Box<dyn Component>),
}

impl System {
    pub fn component(comp: impl Component + 'static) -> Self {
        System::Component(Box::new(comp))
    }

    pub fn class_name(&self) -> String {
        match self {
            System::Group(g) if g.parallel => "ParallelGroup".to_string(),
            System::Group(_) => "Group".to_string(),
            System::Component(c) => c.class_name().to_string(),
        }
    }
}

impl From<Group> for System {
    fn from(g: Group) -> Self {
        System::Group(g)
    }
}

impl From<ExecComp> for System {
    fn from(c: ExecComp) -> Self {
        System::Component(Box::new(c))
    }
}

impl From<IndepVarComp> for System {
    fn from(c: IndepVarComp) -> Self {
        System::Component(Box::new(c))
    }
}

impl From<Box<dyn Component>> for System {
    fn from(c: Box<dyn Component>) -> Self {
        System::Component(c)
    }
}

/// Which variables a promote entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteKind {
    Any,
    Inputs,
    Outputs,
}

impl PromoteKind {
    /// Name used in "failed to find any matches" messages.
    pub fn label(&self) -> &'static str {
        match self {
            PromoteKind::Any => "promotes",
            PromoteKind::Inputs => "promotes_inputs",
            PromoteKind::Outputs => "promotes_outputs",
        }
    }
}

/// One promote pattern, optionally renamed (`old as new`).
#[derive(Debug, Clone, PartialEq)]
pub struct PromoteEntry {
    pub kind: PromoteKind,
    pub pattern: String,
    pub rename: Option<String>,
}

/// Promotion spec for a subsystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Promotes {
    pub entries: Vec<PromoteEntry>,
    /// Applied to every input this spec promotes.
    pub src_indices: Option<SrcIndices>,
}

impl Promotes {
    pub fn none() -> Self {
        Self::default()
    }

    /// Promote everything (`promotes=['*']`).
    pub fn all() -> Self {
        Self::any(["*"])
    }

    pub fn any<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self::none().with(PromoteKind::Any, patterns)
    }

    pub fn inputs<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self::none().with(PromoteKind::Inputs, patterns)
    }

    pub fn outputs<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self::none().with(PromoteKind::Outputs, patterns)
    }

    /// Add patterns of the given kind. `"old as new"` renames.
    pub fn with<'a>(mut self, kind: PromoteKind, patterns: impl IntoIterator<Item = &'a str>) -> Self {
        for pat in patterns {
            let (pattern, rename) = match pat.split_once(" as ") {
                Some((old, new)) => (old.trim().to_string(), Some(new.trim().to_string())),
                None => (pat.trim().to_string(), None),
            };
            self.entries.push(PromoteEntry {
                kind,
                pattern,
                rename,
            });
        }
        self
    }

    pub fn rename(mut self, kind: PromoteKind, old: &str, new: &str) -> Self {
        self.entries.push(PromoteEntry {
            kind,
            pattern: old.to_string(),
            rename: Some(new.to_string()),
        });
        self
    }

    pub fn with_src_indices(mut self, indices: impl Into<SrcIndices>) -> Self {
        self.src_indices = Some(indices.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A subsystem entry inside a group.
pub struct Subsystem {
    pub name: String,
    pub system: System,
    /// Promote specs in the order they were given; `add_subsystem` first.
    pub promotes: Vec<Promotes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub src: String,
    pub tgt: String,
    pub src_indices: Option<SrcIndices>,
}

/// Defaults for an auto-sourced promoted input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDefaults {
    pub val: Option<Vec<f64>>,
    pub units: Option<String>,
}

impl InputDefaults {
    pub fn units(units: &str) -> Self {
        Self {
            val: None,
            units: Some(units.to_string()),
        }
    }

    pub fn val(val: impl Into<Vec<f64>>) -> Self {
        Self {
            val: Some(val.into()),
            units: None,
        }
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }
}

/// An ordered collection of subsystems.
#[derive(Default)]
pub struct Group {
    pub(crate) subsystems: Vec<Subsystem>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) input_defaults: BTreeMap<String, InputDefaults>,
    pub(crate) parallel: bool,
    pub(crate) nonlinear_solver: NonlinearSolver,
    /// `promotes()` calls naming a subsystem that does not exist.
    pub(crate) dangling_promotes: Vec<String>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group whose subsystems are distributed across ranks.
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn add_subsystem(
        &mut self,
        name: &str,
        system: impl Into<System>,
        promotes: Promotes,
    ) -> &mut Self {
        let promotes = if promotes.is_empty() {
            Vec::new()
        } else {
            vec![promotes]
        };
        self.subsystems.push(Subsystem {
            name: name.to_string(),
            system: system.into(),
            promotes,
        });
        self
    }

    /// Add promotes to an already added subsystem.
    pub fn promotes(&mut self, subsystem: &str, promotes: Promotes) -> &mut Self {
        match self.subsystems.iter_mut().find(|s| s.name == subsystem) {
            Some(sub) => sub.promotes.push(promotes),
            None => self.dangling_promotes.push(subsystem.to_string()),
        }
        self
    }

    /// Connect a promoted output to a promoted input, both relative to this group.
    pub fn connect(&mut self, src: &str, tgt: &str, src_indices: Option<SrcIndices>) -> &mut Self {
        self.connections.push(Connection {
            src: src.to_string(),
            tgt: tgt.to_string(),
            src_indices,
        });
        self
    }

    pub fn set_input_defaults(&mut self, name: &str, defaults: InputDefaults) -> &mut Self {
        self.input_defaults.insert(name.to_string(), defaults);
        self
    }

    pub fn set_nonlinear_solver(&mut self, solver: NonlinearSolver) -> &mut Self {
        self.nonlinear_solver = solver;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_parse_renames() {
        let p = Promotes::inputs(["x as a", "y"]);
        assert_eq!(p.entries[0].pattern, "x");
        assert_eq!(p.entries[0].rename.as_deref(), Some("a"));
        assert_eq!(p.entries[1].rename, None);
        assert_eq!(p.entries[1].kind, PromoteKind::Inputs);
    }

    #[test]
    fn late_promotes_on_missing_subsystem_are_kept() {
        let mut model = Group::new();
        model.promotes("missing", Promotes::all());
        assert_eq!(model.dangling_promotes, vec!["missing".to_string()]);
    }
}
