//! In-memory host runtime.
//!
//! [`InMemoryHost`] keeps loaded units and their code in concurrent maps and can execute
//! member bodies with a small interpreter. It is the reference [`HostRuntime`]: embedders use
//! it to drive the engine without a real runtime, and the test-suite uses it to observe what
//! instrumented code actually does.
//!
//! Execution semantics:
//! - [`Statement::Source`] is recorded in the [`ExecutionTrace`]
//! - [`Statement::Call`] recurses into the callee, resolving inherited members to their declarer
//! - [`Statement::Expansion`] invokes the [`ExpansionCallback`] and records the hook code
//! - [`Statement::Return`] leaves the member
//!
//! A body is cloned when a member is entered, so a redefinition performed while a member
//! runs only affects later invocations, the way live substitution behaves in real runtimes.
//!
//! # Thread Safety
//!
//! All storage is lock-free (`SkipMap`, `DashMap`, `boxcar::Vec`); application threads may
//! call [`InMemoryHost::invoke`] while the engine redefines units.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_skiplist::SkipMap;
use dashmap::{DashMap, DashSet};

use crate::{
    host::{
        split_signature, CodeUnit, ExpansionCallback, HostRuntime, LoaderId, Statement, Unit,
        UnitBuilder, UnitId, UnitRc,
    },
    Error, Result,
};

/// Default maximum call depth of the interpreter.
const MAX_CALL_DEPTH: usize = 256;

/// Observable effects of one [`InMemoryHost::invoke`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    /// Fully-qualified signatures of the members entered, in order
    pub entered: Vec<String>,
    /// Source statements executed, in order, including expansion hook code
    pub executed: Vec<String>,
}

impl ExecutionTrace {
    /// Returns the position of the first executed statement containing `needle`.
    #[must_use]
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.executed.iter().position(|s| s.contains(needle))
    }

    /// Counts the executed statements containing `needle`.
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.executed.iter().filter(|s| s.contains(needle)).count()
    }
}

/// A host runtime that keeps everything in memory.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let host = InMemoryHost::new();
/// host.load(UnitBuilder::new("com.app.Main").method("run", &[], |b| b.source("work()")));
///
/// let trace = host.invoke("com.app.Main.run()", &NoExpansion)?;
/// assert_eq!(trace.executed, vec!["work()"]);
/// # Ok::<(), livescope::Error>(())
/// ```
pub struct InMemoryHost {
    /// Loaded units keyed by identity
    units: SkipMap<UnitId, UnitRc>,
    /// Live code keyed by identity
    code: SkipMap<UnitId, CodeUnit>,
    /// Qualified name to ids, in load order
    names: DashMap<String, Vec<UnitId>>,
    /// Counter for unit identities
    next_id: AtomicU32,
    /// Append-only log of successful redefinitions
    redefinitions: boxcar::Vec<UnitId>,
    /// Units whose redefinition is refused
    refused: DashSet<UnitId>,
    /// Units whose introspection fails
    opaque: DashSet<UnitId>,
    /// Loaders invisible to the engine
    isolated: DashSet<LoaderId>,
    max_depth: usize,
}

impl InMemoryHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        InMemoryHost {
            units: SkipMap::new(),
            code: SkipMap::new(),
            names: DashMap::new(),
            next_id: AtomicU32::new(1),
            redefinitions: boxcar::Vec::new(),
            refused: DashSet::new(),
            opaque: DashSet::new(),
            isolated: DashSet::new(),
            max_depth: MAX_CALL_DEPTH,
        }
    }

    /// Loads a unit and its code, assigning it a fresh identity.
    pub fn load(&self, builder: UnitBuilder) -> UnitRc {
        let id = UnitId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (unit, code) = builder.build(id);
        let unit = UnitRc::new(unit);

        self.names.entry(unit.name.clone()).or_default().push(id);
        self.code.insert(id, code);
        self.units.insert(id, unit.clone());
        unit
    }

    /// Returns the first loaded unit with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnitNotFound`] if no such unit is loaded.
    pub fn find_unit(&self, name: &str) -> Result<UnitRc> {
        self.find_units(name)
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Makes the host refuse (or accept again) live substitution of a unit.
    pub fn refuse_redefinition(&self, unit: UnitId, refuse: bool) {
        if refuse {
            self.refused.insert(unit);
        } else {
            self.refused.remove(&unit);
        }
    }

    /// Makes introspection of a unit fail.
    pub fn fail_introspection(&self, unit: UnitId) {
        self.opaque.insert(unit);
    }

    /// Hides every unit of a loader from the engine.
    pub fn isolate_loader(&self, loader: LoaderId) {
        self.isolated.insert(loader);
    }

    /// Returns the number of successful redefinitions so far.
    #[must_use]
    pub fn redefinition_count(&self) -> usize {
        self.redefinitions.count()
    }

    /// Returns how often a unit has been redefined.
    #[must_use]
    pub fn redefinitions_of(&self, unit: UnitId) -> usize {
        self.redefinitions
            .iter()
            .filter(|(_, id)| **id == unit)
            .count()
    }

    /// Executes a member by fully-qualified signature.
    ///
    /// # Arguments
    ///
    /// * `signature` - Member to run, e.g. `com.app.Main.run()`
    /// * `callback` - Receiver for expansion hooks reached during execution
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnitNotFound`] for unknown units or members, and
    /// [`Error::RecursionLimit`] if the call depth exceeds the host's limit.
    pub fn invoke(
        &self,
        signature: &str,
        callback: &dyn ExpansionCallback,
    ) -> Result<ExecutionTrace> {
        let (unit, member) = split_signature(signature)
            .ok_or_else(|| Error::UnitNotFound(signature.to_string()))?;

        let mut trace = ExecutionTrace::default();
        self.execute(unit, member, callback, 0, &mut trace)?;
        Ok(trace)
    }

    fn execute(
        &self,
        unit_name: &str,
        member: &str,
        callback: &dyn ExpansionCallback,
        depth: usize,
        trace: &mut ExecutionTrace,
    ) -> Result<()> {
        if depth >= self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }

        let unit = self.find_unit(unit_name)?;
        let declarer = match unit.member(member) {
            Some(m) if m.declaring_unit != unit.name => self.find_unit(&m.declaring_unit)?,
            _ => unit,
        };

        let body = self
            .code
            .get(&declarer.id)
            .and_then(|entry| entry.value().body(member).cloned())
            .ok_or_else(|| Error::UnitNotFound(format!("{}.{}", declarer.name, member)))?;

        trace.entered.push(format!("{}.{}", declarer.name, member));
        for statement in body.statements {
            match statement {
                Statement::Source(text) => trace.executed.push(text),
                Statement::Call(site) => {
                    self.execute(&site.unit, &site.member, callback, depth + 1, trace)?;
                }
                Statement::Expansion(site) => {
                    callback.on_call_site(&site.callee, site.scope_id);
                    trace.executed.extend(site.code);
                }
                Statement::Return => break,
            }
        }
        Ok(())
    }
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime for InMemoryHost {
    fn loaded_units(&self) -> Vec<UnitRc> {
        self.units
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn find_units(&self, name: &str) -> Vec<UnitRc> {
        self.names
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| self.unit(*id)).collect())
            .unwrap_or_default()
    }

    fn unit(&self, id: UnitId) -> Option<UnitRc> {
        self.units.get(&id).map(|entry| entry.value().clone())
    }

    fn engine_can_reach(&self, unit: &Unit) -> Result<bool> {
        if self.opaque.contains(&unit.id) {
            return Err(Error::Resolution {
                unit: unit.name.clone(),
                message: "code-loading context cannot be introspected".to_string(),
            });
        }
        Ok(unit
            .loader
            .is_some_and(|loader| !self.isolated.contains(&loader)))
    }

    fn current_code(&self, unit: UnitId) -> Result<CodeUnit> {
        self.code
            .get(&unit)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnitNotFound(unit.to_string()))
    }

    fn redefine(&self, unit: UnitId, code: CodeUnit) -> Result<()> {
        if !self.units.contains_key(&unit) {
            return Err(Error::UnitNotFound(unit.to_string()));
        }
        if self.refused.contains(&unit) {
            return Err(Error::Swap {
                unit,
                message: "redefinition refused by runtime".to_string(),
            });
        }
        if code.unit != unit {
            return Err(Error::Swap {
                unit,
                message: format!("code belongs to unit {}", code.unit),
            });
        }

        self.code.insert(unit, code);
        self.redefinitions.push(unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MethodBody, NoExpansion};

    #[test]
    fn test_invoke_follows_calls() -> Result<()> {
        let host = InMemoryHost::new();
        host.load(
            UnitBuilder::new("com.app.Main")
                .method("run", &[], |b| b.source("start()").call("com.app.Repo", "save(int)").source("end()")),
        );
        host.load(UnitBuilder::new("com.app.Repo").method("save", &["int"], |b| b.source("persist()")));

        let trace = host.invoke("com.app.Main.run()", &NoExpansion)?;
        assert_eq!(trace.entered, vec!["com.app.Main.run()", "com.app.Repo.save(int)"]);
        assert_eq!(trace.executed, vec!["start()", "persist()", "end()"]);
        Ok(())
    }

    #[test]
    fn test_invoke_stops_at_return() -> Result<()> {
        let host = InMemoryHost::new();
        host.load(UnitBuilder::new("com.app.Main").method("run", &[], |b| b.source("a()").returns().source("dead()")));

        let trace = host.invoke("com.app.Main.run()", &NoExpansion)?;
        assert_eq!(trace.executed, vec!["a()"]);
        Ok(())
    }

    #[test]
    fn test_inherited_member_runs_declarer_code() -> Result<()> {
        let host = InMemoryHost::new();
        let base = host.load(UnitBuilder::new("com.app.Base").method("run", &[], |b| b.source("base()")));
        host.load(UnitBuilder::new("com.app.Child").extends(&base));

        let trace = host.invoke("com.app.Child.run()", &NoExpansion)?;
        assert_eq!(trace.entered, vec!["com.app.Base.run()"]);
        Ok(())
    }

    #[test]
    fn test_recursion_limit() {
        let host = InMemoryHost::new();
        host.load(UnitBuilder::new("com.app.Loop").method("spin", &[], |b| b.call("com.app.Loop", "spin()")));

        assert!(matches!(
            host.invoke("com.app.Loop.spin()", &NoExpansion),
            Err(Error::RecursionLimit(MAX_CALL_DEPTH))
        ));
    }

    #[test]
    fn test_redefine_and_refuse() -> Result<()> {
        let host = InMemoryHost::new();
        let unit = host.load(UnitBuilder::new("com.app.Main").method("run", &[], |b| b.source("old()")));

        let mut code = host.current_code(unit.id)?;
        code.bodies.insert("run()".to_string(), MethodBody::new().source("new()"));

        host.refuse_redefinition(unit.id, true);
        assert!(matches!(host.redefine(unit.id, code.clone()), Err(Error::Swap { .. })));
        assert_eq!(host.invoke("com.app.Main.run()", &NoExpansion)?.executed, vec!["old()"]);

        host.refuse_redefinition(unit.id, false);
        host.redefine(unit.id, code)?;
        assert_eq!(host.invoke("com.app.Main.run()", &NoExpansion)?.executed, vec!["new()"]);
        assert_eq!(host.redefinition_count(), 1);
        assert_eq!(host.redefinitions_of(unit.id), 1);
        Ok(())
    }

    #[test]
    fn test_reachability() {
        let host = InMemoryHost::new();
        let app = host.load(UnitBuilder::new("com.app.A"));
        let boot = host.load(UnitBuilder::new("core.Object").loader(None));
        let plugin = host.load(UnitBuilder::new("com.plugin.P").loader(Some(LoaderId(9))));
        host.isolate_loader(LoaderId(9));
        host.fail_introspection(app.id);

        assert!(matches!(host.engine_can_reach(&app), Err(Error::Resolution { .. })));
        assert!(!host.engine_can_reach(&boot).unwrap());
        assert!(!host.engine_can_reach(&plugin).unwrap());
    }

    #[test]
    fn test_find_units_in_load_order() {
        let host = InMemoryHost::new();
        let first = host.load(UnitBuilder::new("com.app.Dup"));
        let second = host.load(UnitBuilder::new("com.app.Dup").loader(Some(LoaderId(2))));

        let found = host.find_units("com.app.Dup");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, first.id);
        assert_eq!(found[1].id, second.id);
        assert!(host.find_unit("com.app.Missing").is_err());
    }
}
