//! Replaceable code representation of a unit.
//!
//! The engine only needs the narrow set of transformations used for probe injection:
//! declaring locals, prepending statements, appending statements ahead of every exit and
//! inserting expansion hooks ahead of call sites. [`CodeUnit`] models exactly that. A unit's
//! code is a map from short member signature to [`MethodBody`]; a body is a list of local
//! declarations followed by a flat statement list.
//!
//! Bodies are value types. The injector always works on a clone and hands the finished
//! representation to the host, so a unit's live code is only ever replaced wholesale.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{description::ScopeId, host::UnitId};

/// A call from one member to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Qualified name of the callee's unit
    pub unit: String,
    /// Short signature of the callee, `name(params)`
    pub member: String,
    /// Whether the call has no receiver
    pub is_static: bool,
}

impl CallSite {
    /// Returns the fully-qualified callee signature.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}.{}", self.unit, self.member)
    }
}

/// Hook placed ahead of a call site that reports the callee to the trace expander.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpansionSite {
    /// Fully-qualified signature of the callee about to be invoked
    pub callee: String,
    /// Trace scope this hook belongs to
    pub scope_id: ScopeId,
    /// Rendered incremental fragment
    pub code: Vec<String>,
}

/// One statement of a member body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statement {
    /// Opaque source text, executed as-is by the host
    Source(String),
    /// Invocation of another member
    Call(CallSite),
    /// Expansion hook inserted for trace scopes
    Expansion(ExpansionSite),
    /// Exit from the member
    Return,
}

/// A local variable declared at the top of a body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalVariable {
    /// Variable name
    pub name: String,
    /// Type name as written in the probe
    pub type_name: String,
}

/// Code of one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodBody {
    /// Locals declared ahead of the first statement
    pub locals: Vec<LocalVariable>,
    /// Statements in execution order
    pub statements: Vec<Statement>,
}

impl MethodBody {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source statement.
    #[must_use]
    pub fn source(mut self, text: impl Into<String>) -> Self {
        self.statements.push(Statement::Source(text.into()));
        self
    }

    /// Appends an instance call to `unit.member`.
    #[must_use]
    pub fn call(mut self, unit: impl Into<String>, member: impl Into<String>) -> Self {
        self.statements.push(Statement::Call(CallSite {
            unit: unit.into(),
            member: member.into(),
            is_static: false,
        }));
        self
    }

    /// Appends a static call to `unit.member`.
    #[must_use]
    pub fn static_call(mut self, unit: impl Into<String>, member: impl Into<String>) -> Self {
        self.statements.push(Statement::Call(CallSite {
            unit: unit.into(),
            member: member.into(),
            is_static: true,
        }));
        self
    }

    /// Appends an explicit exit.
    #[must_use]
    pub fn returns(mut self) -> Self {
        self.statements.push(Statement::Return);
        self
    }

    /// Declares a local unless one with the same name exists.
    ///
    /// Returns `false` if the name was already declared.
    pub fn declare_local(&mut self, name: &str, type_name: &str) -> bool {
        if self.locals.iter().any(|l| l.name == name) {
            return false;
        }
        self.locals.push(LocalVariable {
            name: name.to_string(),
            type_name: type_name.to_string(),
        });
        true
    }

    /// Prepends source statements ahead of the existing body.
    pub fn insert_before(&mut self, statements: &[String]) {
        if statements.is_empty() {
            return;
        }
        let prefix = statements.iter().cloned().map(Statement::Source);
        self.statements.splice(0..0, prefix);
    }

    /// Inserts source statements ahead of every exit, and at the end if the body falls through.
    pub fn insert_after(&mut self, statements: &[String]) {
        if statements.is_empty() {
            return;
        }
        let mut rewritten = Vec::with_capacity(self.statements.len() + statements.len());
        for statement in self.statements.drain(..) {
            if statement == Statement::Return {
                rewritten.extend(statements.iter().cloned().map(Statement::Source));
            }
            rewritten.push(statement);
        }
        if rewritten.last() != Some(&Statement::Return) {
            rewritten.extend(statements.iter().cloned().map(Statement::Source));
        }
        self.statements = rewritten;
    }

    /// Iterates the call sites of this body.
    pub fn call_sites(&self) -> impl Iterator<Item = &CallSite> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Call(site) => Some(site),
            _ => None,
        })
    }
}

/// Complete replaceable representation of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// The unit this code belongs to
    pub unit: UnitId,
    /// Member bodies keyed by short signature
    pub bodies: BTreeMap<String, MethodBody>,
}

impl CodeUnit {
    /// Creates an empty code unit.
    #[must_use]
    pub fn new(unit: UnitId) -> Self {
        CodeUnit {
            unit,
            bodies: BTreeMap::new(),
        }
    }

    /// Returns the body of a member.
    #[must_use]
    pub fn body(&self, short_signature: &str) -> Option<&MethodBody> {
        self.bodies.get(short_signature)
    }

    /// Returns the body of a member for rewriting.
    pub fn body_mut(&mut self, short_signature: &str) -> Option<&mut MethodBody> {
        self.bodies.get_mut(short_signature)
    }

    /// Computes a SHA-1 fingerprint over the canonical rendering of this unit.
    ///
    /// Two code units have equal fingerprints exactly when they render identically.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "unit {}", self.unit)?;
        for (signature, body) in &self.bodies {
            writeln!(f, "  {} {{", signature)?;
            for local in &body.locals {
                writeln!(f, "    local {}: {};", local.name, local.type_name)?;
            }
            for statement in &body.statements {
                match statement {
                    Statement::Source(text) => writeln!(f, "    {}", text)?,
                    Statement::Call(site) => {
                        let kind = if site.is_static { "static " } else { "" };
                        writeln!(f, "    {}call {};", kind, site.signature())?;
                    }
                    Statement::Expansion(site) => {
                        writeln!(f, "    expand[{}] {};", site.scope_id, site.callee)?;
                    }
                    Statement::Return => writeln!(f, "    return;")?,
                }
            }
            writeln!(f, "  }}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(body: &MethodBody) -> Vec<String> {
        body.statements
            .iter()
            .map(|s| match s {
                Statement::Source(text) => text.clone(),
                Statement::Call(site) => format!("call {}", site.signature()),
                Statement::Expansion(site) => format!("expand {}", site.callee),
                Statement::Return => "return".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_insert_before_and_after_fallthrough() {
        let mut body = MethodBody::new().source("work()");
        body.insert_before(&["a()".to_string(), "b()".to_string()]);
        body.insert_after(&["z()".to_string()]);
        assert_eq!(sources(&body), vec!["a()", "b()", "work()", "z()"]);
    }

    #[test]
    fn test_insert_after_every_exit() {
        let mut body = MethodBody::new()
            .source("if (x) {")
            .returns()
            .source("}")
            .source("work()")
            .returns();
        body.insert_after(&["done()".to_string()]);
        assert_eq!(
            sources(&body),
            vec!["if (x) {", "done()", "return", "}", "work()", "done()", "return"]
        );
    }

    #[test]
    fn test_declare_local_is_unique() {
        let mut body = MethodBody::new();
        assert!(body.declare_local("_GenericProbe_startTime", "long"));
        assert!(!body.declare_local("_GenericProbe_startTime", "long"));
        assert_eq!(body.locals.len(), 1);
    }

    #[test]
    fn test_call_sites() {
        let body = MethodBody::new()
            .call("com.app.A", "run()")
            .source("x()")
            .static_call("com.app.B", "util(int)");
        let sites: Vec<String> = body.call_sites().map(CallSite::signature).collect();
        assert_eq!(sites, vec!["com.app.A.run()", "com.app.B.util(int)"]);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut code = CodeUnit::new(UnitId(7));
        code.bodies
            .insert("run()".to_string(), MethodBody::new().source("work()"));
        let original = code.clone();
        assert_eq!(code.fingerprint(), original.fingerprint());
        assert_eq!(code.fingerprint().len(), 40);

        code.body_mut("run()").unwrap().insert_before(&["probe()".to_string()]);
        assert_ne!(code.fingerprint(), original.fingerprint());
    }
}
