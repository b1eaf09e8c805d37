//! The managed-code host the engine is embedded in.
//!
//! The engine never talks to a runtime directly. Everything it needs (enumerating loaded
//! units, reading their current code and substituting new code) goes through the
//! [`HostRuntime`] trait. Instrumented code calls back into the engine through
//! [`ExpansionCallback`] when it reaches a trace expansion hook.
//!
//! # Key Components
//!
//! - [`HostRuntime`] - Introspection and live code substitution
//! - [`ExpansionCallback`] - Entry point invoked by instrumented code at expansion hooks
//! - [`InMemoryHost`] - A complete host that keeps units in memory and interprets their code
//! - [`unit`] - Unit and member model
//! - [`code`] - Replaceable code representation
//!
//! # Thread Safety
//!
//! Hosts are shared between the control thread submitting requests and application threads
//! executing instrumented code, so both traits require `Send + Sync`.

pub mod code;
mod memory;
pub mod unit;

pub use code::{CallSite, CodeUnit, ExpansionSite, LocalVariable, MethodBody, Statement};
pub use memory::{ExecutionTrace, InMemoryHost};
pub use unit::{
    split_signature, LoaderId, Member, MemberKind, MemberModifiers, Unit, UnitBuilder, UnitFlags,
    UnitId, UnitRc, CONSTRUCTOR_NAME,
};

use crate::{description::ScopeId, Result};

/// Introspection and live code substitution over a running process.
pub trait HostRuntime: Send + Sync {
    /// Returns every currently loaded unit.
    fn loaded_units(&self) -> Vec<UnitRc>;

    /// Returns the loaded units with the given qualified name, in load order.
    fn find_units(&self, name: &str) -> Vec<UnitRc> {
        self.loaded_units()
            .into_iter()
            .filter(|unit| unit.name == name)
            .collect()
    }

    /// Returns a loaded unit by identity.
    fn unit(&self, id: UnitId) -> Option<UnitRc> {
        self.loaded_units().into_iter().find(|unit| unit.id == id)
    }

    /// Reports whether the engine's own code-loading context can see the unit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Resolution`] if the unit cannot be introspected.
    fn engine_can_reach(&self, unit: &Unit) -> Result<bool>;

    /// Returns a copy of the unit's current code representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is unknown or its code cannot be read.
    fn current_code(&self, unit: UnitId) -> Result<CodeUnit>;

    /// Substitutes the unit's live code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Swap`] if the runtime refuses the substitution. The unit then
    /// keeps its prior code.
    fn redefine(&self, unit: UnitId, code: CodeUnit) -> Result<()>;
}

/// Receiver for expansion hooks reached by executing instrumented code.
pub trait ExpansionCallback: Send + Sync {
    /// Called ahead of invoking `callee` from code instrumented for trace scope `scope_id`.
    fn on_call_site(&self, callee: &str, scope_id: ScopeId);
}

/// An [`ExpansionCallback`] that ignores every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

impl ExpansionCallback for NoExpansion {
    fn on_call_site(&self, _callee: &str, _scope_id: ScopeId) {}
}
