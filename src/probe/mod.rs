//! Probe definitions, fragment compilation and snippet composition.
//!
//! A probe is a reusable measurement fragment: code to run before a member body, code to run
//! before each exit, the locals that code needs, and optionally an incremental fragment run
//! ahead of every call site (used by trace scopes). Probe authors write plain templates; the
//! [`ProbeFragmentCompiler`] checks and rewrites them once per probe type into a
//! [`MultiFragment`], and the [`ProbeComposer`] merges the fragments of all probes attached to
//! one member into a [`Snippet`].
//!
//! # Placeholders
//!
//! Templates may use a small set of placeholders that are substituted with injection-time
//! expressions:
//!
//! | Placeholder | Replaced with | When |
//! |---|---|---|
//! | `__methodSignature` | quoted signature of the target member | composition |
//! | `__parameter[i]` / `__parameter` | `$args[i]` / `$args` | compilation |
//! | `__returnObject` | `$_` | compilation |
//! | `__scopeId` | trace scope id | call-site rewriting |
//!
//! Any other `self.<name>` is qualified as `<Probe>::<name>` unless `<name>` is one of the
//! probe's own variables or a shared `_GenericProbe_*` context variable.
//!
//! # Template Form
//!
//! ```text
//! probe SqlQueryProbe
//! var _SqlQueryProbe_query: String
//! before requires "execute", "prepare"
//!     _SqlQueryProbe_query = __parameter[0];
//! end
//! after
//!     _GenericProbe_collector.record_query(__methodSignature, self._SqlQueryProbe_query);
//! end
//! ```
//!
//! # Key Components
//!
//! - [`ProbeDescriptor`] - A probe definition, built in code or parsed from a template
//! - [`ProbeFragmentCompiler`] - Compiles descriptors into cached [`MultiFragment`]s
//! - [`ProbeComposer`] - Merges fragments for one target into a [`Snippet`]
//! - [`builtin`] - The probes registered by default

pub mod builtin;
mod compiler;
mod composer;
mod fragment;
mod template;

pub use compiler::ProbeFragmentCompiler;
pub use composer::{ProbeComposer, Snippet};
pub use fragment::{ConditionalFragment, MultiFragment};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Placeholder for the quoted signature of the instrumented member.
pub const METHOD_SIGNATURE: &str = "__methodSignature";
/// Placeholder for the parameter array.
pub const PARAMETER: &str = "__parameter";
/// Placeholder for the return value.
pub const RETURN_OBJECT: &str = "__returnObject";
/// Placeholder for the trace scope id in incremental fragments.
pub const SCOPE_ID: &str = "__scopeId";
/// Prefix of the context variables shared by all probes on a member.
pub const SHARED_CONTEXT_PREFIX: &str = "_GenericProbe_";

/// A local variable a probe declares at the instrumented site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeVariable {
    /// Variable name, conventionally prefixed with `_<Probe>_`
    pub name: String,
    /// Type name in the host language
    pub type_name: String,
}

/// A fragment of template code, optionally guarded by a signature condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentTemplate {
    /// The fragment applies to signatures containing any of these substrings; empty means
    /// unconditional
    pub requires: Vec<String>,
    /// Template code, one statement per line
    pub code: String,
}

/// Definition of a probe type.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let probe = ProbeDescriptor::new("CounterProbe")
///     .variable("_CounterProbe_hits", "long")
///     .before("_CounterProbe_hits = self.increment();")
///     .after_if(&["execute"], "_GenericProbe_collector.count(__methodSignature);");
///
/// let fragments = ProbeFragmentCompiler::compile(&probe)?;
/// assert_eq!(
///     fragments.before_part("com.app.A.run()"),
///     ["_CounterProbe_hits = CounterProbe::increment();".to_string()]
/// );
/// assert!(fragments.after_part("com.app.A.run()").is_empty());
/// # Ok::<(), livescope::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Probe type name
    pub name: String,
    /// Locals the probe introduces at the target
    pub variables: Vec<ProbeVariable>,
    /// Before fragments; the first matching conditional wins, else the unconditional one
    pub before: Vec<FragmentTemplate>,
    /// After fragments, selected like `before`
    pub after: Vec<FragmentTemplate>,
    /// Code run ahead of each internal call site of a traced member
    pub incremental: Option<String>,
}

impl ProbeDescriptor {
    /// Starts an empty probe definition.
    pub fn new(name: impl Into<String>) -> Self {
        ProbeDescriptor {
            name: name.into(),
            variables: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            incremental: None,
        }
    }

    /// Parses the template form described in the [module documentation](self).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the template is malformed.
    pub fn parse(text: &str) -> Result<Self> {
        template::parse(text)
    }

    /// Declares a local variable.
    #[must_use]
    pub fn variable(mut self, name: &str, type_name: &str) -> Self {
        self.variables.push(ProbeVariable {
            name: name.to_string(),
            type_name: type_name.to_string(),
        });
        self
    }

    /// Adds the unconditional before fragment.
    #[must_use]
    pub fn before(self, code: &str) -> Self {
        self.before_if(&[], code)
    }

    /// Adds a before fragment applying to signatures containing any of `requires`.
    #[must_use]
    pub fn before_if(mut self, requires: &[&str], code: &str) -> Self {
        self.before.push(FragmentTemplate {
            requires: requires.iter().map(|r| (*r).to_string()).collect(),
            code: code.to_string(),
        });
        self
    }

    /// Adds the unconditional after fragment.
    #[must_use]
    pub fn after(self, code: &str) -> Self {
        self.after_if(&[], code)
    }

    /// Adds an after fragment applying to signatures containing any of `requires`.
    #[must_use]
    pub fn after_if(mut self, requires: &[&str], code: &str) -> Self {
        self.after.push(FragmentTemplate {
            requires: requires.iter().map(|r| (*r).to_string()).collect(),
            code: code.to_string(),
        });
        self
    }

    /// Sets the incremental fragment.
    #[must_use]
    pub fn incremental(mut self, code: &str) -> Self {
        self.incremental = Some(code.to_string());
        self
    }
}
