//! Composition of the probes attached to one member into a single snippet.
//!
//! Probes nest symmetrically around the member body: the generic wrapper opens first and
//! closes last, and among the injected probes the first one injected opens first and closes
//! last. For probes `P1` then `P2` on `f(x)` that gives:
//!
//! ```text
//! before: [generic, P1, P2]
//! body
//! after:  [P2, P1, generic]
//! ```

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    probe::{MultiFragment, ProbeFragmentCompiler, ProbeVariable, METHOD_SIGNATURE},
    registry::ExtensionRegistry,
    Result,
};

/// Denominator used to turn a granularity into an integer ratio.
const GRANULARITY_SCALE: u64 = 1000;
/// Local holding the current thread's id when sampling by granularity.
const THREAD_ID_VARIABLE: &str = "_GenericProbe_threadId";

/// Composed instrumentation code for one target member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Fully-qualified signature of the target
    pub signature: String,
    /// Locals to declare, deduplicated by name
    pub variables: Vec<ProbeVariable>,
    /// Statements prepended to the body
    pub before: Vec<String>,
    /// Statements inserted ahead of every exit
    pub after: Vec<String>,
    /// Statements run ahead of each call site, with signature and scope placeholders intact
    pub incremental: Vec<String>,
}

impl Snippet {
    /// Returns `true` if call sites need expansion hooks.
    #[must_use]
    pub fn has_incremental(&self) -> bool {
        !self.incremental.is_empty()
    }
}

/// Merges the fragments of the probes attached to one target signature.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let registry = ExtensionRegistry::with_builtins()?;
/// let compiler = ProbeFragmentCompiler::new();
///
/// let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.run()");
/// composer.inject("ResponseTimeProbe")?;
/// composer.inject("ResponseTimeProbe")?;
/// let snippet = composer.build()?;
///
/// assert!(snippet.after.iter().any(|s| s.contains("\"com.app.A.run()\"")));
/// # Ok::<(), livescope::Error>(())
/// ```
pub struct ProbeComposer<'a> {
    compiler: &'a ProbeFragmentCompiler,
    registry: &'a ExtensionRegistry,
    generic_probe: &'a str,
    signature: String,
    granularity: f64,
    injected: Vec<Arc<MultiFragment>>,
}

impl<'a> ProbeComposer<'a> {
    /// Starts composing for a target signature.
    ///
    /// # Arguments
    ///
    /// * `compiler` - Fragment compiler and cache
    /// * `registry` - Registry holding the probe definitions
    /// * `generic_probe` - Name of the wrapper probe bracketing all probe code
    /// * `signature` - Fully-qualified signature of the target member
    pub fn new(
        compiler: &'a ProbeFragmentCompiler,
        registry: &'a ExtensionRegistry,
        generic_probe: &'a str,
        signature: impl Into<String>,
    ) -> Self {
        ProbeComposer {
            compiler,
            registry,
            generic_probe,
            signature: signature.into(),
            granularity: 1.0,
            injected: Vec::new(),
        }
    }

    /// Restricts probe code to a fraction of threads.
    #[must_use]
    pub fn with_granularity(mut self, granularity: f64) -> Self {
        self.granularity = granularity;
        self
    }

    /// Adds a probe type. Repeated calls for the same type have no effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownProbe`] or [`crate::Error::Configuration`] if the
    /// probe's fragments are unavailable.
    pub fn inject(&mut self, probe_type: &str) -> Result<&mut Self> {
        if probe_type == self.generic_probe || self.injected.iter().any(|f| f.probe == probe_type)
        {
            return Ok(self);
        }
        let fragments = self.compiler.get_fragments(self.registry, probe_type)?;
        self.injected.push(fragments);
        Ok(self)
    }

    /// Returns the probe types injected so far, in injection order.
    #[must_use]
    pub fn injected(&self) -> Vec<&str> {
        self.injected.iter().map(|f| f.probe.as_str()).collect()
    }

    /// Produces the snippet.
    ///
    /// # Errors
    ///
    /// Returns an error if the generic wrapper probe is unavailable.
    pub fn build(&self) -> Result<Snippet> {
        let generic = self
            .compiler
            .get_fragments(self.registry, self.generic_probe)?;
        let signature = self.signature.as_str();

        let mut before: Vec<String> = generic.before_part(signature).to_vec();
        for fragments in &self.injected {
            before.extend_from_slice(fragments.before_part(signature));
        }

        let mut after = Vec::new();
        for fragments in self.injected.iter().rev() {
            after.extend_from_slice(fragments.after_part(signature));
        }
        after.extend_from_slice(generic.after_part(signature));

        let mut incremental = Vec::new();
        for fragments in &self.injected {
            incremental.extend_from_slice(&fragments.incremental);
        }

        let mut seen = HashSet::new();
        let mut variables: Vec<ProbeVariable> = std::iter::once(&generic)
            .chain(self.injected.iter())
            .flat_map(|f| f.variables.iter())
            .filter(|v| seen.insert(v.name.clone()))
            .cloned()
            .collect();

        if self.granularity < 1.0 {
            // a positive granularity never rounds down to an empty sample
            let threshold = ((self.granularity * GRANULARITY_SCALE as f64).round() as u64).max(1);
            let guard = format!(
                "if ({} % {} < {}) {{",
                THREAD_ID_VARIABLE, GRANULARITY_SCALE, threshold
            );
            if seen.insert(THREAD_ID_VARIABLE.to_string()) {
                variables.push(ProbeVariable {
                    name: THREAD_ID_VARIABLE.to_string(),
                    type_name: "long".to_string(),
                });
            }
            before = wrap(
                vec![format!("{} = thread::current_id();", THREAD_ID_VARIABLE), guard.clone()],
                before,
            );
            after = wrap(vec![guard], after);
        }

        let literal = format!("\"{}\"", signature);
        let substitute = |s: String| s.replace(METHOD_SIGNATURE, &literal);
        log::trace!(
            "Composed {} probes for {}",
            self.injected.len() + 1,
            signature
        );

        Ok(Snippet {
            signature: self.signature.clone(),
            variables,
            before: before.into_iter().map(substitute).collect(),
            after: after.into_iter().map(substitute).collect(),
            incremental,
        })
    }
}

fn wrap(mut prefix: Vec<String>, body: Vec<String>) -> Vec<String> {
    if body.is_empty() {
        return body;
    }
    prefix.extend(body);
    prefix.push("}".to_string());
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeDescriptor;

    fn registry() -> Result<ExtensionRegistry> {
        let registry = ExtensionRegistry::new();
        registry.register_probe(
            ProbeDescriptor::new("GenericProbe")
                .variable("_GenericProbe_startTime", "long")
                .before("generic_before();")
                .after("generic_after();"),
        )?;
        for name in ["P1", "P2"] {
            registry.register_probe(
                ProbeDescriptor::new(name)
                    .variable(&format!("_{}_value", name), "long")
                    .variable("_GenericProbe_startTime", "long")
                    .before(&format!("{}_before(__methodSignature);", name))
                    .after(&format!("{}_after();", name)),
            )?;
        }
        registry.register_probe(
            ProbeDescriptor::new("Tracer").incremental("self.expand(__methodSignature, __scopeId);"),
        )?;
        Ok(registry)
    }

    #[test]
    fn test_nesting_order() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();
        let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)");
        composer.inject("P1")?.inject("P2")?;
        let snippet = composer.build()?;

        assert_eq!(
            snippet.before,
            vec![
                "generic_before();",
                "P1_before(\"com.app.A.f(int)\");",
                "P2_before(\"com.app.A.f(int)\");"
            ]
        );
        assert_eq!(snippet.after, vec!["P2_after();", "P1_after();", "generic_after();"]);
        let names: Vec<&str> = snippet.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["_GenericProbe_startTime", "_P1_value", "_P2_value"]);
        assert!(!snippet.has_incremental());
        Ok(())
    }

    #[test]
    fn test_inject_is_idempotent() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();

        let mut once = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)");
        once.inject("P1")?;
        let mut twice = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)");
        twice.inject("P1")?.inject("P1")?.inject("GenericProbe")?;

        assert_eq!(twice.injected(), vec!["P1"]);
        assert_eq!(once.build()?, twice.build()?);
        Ok(())
    }

    #[test]
    fn test_incremental_keeps_placeholders() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();
        let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)");
        composer.inject("Tracer")?;
        let snippet = composer.build()?;

        assert_eq!(snippet.incremental, vec!["Tracer::expand(__methodSignature, __scopeId);"]);
        assert!(snippet.has_incremental());
        Ok(())
    }

    #[test]
    fn test_granularity_guard() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();
        let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)")
            .with_granularity(0.25);
        composer.inject("P1")?;
        let snippet = composer.build()?;

        assert_eq!(snippet.before[0], "_GenericProbe_threadId = thread::current_id();");
        assert_eq!(snippet.before[1], "if (_GenericProbe_threadId % 1000 < 250) {");
        assert_eq!(snippet.before.last().map(String::as_str), Some("}"));
        assert_eq!(snippet.after[0], "if (_GenericProbe_threadId % 1000 < 250) {");
        assert_eq!(snippet.after.last().map(String::as_str), Some("}"));
        assert!(snippet.variables.iter().any(|v| v.name == "_GenericProbe_threadId"));
        Ok(())
    }

    #[test]
    fn test_tiny_granularity_keeps_one_slot() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();
        let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)")
            .with_granularity(0.0001);
        composer.inject("P1")?;
        let snippet = composer.build()?;

        assert_eq!(snippet.before[1], "if (_GenericProbe_threadId % 1000 < 1) {");
        assert_eq!(snippet.after[0], "if (_GenericProbe_threadId % 1000 < 1) {");
        Ok(())
    }

    #[test]
    fn test_unknown_probe() -> Result<()> {
        let registry = registry()?;
        let compiler = ProbeFragmentCompiler::new();
        let mut composer = ProbeComposer::new(&compiler, &registry, "GenericProbe", "com.app.A.f(int)");
        assert!(composer.inject("Missing").is_err());

        let composer = ProbeComposer::new(&compiler, &registry, "NoSuchWrapper", "com.app.A.f(int)");
        assert!(composer.build().is_err());
        Ok(())
    }
}
