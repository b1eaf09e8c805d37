use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    host::{CodeUnit, HostRuntime, MethodBody, UnitId},
    inject::{
        call_sites::{rewrite_call_sites, ExpansionHook},
        InstrumentationSet, MemberTargets, UnitTargets,
    },
    probe::{ProbeComposer, ProbeFragmentCompiler, Snippet},
    registry::ExtensionRegistry,
    Error, Result,
};

/// Result of one injection pass.
#[derive(Debug, Clone, Default)]
pub struct InjectionOutcome {
    /// New code per unit, ready for the swapper
    pub replacements: BTreeMap<UnitId, CodeUnit>,
    /// Units that could not be rewritten and were left unmodified
    pub failed: BTreeSet<UnitId>,
}

/// Rewrites units with the composed probe code of their targets.
///
/// The injector owns the pristine snapshot of every unit it has touched. A unit is always
/// rewritten starting from that snapshot, so a member is never instrumented twice and a
/// revert only needs to hand the snapshot back to the host.
pub struct CodeInjector {
    host: Arc<dyn HostRuntime>,
    registry: Arc<ExtensionRegistry>,
    compiler: Arc<ProbeFragmentCompiler>,
    generic_probe: String,
    originals: HashMap<UnitId, CodeUnit>,
}

impl CodeInjector {
    /// Creates an injector.
    ///
    /// # Arguments
    ///
    /// * `host` - Runtime providing the current code of units
    /// * `registry` - Probe definitions
    /// * `compiler` - Fragment compiler and cache
    /// * `generic_probe` - Wrapper probe bracketing all probe code
    pub fn new(
        host: Arc<dyn HostRuntime>,
        registry: Arc<ExtensionRegistry>,
        compiler: Arc<ProbeFragmentCompiler>,
        generic_probe: impl Into<String>,
    ) -> Self {
        CodeInjector {
            host,
            registry,
            compiler,
            generic_probe: generic_probe.into(),
            originals: HashMap::new(),
        }
    }

    /// Returns the pristine snapshot of a unit, if it has been touched.
    #[must_use]
    pub fn original(&self, unit: UnitId) -> Option<&CodeUnit> {
        self.originals.get(&unit)
    }

    /// Returns the units with a stored snapshot, in id order.
    #[must_use]
    pub fn snapshotted_units(&self) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self.originals.keys().copied().collect();
        units.sort();
        units
    }

    /// Drops the snapshot of a unit after its pristine code has been restored.
    pub fn forget(&mut self, unit: UnitId) -> Option<CodeUnit> {
        self.originals.remove(&unit)
    }

    /// Builds the instrumented code of every unit in `set`.
    ///
    /// Per-unit failures are logged and reported in [`InjectionOutcome::failed`]; they never
    /// abort the pass. A unit's snapshot is stored the first time it is rewritten.
    pub fn inject(&mut self, set: &InstrumentationSet) -> InjectionOutcome {
        let mut outcome = InjectionOutcome::default();

        for (unit, targets) in set.iter() {
            let pristine = match self.originals.get(unit) {
                Some(code) => Ok(code.clone()),
                None => self.host.current_code(*unit),
            };

            let result = pristine.and_then(|pristine| {
                let rewritten = self.instrument_unit(&pristine, targets)?;
                Ok((pristine, rewritten))
            });

            match result {
                Ok((pristine, rewritten)) => {
                    if !self.originals.contains_key(unit) {
                        log::debug!(
                            "Snapshot of {} taken ({})",
                            targets.name,
                            pristine.fingerprint()
                        );
                        self.originals.insert(*unit, pristine);
                    }
                    outcome.replacements.insert(*unit, rewritten);
                }
                Err(error) => {
                    log::warn!(
                        "Failed to instrument unit {}: {}. Ignoring and resuming",
                        targets.name,
                        error
                    );
                    outcome.failed.insert(*unit);
                }
            }
        }
        outcome
    }

    fn instrument_unit(&self, pristine: &CodeUnit, targets: &UnitTargets) -> Result<CodeUnit> {
        let mut code = pristine.clone();

        for (short, member) in &targets.members {
            let body = code.body_mut(short).ok_or_else(|| Error::Injection {
                unit: targets.name.clone(),
                message: format!("member {} has no code", short),
            })?;
            let snippet = self.compose(member).map_err(|error| Error::Injection {
                unit: targets.name.clone(),
                message: format!("{}: {}", member.signature, error),
            })?;
            self.apply(body, member, &snippet)?;
        }
        Ok(code)
    }

    fn compose(&self, member: &MemberTargets) -> Result<Snippet> {
        let mut composer = ProbeComposer::new(
            &self.compiler,
            &self.registry,
            &self.generic_probe,
            member.signature.as_str(),
        )
        .with_granularity(member.granularity());
        for probe in member.probes() {
            composer.inject(probe)?;
        }
        composer.build()
    }

    fn apply(&self, body: &mut MethodBody, member: &MemberTargets, snippet: &Snippet) -> Result<()> {
        for variable in &snippet.variables {
            body.declare_local(&variable.name, &variable.type_name);
        }

        if snippet.has_incremental() {
            let mut hooks = Vec::new();
            for attachment in &member.attachments {
                let fragments = self
                    .compiler
                    .get_fragments(&self.registry, &attachment.probe_type)?;
                if !fragments.has_incremental()
                    || hooks
                        .iter()
                        .any(|h: &ExpansionHook<'_>| h.scope_id == attachment.scope_id)
                {
                    continue;
                }
                hooks.push(ExpansionHook {
                    scope_id: attachment.scope_id,
                    restriction: &attachment.restriction,
                    code: &snippet.incremental,
                });
            }
            let inserted = rewrite_call_sites(body, &member.signature, &hooks);
            log::trace!("Hooked {} call sites in {}", inserted, member.signature);
        }

        body.insert_before(&snippet.before);
        body.insert_after(&snippet.after);
        Ok(())
    }
}
