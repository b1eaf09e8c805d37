//! Resolution of instrumentation descriptions into flat entity lists.

use std::{collections::HashSet, sync::Arc};

use rayon::prelude::*;

use crate::{
    description::{InstrumentationDescription, InstrumentationEntity, RestrictionSet, ScopeId, ScopeKind},
    host::{HostRuntime, UnitRc},
    registry::ExtensionRegistry,
    scope::{
        ApiSurfaceAnalyzer, ClassAnalyzer, ConstructorAnalyzer, FlatInstrumentationEntity, FlatScopeEntity,
        MethodPatternAnalyzer, ScopeAnalyzer, TraceRootAnalyzer, UnitIndex,
    },
    Result,
};

/// Resolves scopes against the units currently loaded in a host.
///
/// Resolution is all-or-nothing per request for configuration problems (unknown probes,
/// unknown API surfaces, unresolvable catalog types) and best-effort per unit for
/// introspection failures, which are logged and skipped.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use livescope::prelude::*;
///
/// let host = Arc::new(InMemoryHost::new());
/// host.load(
///     UnitBuilder::new("com.app.Service")
///         .method("process", &["int"], |b| b.source("work()"))
///         .method("process", &["int", "int"], |b| b.source("work()")),
/// );
///
/// let registry = Arc::new(ExtensionRegistry::with_builtins()?);
/// let resolver = ScopeResolver::new(host, registry);
/// let description = InstrumentationDescriptionBuilder::new()
///     .method_pattern(&["com.app.Service.process(*)"], &["ResponseTimeProbe"])
///     .build()?;
///
/// assert_eq!(resolver.resolve(&description)?.len(), 2);
/// # Ok::<(), livescope::Error>(())
/// ```
pub struct ScopeResolver {
    host: Arc<dyn HostRuntime>,
    registry: Arc<ExtensionRegistry>,
    parallel: bool,
}

impl ScopeResolver {
    /// Creates a resolver over a host and an extension registry.
    pub fn new(host: Arc<dyn HostRuntime>, registry: Arc<ExtensionRegistry>) -> Self {
        ScopeResolver {
            host,
            registry,
            parallel: true,
        }
    }

    /// Enables or disables parallel visitation of units.
    #[must_use]
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Returns the loaded units scopes may select from.
    ///
    /// Drops units excluded by the global restriction, units of the bootstrap context,
    /// non-instrumentable kinds and units the engine cannot reach. Units whose
    /// reachability cannot be determined are logged and skipped.
    #[must_use]
    pub fn instrumentable_units(&self, global: &RestrictionSet) -> Vec<UnitRc> {
        self.host
            .loaded_units()
            .into_iter()
            .filter(|unit| {
                if unit.loader.is_none()
                    || !unit.flags.is_instrumentable_kind()
                    || global.is_excluded(&unit.name)
                {
                    return false;
                }
                match self.host.engine_can_reach(unit) {
                    Ok(reachable) => reachable,
                    Err(error) => {
                        log::warn!(
                            "Failed to inspect unit {}: {}. Ignoring and resuming",
                            unit.name,
                            error
                        );
                        false
                    }
                }
            })
            .collect()
    }

    /// Builds the analyzer for one request entity.
    ///
    /// The entity's local restriction is merged with `global` before it is handed to the
    /// analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownApiSurface`] or [`crate::Error::UnresolvedCatalogType`]
    /// for API-surface scopes that cannot be bound to the loaded units.
    pub fn analyzer_for(
        &self,
        entity: &InstrumentationEntity,
        global: &RestrictionSet,
    ) -> Result<Box<dyn ScopeAnalyzer>> {
        let restriction = entity.local_restriction.merged_with(global);
        let id = entity.scope.id;

        Ok(match &entity.scope.kind {
            ScopeKind::MethodPattern { patterns } => {
                Box::new(MethodPatternAnalyzer::new(id, patterns.clone(), restriction))
            }
            ScopeKind::Class { patterns } => {
                Box::new(ClassAnalyzer::new(id, patterns.clone(), restriction))
            }
            ScopeKind::ConstructorOfClasses { classes } => {
                Box::new(ConstructorAnalyzer::new(id, classes.clone(), restriction))
            }
            ScopeKind::ApiSurface { name } => {
                let surface = self.registry.surface(name)?;
                let catalog = surface.resolve(self.host.as_ref())?;
                Box::new(ApiSurfaceAnalyzer::new(id, catalog, restriction))
            }
            ScopeKind::TraceRoot { .. } => Box::new(TraceRootAnalyzer::new(id)),
        })
    }

    /// Resolves every scope of a description and pairs the matches with their probes.
    ///
    /// The result is free of duplicates and ordered by scope, then by unit and signature,
    /// then by the order in which the scope lists its probes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the description is invalid, names an unknown probe
    /// or names an API surface that cannot be resolved. Nothing is resolved in that case.
    pub fn resolve(&self, description: &InstrumentationDescription) -> Result<Vec<FlatInstrumentationEntity>> {
        description.validate()?;
        for entity in &description.entities {
            for probe in &entity.probes {
                self.registry.probe(probe)?;
            }
        }

        let global = &description.global_restriction;
        let analyzers = description
            .entities
            .iter()
            .map(|entity| self.analyzer_for(entity, global))
            .collect::<Result<Vec<_>>>()?;

        let units = self.instrumentable_units(global);
        let index = UnitIndex::new(&units);

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for (entity, analyzer) in description.entities.iter().zip(&analyzers) {
            let mut matches: Vec<FlatScopeEntity> = self
                .resolve_with(analyzer.as_ref(), &units, &index)
                .into_iter()
                .collect();
            matches.sort_by(|a, b| (a.unit, &a.signature).cmp(&(b.unit, &b.signature)));

            for scope_entity in &matches {
                for probe in &entity.probes {
                    let flat = scope_entity.with_probe(probe);
                    if seen.insert(flat.clone()) {
                        resolved.push(flat);
                    }
                }
            }
        }

        log::info!(
            "Resolved {} scopes to {} entities over {} units",
            description.entities.len(),
            resolved.len(),
            units.len()
        );
        Ok(resolved)
    }

    /// Runs one analyzer over a set of units.
    ///
    /// A unit whose visitation fails is logged and skipped; the pass never aborts.
    pub fn resolve_with(
        &self,
        analyzer: &dyn ScopeAnalyzer,
        units: &[UnitRc],
        index: &UnitIndex,
    ) -> HashSet<FlatScopeEntity> {
        let visit = |unit: &UnitRc| {
            let mut found = HashSet::new();
            if let Err(error) = analyzer.visit(unit, index, &mut found) {
                log::warn!(
                    "Failed to analyze unit {} for scope {}: {}. Ignoring and resuming",
                    unit.name,
                    analyzer.scope_id(),
                    error
                );
                found.clear();
            }
            found
        };

        if self.parallel {
            units
                .par_iter()
                .map(visit)
                .reduce(HashSet::new, |mut acc, found| {
                    acc.extend(found);
                    acc
                })
        } else {
            units.iter().flat_map(visit).collect()
        }
    }

    /// Returns the scope ids of trace roots in a description.
    #[must_use]
    pub fn trace_roots(description: &InstrumentationDescription) -> Vec<ScopeId> {
        description
            .entities
            .iter()
            .filter(|e| e.scope.kind.is_trace_root())
            .map(|e| e.scope.id)
            .collect()
    }
}
