//! API surfaces: named catalogs of members worth instrumenting.
//!
//! An API surface lists the signatures of well-known types (for instance the execute
//! methods of a database statement type) and marker annotations that flag entry points.
//! Scopes refer to a surface by its registered name; at resolution time the catalog is
//! resolved against the loaded units and every unit assignable to a catalog type has its
//! matching members selected.

use std::collections::{BTreeMap, HashSet};

use crate::{
    description::{RestrictionSet, ScopeId},
    host::{HostRuntime, MemberKind, Unit, UnitRc},
    scope::{FlatScopeEntity, ScopeAnalyzer, UnitIndex},
    Error, Result,
};

/// Signatures and markers contributed by an API surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiCatalog {
    /// Declaring type name to short signatures
    pub types: BTreeMap<String, Vec<String>>,
    /// Marker annotation names
    pub markers: Vec<String>,
}

impl ApiCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member `name(params)` of a declaring type.
    #[must_use]
    pub fn member(mut self, type_name: &str, short_signature: &str) -> Self {
        self.types
            .entry(type_name.to_string())
            .or_default()
            .push(short_signature.to_string());
        self
    }

    /// Adds a marker annotation.
    #[must_use]
    pub fn marker(mut self, marker: &str) -> Self {
        self.markers.push(marker.to_string());
        self
    }
}

/// A catalog bound to the currently loaded units.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCatalog {
    /// Loaded representative of each catalog type with its short signatures
    pub types: Vec<(UnitRc, Vec<String>)>,
    /// Markers that have a loaded representative
    pub markers: Vec<String>,
}

/// Capability interface of a registered API surface.
pub trait ApiSurface: Send + Sync {
    /// Registered name, e.g. `Database API`.
    fn name(&self) -> &str;

    /// Human-readable description of what the surface covers.
    fn describe(&self) -> String;

    /// The catalog of the surface.
    fn catalog(&self) -> &ApiCatalog;

    /// Binds the catalog to the loaded units.
    ///
    /// When several loaded units share a catalog type name, the first one loaded is used.
    /// Markers without a loaded representative are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedCatalogType`] if a catalog type is not loaded.
    fn resolve(&self, host: &dyn HostRuntime) -> Result<ResolvedCatalog> {
        let catalog = self.catalog();
        let mut resolved = ResolvedCatalog::default();

        for (type_name, signatures) in &catalog.types {
            let representative = host.find_units(type_name).into_iter().next().ok_or_else(|| {
                Error::UnresolvedCatalogType {
                    surface: self.name().to_string(),
                    type_name: type_name.clone(),
                }
            })?;
            resolved.types.push((representative, signatures.clone()));
        }

        for marker in &catalog.markers {
            if host.find_units(marker).is_empty() {
                log::debug!(
                    "Marker {} of API surface {} is not loaded",
                    marker,
                    self.name()
                );
            } else {
                resolved.markers.push(marker.clone());
            }
        }
        Ok(resolved)
    }
}

/// An API surface defined by a static catalog.
#[derive(Debug, Clone)]
pub struct CatalogSurface {
    name: String,
    description: String,
    catalog: ApiCatalog,
}

impl CatalogSurface {
    /// Creates a surface from a catalog.
    pub fn new(name: impl Into<String>, description: impl Into<String>, catalog: ApiCatalog) -> Self {
        CatalogSurface {
            name: name.into(),
            description: description.into(),
            catalog,
        }
    }
}

impl ApiSurface for CatalogSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        self.description.clone()
    }

    fn catalog(&self) -> &ApiCatalog {
        &self.catalog
    }
}

/// Statement and connection operations of the host's database API.
#[must_use]
pub fn database_api() -> CatalogSurface {
    let catalog = ApiCatalog::new()
        .member("sql.Statement", "execute(String)")
        .member("sql.Statement", "executeQuery(String)")
        .member("sql.Statement", "executeUpdate(String)")
        .member("sql.Statement", "executeBatch()")
        .member("sql.Statement", "addBatch(String)")
        .member("sql.PreparedStatement", "execute()")
        .member("sql.PreparedStatement", "executeQuery()")
        .member("sql.PreparedStatement", "executeUpdate()")
        .member("sql.PreparedStatement", "addBatch()")
        .member("sql.Connection", "prepareStatement(String)")
        .member("sql.Connection", "commit()")
        .member("sql.Connection", "rollback()");
    CatalogSurface::new(
        "Database API",
        "Statement execution and transaction control of database connections",
        catalog,
    )
}

/// Request handlers of the host's web API.
#[must_use]
pub fn entry_point_api() -> CatalogSurface {
    let catalog = ApiCatalog::new()
        .member("web.Servlet", "service(web.Request,web.Response)")
        .member("web.HttpServlet", "doGet(web.Request,web.Response)")
        .member("web.HttpServlet", "doPost(web.Request,web.Response)")
        .marker("web.RequestMapping");
    CatalogSurface::new(
        "Entry Point API",
        "Request handlers and members marked as request mappings",
        catalog,
    )
}

/// Selects members contributed by an API surface.
///
/// For a visited unit assignable to a catalog type, declared members with an equal short
/// signature are selected. Independently, any declared member carrying a cataloged marker
/// is selected regardless of its unit's type.
pub struct ApiSurfaceAnalyzer {
    scope_id: ScopeId,
    catalog: ResolvedCatalog,
    restriction: RestrictionSet,
}

impl ApiSurfaceAnalyzer {
    /// Creates an analyzer over a resolved catalog.
    #[must_use]
    pub fn new(scope_id: ScopeId, catalog: ResolvedCatalog, restriction: RestrictionSet) -> Self {
        ApiSurfaceAnalyzer {
            scope_id,
            catalog,
            restriction,
        }
    }
}

impl ScopeAnalyzer for ApiSurfaceAnalyzer {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn visit(&self, unit: &Unit, index: &UnitIndex, into: &mut HashSet<FlatScopeEntity>) -> Result<()> {
        if self.restriction.is_excluded(&unit.name) {
            return Ok(());
        }

        let api_types: Vec<&Vec<String>> = self
            .catalog
            .types
            .iter()
            .filter(|(api, _)| unit.is_assignable_to(&api.name))
            .map(|(_, signatures)| signatures)
            .collect();

        for member in unit.declared_members() {
            if member.kind != MemberKind::Method
                || !member.has_body()
                || self.restriction.modifier_set_excluded(member.modifiers)
            {
                continue;
            }

            let short = member.short_signature();
            let cataloged = api_types.iter().any(|signatures| signatures.contains(&short));
            let marked = self.catalog.markers.iter().any(|m| member.has_marker(m));

            if cataloged || marked {
                if let Some(entity) = index.entity(unit, member, self.scope_id) {
                    into.insert(entity);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, UnitBuilder, UnitFlags};

    fn database_host() -> InMemoryHost {
        let host = InMemoryHost::new();
        host.load(
            UnitBuilder::new("sql.Statement")
                .flags(UnitFlags::INTERFACE)
                .abstract_method("execute", &["String"]),
        );
        host.load(UnitBuilder::new("sql.PreparedStatement").flags(UnitFlags::INTERFACE));
        host.load(UnitBuilder::new("sql.Connection").flags(UnitFlags::INTERFACE));
        host.load(
            UnitBuilder::new("com.db.StatementImpl")
                .implements("sql.Statement")
                .method("execute", &["String"], |b| b.source("run_query()"))
                .method("close", &[], |b| b),
        );
        host
    }

    #[test]
    fn test_resolve_requires_loaded_types() {
        let host = InMemoryHost::new();
        host.load(UnitBuilder::new("sql.Statement"));

        match database_api().resolve(&host) {
            Err(Error::UnresolvedCatalogType { surface, type_name }) => {
                assert_eq!(surface, "Database API");
                assert_eq!(type_name, "sql.Connection");
            }
            other => panic!("unexpected result {:?}", other.map(|c| c.types.len())),
        }
    }

    #[test]
    fn test_resolve_first_match_wins() -> Result<()> {
        let host = InMemoryHost::new();
        let first = host.load(UnitBuilder::new("web.Handler"));
        host.load(UnitBuilder::new("web.Handler"));

        let surface = CatalogSurface::new("H", "handlers", ApiCatalog::new().member("web.Handler", "handle()"));
        let resolved = surface.resolve(&host)?;
        assert_eq!(resolved.types[0].0.id, first.id);
        Ok(())
    }

    #[test]
    fn test_matches_assignable_units() -> Result<()> {
        let host = database_host();
        let resolved = database_api().resolve(&host)?;
        let analyzer = ApiSurfaceAnalyzer::new(ScopeId(1), resolved, RestrictionSet::new());

        let units = host.loaded_units();
        let index = UnitIndex::new(&units);
        let mut found = HashSet::new();
        for unit in &units {
            analyzer.visit(unit, &index, &mut found)?;
        }

        let signatures: Vec<String> = found.into_iter().map(|e| e.signature).collect();
        assert_eq!(signatures, vec!["com.db.StatementImpl.execute(String)"]);
        Ok(())
    }

    #[test]
    fn test_markers_match_any_unit() -> Result<()> {
        let host = InMemoryHost::new();
        host.load(UnitBuilder::new("web.Servlet").flags(UnitFlags::INTERFACE));
        host.load(UnitBuilder::new("web.HttpServlet"));
        host.load(UnitBuilder::new("web.RequestMapping").flags(UnitFlags::ANNOTATION));
        host.load(
            UnitBuilder::new("com.app.OrderController")
                .method("list", &[], |b| b)
                .marker("web.RequestMapping")
                .method("helper", &[], |b| b),
        );

        let resolved = entry_point_api().resolve(&host)?;
        assert_eq!(resolved.markers, vec!["web.RequestMapping"]);
        let analyzer = ApiSurfaceAnalyzer::new(ScopeId(1), resolved, RestrictionSet::new());

        let units = host.loaded_units();
        let index = UnitIndex::new(&units);
        let mut found = HashSet::new();
        for unit in &units {
            analyzer.visit(unit, &index, &mut found)?;
        }
        let signatures: Vec<String> = found.into_iter().map(|e| e.signature).collect();
        assert_eq!(signatures, vec!["com.app.OrderController.list()"]);
        Ok(())
    }
}
