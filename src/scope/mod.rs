//! Scope resolution against the loaded-unit universe.
//!
//! Resolving a scope means visiting every instrumentable loaded unit with the scope's
//! [`ScopeAnalyzer`] and collecting the members it selects as [`FlatScopeEntity`] values.
//! Each scope entity is then paired with every probe of its request entity to produce the
//! [`FlatInstrumentationEntity`] set the state tracker works with.
//!
//! # Key Components
//!
//! - [`ScopeResolver`] - Filters the unit universe and drives the analyzers
//! - [`MethodPatternAnalyzer`] - Glob patterns over member signatures
//! - [`ApiSurfaceAnalyzer`] - Members contributed by a registered [`ApiSurface`]
//! - [`ClassAnalyzer`] - Methods of units matched by name
//! - [`ConstructorAnalyzer`] - Constructors of named units
//! - [`TraceRootAnalyzer`] - Trace roots, which resolve to nothing statically
//!
//! # Identity
//!
//! A [`FlatScopeEntity`] is identified by `(unit, signature)` and a
//! [`FlatInstrumentationEntity`] by `(unit, signature, probe type)`. The scope id is carried
//! along but takes no part in equality, so the same member reached through two scopes is
//! instrumented once per probe.

mod api;
mod class;
mod constructor;
mod method;
mod resolver;
mod trace;

pub use api::{
    database_api, entry_point_api, ApiCatalog, ApiSurface, ApiSurfaceAnalyzer, CatalogSurface,
    ResolvedCatalog,
};
pub use class::ClassAnalyzer;
pub use constructor::ConstructorAnalyzer;
pub use method::MethodPatternAnalyzer;
pub use resolver::ScopeResolver;
pub use trace::TraceRootAnalyzer;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::{Hash, Hasher},
};

use crate::{
    description::ScopeId,
    host::{Member, Unit, UnitId, UnitRc},
    Result,
};

/// A member selected by one scope.
#[derive(Debug, Clone)]
pub struct FlatScopeEntity {
    /// The unit whose code holds the member (its declaring unit)
    pub unit: UnitId,
    /// Qualified name of that unit
    pub unit_name: String,
    /// Fully-qualified member signature
    pub signature: String,
    /// Scope that selected the member
    pub scope_id: ScopeId,
}

impl FlatScopeEntity {
    /// Pairs this scope entity with a probe type.
    #[must_use]
    pub fn with_probe(&self, probe_type: &str) -> FlatInstrumentationEntity {
        FlatInstrumentationEntity {
            unit: self.unit,
            unit_name: self.unit_name.clone(),
            signature: self.signature.clone(),
            scope_id: self.scope_id,
            probe_type: probe_type.to_string(),
        }
    }
}

impl PartialEq for FlatScopeEntity {
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit && self.signature == other.signature
    }
}

impl Eq for FlatScopeEntity {}

impl Hash for FlatScopeEntity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unit.hash(state);
        self.signature.hash(state);
    }
}

/// A member selected by a scope, paired with one probe type.
#[derive(Debug, Clone)]
pub struct FlatInstrumentationEntity {
    /// The unit whose code holds the member
    pub unit: UnitId,
    /// Qualified name of that unit
    pub unit_name: String,
    /// Fully-qualified member signature
    pub signature: String,
    /// Scope that selected the member
    pub scope_id: ScopeId,
    /// Probe type to attach
    pub probe_type: String,
}

impl FlatInstrumentationEntity {
    /// Returns the signature relative to the unit, `name(params)`.
    #[must_use]
    pub fn short_signature(&self) -> &str {
        self.signature
            .strip_prefix(self.unit_name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&self.signature)
    }
}

impl PartialEq for FlatInstrumentationEntity {
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit
            && self.signature == other.signature
            && self.probe_type == other.probe_type
    }
}

impl Eq for FlatInstrumentationEntity {}

impl Hash for FlatInstrumentationEntity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unit.hash(state);
        self.signature.hash(state);
        self.probe_type.hash(state);
    }
}

impl fmt::Display for FlatInstrumentationEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.signature, self.probe_type)
    }
}

/// Lookup from qualified name to the instrumentable unit of that name.
///
/// When several loaded units share a name, the first one loaded wins.
#[derive(Debug, Default)]
pub struct UnitIndex {
    by_name: HashMap<String, UnitRc>,
}

impl UnitIndex {
    /// Indexes a list of units.
    #[must_use]
    pub fn new(units: &[UnitRc]) -> Self {
        let mut by_name = HashMap::with_capacity(units.len());
        for unit in units {
            by_name
                .entry(unit.name.clone())
                .or_insert_with(|| unit.clone());
        }
        UnitIndex { by_name }
    }

    /// Looks up a unit by qualified name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UnitRc> {
        self.by_name.get(name)
    }

    /// Builds the scope entity for a member reached through `unit`.
    ///
    /// Inherited members resolve to their declaring unit; `None` if that unit is not
    /// instrumentable.
    #[must_use]
    pub fn entity(&self, unit: &Unit, member: &Member, scope_id: ScopeId) -> Option<FlatScopeEntity> {
        let (id, name) = if member.declaring_unit == unit.name {
            (unit.id, unit.name.clone())
        } else {
            let declarer = self.get(&member.declaring_unit)?;
            (declarer.id, declarer.name.clone())
        };
        Some(FlatScopeEntity {
            unit: id,
            unit_name: name,
            signature: member.signature(),
            scope_id,
        })
    }
}

/// Selects members of a unit for one scope.
///
/// Analyzers are invoked once per instrumentable unit, possibly from several threads at
/// once.
pub trait ScopeAnalyzer: Send + Sync {
    /// Id of the scope this analyzer resolves.
    fn scope_id(&self) -> ScopeId;

    /// Adds the members of `unit` this scope selects to `into`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Resolution`] if the unit cannot be analyzed. The resolver
    /// logs the error and skips the unit.
    fn visit(&self, unit: &Unit, index: &UnitIndex, into: &mut HashSet<FlatScopeEntity>)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(unit: u32, signature: &str, scope: u64, probe: &str) -> FlatInstrumentationEntity {
        FlatInstrumentationEntity {
            unit: UnitId(unit),
            unit_name: "com.app.A".to_string(),
            signature: signature.to_string(),
            scope_id: ScopeId(scope),
            probe_type: probe.to_string(),
        }
    }

    #[test]
    fn test_identity_ignores_scope_id() {
        let mut set = HashSet::new();
        assert!(set.insert(entity(1, "com.app.A.run()", 1, "P1")));
        assert!(!set.insert(entity(1, "com.app.A.run()", 2, "P1")));
        assert!(set.insert(entity(1, "com.app.A.run()", 1, "P2")));
        assert!(set.insert(entity(2, "com.app.A.run()", 1, "P1")));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_short_signature() {
        let e = entity(1, "com.app.A.run(int,com.app.B)", 1, "P");
        assert_eq!(e.short_signature(), "run(int,com.app.B)");
        assert_eq!(e.to_string(), "com.app.A.run(int,com.app.B) [P]");
    }
}
