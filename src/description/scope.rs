use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Identifier of a scope.
///
/// Unique within the request that declares it. The engine re-keys every scope to an
/// engine-wide id when it applies a request, so expansion hooks never collide.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// Creates a new `ScopeId` from a raw value.
    #[must_use]
    pub fn new(value: u64) -> Self {
        ScopeId(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selection criterion of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Members whose fully-qualified signature matches any of the glob patterns
    MethodPattern {
        /// Signature patterns, e.g. `com.app.Service.process(*)`
        patterns: Vec<String>,
    },
    /// Methods of the units whose qualified name matches any of the glob patterns
    Class {
        /// Unit-name patterns, e.g. `com.app.service.*`
        patterns: Vec<String>,
    },
    /// Constructors of the named units
    ConstructorOfClasses {
        /// Qualified unit names
        classes: Vec<String>,
    },
    /// Members contributed by a registered API-surface catalog
    ApiSurface {
        /// Registered name of the API surface
        name: String,
    },
    /// Closure over the runtime call graph rooted at the members matched by `subscope`
    TraceRoot {
        /// The root selection; must not itself be a trace root
        subscope: Box<ScopeKind>,
    },
}

impl ScopeKind {
    /// Returns the variant name, for logging.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` for trace roots.
    #[must_use]
    pub fn is_trace_root(&self) -> bool {
        matches!(self, ScopeKind::TraceRoot { .. })
    }
}

/// A scope together with its request-local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    /// Request-local identifier
    pub id: ScopeId,
    /// What the scope selects
    pub kind: ScopeKind,
}

impl ScopeDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(id: ScopeId, kind: ScopeKind) -> Self {
        ScopeDescriptor { id, kind }
    }

    /// Descriptor selecting members by signature patterns.
    #[must_use]
    pub fn method_pattern(id: ScopeId, patterns: &[&str]) -> Self {
        Self::new(
            id,
            ScopeKind::MethodPattern {
                patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            },
        )
    }
}
