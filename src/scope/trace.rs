use std::collections::HashSet;

use crate::{
    description::ScopeId,
    host::Unit,
    scope::{FlatScopeEntity, ScopeAnalyzer, UnitIndex},
    Result,
};

/// Analyzer for trace roots.
///
/// The members a trace reaches are only known at runtime, so a trace root selects nothing
/// statically. The engine instruments the root's subscope with the incremental probe and
/// widens coverage as calls happen.
pub struct TraceRootAnalyzer {
    scope_id: ScopeId,
}

impl TraceRootAnalyzer {
    /// Creates the analyzer.
    #[must_use]
    pub fn new(scope_id: ScopeId) -> Self {
        TraceRootAnalyzer { scope_id }
    }
}

impl ScopeAnalyzer for TraceRootAnalyzer {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn visit(&self, _unit: &Unit, _index: &UnitIndex, _into: &mut HashSet<FlatScopeEntity>) -> Result<()> {
        Ok(())
    }
}
