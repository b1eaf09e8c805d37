use std::collections::HashSet;

use crate::{
    description::{RestrictionSet, ScopeId},
    host::{MemberKind, Unit},
    scope::{FlatScopeEntity, ScopeAnalyzer, UnitIndex},
    Result,
};

/// Selects the constructors of an explicit list of units.
pub struct ConstructorAnalyzer {
    scope_id: ScopeId,
    classes: Vec<String>,
    restriction: RestrictionSet,
}

impl ConstructorAnalyzer {
    /// Creates an analyzer for the named units.
    #[must_use]
    pub fn new(scope_id: ScopeId, classes: Vec<String>, restriction: RestrictionSet) -> Self {
        ConstructorAnalyzer {
            scope_id,
            classes,
            restriction,
        }
    }
}

impl ScopeAnalyzer for ConstructorAnalyzer {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn visit(&self, unit: &Unit, index: &UnitIndex, into: &mut HashSet<FlatScopeEntity>) -> Result<()> {
        if !self.classes.iter().any(|c| *c == unit.name) || self.restriction.is_excluded(&unit.name) {
            return Ok(());
        }

        for member in unit.declared_members() {
            if member.kind == MemberKind::Constructor
                && member.has_body()
                && !self.restriction.modifier_set_excluded(member.modifiers)
            {
                if let Some(entity) = index.entity(unit, member, self.scope_id) {
                    into.insert(entity);
                }
            }
        }
        Ok(())
    }
}
