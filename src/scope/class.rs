use std::collections::HashSet;

use crate::{
    description::{RestrictionSet, ScopeId},
    host::{Member, MemberKind, MemberModifiers, Unit},
    restriction::pattern_matches,
    scope::{FlatScopeEntity, ScopeAnalyzer, UnitIndex},
    Result,
};

/// Selects the methods of units whose name matches a glob pattern.
///
/// A matched unit contributes its public methods, inherited ones included, and every method
/// it declares itself. Public methods are skipped as a whole when the restriction filters
/// the public modifier, and an inherited one also when its declarer is excluded. Declared
/// methods are filtered by their own modifiers.
pub struct ClassAnalyzer {
    scope_id: ScopeId,
    patterns: Vec<String>,
    restriction: RestrictionSet,
}

impl ClassAnalyzer {
    /// Creates an analyzer for the given unit-name patterns.
    #[must_use]
    pub fn new(scope_id: ScopeId, patterns: Vec<String>, restriction: RestrictionSet) -> Self {
        ClassAnalyzer {
            scope_id,
            patterns,
            restriction,
        }
    }

    fn public_selected(&self, unit: &Unit, member: &Member) -> bool {
        member.modifiers.contains(MemberModifiers::PUBLIC)
            && !(self.restriction.has_modifier_restrictions()
                && self.restriction.modifier_set_excluded(MemberModifiers::PUBLIC))
            && (member.declaring_unit == unit.name
                || !self.restriction.is_excluded(&member.declaring_unit))
    }

    fn declared_selected(&self, unit: &Unit, member: &Member) -> bool {
        member.declaring_unit == unit.name && !self.restriction.modifier_set_excluded(member.modifiers)
    }
}

impl ScopeAnalyzer for ClassAnalyzer {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn visit(&self, unit: &Unit, index: &UnitIndex, into: &mut HashSet<FlatScopeEntity>) -> Result<()> {
        if self.restriction.is_excluded(&unit.name)
            || !self.patterns.iter().any(|p| pattern_matches(&unit.name, p))
        {
            return Ok(());
        }

        for member in &unit.members {
            if member.kind != MemberKind::Method || !member.has_body() {
                continue;
            }
            if !self.public_selected(unit, member) && !self.declared_selected(unit, member) {
                continue;
            }
            if let Some(entity) = index.entity(unit, member, self.scope_id) {
                into.insert(entity);
            }
        }
        Ok(())
    }
}
