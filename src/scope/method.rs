use std::collections::HashSet;

use crate::{
    description::{RestrictionSet, ScopeId},
    host::{MemberKind, Unit},
    restriction::{pattern_matches, pattern_prefix_matches},
    scope::{FlatScopeEntity, ScopeAnalyzer, UnitIndex},
    Result,
};

/// Selects methods whose fully-qualified signature matches a glob pattern.
///
/// Declared and inherited methods are considered; abstract and native ones are skipped. A
/// member is only tested against a pattern if its declaring unit's name is a prefix of
/// something the pattern can match. The restriction applies to the declaring unit and to the method's modifiers.
pub struct MethodPatternAnalyzer {
    scope_id: ScopeId,
    patterns: Vec<String>,
    restriction: RestrictionSet,
}

impl MethodPatternAnalyzer {
    /// Creates an analyzer for the given patterns.
    #[must_use]
    pub fn new(scope_id: ScopeId, patterns: Vec<String>, restriction: RestrictionSet) -> Self {
        MethodPatternAnalyzer {
            scope_id,
            patterns,
            restriction,
        }
    }
}

impl ScopeAnalyzer for MethodPatternAnalyzer {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn visit(&self, unit: &Unit, index: &UnitIndex, into: &mut HashSet<FlatScopeEntity>) -> Result<()> {
        if self.restriction.is_excluded(&unit.name) {
            return Ok(());
        }

        for pattern in &self.patterns {
            for member in &unit.members {
                if member.kind != MemberKind::Method || !member.has_body() {
                    continue;
                }
                // inherited members are named after their declarer
                if !pattern_prefix_matches(&member.declaring_unit, pattern) {
                    continue;
                }
                if !pattern_matches(&member.signature(), pattern)
                    || self.restriction.modifier_set_excluded(member.modifiers)
                    || self.restriction.is_excluded(&member.declaring_unit)
                {
                    continue;
                }
                if let Some(entity) = index.entity(unit, member, self.scope_id) {
                    into.insert(entity);
                }
            }
        }
        Ok(())
    }
}
