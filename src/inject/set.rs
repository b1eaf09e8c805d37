//! Grouping of flat entities into per-unit injection work.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{
    description::{RestrictionSet, ScopeId},
    host::UnitId,
    scope::FlatInstrumentationEntity,
};

/// An entity scheduled for injection, with the restriction of the scope that selected it.
#[derive(Debug, Clone)]
pub struct Placement {
    /// What to instrument
    pub entity: FlatInstrumentationEntity,
    /// Combined local and global restriction of the selecting scope
    pub restriction: Arc<RestrictionSet>,
}

impl Placement {
    /// Pairs an entity with a restriction.
    #[must_use]
    pub fn new(entity: FlatInstrumentationEntity, restriction: Arc<RestrictionSet>) -> Self {
        Placement {
            entity,
            restriction,
        }
    }
}

/// One probe attachment on a target member.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Probe type
    pub probe_type: String,
    /// Scope that selected the member
    pub scope_id: ScopeId,
    /// Restriction of that scope
    pub restriction: Arc<RestrictionSet>,
}

/// Everything attached to one member.
#[derive(Debug, Clone, Default)]
pub struct MemberTargets {
    /// Fully-qualified signature of the member
    pub signature: String,
    /// Attachments in placement order
    pub attachments: Vec<Attachment>,
}

impl MemberTargets {
    /// Returns the attached probe types in first-attachment order, without repeats.
    #[must_use]
    pub fn probes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.attachments
            .iter()
            .map(|a| a.probe_type.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Returns the sampling granularity of the member.
    ///
    /// With several scopes attached, the highest granularity applies.
    #[must_use]
    pub fn granularity(&self) -> f64 {
        self.attachments
            .iter()
            .map(|a| a.restriction.effective_granularity())
            .fold(0.0, f64::max)
    }
}

/// Members to instrument in one unit, keyed by short signature.
#[derive(Debug, Clone, Default)]
pub struct UnitTargets {
    /// Qualified name of the unit
    pub name: String,
    /// Targets keyed by short signature
    pub members: BTreeMap<String, MemberTargets>,
}

/// Index of placements grouped by unit, then member, then probe.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use livescope::prelude::*;
///
/// let entity = FlatInstrumentationEntity {
///     unit: UnitId(1),
///     unit_name: "com.app.A".to_string(),
///     signature: "com.app.A.run()".to_string(),
///     scope_id: ScopeId(1),
///     probe_type: "ResponseTimeProbe".to_string(),
/// };
/// let set = InstrumentationSet::new(&[Placement::new(entity, Arc::new(RestrictionSet::new()))]);
///
/// assert_eq!(set.units().collect::<Vec<_>>(), vec![UnitId(1)]);
/// assert_eq!(set.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstrumentationSet {
    units: BTreeMap<UnitId, UnitTargets>,
}

impl InstrumentationSet {
    /// Builds the index. Attachments keep the order of `placements`.
    #[must_use]
    pub fn new(placements: &[Placement]) -> Self {
        let mut units: BTreeMap<UnitId, UnitTargets> = BTreeMap::new();

        for placement in placements {
            let entity = &placement.entity;
            let unit = units.entry(entity.unit).or_insert_with(|| UnitTargets {
                name: entity.unit_name.clone(),
                members: BTreeMap::new(),
            });
            let member = unit
                .members
                .entry(entity.short_signature().to_string())
                .or_insert_with(|| MemberTargets {
                    signature: entity.signature.clone(),
                    attachments: Vec::new(),
                });

            let duplicate = member
                .attachments
                .iter()
                .any(|a| a.probe_type == entity.probe_type && a.scope_id == entity.scope_id);
            if !duplicate {
                member.attachments.push(Attachment {
                    probe_type: entity.probe_type.clone(),
                    scope_id: entity.scope_id,
                    restriction: placement.restriction.clone(),
                });
            }
        }
        InstrumentationSet { units }
    }

    /// Returns the units touched by this set, in id order.
    pub fn units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.units.keys().copied()
    }

    /// Returns the targets of one unit.
    #[must_use]
    pub fn unit(&self, unit: UnitId) -> Option<&UnitTargets> {
        self.units.get(&unit)
    }

    /// Iterates units with their targets.
    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &UnitTargets)> {
        self.units.iter()
    }

    /// Returns the number of instrumented members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.values().map(|u| u.members.len()).sum()
    }

    /// Returns `true` if nothing is to be instrumented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
