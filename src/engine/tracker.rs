//! Live instrumentation state across requests.
//!
//! The tracker holds one "current" set of flat entities and reconciles every change against
//! it. Units are the unit of work: whenever a request touches a unit that already carries
//! instrumentation, the unit is first reverted to its pristine snapshot and then rebuilt with
//! everything that should be live on it, so coexisting probes survive and nothing is
//! applied twice.
//!
//! Every live entity records its claims: which request attached it through which scope.
//! Withdrawing a request removes its claims; an entity disappears with its last claim.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    description::{RestrictionSet, ScopeId},
    host::UnitId,
    inject::{CodeInjector, InstrumentationSet, Placement, RuntimeSwapper},
    scope::FlatInstrumentationEntity,
};

/// Identifier of an applied instrumentation request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One request's hold on a live entity.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Request that attached the entity
    pub request: RequestId,
    /// Scope through which it was attached
    pub scope_id: ScopeId,
    /// Restriction of that scope
    pub restriction: Arc<RestrictionSet>,
}

#[derive(Debug)]
struct LiveEntity {
    /// Order of first attachment, which fixes probe nesting
    seq: u64,
    claims: Vec<Claim>,
}

/// What a state change did to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChange {
    /// Entities that became live
    pub added: usize,
    /// Entities that stopped being live
    pub removed: usize,
    /// Units now running new code
    pub redefined: BTreeSet<UnitId>,
    /// Units that could not be brought to the intended state
    pub failed: BTreeSet<UnitId>,
}

/// State machine over the live entity set.
pub struct InstrumentationStateTracker {
    injector: CodeInjector,
    swapper: RuntimeSwapper,
    current: HashMap<FlatInstrumentationEntity, LiveEntity>,
    next_seq: u64,
}

impl InstrumentationStateTracker {
    /// Creates a tracker with nothing instrumented.
    #[must_use]
    pub fn new(injector: CodeInjector, swapper: RuntimeSwapper) -> Self {
        InstrumentationStateTracker {
            injector,
            swapper,
            current: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Returns the live entities, sorted by signature and probe type.
    #[must_use]
    pub fn current(&self) -> Vec<&FlatInstrumentationEntity> {
        let mut entities: Vec<&FlatInstrumentationEntity> = self.current.keys().collect();
        entities.sort_by(|a, b| (&a.signature, &a.probe_type).cmp(&(&b.signature, &b.probe_type)));
        entities
    }

    /// Returns the requests holding a live entity.
    #[must_use]
    pub fn owners(&self, entity: &FlatInstrumentationEntity) -> BTreeSet<RequestId> {
        self.current
            .get(entity)
            .map(|live| live.claims.iter().map(|c| c.request).collect())
            .unwrap_or_default()
    }

    /// Returns the units holding a pristine snapshot, i.e. the units the engine has touched.
    #[must_use]
    pub fn tracked_units(&self) -> Vec<UnitId> {
        self.injector.snapshotted_units()
    }

    /// Returns `true` if nothing is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Makes a request's entities live.
    ///
    /// Units already carrying instrumentation are reverted to pristine first and rebuilt
    /// with their current entities plus the new ones. Entities on units that fail are not
    /// recorded; a unit that was reverted but could not be rebuilt loses its entities.
    pub fn apply(&mut self, request: RequestId, placements: Vec<Placement>) -> StateChange {
        let mut change = StateChange::default();
        if placements.is_empty() {
            return change;
        }

        let new_units: BTreeSet<UnitId> = placements.iter().map(|p| p.entity.unit).collect();
        let live_units = self.live_units();
        let overlap: BTreeSet<UnitId> = new_units.intersection(&live_units).copied().collect();

        let (reverted, revert_failed) = self.revert_units(&overlap);

        let mut batch = self.placements_on(&overlap);
        batch.extend(placements.iter().cloned());
        let (redefined, failed) = self.rebuild(&batch);

        let mut added = 0;
        for placement in placements {
            if failed.contains(&placement.entity.unit) {
                continue;
            }
            let claim = Claim {
                request,
                scope_id: placement.entity.scope_id,
                restriction: placement.restriction,
            };
            match self.current.get_mut(&placement.entity) {
                Some(live) => {
                    if !live
                        .claims
                        .iter()
                        .any(|c| c.request == request && c.scope_id == claim.scope_id)
                    {
                        live.claims.push(claim);
                    }
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.current.insert(
                        placement.entity,
                        LiveEntity {
                            seq,
                            claims: vec![claim],
                        },
                    );
                    added += 1;
                }
            }
        }

        let lost: BTreeSet<UnitId> = reverted.intersection(&failed).copied().collect();
        change.removed = self.drop_units(&lost);
        self.forget_bare(&failed);

        change.added = added;
        change.redefined = redefined;
        change.failed = failed.union(&revert_failed).copied().collect();
        change
    }

    /// Withdraws every claim of a request.
    ///
    /// Entities left without claims are retired. Affected units are reverted and rebuilt
    /// with their surviving entities. If a unit cannot be reverted, the request keeps its
    /// claims on that unit so the state still describes the running code.
    pub fn withdraw(&mut self, request: RequestId) -> StateChange {
        let mut change = StateChange::default();
        let affected: BTreeSet<UnitId> = self
            .current
            .iter()
            .filter(|(_, live)| live.claims.iter().any(|c| c.request == request))
            .map(|(entity, _)| entity.unit)
            .collect();
        if affected.is_empty() {
            return change;
        }

        let (reverted, revert_failed) = self.revert_units(&affected);
        for unit in &revert_failed {
            log::error!(
                "Unit {} could not be reverted; request {} stays attached to it",
                unit,
                request
            );
        }

        self.current.retain(|entity, live| {
            if !reverted.contains(&entity.unit) {
                return true;
            }
            live.claims.retain(|c| c.request != request);
            if live.claims.is_empty() {
                change.removed += 1;
                false
            } else {
                true
            }
        });

        let batch = self.placements_on(&reverted);
        let (redefined, failed) = self.rebuild(&batch);
        change.removed += self.drop_units(&failed);
        self.forget_bare(&failed);

        change.redefined = reverted.union(&redefined).copied().collect();
        change.failed = failed.union(&revert_failed).copied().collect();
        change
    }

    /// Restores every touched unit to its pristine snapshot and clears the live set.
    ///
    /// Units the host refuses to restore keep their snapshot so a later reversion can retry.
    pub fn revert_all(&mut self) -> StateChange {
        let units: BTreeSet<UnitId> = self.injector.snapshotted_units().into_iter().collect();
        let (reverted, failed) = self.revert_units(&units);
        for unit in &failed {
            log::error!("Unit {} could not be reverted and keeps its instrumentation", unit);
        }

        let change = StateChange {
            added: 0,
            removed: self.current.len(),
            redefined: reverted,
            failed,
        };
        self.current.clear();
        log::info!(
            "Reverted {} units, {} entities retired",
            change.redefined.len(),
            change.removed
        );
        change
    }

    fn live_units(&self) -> BTreeSet<UnitId> {
        self.current.keys().map(|e| e.unit).collect()
    }

    /// Placements for the live entities on `units`, in attachment order.
    fn placements_on(&self, units: &BTreeSet<UnitId>) -> Vec<Placement> {
        let mut live: Vec<(&FlatInstrumentationEntity, &LiveEntity)> = self
            .current
            .iter()
            .filter(|(entity, _)| units.contains(&entity.unit))
            .collect();
        live.sort_by_key(|(_, l)| l.seq);

        live.into_iter()
            .flat_map(|(entity, l)| {
                l.claims.iter().map(move |claim| {
                    let mut entity = entity.clone();
                    entity.scope_id = claim.scope_id;
                    Placement::new(entity, claim.restriction.clone())
                })
            })
            .collect()
    }

    /// Swaps the pristine snapshots of `units` back in.
    ///
    /// Returns the restored and the refused units. Restored units drop their snapshot.
    fn revert_units(&mut self, units: &BTreeSet<UnitId>) -> (BTreeSet<UnitId>, BTreeSet<UnitId>) {
        let replacements: BTreeMap<UnitId, _> = units
            .iter()
            .filter_map(|unit| self.injector.original(*unit).map(|code| (*unit, code.clone())))
            .collect();
        let mut reverted: BTreeSet<UnitId> = units
            .iter()
            .filter(|unit| !replacements.contains_key(unit))
            .copied()
            .collect();

        let report = self.swapper.commit(replacements);
        for unit in report.redefined {
            self.injector.forget(unit);
            reverted.insert(unit);
        }
        (reverted, report.failed.into_iter().collect())
    }

    /// Injects and swaps a batch. Returns the redefined and the failed units.
    fn rebuild(&mut self, batch: &[Placement]) -> (BTreeSet<UnitId>, BTreeSet<UnitId>) {
        if batch.is_empty() {
            return (BTreeSet::new(), BTreeSet::new());
        }
        let set = InstrumentationSet::new(batch);
        let outcome = self.injector.inject(&set);
        let mut failed = outcome.failed;

        let report = self.swapper.commit(outcome.replacements);
        failed.extend(report.failed);
        (report.redefined.into_iter().collect(), failed)
    }

    /// Removes the live entities of `units`. Returns how many were removed.
    fn drop_units(&mut self, units: &BTreeSet<UnitId>) -> usize {
        let before = self.current.len();
        self.current.retain(|entity, _| !units.contains(&entity.unit));
        before - self.current.len()
    }

    /// Drops the snapshots of failed units that carry no live entity; their code is pristine.
    fn forget_bare(&mut self, failed: &BTreeSet<UnitId>) {
        let live = self.live_units();
        for unit in failed {
            if !live.contains(unit) {
                self.injector.forget(*unit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::{HostRuntime, InMemoryHost, NoExpansion, UnitBuilder},
        probe::{builtin::GENERIC_PROBE, ProbeFragmentCompiler},
        registry::ExtensionRegistry,
        Result,
    };

    struct Fixture {
        host: Arc<InMemoryHost>,
        tracker: InstrumentationStateTracker,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let host = Arc::new(InMemoryHost::new());
            host.load(
                UnitBuilder::new("com.app.A")
                    .method("f", &["int"], |b| b.source("work()"))
                    .method("g", &[], |b| b.source("other()")),
            );
            let injector = CodeInjector::new(
                host.clone(),
                Arc::new(ExtensionRegistry::with_builtins()?),
                Arc::new(ProbeFragmentCompiler::new()),
                GENERIC_PROBE,
            );
            let tracker = InstrumentationStateTracker::new(injector, RuntimeSwapper::new(host.clone()));
            Ok(Fixture { host, tracker })
        }

        fn placement(&self, short: &str, probe: &str, scope: u64) -> Result<Placement> {
            let unit = self.host.find_unit("com.app.A")?;
            Ok(Placement::new(
                FlatInstrumentationEntity {
                    unit: unit.id,
                    unit_name: unit.name.clone(),
                    signature: format!("com.app.A.{}", short),
                    scope_id: ScopeId(scope),
                    probe_type: probe.to_string(),
                },
                Arc::new(RestrictionSet::new()),
            ))
        }

        fn run(&self, short: &str) -> Result<Vec<String>> {
            Ok(self
                .host
                .invoke(&format!("com.app.A.{}", short), &NoExpansion)?
                .executed)
        }
    }

    #[test]
    fn test_overlap_keeps_both_probes() -> Result<()> {
        let mut fx = Fixture::new()?;
        let a = fx.placement("f(int)", "ResponseTimeProbe", 1)?;
        let b = fx.placement("f(int)", "NanoResponseTimeProbe", 2)?;

        fx.tracker.apply(RequestId(1), vec![a]);
        let change = fx.tracker.apply(RequestId(2), vec![b]);
        assert_eq!(change.added, 1);
        assert_eq!(fx.tracker.current().len(), 2);

        let executed = fx.run("f(int)")?;
        assert!(executed.iter().any(|s| s.contains("ResponseTimeRecord::new")));
        assert!(executed.iter().any(|s| s.contains("NanoResponseTimeRecord::new")));

        fx.tracker.withdraw(RequestId(2));
        let executed = fx.run("f(int)")?;
        assert!(executed.iter().any(|s| s.contains("ResponseTimeRecord::new")));
        assert!(!executed.iter().any(|s| s.contains("NanoResponseTimeRecord")));
        assert_eq!(fx.tracker.current().len(), 1);
        Ok(())
    }

    #[test]
    fn test_shared_entity_survives_withdrawal() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.tracker.apply(RequestId(1), vec![fx.placement("f(int)", "ResponseTimeProbe", 1)?]);
        fx.tracker.apply(RequestId(2), vec![fx.placement("f(int)", "ResponseTimeProbe", 2)?]);

        let entity = fx.tracker.current()[0].clone();
        assert_eq!(fx.tracker.owners(&entity).len(), 2);

        let change = fx.tracker.withdraw(RequestId(1));
        assert_eq!(change.removed, 0);
        assert_eq!(fx.tracker.owners(&entity), BTreeSet::from([RequestId(2)]));
        assert_eq!(fx.run("f(int)")?.iter().filter(|s| s.contains("ResponseTimeRecord::new")).count(), 1);
        Ok(())
    }

    #[test]
    fn test_revert_all_restores_pristine() -> Result<()> {
        let mut fx = Fixture::new()?;
        let unit = fx.host.find_unit("com.app.A")?;
        let pristine = fx.host.current_code(unit.id)?.fingerprint();

        fx.tracker.apply(RequestId(1), vec![fx.placement("f(int)", "ResponseTimeProbe", 1)?]);
        fx.tracker.apply(RequestId(2), vec![fx.placement("g()", "NanoResponseTimeProbe", 2)?]);
        assert_ne!(fx.host.current_code(unit.id)?.fingerprint(), pristine);

        let change = fx.tracker.revert_all();
        assert_eq!(change.removed, 2);
        assert!(fx.tracker.is_empty());
        assert!(fx.tracker.tracked_units().is_empty());
        assert_eq!(fx.host.current_code(unit.id)?.fingerprint(), pristine);
        Ok(())
    }

    #[test]
    fn test_refused_swap_is_not_recorded() -> Result<()> {
        let mut fx = Fixture::new()?;
        let unit = fx.host.find_unit("com.app.A")?;
        fx.host.refuse_redefinition(unit.id, true);

        let change = fx.tracker.apply(RequestId(1), vec![fx.placement("f(int)", "ResponseTimeProbe", 1)?]);
        assert_eq!(change.failed, BTreeSet::from([unit.id]));
        assert!(fx.tracker.is_empty());
        assert!(fx.tracker.tracked_units().is_empty());
        assert_eq!(fx.run("f(int)")?, vec!["work()"]);
        Ok(())
    }

    #[test]
    fn test_failed_revert_keeps_claims() -> Result<()> {
        let mut fx = Fixture::new()?;
        let unit = fx.host.find_unit("com.app.A")?;
        fx.tracker.apply(RequestId(1), vec![fx.placement("f(int)", "ResponseTimeProbe", 1)?]);

        fx.host.refuse_redefinition(unit.id, true);
        let change = fx.tracker.withdraw(RequestId(1));
        assert_eq!(change.failed, BTreeSet::from([unit.id]));
        assert_eq!(fx.tracker.current().len(), 1);

        fx.host.refuse_redefinition(unit.id, false);
        fx.tracker.withdraw(RequestId(1));
        assert!(fx.tracker.is_empty());
        assert_eq!(fx.run("f(int)")?, vec!["work()"]);
        Ok(())
    }
}
