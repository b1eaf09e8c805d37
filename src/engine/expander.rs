//! Runtime widening of trace scopes.
//!
//! A trace root cannot be resolved ahead of time: what it covers is whatever its members end
//! up calling. Members reached by a trace carry an expansion hook ahead of every call site.
//! The first time a hook reports a callee for a trace, the expander marks the pair and hands
//! back a one-member request for the callee, carrying the probes and restriction recorded
//! for the trace. Once applied, the callee carries hooks of its own, so coverage grows along
//! executed paths until no call reaches a member that has not been seen.
//!
//! Markers are keyed by `(trace, callee)`; checking and setting one is a single atomic
//! insert, so concurrent application threads race on the insert and exactly one of them
//! wins the expansion.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::{
    description::{
        InstrumentationDescription, InstrumentationEntity, RestrictionSet, ScopeDescriptor, ScopeId,
    },
    engine::RequestId,
};

/// What the engine recorded about a trace when its root was instrumented.
#[derive(Debug, Clone)]
pub struct TraceRegistration {
    /// Probes to attach to reached members, the incremental probe included
    pub probes: Vec<String>,
    /// Combined local and global restriction of the trace
    pub restriction: Arc<RestrictionSet>,
    /// Request that declared the trace root
    pub owner: RequestId,
}

/// A pending widening of one trace by one member.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// Trace being widened
    pub scope_id: ScopeId,
    /// Request the new entities belong to
    pub owner: RequestId,
    /// One-member request for the callee
    pub description: InstrumentationDescription,
}

/// Marker and registration store for trace scopes.
#[derive(Debug, Default)]
pub struct IncrementalTraceExpander {
    markers: DashSet<(ScopeId, String)>,
    traces: DashMap<ScopeId, TraceRegistration>,
}

impl IncrementalTraceExpander {
    /// Creates an expander with no traces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a trace.
    pub fn register(&self, scope_id: ScopeId, registration: TraceRegistration) {
        self.traces.insert(scope_id, registration);
    }

    /// Forgets a trace and its markers.
    pub fn unregister(&self, scope_id: ScopeId) {
        self.traces.remove(&scope_id);
        self.markers.retain(|(id, _)| *id != scope_id);
    }

    /// Returns the registration of a trace.
    #[must_use]
    pub fn registration(&self, scope_id: ScopeId) -> Option<TraceRegistration> {
        self.traces.get(&scope_id).map(|entry| entry.value().clone())
    }

    /// Returns `true` if `callee` has already been expanded for the trace.
    #[must_use]
    pub fn is_expanded(&self, scope_id: ScopeId, callee: &str) -> bool {
        self.markers.contains(&(scope_id, callee.to_string()))
    }

    /// Returns the number of `(trace, callee)` markers.
    #[must_use]
    pub fn expanded_count(&self) -> usize {
        self.markers.len()
    }

    /// Claims the expansion of `callee` for a trace.
    ///
    /// Returns `None` if the pair was seen before or the trace is unknown. The marker is set
    /// in both cases, so later calls short-circuit.
    ///
    /// # Arguments
    ///
    /// * `callee` - Fully-qualified signature reported by the hook
    /// * `target` - Signature to instrument, usually `callee` resolved to its declarer
    /// * `scope_id` - Trace the hook belongs to
    pub fn expansion_for(&self, callee: &str, target: &str, scope_id: ScopeId) -> Option<Expansion> {
        if !self.markers.insert((scope_id, callee.to_string())) {
            return None;
        }
        let Some(registration) = self.registration(scope_id) else {
            log::debug!("Hook for unknown trace {} reached {}", scope_id, callee);
            return None;
        };

        log::debug!("Expanding trace {} to {}", scope_id, target);
        let entity = InstrumentationEntity {
            scope: ScopeDescriptor::method_pattern(scope_id, &[target]),
            probes: registration.probes,
            local_restriction: registration.restriction.as_ref().clone(),
        };
        Some(Expansion {
            scope_id,
            owner: registration.owner,
            description: InstrumentationDescription {
                entities: vec![entity],
                ..InstrumentationDescription::default()
            },
        })
    }

    /// Forgets every trace declared by a request.
    pub fn retire_request(&self, request: RequestId) {
        let retired: Vec<ScopeId> = self
            .traces
            .iter()
            .filter(|entry| entry.value().owner == request)
            .map(|entry| *entry.key())
            .collect();
        for scope_id in retired {
            self.unregister(scope_id);
        }
    }

    /// Forgets all traces and markers.
    pub fn clear(&self) {
        self.traces.clear();
        self.markers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ScopeKind;

    fn expander() -> IncrementalTraceExpander {
        let expander = IncrementalTraceExpander::new();
        expander.register(
            ScopeId(40),
            TraceRegistration {
                probes: vec!["ResponseTimeProbe".into(), "IncrementalInstrumentationProbe".into()],
                restriction: Arc::new(RestrictionSet::new().exclude("com.lib")),
                owner: RequestId(3),
            },
        );
        expander
    }

    #[test]
    fn test_first_sighting_expands_once() {
        let expander = expander();
        let expansion = expander
            .expansion_for("com.app.A.a()", "com.app.A.a()", ScopeId(40))
            .unwrap();

        assert_eq!(expansion.owner, RequestId(3));
        let entity = &expansion.description.entities[0];
        assert_eq!(entity.scope.id, ScopeId(40));
        assert_eq!(
            entity.scope.kind,
            ScopeKind::MethodPattern {
                patterns: vec!["com.app.A.a()".into()]
            }
        );
        assert_eq!(entity.local_restriction.excludes, vec!["com.lib"]);
        assert_eq!(entity.probes.len(), 2);

        assert!(expander.is_expanded(ScopeId(40), "com.app.A.a()"));
        assert!(expander.expansion_for("com.app.A.a()", "com.app.A.a()", ScopeId(40)).is_none());
    }

    #[test]
    fn test_unknown_trace_is_marked() {
        let expander = expander();
        assert!(expander.expansion_for("com.app.A.a()", "com.app.A.a()", ScopeId(1)).is_none());
        assert!(expander.is_expanded(ScopeId(1), "com.app.A.a()"));
    }

    #[test]
    fn test_retire_request() {
        let expander = expander();
        assert!(expander.expansion_for("com.app.A.a()", "com.app.A.a()", ScopeId(40)).is_some());
        assert_eq!(expander.expanded_count(), 1);

        expander.retire_request(RequestId(3));
        assert!(expander.registration(ScopeId(40)).is_none());
        assert_eq!(expander.expanded_count(), 0);
    }
}
