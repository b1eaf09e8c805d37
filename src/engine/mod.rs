//! The engine context object.
//!
//! An [`Engine`] is created when the embedding process attaches to a host and owns
//! everything the instrumentation pipeline needs: the extension registry, the fragment cache,
//! the scope resolver, the state tracker and the trace expander. It is a cheap handle
//! (`Clone` shares the same context), so the embedding process can hand it to its control
//! surface and register it as the host's [`ExpansionCallback`] at the same time.
//!
//! # Request Path
//!
//! ```text
//! instrument(description)
//!   ├─ validate, re-key scopes to engine-wide ids, append default excludes
//!   ├─ trace roots → subscope + incremental probe, registered with the expander
//!   ├─ ScopeResolver::resolve          (aborts on configuration errors)
//!   ├─ InstrumentationStateTracker::apply
//!   │    ├─ revert overlapping units to pristine
//!   │    ├─ CodeInjector::inject       (per-unit failures skipped)
//!   │    └─ RuntimeSwapper::commit     (per-unit failures skipped)
//!   └─ forward sampling jobs
//! ```
//!
//! # Thread Safety
//!
//! Requests are serialized by one lock around the tracker. Expansion hooks run on
//! application threads; a hook raised on a thread that already holds the lock is queued and
//! handled once the request finishes, so the lock is never taken recursively.

mod expander;
mod tracker;

pub use expander::{Expansion, IncrementalTraceExpander, TraceRegistration};
pub use tracker::{Claim, InstrumentationStateTracker, RequestId, StateChange};

use std::{
    cell::Cell,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    description::{InstrumentationDescription, RestrictionSet, SamplingJob, ScopeId, ScopeKind},
    host::{split_signature, ExpansionCallback, HostRuntime, UnitId},
    inject::{CodeInjector, Placement, RuntimeSwapper},
    probe::ProbeFragmentCompiler,
    registry::ExtensionRegistry,
    scope::ScopeResolver,
    Result,
};

thread_local! {
    static IN_REQUEST: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as holding the request lock until dropped.
struct RequestGuard {
    previous: bool,
}

impl RequestGuard {
    fn enter() -> Self {
        RequestGuard {
            previous: IN_REQUEST.with(|flag| flag.replace(true)),
        }
    }

    fn active() -> bool {
        IN_REQUEST.with(Cell::get)
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        IN_REQUEST.with(|flag| flag.set(self.previous));
    }
}

/// Receiver of the periodic sampling jobs that accompany requests.
pub trait SamplingScheduler: Send + Sync {
    /// Starts the jobs of a request.
    fn schedule(&self, request: RequestId, jobs: &[SamplingJob]);

    /// Stops the jobs of a request.
    fn cancel(&self, request: RequestId);

    /// Stops every job.
    fn cancel_all(&self);
}

/// One live `(signature, probe type)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentationEntry {
    /// Fully-qualified member signature
    pub signature: String,
    /// Attached probe type
    pub probe_type: String,
}

/// A registered API surface as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSurfaceInfo {
    /// Registered name
    pub name: String,
    /// What the surface covers
    pub description: String,
}

/// Extensions operators may reference in requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedExtensions {
    /// Probe types, sorted
    pub probes: Vec<String>,
    /// API surfaces, sorted by name
    pub api_surfaces: Vec<ApiSurfaceInfo>,
}

struct EngineInner {
    config: EngineConfig,
    host: Arc<dyn HostRuntime>,
    registry: Arc<ExtensionRegistry>,
    resolver: ScopeResolver,
    tracker: Mutex<InstrumentationStateTracker>,
    expander: IncrementalTraceExpander,
    next_request: AtomicU64,
    next_scope: AtomicU64,
    pending: Mutex<VecDeque<(String, ScopeId)>>,
    sampling: RwLock<Option<Arc<dyn SamplingScheduler>>>,
}

/// Handle to an attached instrumentation engine.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use livescope::prelude::*;
///
/// let host = Arc::new(InMemoryHost::new());
/// host.load(UnitBuilder::new("com.app.Service").method("process", &["int"], |b| b.source("work()")));
///
/// let engine = Engine::attach(host.clone(), EngineConfig::default())?;
/// let request = engine.instrument(
///     &InstrumentationDescriptionBuilder::new()
///         .method_pattern(&["com.app.Service.process(*)"], &["ResponseTimeProbe"])
///         .build()?,
/// )?;
///
/// let executed = host.invoke("com.app.Service.process(int)", &engine)?.executed;
/// assert!(executed.iter().any(|s| s.contains("ResponseTimeRecord")));
///
/// engine.uninstrument(request)?;
/// assert!(engine.current_state()?.is_empty());
/// # Ok::<(), livescope::Error>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Attaches to a host with the built-in probes and API surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the configuration is invalid.
    pub fn attach(host: Arc<dyn HostRuntime>, config: EngineConfig) -> Result<Engine> {
        Self::with_registry(host, config, Arc::new(ExtensionRegistry::with_builtins()?))
    }

    /// Attaches to a host with a caller-provided registry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the configuration is invalid, and
    /// [`crate::Error::UnknownProbe`] if the registry lacks the configured generic or
    /// incremental probe.
    pub fn with_registry(
        host: Arc<dyn HostRuntime>,
        config: EngineConfig,
        registry: Arc<ExtensionRegistry>,
    ) -> Result<Engine> {
        config.validate()?;
        registry.probe(&config.generic_probe)?;
        registry.probe(&config.incremental_probe)?;

        let compiler = Arc::new(ProbeFragmentCompiler::new());
        let injector = CodeInjector::new(
            host.clone(),
            registry.clone(),
            compiler,
            config.generic_probe.clone(),
        );
        let tracker = InstrumentationStateTracker::new(injector, RuntimeSwapper::new(host.clone()));
        let resolver = ScopeResolver::new(host.clone(), registry.clone())
            .with_parallelism(config.parallel_resolution);

        log::info!(
            "Attached to host with {} loaded units",
            host.loaded_units().len()
        );
        Ok(Engine {
            inner: Arc::new(EngineInner {
                config,
                host,
                registry,
                resolver,
                tracker: Mutex::new(tracker),
                expander: IncrementalTraceExpander::new(),
                next_request: AtomicU64::new(1),
                next_scope: AtomicU64::new(1),
                pending: Mutex::new(VecDeque::new()),
                sampling: RwLock::new(None),
            }),
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the extension registry; probes and surfaces may be added at any time.
    #[must_use]
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.inner.registry
    }

    /// Returns the trace expander.
    #[must_use]
    pub fn expander(&self) -> &IncrementalTraceExpander {
        &self.inner.expander
    }

    /// Registers the receiver of sampling jobs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the scheduler slot is poisoned.
    pub fn set_sampling_scheduler(&self, scheduler: Arc<dyn SamplingScheduler>) -> Result<()> {
        *write_lock!(self.inner.sampling) = Some(scheduler);
        Ok(())
    }

    /// Applies an instrumentation request.
    ///
    /// # Returns
    ///
    /// The id under which the request's instrumentation can later be withdrawn.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (invalid description, unknown probe or API surface,
    /// unresolvable catalog type) before anything is modified. Per-unit failures during
    /// injection or substitution are logged and do not fail the request.
    pub fn instrument(&self, description: &InstrumentationDescription) -> Result<RequestId> {
        description.validate()?;
        let request = RequestId(self.inner.next_request.fetch_add(1, Ordering::Relaxed));

        let result = self.with_request(|tracker| self.apply_request(tracker, request, description));
        self.drain_pending();
        let change = result?;

        log::info!(
            "Request {} applied: {} entities added, {} units redefined, {} units failed",
            request,
            change.added,
            change.redefined.len(),
            change.failed.len()
        );
        self.forward_sampling_jobs(request, &description.sampling_jobs)?;
        Ok(request)
    }

    /// Withdraws a request.
    ///
    /// Entities the request shares with other requests stay live; traces it declared stop
    /// expanding and their expansions are withdrawn with it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the engine state is poisoned.
    pub fn uninstrument(&self, request: RequestId) -> Result<StateChange> {
        let change = self.with_request(|tracker| {
            self.inner.expander.retire_request(request);
            Ok(tracker.withdraw(request))
        });
        self.drain_pending();
        let change = change?;

        if let Some(scheduler) = read_lock!(self.inner.sampling).as_ref() {
            scheduler.cancel(request);
        }
        log::info!(
            "Request {} withdrawn: {} entities removed",
            request,
            change.removed
        );
        Ok(change)
    }

    /// Restores every touched unit to its pristine code and forgets all requests.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the engine state is poisoned.
    pub fn revert_all(&self) -> Result<StateChange> {
        let change = self.with_request(|tracker| {
            self.inner.expander.clear();
            lock!(self.inner.pending).clear();
            Ok(tracker.revert_all())
        })?;

        if let Some(scheduler) = read_lock!(self.inner.sampling).as_ref() {
            scheduler.cancel_all();
        }
        Ok(change)
    }

    /// Reverts everything and releases this handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the engine state is poisoned.
    pub fn detach(self) -> Result<StateChange> {
        let change = self.revert_all()?;
        log::info!("Detached, {} units restored", change.redefined.len());
        Ok(change)
    }

    /// Returns the live `(signature, probe type)` pairs, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the engine state is poisoned.
    pub fn current_state(&self) -> Result<Vec<InstrumentationEntry>> {
        let tracker = lock!(self.inner.tracker);
        Ok(tracker
            .current()
            .into_iter()
            .map(|entity| InstrumentationEntry {
                signature: entity.signature.clone(),
                probe_type: entity.probe_type.clone(),
            })
            .collect())
    }

    /// Returns the units the engine has modified and holds a snapshot of.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the engine state is poisoned.
    pub fn tracked_units(&self) -> Result<Vec<UnitId>> {
        Ok(lock!(self.inner.tracker).tracked_units())
    }

    /// Lists the probes and API surfaces requests may reference.
    #[must_use]
    pub fn supported_extensions(&self) -> SupportedExtensions {
        let registry = &self.inner.registry;
        SupportedExtensions {
            probes: registry
                .probe_names()
                .into_iter()
                .filter(|name| *name != self.inner.config.incremental_probe)
                .collect(),
            api_surfaces: registry
                .surfaces()
                .into_iter()
                .map(|(name, description)| ApiSurfaceInfo { name, description })
                .collect(),
        }
    }

    /// Runs `f` with the tracker while this thread is marked as inside a request.
    fn with_request<T>(
        &self,
        f: impl FnOnce(&mut InstrumentationStateTracker) -> Result<T>,
    ) -> Result<T> {
        let mut tracker = lock!(self.inner.tracker);
        let _guard = RequestGuard::enter();
        f(&mut tracker)
    }

    fn apply_request(
        &self,
        tracker: &mut InstrumentationStateTracker,
        request: RequestId,
        description: &InstrumentationDescription,
    ) -> Result<StateChange> {
        let global = self
            .inner
            .config
            .apply_default_excludes(&description.global_restriction);

        let mut rekeyed = description.clone();
        rekeyed.global_restriction = global.clone();
        let mut traces = Vec::new();
        for entity in &mut rekeyed.entities {
            entity.scope.id = ScopeId(self.inner.next_scope.fetch_add(1, Ordering::Relaxed));

            if let ScopeKind::TraceRoot { subscope } = &entity.scope.kind {
                entity.scope.kind = subscope.as_ref().clone();
                if !entity.probes.contains(&self.inner.config.incremental_probe) {
                    entity.probes.push(self.inner.config.incremental_probe.clone());
                }
                traces.push((
                    entity.scope.id,
                    TraceRegistration {
                        probes: entity.probes.clone(),
                        restriction: Arc::new(entity.local_restriction.merged_with(&global)),
                        owner: request,
                    },
                ));
            }
        }

        for (scope_id, registration) in &traces {
            self.inner.expander.register(*scope_id, registration.clone());
        }
        match self.submit(tracker, request, &rekeyed) {
            Ok(change) => Ok(change),
            Err(error) => {
                for (scope_id, _) in &traces {
                    self.inner.expander.unregister(*scope_id);
                }
                Err(error)
            }
        }
    }

    /// Resolves a description whose scope ids are final and applies it for `owner`.
    fn submit(
        &self,
        tracker: &mut InstrumentationStateTracker,
        owner: RequestId,
        description: &InstrumentationDescription,
    ) -> Result<StateChange> {
        let entities = self.inner.resolver.resolve(description)?;

        let restrictions: HashMap<ScopeId, Arc<RestrictionSet>> = description
            .entities
            .iter()
            .map(|entity| {
                let merged = entity
                    .local_restriction
                    .merged_with(&description.global_restriction);
                (entity.scope.id, Arc::new(merged))
            })
            .collect();

        let placements = entities
            .into_iter()
            .filter_map(|entity| {
                let restriction = restrictions.get(&entity.scope_id)?.clone();
                Some(Placement::new(entity, restriction))
            })
            .collect();
        Ok(tracker.apply(owner, placements))
    }

    fn forward_sampling_jobs(&self, request: RequestId, jobs: &[SamplingJob]) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        match read_lock!(self.inner.sampling).as_ref() {
            Some(scheduler) => scheduler.schedule(request, jobs),
            None => log::debug!(
                "No sampling scheduler registered, dropping {} jobs of request {}",
                jobs.len(),
                request
            ),
        }
        Ok(())
    }

    /// Resolves a reported callee to the signature of the member's declaring unit.
    fn declaring_signature(&self, callee: &str) -> String {
        split_signature(callee)
            .and_then(|(unit, member)| {
                let unit = self.inner.host.find_units(unit).into_iter().next()?;
                Some(unit.member(member)?.signature())
            })
            .unwrap_or_else(|| callee.to_string())
    }

    fn expand(&self, callee: &str, scope_id: ScopeId) {
        let target = self.declaring_signature(callee);
        let Some(expansion) = self.inner.expander.expansion_for(callee, &target, scope_id) else {
            return;
        };

        let result = self.with_request(|tracker| self.submit_expansion(tracker, &expansion));
        match result {
            Ok(None) => log::debug!(
                "Trace {} was withdrawn before reaching {}",
                expansion.scope_id,
                target
            ),
            Ok(Some(change)) => log::debug!(
                "Trace {} reached {}: {} entities added",
                expansion.scope_id,
                target,
                change.added
            ),
            Err(error) => log::warn!(
                "Failed to expand trace {} to {}: {}. Ignoring and resuming",
                expansion.scope_id,
                target,
                error
            ),
        }
    }

    /// Applies a claimed expansion if its trace is still registered to the same request.
    ///
    /// Traces are retired under the tracker lock, so checking here, with the lock held,
    /// cannot race a concurrent `uninstrument`.
    fn submit_expansion(
        &self,
        tracker: &mut InstrumentationStateTracker,
        expansion: &Expansion,
    ) -> Result<Option<StateChange>> {
        let live = self
            .inner
            .expander
            .registration(expansion.scope_id)
            .is_some_and(|registration| registration.owner == expansion.owner);
        if !live {
            return Ok(None);
        }
        self.submit(tracker, expansion.owner, &expansion.description)
            .map(Some)
    }

    fn enqueue(&self, callee: &str, scope_id: ScopeId) {
        if self.inner.expander.is_expanded(scope_id, callee) {
            return;
        }
        let Ok(mut pending) = self.inner.pending.lock() else {
            log::warn!("Expansion queue poisoned, dropping {}", callee);
            return;
        };
        if pending.len() >= self.inner.config.max_pending_expansions {
            log::warn!(
                "Expansion queue full, dropping {} for trace {}",
                callee,
                scope_id
            );
            return;
        }
        pending.push_back((callee.to_string(), scope_id));
    }

    fn drain_pending(&self) {
        loop {
            let next = match self.inner.pending.lock() {
                Ok(mut pending) => pending.pop_front(),
                Err(_) => None,
            };
            let Some((callee, scope_id)) = next else {
                break;
            };
            self.expand(&callee, scope_id);
        }
    }
}

impl ExpansionCallback for Engine {
    fn on_call_site(&self, callee: &str, scope_id: ScopeId) {
        if RequestGuard::active() {
            self.enqueue(callee, scope_id);
        } else {
            self.expand(callee, scope_id);
            self.drain_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        description::InstrumentationDescriptionBuilder,
        host::{InMemoryHost, UnitBuilder},
        Error,
    };

    #[derive(Default)]
    struct RecordingScheduler {
        events: Mutex<Vec<String>>,
    }

    impl SamplingScheduler for RecordingScheduler {
        fn schedule(&self, request: RequestId, jobs: &[SamplingJob]) {
            if let Ok(mut events) = self.events.lock() {
                for job in jobs {
                    events.push(format!("schedule {} {}", request, job.sampler));
                }
            }
        }

        fn cancel(&self, request: RequestId) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("cancel {}", request));
            }
        }

        fn cancel_all(&self) {
            if let Ok(mut events) = self.events.lock() {
                events.push("cancel all".to_string());
            }
        }
    }

    fn engine() -> Result<(Arc<InMemoryHost>, Engine)> {
        let host = Arc::new(InMemoryHost::new());
        crate::test::load_service(&host);
        let engine = Engine::attach(host.clone(), EngineConfig::default())?;
        Ok((host, engine))
    }

    #[test]
    fn test_attach_requires_engine_probes() {
        let host = Arc::new(InMemoryHost::new());
        let result = Engine::with_registry(host, EngineConfig::default(), Arc::new(ExtensionRegistry::new()));
        assert!(matches!(result, Err(Error::UnknownProbe(_))));
    }

    #[test]
    fn test_configuration_error_leaves_no_trace() -> Result<()> {
        let (host, engine) = engine()?;
        let description = InstrumentationDescriptionBuilder::new()
            .method_pattern(&["com.app.*"], &["ResponseTimeProbe"])
            .api_surface("Database API", &["ResponseTimeProbe"])
            .build()?;

        assert!(matches!(
            engine.instrument(&description),
            Err(Error::UnresolvedCatalogType { .. })
        ));
        assert!(engine.current_state()?.is_empty());
        assert_eq!(host.redefinition_count(), 0);
        Ok(())
    }

    #[test]
    fn test_default_excludes_apply() -> Result<()> {
        let (host, engine) = engine()?;
        host.load(UnitBuilder::new("runtime.Scheduler").method("tick", &[], |b| b));

        engine.instrument(
            &InstrumentationDescriptionBuilder::new()
                .method_pattern(&["*"], &["ResponseTimeProbe"])
                .build()?,
        )?;
        let state = engine.current_state()?;
        assert!(!state.is_empty());
        assert!(state.iter().all(|e| !e.signature.starts_with("runtime.")));
        Ok(())
    }

    #[test]
    fn test_sampling_jobs_forwarded() -> Result<()> {
        let (_host, engine) = engine()?;
        let scheduler = Arc::new(RecordingScheduler::default());
        engine.set_sampling_scheduler(scheduler.clone())?;

        let request = engine.instrument(
            &InstrumentationDescriptionBuilder::new()
                .method_pattern(&["com.app.Service.*"], &["ResponseTimeProbe"])
                .sampling("cpu", 1000)
                .build()?,
        )?;
        engine.uninstrument(request)?;
        engine.revert_all()?;

        let events = scheduler.events.lock().map_err(|_| Error::LockError)?.clone();
        assert_eq!(
            events,
            vec![
                format!("schedule {} cpu", request),
                format!("cancel {}", request),
                "cancel all".to_string()
            ]
        );
        Ok(())
    }

    #[test]
    fn test_supported_extensions() -> Result<()> {
        let (_host, engine) = engine()?;
        let extensions = engine.supported_extensions();
        assert!(extensions.probes.contains(&"ResponseTimeProbe".to_string()));
        assert!(!extensions.probes.contains(&"IncrementalInstrumentationProbe".to_string()));
        assert_eq!(extensions.api_surfaces.len(), 2);
        Ok(())
    }

    #[test]
    fn test_expansion_claimed_before_withdraw_is_dropped() -> Result<()> {
        let (host, engine) = engine()?;
        let service = host.find_unit("com.app.Service")?;
        let pristine = host.current_code(service.id)?;

        let request = engine.instrument(
            &InstrumentationDescriptionBuilder::new()
                .trace(
                    ScopeKind::MethodPattern {
                        patterns: vec!["com.app.Service.process(int)".to_string()],
                    },
                    &["ResponseTimeProbe"],
                )
                .build()?,
        )?;
        let scope_id = ScopeId(engine.inner.next_scope.load(Ordering::Relaxed) - 1);

        // an application thread claims the expansion, then the request is withdrawn
        let callee = "com.app.Service.audit()";
        let expansion = engine
            .inner
            .expander
            .expansion_for(callee, callee, scope_id)
            .unwrap();
        engine.uninstrument(request)?;

        let change = engine.with_request(|tracker| engine.submit_expansion(tracker, &expansion))?;
        assert!(change.is_none());
        assert!(engine.current_state()?.is_empty());
        assert_eq!(host.current_code(service.id)?, pristine);
        Ok(())
    }

    #[test]
    fn test_hooks_inside_request_are_queued() -> Result<()> {
        let (_host, engine) = engine()?;
        let _guard = RequestGuard::enter();
        engine.on_call_site("com.app.Service.audit()", ScopeId(99));
        assert_eq!(lock!(engine.inner.pending).len(), 1);
        Ok(())
    }
}
