//! Name-keyed registry of probe types and API surfaces.
//!
//! Requests refer to probes and API surfaces by name. The registry maps those names to
//! their definitions; it is populated at startup, usually through
//! [`ExtensionRegistry::with_builtins`], and may be extended before or after the engine
//! attaches.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    probe::{
        builtin::{builtin_probes, INCREMENTAL_PROBE},
        ProbeDescriptor,
    },
    scope::{database_api, entry_point_api, ApiSurface},
    Error, Result,
};

/// Probe types and API surfaces known to an engine.
///
/// # Thread Safety
///
/// Both maps are `DashMap`s; registration and lookup may happen concurrently.
#[derive(Default)]
pub struct ExtensionRegistry {
    probes: DashMap<String, Arc<ProbeDescriptor>>,
    surfaces: DashMap<String, Arc<dyn ApiSurface>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in probes and API surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a built-in probe template is malformed.
    pub fn with_builtins() -> Result<Self> {
        let registry = Self::new();
        for probe in builtin_probes()? {
            registry.register_probe(probe)?;
        }
        registry.register_surface(Arc::new(database_api()));
        registry.register_surface(Arc::new(entry_point_api()));
        Ok(registry)
    }

    /// Registers a probe type, replacing any previous definition of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the probe has no name.
    pub fn register_probe(&self, probe: ProbeDescriptor) -> Result<()> {
        if probe.name.trim().is_empty() {
            return Err(configuration_error!("Probe without a name"));
        }
        if self.probes.insert(probe.name.clone(), Arc::new(probe)).is_some() {
            log::debug!("Replaced a registered probe definition");
        }
        Ok(())
    }

    /// Looks up a probe type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProbe`] if no probe of that name is registered.
    pub fn probe(&self, name: &str) -> Result<Arc<ProbeDescriptor>> {
        self.probes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownProbe(name.to_string()))
    }

    /// Registers an API surface under its own name.
    pub fn register_surface(&self, surface: Arc<dyn ApiSurface>) {
        self.surfaces.insert(surface.name().to_string(), surface);
    }

    /// Looks up an API surface.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownApiSurface`] if no surface of that name is registered.
    pub fn surface(&self, name: &str) -> Result<Arc<dyn ApiSurface>> {
        self.surfaces
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownApiSurface(name.to_string()))
    }

    /// Returns the names of the probes operators may request, sorted.
    ///
    /// The internal incremental probe is not listed.
    #[must_use]
    pub fn probe_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .probes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| name != INCREMENTAL_PROBE)
            .collect();
        names.sort();
        names
    }

    /// Returns `(name, description)` of every API surface, sorted by name.
    #[must_use]
    pub fn surfaces(&self) -> Vec<(String, String)> {
        let mut surfaces: Vec<(String, String)> = self
            .surfaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().describe()))
            .collect();
        surfaces.sort();
        surfaces
    }
}
