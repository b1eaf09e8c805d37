//! Configuration for the instrumentation engine.

use serde::{Deserialize, Serialize};

use crate::{
    probe::builtin::{GENERIC_PROBE, INCREMENTAL_PROBE},
    restriction::RestrictionSet,
    Result,
};

/// Configuration for the instrumentation engine.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let config = EngineConfig::from_json(r#"{ "parallel_resolution": false }"#)?;
/// assert!(!config.parallel_resolution);
/// assert_eq!(config.generic_probe, "GenericProbe");
/// # Ok::<(), livescope::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Namespaces appended to every request's global exclude list
    /// (default: `livescope.*`, `std.*`, `core.*`, `runtime.*`).
    pub default_excludes: Vec<String>,

    /// Wrapper probe bracketing all probe code (default: `GenericProbe`).
    pub generic_probe: String,

    /// Probe carrying the trace expansion hook (default: `IncrementalInstrumentationProbe`).
    pub incremental_probe: String,

    /// Visit units on the rayon thread pool during resolution (default: true).
    pub parallel_resolution: bool,

    /// Maximum expansions queued while a request holds the engine (default: 4096).
    pub max_pending_expansions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_excludes: ["livescope.*", "std.*", "core.*", "runtime.*"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            generic_probe: GENERIC_PROBE.to_string(),
            incremental_probe: INCREMENTAL_PROBE.to_string(),
            parallel_resolution: true,
            max_pending_expansions: 4096,
        }
    }
}

impl EngineConfig {
    /// Reads a configuration document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the document cannot be parsed and
    /// [`crate::Error::Configuration`] if it names empty probes or excludes.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that probe names and exclude patterns are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.generic_probe.trim().is_empty() || self.incremental_probe.trim().is_empty() {
            return Err(configuration_error!("Engine probes must be named"));
        }
        if self.default_excludes.iter().any(|e| e.trim().is_empty()) {
            return Err(configuration_error!("Empty default exclude"));
        }
        Ok(())
    }

    /// Returns `global` with the default excludes appended.
    #[must_use]
    pub fn apply_default_excludes(&self, global: &RestrictionSet) -> RestrictionSet {
        let defaults = RestrictionSet {
            excludes: self.default_excludes.clone(),
            ..RestrictionSet::default()
        };
        global.merged_with(&defaults)
    }
}
