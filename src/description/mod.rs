//! Instrumentation requests.
//!
//! An [`InstrumentationDescription`] is the value object an operator submits to the engine:
//! a list of [`InstrumentationEntity`] (a scope, the probes to attach to what it matches and
//! a local restriction), one global [`RestrictionSet`] and the periodic sampling jobs that
//! accompany the request. Descriptions are immutable inputs; the engine never modifies them.
//!
//! Descriptions are usually assembled with [`InstrumentationDescriptionBuilder`] or read from
//! JSON with [`InstrumentationDescription::from_json`].
//!
//! # Examples
//!
//! ```rust
//! use livescope::prelude::*;
//!
//! let description = InstrumentationDescriptionBuilder::new()
//!     .method_pattern(&["com.app.Service.process(*)"], &["ResponseTimeProbe"])
//!     .global_restriction(RestrictionSet::new().exclude("com.app.internal"))
//!     .build()?;
//!
//! let json = description.to_json()?;
//! assert_eq!(InstrumentationDescription::from_json(&json)?, description);
//! # Ok::<(), livescope::Error>(())
//! ```

mod builder;
mod scope;

pub use builder::InstrumentationDescriptionBuilder;
pub use scope::{ScopeDescriptor, ScopeId, ScopeKind};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use crate::restriction::RestrictionSet;
use crate::Result;

/// One scope with the probes to attach to its matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationEntity {
    /// What to instrument
    pub scope: ScopeDescriptor,
    /// Probe type names, in injection order
    pub probes: Vec<String>,
    /// Restriction combined with the request's global restriction for this scope
    #[serde(default)]
    pub local_restriction: RestrictionSet,
}

/// A periodic sampling job, forwarded to the sampling subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingJob {
    /// Name of the sampler
    pub sampler: String,
    /// Sampling period in milliseconds
    pub delay_ms: u64,
}

/// A complete instrumentation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationDescription {
    /// Scopes and their probes
    pub entities: Vec<InstrumentationEntity>,
    /// Restriction applied to every scope
    #[serde(default)]
    pub global_restriction: RestrictionSet,
    /// Sampling jobs accompanying the request
    #[serde(default)]
    pub sampling_jobs: Vec<SamplingJob>,
}

impl InstrumentationDescription {
    /// Reads a description from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] for unreadable documents and
    /// [`crate::Error::Configuration`] for structurally invalid descriptions.
    pub fn from_json(json: &str) -> Result<Self> {
        let description: InstrumentationDescription = serde_json::from_str(json)?;
        description.validate()?;
        Ok(description)
    }

    /// Writes the description as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the structural rules of a description.
    ///
    /// - scope ids are unique within the request
    /// - every scope names at least one probe
    /// - pattern and class lists are non-empty and contain no blank entries
    /// - trace roots do not nest
    /// - restrictions are well-formed
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        self.global_restriction.validate()?;

        let mut ids = HashSet::new();
        for entity in &self.entities {
            let id = entity.scope.id;
            if !ids.insert(id) {
                return Err(configuration_error!("Duplicate scope id {}", id));
            }
            if entity.probes.is_empty() {
                return Err(configuration_error!("Scope {} declares no probes", id));
            }
            entity.local_restriction.validate()?;
            validate_kind(id, &entity.scope.kind, false)?;
        }
        Ok(())
    }
}

fn validate_kind(id: ScopeId, kind: &ScopeKind, nested: bool) -> Result<()> {
    let entries = match kind {
        ScopeKind::MethodPattern { patterns } | ScopeKind::Class { patterns } => patterns,
        ScopeKind::ConstructorOfClasses { classes } => classes,
        ScopeKind::ApiSurface { name } => {
            if name.trim().is_empty() {
                return Err(configuration_error!("Scope {} names no API surface", id));
            }
            return Ok(());
        }
        ScopeKind::TraceRoot { subscope } => {
            if nested {
                return Err(configuration_error!("Invalid sub scope type in scope {}", id));
            }
            return validate_kind(id, subscope, true);
        }
    };

    if entries.is_empty() || entries.iter().any(|e| e.trim().is_empty()) {
        return Err(configuration_error!(
            "Scope {} ({}) has an empty selection",
            id,
            kind.kind_name()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn entity(id: u64, kind: ScopeKind) -> InstrumentationEntity {
        InstrumentationEntity {
            scope: ScopeDescriptor::new(ScopeId(id), kind),
            probes: vec!["ResponseTimeProbe".to_string()],
            local_restriction: RestrictionSet::new(),
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let kind = ScopeKind::ApiSurface {
            name: "Database API".into(),
        };
        let description = InstrumentationDescription {
            entities: vec![entity(1, kind.clone()), entity(1, kind)],
            ..Default::default()
        };
        assert!(matches!(
            description.validate(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nested_trace_roots() {
        let nested = ScopeKind::TraceRoot {
            subscope: Box::new(ScopeKind::TraceRoot {
                subscope: Box::new(ScopeKind::MethodPattern {
                    patterns: vec!["com.app.*".into()],
                }),
            }),
        };
        let description = InstrumentationDescription {
            entities: vec![entity(1, nested)],
            ..Default::default()
        };
        assert!(description.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_selection() {
        let description = InstrumentationDescription {
            entities: vec![entity(1, ScopeKind::MethodPattern { patterns: vec![] })],
            ..Default::default()
        };
        assert!(description.validate().is_err());

        let mut no_probes = entity(2, ScopeKind::ConstructorOfClasses { classes: vec!["com.app.A".into()] });
        no_probes.probes.clear();
        let description = InstrumentationDescription {
            entities: vec![no_probes],
            ..Default::default()
        };
        assert!(description.validate().is_err());
    }

    #[test]
    fn test_from_json() -> Result<()> {
        let json = r#"{
            "entities": [{
                "scope": { "id": 4, "kind": { "method_pattern": { "patterns": ["com.app.Service.*"] } } },
                "probes": ["ResponseTimeProbe"],
                "local_restriction": { "excludes": ["com.app.internal"], "modifier_includes": "PUBLIC" }
            }],
            "global_restriction": { "granularity": 0.5 },
            "sampling_jobs": [{ "sampler": "cpu", "delay_ms": 500 }]
        }"#;

        let description = InstrumentationDescription::from_json(json)?;
        assert_eq!(description.entities.len(), 1);
        let entity = &description.entities[0];
        assert_eq!(entity.scope.id, ScopeId(4));
        assert_eq!(entity.scope.kind.kind_name(), "MethodPattern");
        assert_eq!(
            entity.local_restriction.modifier_includes,
            crate::host::MemberModifiers::PUBLIC
        );
        assert_eq!(description.global_restriction.granularity, Some(0.5));
        assert_eq!(description.sampling_jobs[0].delay_ms, 500);
        Ok(())
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            InstrumentationDescription::from_json("{ not json"),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            InstrumentationDescription::from_json(
                r#"{ "entities": [], "global_restriction": { "granularity": 2.0 } }"#
            ),
            Err(Error::Configuration { .. })
        ));
    }
}
