use crate::{
    description::{
        InstrumentationDescription, InstrumentationEntity, RestrictionSet, SamplingJob,
        ScopeDescriptor, ScopeId, ScopeKind,
    },
    Result,
};

/// Fluent builder for [`InstrumentationDescription`].
///
/// Scope ids are assigned in declaration order starting at 1. `local_restriction` applies to
/// the most recently added scope.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let description = InstrumentationDescriptionBuilder::new()
///     .api_surface("Database API", &["ResponseTimeProbe"])
///     .trace(
///         ScopeKind::MethodPattern { patterns: vec!["com.app.Main.run()".into()] },
///         &["ResponseTimeProbe"],
///     )
///     .local_restriction(RestrictionSet::new().exclude("com.app.util"))
///     .sampling("cpu", 1000)
///     .build()?;
///
/// assert_eq!(description.entities.len(), 2);
/// assert_eq!(description.entities[1].scope.id, ScopeId(2));
/// # Ok::<(), livescope::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstrumentationDescriptionBuilder {
    entities: Vec<InstrumentationEntity>,
    global_restriction: RestrictionSet,
    sampling_jobs: Vec<SamplingJob>,
}

impl InstrumentationDescriptionBuilder {
    /// Starts an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scope of any kind.
    #[must_use]
    pub fn scope(mut self, kind: ScopeKind, probes: &[&str]) -> Self {
        let id = ScopeId::new(self.entities.len() as u64 + 1);
        self.entities.push(InstrumentationEntity {
            scope: ScopeDescriptor::new(id, kind),
            probes: probes.iter().map(|p| (*p).to_string()).collect(),
            local_restriction: RestrictionSet::new(),
        });
        self
    }

    /// Adds a signature-pattern scope.
    #[must_use]
    pub fn method_pattern(self, patterns: &[&str], probes: &[&str]) -> Self {
        self.scope(
            ScopeKind::MethodPattern {
                patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            },
            probes,
        )
    }

    /// Adds a scope over the methods of units matching the name patterns.
    #[must_use]
    pub fn classes(self, patterns: &[&str], probes: &[&str]) -> Self {
        self.scope(
            ScopeKind::Class {
                patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            },
            probes,
        )
    }

    /// Adds a constructor scope over the named units.
    #[must_use]
    pub fn constructors(self, classes: &[&str], probes: &[&str]) -> Self {
        self.scope(
            ScopeKind::ConstructorOfClasses {
                classes: classes.iter().map(|c| (*c).to_string()).collect(),
            },
            probes,
        )
    }

    /// Adds a scope over a registered API surface.
    #[must_use]
    pub fn api_surface(self, name: &str, probes: &[&str]) -> Self {
        self.scope(
            ScopeKind::ApiSurface {
                name: name.to_string(),
            },
            probes,
        )
    }

    /// Adds a trace scope rooted at the members `subscope` matches.
    #[must_use]
    pub fn trace(self, subscope: ScopeKind, probes: &[&str]) -> Self {
        self.scope(
            ScopeKind::TraceRoot {
                subscope: Box::new(subscope),
            },
            probes,
        )
    }

    /// Sets the local restriction of the most recently added scope.
    #[must_use]
    pub fn local_restriction(mut self, restriction: RestrictionSet) -> Self {
        if let Some(entity) = self.entities.last_mut() {
            entity.local_restriction = restriction;
        }
        self
    }

    /// Sets the global restriction.
    #[must_use]
    pub fn global_restriction(mut self, restriction: RestrictionSet) -> Self {
        self.global_restriction = restriction;
        self
    }

    /// Adds a sampling job.
    #[must_use]
    pub fn sampling(mut self, sampler: &str, delay_ms: u64) -> Self {
        self.sampling_jobs.push(SamplingJob {
            sampler: sampler.to_string(),
            delay_ms,
        });
        self
    }

    /// Produces the validated description.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the description is structurally invalid.
    pub fn build(self) -> Result<InstrumentationDescription> {
        let description = InstrumentationDescription {
            entities: self.entities,
            global_restriction: self.global_restriction,
            sampling_jobs: self.sampling_jobs,
        };
        description.validate()?;
        Ok(description)
    }
}
