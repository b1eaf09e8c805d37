//! Include/exclude filtering over qualified names and member modifiers.
//!
//! A [`RestrictionSet`] narrows what a scope may match. Requests carry one global set that
//! applies to every scope, and each scope may add a local set; the two are combined with
//! [`RestrictionSet::merged_with`], which unions their lists.
//!
//! # Name Precedence
//!
//! Each include/exclude entry is a glob (see [`pattern_matches`]). An entry also covers
//! everything below it at a `.` boundary, so `com.app` covers `com.app.Service`. When a name
//! is covered by both lists, the entry with more literal characters wins; on a tie the
//! exclude wins. When includes are configured and none covers a name, the name is excluded.
//!
//! # Modifier Rules
//!
//! If any include-modifier is configured, a member must carry at least one of them. A member
//! carrying any exclude-modifier is always excluded.
//!
//! # Thread Safety
//!
//! All checks are pure functions of `&self` and safe to call concurrently.

mod pattern;

pub use pattern::{pattern_matches, pattern_prefix_matches, specificity};

use serde::{Deserialize, Serialize};

use crate::{host::MemberModifiers, Result};

/// Include/exclude lists over qualified names and modifiers.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let restriction = RestrictionSet::new()
///     .include("com.app")
///     .exclude("com.app.internal");
///
/// assert!(restriction.is_excluded("com.app.internal.X"));
/// assert!(!restriction.is_excluded("com.app.api.Y"));
/// assert!(restriction.is_excluded("org.other.Z"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionSet {
    /// Qualified-name patterns that are admitted (empty admits everything)
    pub includes: Vec<String>,
    /// Qualified-name patterns that are rejected
    pub excludes: Vec<String>,
    /// A member must carry at least one of these, if any are set
    pub modifier_includes: MemberModifiers,
    /// A member carrying any of these is rejected
    pub modifier_excludes: MemberModifiers,
    /// Fraction of threads that execute probe code, in (0, 1] (default: all threads)
    pub granularity: Option<f64>,
}

impl RestrictionSet {
    /// Creates an empty restriction that excludes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include pattern.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Adds an exclude pattern.
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Adds modifiers of which a member must carry at least one.
    #[must_use]
    pub fn include_modifiers(mut self, modifiers: MemberModifiers) -> Self {
        self.modifier_includes |= modifiers;
        self
    }

    /// Adds modifiers that exclude a member.
    #[must_use]
    pub fn exclude_modifiers(mut self, modifiers: MemberModifiers) -> Self {
        self.modifier_excludes |= modifiers;
        self
    }

    /// Sets the sampling granularity.
    #[must_use]
    pub fn with_granularity(mut self, granularity: f64) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Returns `true` if this restriction filters nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
            && self.excludes.is_empty()
            && self.modifier_includes.is_empty()
            && self.modifier_excludes.is_empty()
    }

    /// Returns `true` if any modifier filter is configured.
    #[must_use]
    pub fn has_modifier_restrictions(&self) -> bool {
        !self.modifier_includes.is_empty() || !self.modifier_excludes.is_empty()
    }

    /// Decides whether a qualified name is filtered out.
    ///
    /// # Arguments
    ///
    /// * `name` - A qualified unit name, e.g. `com.app.internal.Cache`
    ///
    /// # Returns
    ///
    /// `true` if the most specific covering exclude is at least as specific as the most
    /// specific covering include, or if includes exist and none covers the name.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        let best_include = best_match(&self.includes, name);
        let best_exclude = best_match(&self.excludes, name);

        match (best_include, best_exclude) {
            (Some(include), Some(exclude)) => exclude >= include,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => !self.includes.is_empty(),
        }
    }

    /// Decides whether a member with the given modifiers is filtered out.
    #[must_use]
    pub fn modifier_set_excluded(&self, modifiers: MemberModifiers) -> bool {
        if !self.modifier_includes.is_empty() && !modifiers.intersects(self.modifier_includes) {
            return true;
        }
        modifiers.intersects(self.modifier_excludes)
    }

    /// Combines this (local) restriction with a global one.
    ///
    /// Name and modifier lists are unioned, keeping first occurrence order. The local
    /// granularity wins over the global one.
    #[must_use]
    pub fn merged_with(&self, global: &RestrictionSet) -> RestrictionSet {
        let mut merged = self.clone();
        for include in &global.includes {
            if !merged.includes.contains(include) {
                merged.includes.push(include.clone());
            }
        }
        for exclude in &global.excludes {
            if !merged.excludes.contains(exclude) {
                merged.excludes.push(exclude.clone());
            }
        }
        merged.modifier_includes |= global.modifier_includes;
        merged.modifier_excludes |= global.modifier_excludes;
        merged.granularity = self.granularity.or(global.granularity);
        merged
    }

    /// Returns the effective granularity (default: 1.0).
    #[must_use]
    pub fn effective_granularity(&self) -> f64 {
        self.granularity.unwrap_or(1.0)
    }

    /// Checks that the restriction is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] for empty patterns or a granularity outside
    /// (0, 1].
    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = self
            .includes
            .iter()
            .chain(self.excludes.iter())
            .find(|p| p.trim().is_empty())
        {
            return Err(configuration_error!(
                "Empty restriction pattern '{}'",
                pattern
            ));
        }
        if let Some(granularity) = self.granularity {
            if !(granularity > 0.0 && granularity <= 1.0) {
                return Err(configuration_error!(
                    "Granularity {} is outside (0, 1]",
                    granularity
                ));
            }
        }
        Ok(())
    }
}

/// Specificity of the most specific entry covering `name`, if any.
fn best_match(entries: &[String], name: &str) -> Option<usize> {
    entries
        .iter()
        .filter(|entry| covers(entry, name))
        .map(|entry| specificity(entry))
        .max()
}

fn covers(entry: &str, name: &str) -> bool {
    if pattern_matches(name, entry) {
        return true;
    }
    !entry.ends_with('*')
        && name.len() > entry.len()
        && pattern_matches(name, &format!("{}.*", entry))
}
