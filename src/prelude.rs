//! # livescope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the livescope library. Import this module to get quick access to the essential
//! types for attaching to a host and instrumenting it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all livescope operations
pub use crate::Error;

/// The result type used throughout livescope
pub use crate::Result;

/// Engine-wide configuration
pub use crate::config::EngineConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The engine context object and its live state
pub use crate::engine::{
    Engine, InstrumentationEntry, RequestId, SamplingScheduler, StateChange, SupportedExtensions,
};

/// Runtime trace widening
pub use crate::engine::{IncrementalTraceExpander, TraceRegistration};

// ================================================================================================
// Requests
// ================================================================================================

/// Request model and builder
pub use crate::description::{
    InstrumentationDescription, InstrumentationDescriptionBuilder, InstrumentationEntity,
    SamplingJob, ScopeDescriptor, ScopeId, ScopeKind,
};

/// Include/exclude restrictions
pub use crate::restriction::{pattern_matches, RestrictionSet};

// ================================================================================================
// Host Abstraction
// ================================================================================================

/// Runtime traits
pub use crate::host::{ExpansionCallback, HostRuntime, NoExpansion};

/// Unit and code model
pub use crate::host::{
    CodeUnit, LoaderId, Member, MemberKind, MemberModifiers, MethodBody, Statement, Unit,
    UnitBuilder, UnitFlags, UnitId, UnitRc,
};

/// In-memory host
pub use crate::host::{ExecutionTrace, InMemoryHost};

// ================================================================================================
// Extensions
// ================================================================================================

/// Probe definitions and composition
pub use crate::probe::{ProbeComposer, ProbeDescriptor, ProbeFragmentCompiler, Snippet};

/// Registry of probes and API surfaces
pub use crate::registry::ExtensionRegistry;

/// API surfaces
pub use crate::scope::{ApiCatalog, ApiSurface, CatalogSurface};

// ================================================================================================
// Pipeline Stages
// ================================================================================================

/// Scope resolution
pub use crate::scope::{FlatInstrumentationEntity, FlatScopeEntity, ScopeAnalyzer, ScopeResolver};

/// Injection and substitution
pub use crate::inject::{
    CodeInjector, InstrumentationSet, Placement, RuntimeSwapper, SwapReport,
};
