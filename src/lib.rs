// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # livescope
//!
//! [![Crates.io](https://img.shields.io/crates/v/livescope.svg)](https://crates.io/crates/livescope)
//! [![Documentation](https://docs.rs/livescope/badge.svg)](https://docs.rs/livescope)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/livescope/blob/main/LICENSE-APACHE)
//!
//! A runtime instrumentation engine. `livescope` injects measurement probes into the code of a
//! running managed-code process, composes several probes on the same member, grows trace
//! scopes along the call paths the program actually executes, and restores every touched unit
//! to its pristine code on request.
//!
//! ## Features
//!
//! - **🎯 Declarative scopes** - Signature patterns, whole classes, constructors of classes, API-surface catalogs and trace roots
//! - **🧩 Composable probes** - Any number of probes per member, bracketed by one generic wrapper
//! - **🔁 Reversible** - Pristine snapshots per unit; overlapping requests rebuild from them
//! - **🌱 Incremental traces** - Coverage expands at runtime, exactly once per callee and trace
//! - **🛡️ Per-unit degradation** - A unit that cannot be rewritten or swapped never fails a request
//! - **⚡ Parallel resolution** - Scope analysis runs across loaded units on a thread pool
//!
//! ## Quick Start
//!
//! ```rust
//! use livescope::prelude::*;
//! use std::sync::Arc;
//!
//! let host = Arc::new(InMemoryHost::new());
//! host.load(
//!     UnitBuilder::new("com.app.Orders")
//!         .method("place", &["int"], |b| b.source("store(arg0)").returns()),
//! );
//!
//! let engine = Engine::attach(host.clone(), EngineConfig::default())?;
//! let description = InstrumentationDescriptionBuilder::new()
//!     .method_pattern(&["com.app.Orders.*"], &["ResponseTimeProbe"])
//!     .build()?;
//! let request = engine.instrument(&description)?;
//! assert_eq!(engine.current_state()?.len(), 1);
//!
//! engine.uninstrument(request)?;
//! assert!(engine.tracked_units()?.is_empty());
//! # Ok::<(), livescope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! InstrumentationDescription
//!        │
//!        ▼
//!  ScopeResolver ──► [FlatInstrumentationEntity] ──► InstrumentationStateTracker
//!   (analyzers)                                        │
//!                                                      ├─ CodeInjector  (ProbeComposer)
//!                                                      └─ RuntimeSwapper ──► HostRuntime
//! ```
//!
//! - [`description`] - Requests: scopes, probes, restrictions, sampling jobs
//! - [`restriction`] - Include/exclude patterns, modifier filters and sampling granularity
//! - [`probe`] - Probe templates, fragment compilation and snippet composition
//! - [`registry`] - Probe types and API surfaces by name
//! - [`scope`] - Scope analyzers and the resolver driving them
//! - [`inject`] - Code rewriting and live substitution
//! - [`engine`] - The context object owning the live state
//! - [`host`] - The runtime abstraction and an in-memory host
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Configuration errors abort a request before any
//! code is touched; failures that concern a single unit are logged through the [`log`] facade
//! and skipped.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use livescope::prelude::*;
///
/// let restriction = RestrictionSet::new().include("com.app").exclude("com.app.internal");
/// assert!(restriction.is_excluded("com.app.internal.Cache"));
/// ```
pub mod prelude;

/// Engine configuration.
pub mod config;

/// Instrumentation requests.
///
/// A request is a list of scopes, each with the probes to attach to the members it selects and
/// an optional local restriction, plus a global restriction and sampling jobs. Requests are
/// usually assembled with [`description::InstrumentationDescriptionBuilder`] or read from
/// JSON with [`description::InstrumentationDescription::from_json`].
pub mod description;

/// The engine context object and its live state.
pub mod engine;

/// The managed-code host abstraction.
pub mod host;

/// Code injection and live substitution.
pub mod inject;

/// Probe templates, fragments and composition.
pub mod probe;

/// Name-keyed registry of extensions.
pub mod registry;

/// Include/exclude restrictions.
pub mod restriction;

/// Scope resolution.
pub mod scope;

/// `livescope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `livescope` Error type
///
/// See [`error::Error`] for the categories and how the engine handles each of them.
pub use error::Error;
