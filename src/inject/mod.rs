//! Code injection and live substitution.
//!
//! Injection turns a set of flat entities into replacement code for the units they touch,
//! and substitution commits that code into the running host:
//!
//! ```text
//! [Placement] ──► InstrumentationSet ──► CodeInjector ──► {unit → CodeUnit} ──► RuntimeSwapper ──► host
//!                  unit → member → probe    snapshot + compose                    redefine per unit
//! ```
//!
//! Both stages degrade per unit: a unit that cannot be rewritten or swapped is logged, left
//! in its prior state and reported back, and the rest of the batch proceeds.
//!
//! # Key Components
//!
//! - [`InstrumentationSet`] - Entities grouped by unit and member
//! - [`CodeInjector`] - Snapshot keeping and per-member rewriting
//! - [`rewrite_call_sites`] - Expansion hooks for trace scopes
//! - [`RuntimeSwapper`] - Commits replacements and reports refusals

mod call_sites;
mod injector;
mod set;
mod swapper;

pub use call_sites::{rewrite_call_sites, ExpansionHook};
pub use injector::{CodeInjector, InjectionOutcome};
pub use set::{Attachment, InstrumentationSet, MemberTargets, Placement, UnitTargets};
pub use swapper::{RuntimeSwapper, SwapReport};
