//! Program units and their executable members.
//!
//! A [`Unit`] is the host's unit of code loading and replacement (a class in most managed
//! runtimes). It exposes the members that scope analyzers inspect: their names, parameter
//! lists, modifiers and marker annotations. Members inherited from supertypes are listed on
//! the inheriting unit but keep their declaring unit, since code lives with the declarer.
//!
//! # Key Components
//!
//! - [`UnitId`] - Host-assigned identity of a loaded unit
//! - [`Unit`] - Introspection view of one loaded unit
//! - [`Member`] - A method or constructor, with its signature forms
//! - [`UnitFlags`] / [`MemberModifiers`] - Kind and modifier flags
//! - [`UnitBuilder`] - Fluent construction of units and their code for [`crate::host::InMemoryHost`]

use std::{
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::host::code::{CodeUnit, MethodBody};

/// Member name used for constructors in signatures.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// A reference-counted loaded unit.
pub type UnitRc = Arc<Unit>;

/// Identity of a loaded unit, assigned by the host runtime.
///
/// Ids are stable for the lifetime of the unit and are the key under which pristine
/// snapshots and replacement code are tracked.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl UnitId {
    /// Creates a new `UnitId` from a raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        UnitId(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for UnitId {
    fn from(value: u32) -> Self {
        UnitId(value)
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId(0x{:08x})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for UnitId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Identity of a code-loading context.
///
/// Units without a loader were loaded by the host's bootstrap context and are never
/// instrumented.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct LoaderId(pub u32);

impl LoaderId {
    /// The default application loader.
    pub const APPLICATION: LoaderId = LoaderId(1);
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Default)]
    /// Unit kind flags
    pub struct UnitFlags: u32 {
        /// Unit is an interface
        const INTERFACE = 0x0001;
        /// Unit is an array type
        const ARRAY = 0x0002;
        /// Unit is a primitive type
        const PRIMITIVE = 0x0004;
        /// Unit is an annotation type
        const ANNOTATION = 0x0008;
        /// Unit is an enumeration
        const ENUM = 0x0010;
        /// Unit was generated by the compiler
        const SYNTHETIC = 0x0020;
        /// Unit is anonymous
        const ANONYMOUS = 0x0040;
        /// Unit is declared inside a member body
        const LOCAL = 0x0080;
        /// Unit is abstract
        const ABSTRACT = 0x0100;
    }
}

impl UnitFlags {
    /// Returns `true` if units of this kind can carry instrumented code.
    #[must_use]
    pub fn is_instrumentable_kind(&self) -> bool {
        !self.intersects(
            UnitFlags::INTERFACE
                | UnitFlags::ARRAY
                | UnitFlags::PRIMITIVE
                | UnitFlags::ANNOTATION
                | UnitFlags::ENUM
                | UnitFlags::SYNTHETIC
                | UnitFlags::ANONYMOUS
                | UnitFlags::LOCAL,
        )
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    /// Member modifier flags
    pub struct MemberModifiers: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only within the declaring unit
        const PRIVATE = 0x0002;
        /// Accessible from subtypes
        const PROTECTED = 0x0004;
        /// Not bound to an instance
        const STATIC = 0x0008;
        /// Cannot be overridden
        const FINAL = 0x0010;
        /// Runs under the instance monitor
        const SYNCHRONIZED = 0x0020;
        /// Implemented outside managed code
        const NATIVE = 0x0100;
        /// Declared without a body
        const ABSTRACT = 0x0400;
    }
}

impl MemberModifiers {
    /// Parses a single modifier keyword such as `public` or `static`.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::from_name(&keyword.trim().to_ascii_uppercase())
    }

    /// Returns `true` if members carrying these modifiers have an executable body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.intersects(MemberModifiers::ABSTRACT | MemberModifiers::NATIVE)
    }
}

/// Kind of an executable member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum MemberKind {
    /// A regular method
    Method,
    /// A constructor
    Constructor,
}

/// An executable member of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Simple name; [`CONSTRUCTOR_NAME`] for constructors
    pub name: String,
    /// Method or constructor
    pub kind: MemberKind,
    /// Qualified name of the unit that declares the member
    pub declaring_unit: String,
    /// Qualified parameter type names, arrays written `T[]`
    pub parameters: Vec<String>,
    /// Modifier flags
    pub modifiers: MemberModifiers,
    /// Qualified names of the marker annotations carried by the member
    pub markers: Vec<String>,
}

impl Member {
    /// Returns `name(p1,p2)`, the signature relative to the declaring unit.
    #[must_use]
    pub fn short_signature(&self) -> String {
        format!("{}({})", self.name, self.parameters.join(","))
    }

    /// Returns the fully-qualified signature `declaring.unit.name(p1,p2)`.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}.{}", self.declaring_unit, self.short_signature())
    }

    /// Returns `true` if the member has code that can be instrumented.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.modifiers.has_body()
    }

    /// Returns `true` if the member carries the given marker.
    #[must_use]
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }
}

/// Splits a fully-qualified signature into `(unit name, short signature)`.
///
/// Returns `None` if the text has no parameter list or no unit qualifier.
#[must_use]
pub fn split_signature(signature: &str) -> Option<(&str, &str)> {
    let paren = signature.find('(')?;
    let dot = signature[..paren].rfind('.')?;
    Some((&signature[..dot], &signature[dot + 1..]))
}

/// Introspection view of one loaded unit.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Host-assigned identity
    pub id: UnitId,
    /// Qualified name, e.g. `com.app.Service`
    pub name: String,
    /// Kind flags
    pub flags: UnitFlags,
    /// Loading context; `None` for the bootstrap context
    pub loader: Option<LoaderId>,
    /// Qualified names of all supertypes, transitively
    pub supertypes: Vec<String>,
    /// Declared members followed by visible inherited members
    pub members: Vec<Member>,
}

impl Unit {
    /// Returns the name without its namespace.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Returns `true` if values of this unit can be used where `type_name` is expected.
    #[must_use]
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.name == type_name || self.supertypes.iter().any(|s| s == type_name)
    }

    /// Iterates the members declared by this unit itself.
    pub fn declared_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(move |m| m.declaring_unit == self.name)
    }

    /// Looks up a member by short signature, declared or inherited.
    #[must_use]
    pub fn member(&self, short_signature: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.short_signature() == short_signature)
    }
}

/// Fluent builder for a unit and its code.
///
/// Each `method`/`constructor` call starts a new member; `modifiers` and `marker` apply to the
/// most recently added member.
///
/// # Examples
///
/// ```rust
/// use livescope::prelude::*;
///
/// let host = InMemoryHost::new();
/// let service = host.load(
///     UnitBuilder::new("com.app.Service")
///         .method("process", &["int"], |body| body.source("work()"))
///         .method("process", &["int", "int"], |body| body.call("com.app.Repo", "save(int)"))
///         .method("helper", &[], |body| body)
///         .modifiers(MemberModifiers::PRIVATE),
/// );
/// assert_eq!(service.declared_members().count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    name: String,
    flags: UnitFlags,
    loader: Option<LoaderId>,
    supertypes: Vec<String>,
    inherited: Vec<Member>,
    declared: Vec<(Member, Option<MethodBody>)>,
}

impl UnitBuilder {
    /// Starts a unit with the given qualified name, loaded by the application loader.
    pub fn new(name: impl Into<String>) -> Self {
        UnitBuilder {
            name: name.into(),
            flags: UnitFlags::empty(),
            loader: Some(LoaderId::APPLICATION),
            supertypes: Vec::new(),
            inherited: Vec::new(),
            declared: Vec::new(),
        }
    }

    /// Sets the unit kind flags.
    #[must_use]
    pub fn flags(mut self, flags: UnitFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the loading context.
    #[must_use]
    pub fn loader(mut self, loader: Option<LoaderId>) -> Self {
        self.loader = loader;
        self
    }

    /// Declares a supertype by name without inheriting members from it.
    #[must_use]
    pub fn implements(mut self, type_name: impl Into<String>) -> Self {
        self.supertypes.push(type_name.into());
        self
    }

    /// Extends a loaded unit, inheriting its supertypes and its public non-constructor members.
    #[must_use]
    pub fn extends(mut self, parent: &Unit) -> Self {
        self.supertypes.push(parent.name.clone());
        self.supertypes.extend(parent.supertypes.iter().cloned());
        self.inherited.extend(
            parent
                .members
                .iter()
                .filter(|m| {
                    m.kind == MemberKind::Method && m.modifiers.contains(MemberModifiers::PUBLIC)
                })
                .cloned(),
        );
        self
    }

    /// Adds a public method with a body.
    #[must_use]
    pub fn method<F>(self, name: &str, parameters: &[&str], body: F) -> Self
    where
        F: FnOnce(MethodBody) -> MethodBody,
    {
        self.member(MemberKind::Method, name, parameters, Some(body(MethodBody::new())))
    }

    /// Adds a public abstract method without a body.
    #[must_use]
    pub fn abstract_method(self, name: &str, parameters: &[&str]) -> Self {
        self.member(MemberKind::Method, name, parameters, None)
            .modifiers(MemberModifiers::PUBLIC | MemberModifiers::ABSTRACT)
    }

    /// Adds a public constructor with a body.
    #[must_use]
    pub fn constructor<F>(self, parameters: &[&str], body: F) -> Self
    where
        F: FnOnce(MethodBody) -> MethodBody,
    {
        self.member(
            MemberKind::Constructor,
            CONSTRUCTOR_NAME,
            parameters,
            Some(body(MethodBody::new())),
        )
    }

    /// Replaces the modifiers of the most recently added member.
    #[must_use]
    pub fn modifiers(mut self, modifiers: MemberModifiers) -> Self {
        if let Some((member, _)) = self.declared.last_mut() {
            member.modifiers = modifiers;
        }
        self
    }

    /// Attaches a marker annotation to the most recently added member.
    #[must_use]
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        if let Some((member, _)) = self.declared.last_mut() {
            member.markers.push(marker.into());
        }
        self
    }

    fn member(
        mut self,
        kind: MemberKind,
        name: &str,
        parameters: &[&str],
        body: Option<MethodBody>,
    ) -> Self {
        let member = Member {
            name: name.to_string(),
            kind,
            declaring_unit: self.name.clone(),
            parameters: parameters.iter().map(|p| (*p).to_string()).collect(),
            modifiers: MemberModifiers::PUBLIC,
            markers: Vec::new(),
        };
        self.declared.push((member, body));
        self
    }

    /// Returns the qualified name of the unit under construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produces the unit and its code under the given id.
    ///
    /// Declared members shadow inherited members with the same short signature. Members
    /// without a body (abstract, native) get no code entry.
    pub(crate) fn build(self, id: UnitId) -> (Unit, CodeUnit) {
        let mut code = CodeUnit::new(id);
        let mut members = Vec::with_capacity(self.declared.len() + self.inherited.len());
        let mut seen = HashSet::new();

        for (member, body) in self.declared {
            seen.insert(member.short_signature());
            if let (true, Some(body)) = (member.has_body(), body) {
                code.bodies.insert(member.short_signature(), body);
            }
            members.push(member);
        }
        for member in self.inherited {
            if seen.insert(member.short_signature()) {
                members.push(member);
            }
        }

        let mut supertypes = Vec::new();
        for supertype in self.supertypes {
            if !supertypes.contains(&supertype) {
                supertypes.push(supertype);
            }
        }

        let unit = Unit {
            id,
            name: self.name,
            flags: self.flags,
            loader: self.loader,
            supertypes,
            members,
        };
        (unit, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_display() {
        let id = UnitId::new(0x2a);
        assert_eq!(id.value(), 0x2a);
        assert_eq!(format!("{}", id), "0x0000002a");
        assert_eq!(format!("{:?}", id), "UnitId(0x0000002a)");
    }

    #[test]
    fn test_member_signatures() {
        let (unit, _) = UnitBuilder::new("com.app.Service")
            .method("process", &["int", "com.app.Data[]"], |b| b)
            .constructor(&["int"], |b| b)
            .build(UnitId(1));

        let process = &unit.members[0];
        assert_eq!(process.short_signature(), "process(int,com.app.Data[])");
        assert_eq!(
            process.signature(),
            "com.app.Service.process(int,com.app.Data[])"
        );
        assert_eq!(unit.members[1].signature(), "com.app.Service.<init>(int)");
    }

    #[test]
    fn test_split_signature() {
        assert_eq!(
            split_signature("com.app.Service.process(int,int)"),
            Some(("com.app.Service", "process(int,int)"))
        );
        assert_eq!(
            split_signature("com.app.Service.process(com.app.Data)"),
            Some(("com.app.Service", "process(com.app.Data)"))
        );
        assert_eq!(split_signature("process(int)"), None);
        assert_eq!(split_signature("com.app.Service"), None);
    }

    #[test]
    fn test_extends_inherits_public_methods() {
        let (parent, _) = UnitBuilder::new("com.app.Base")
            .implements("com.app.Api")
            .method("run", &[], |b| b)
            .method("hidden", &[], |b| b)
            .modifiers(MemberModifiers::PRIVATE)
            .method("shadowed", &[], |b| b)
            .build(UnitId(1));

        let (child, code) = UnitBuilder::new("com.app.Child")
            .extends(&parent)
            .method("shadowed", &[], |b| b)
            .build(UnitId(2));

        assert!(child.is_assignable_to("com.app.Base"));
        assert!(child.is_assignable_to("com.app.Api"));
        assert!(!child.is_assignable_to("com.app.Other"));

        let run = child.member("run()").unwrap();
        assert_eq!(run.declaring_unit, "com.app.Base");
        assert!(child.member("hidden()").is_none());
        assert_eq!(
            child.member("shadowed()").unwrap().declaring_unit,
            "com.app.Child"
        );
        assert_eq!(child.declared_members().count(), 1);
        assert!(code.body("shadowed()").is_some());
        assert!(code.body("run()").is_none());
    }

    #[test]
    fn test_abstract_members_have_no_code() {
        let (unit, code) = UnitBuilder::new("com.app.Shape")
            .flags(UnitFlags::ABSTRACT)
            .abstract_method("area", &[])
            .build(UnitId(3));

        assert!(!unit.members[0].has_body());
        assert!(code.bodies.is_empty());
        assert!(unit.flags.is_instrumentable_kind());
        assert!(!UnitFlags::INTERFACE.is_instrumentable_kind());
        assert!(!(UnitFlags::SYNTHETIC | UnitFlags::ABSTRACT).is_instrumentable_kind());
    }

    #[test]
    fn test_modifier_keywords() {
        assert_eq!(
            MemberModifiers::from_keyword("public"),
            Some(MemberModifiers::PUBLIC)
        );
        assert_eq!(
            MemberModifiers::from_keyword(" Static "),
            Some(MemberModifiers::STATIC)
        );
        assert_eq!(MemberModifiers::from_keyword("volatile"), None);
        assert_eq!("constructor".parse::<MemberKind>().ok(), Some(MemberKind::Constructor));
        assert_eq!(MemberKind::Method.to_string(), "method");
    }
}
