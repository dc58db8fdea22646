//! The program representation consumed by the analyses.
//!
//! The engine does not load or validate code itself. A collaborator (e.g.,
//! a bytecode front end) supplies an immutable [`Program`]: per-method
//! instruction lists in three-address form, the static field declarations,
//! and the entry points. A [`CallGraph`](call_graph::CallGraph) over the
//! program's methods is supplied separately.

use std::collections::BTreeMap;
use std::fmt::Display;

use bitflags::bitflags;

pub mod call_graph;
mod code;
mod pc;

pub use code::{
    BinaryOperator, ComparisonOperator, Instruction, LocalId, MethodBody, Operand, UnaryOperator,
};
pub use pc::ProgramCounter;

/// A reference to a [`Method`].
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct MethodRef {
    /// The binary name of the type declaring the method.
    pub owner: String,
    /// The name of the method.
    pub name: String,
}

impl MethodRef {
    /// Creates a method reference from an owner type and a method name.
    pub fn new<O: Into<String>, N: Into<String>>(owner: O, name: N) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Checks if the reference denotes a static initializer.
    #[must_use]
    pub fn is_static_initializer(&self) -> bool {
        self.name == Method::STATIC_INITIALIZER_NAME
    }
}

impl Display for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// A reference to a static field.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct FieldRef {
    /// The binary name of the type declaring the field.
    pub owner: String,
    /// The name of the field.
    pub name: String,
}

impl FieldRef {
    /// Creates a field reference from an owner type and a field name.
    pub fn new<O: Into<String>, N: Into<String>>(owner: O, name: N) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

bitflags! {
    /// The access flags of a [`Method`].
    #[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
    pub struct MethodAccessFlags: u16 {
        /// Declared `static`.
        const STATIC = 0x0008;
        /// Declared `native`; implemented outside the analyzable universe.
        const NATIVE = 0x0100;
        /// Declared synthetic; not present in the source code.
        const SYNTHETIC = 0x1000;
    }
}

/// A method of the analyzed program.
#[derive(Debug, Clone)]
pub struct Method {
    /// The access flags.
    pub access_flags: MethodAccessFlags,
    /// The executable body; `None` for native or otherwise opaque methods.
    pub body: Option<MethodBody>,
}

impl Method {
    /// The conventional name of a static initializer.
    pub const STATIC_INITIALIZER_NAME: &'static str = "<clinit>";

    /// Checks whether the method has no analyzable body.
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE) || self.body.is_none()
    }
}

/// A static field declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticField {
    /// The declared constant initializer, if any.
    ///
    /// A field without one starts at the default value `0`.
    pub initial_value: Option<i32>,
}

impl StaticField {
    /// The value the field holds before any write.
    #[must_use]
    pub fn declared_or_default(&self) -> i32 {
        self.initial_value.unwrap_or(0)
    }
}

/// An analyzable program: methods, static field declarations, and entry
/// points.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// The methods, keyed by reference.
    pub methods: BTreeMap<MethodRef, Method>,
    /// The static field declarations, keyed by reference.
    pub static_fields: BTreeMap<FieldRef, StaticField>,
    /// The methods where execution may start (static initializers run
    /// before any of these).
    pub entry_points: Vec<MethodRef>,
}

impl Program {
    /// Iterates over the static initializers of the program.
    pub fn static_initializers(&self) -> impl Iterator<Item = &MethodRef> {
        self.methods
            .keys()
            .filter(|method| method.is_static_initializer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_initializer_detection() {
        assert!(MethodRef::new("Example", "<clinit>").is_static_initializer());
        assert!(!MethodRef::new("Example", "main").is_static_initializer());
    }

    #[test]
    fn opaque_methods() {
        let native = Method {
            access_flags: MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
            body: None,
        };
        assert!(native.is_opaque());

        let bodyless = Method {
            access_flags: MethodAccessFlags::STATIC,
            body: None,
        };
        assert!(bodyless.is_opaque());
    }

    #[test]
    fn field_default_value() {
        assert_eq!(StaticField::default().declared_or_default(), 0);
        assert_eq!(
            StaticField {
                initial_value: Some(42)
            }
            .declared_or_default(),
            42
        );
    }
}
