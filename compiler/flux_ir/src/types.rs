//! Types and storage classes of IR variables.

use crate::Name;

/// Scalar payload types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimType {
    Int,
    Float,
    Bool,
    String,
    Blob,
    Void,
}

/// Type of an IR variable.
///
/// Futures, containers, references and files live in runtime storage that
/// is reclaimed by reference counting. `Value` types are plain local
/// values and never carry holds.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// Single-assignment future holding a scalar.
    Future(PrimType),
    /// Unboxed local value.
    Value(PrimType),
    /// Struct with inline fields; fields share the struct's storage.
    Struct(Name),
    /// Array whose members are separate storage locations.
    Array(Box<Type>),
    /// Reference to another storage location.
    Ref(Box<Type>),
    File,
}

impl Type {
    /// Whether variables of this type participate in reference counting.
    #[inline]
    pub fn is_refcounted(&self) -> bool {
        !matches!(self, Type::Value(_))
    }

    /// Payload type of a `Value`, if this is one.
    #[inline]
    pub fn value_prim(&self) -> Option<PrimType> {
        match self {
            Type::Value(p) => Some(*p),
            _ => None,
        }
    }

    /// Element type of an array.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }
}

/// Where a variable's storage lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Storage {
    /// Owned by the declaring block; allocated with base holds.
    Stack,
    /// Points into storage owned elsewhere (struct field, array member,
    /// dereferenced ref). Must be initialized before use.
    Alias,
    /// Compiler-owned constant; never refcounted, always set.
    GlobalConst,
    /// Unboxed local value; must be assigned before use.
    Local,
}

/// Static knowledge about whether a file variable is mapped to a path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mapped {
    Yes,
    #[default]
    No,
    Maybe,
}

impl Mapped {
    /// `Some(mapped)` when statically known.
    pub fn known(self) -> Option<bool> {
        match self {
            Mapped::Yes => Some(true),
            Mapped::No => Some(false),
            Mapped::Maybe => None,
        }
    }
}
