//! Instruction operands: variables and literal constants.

use std::fmt;

use crate::{PrimType, VarId};

/// Bit pattern of an `f64`, so constants can be hashed and compared
/// structurally. `NaN` payloads compare by bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct FloatBits(u64);

impl FloatBits {
    #[inline]
    pub fn new(value: f64) -> Self {
        FloatBits(value.to_bits())
    }

    #[inline]
    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl fmt::Debug for FloatBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.get())
    }
}

/// Literal constant.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constant {
    Int(i64),
    Float(FloatBits),
    Bool(bool),
    Str(String),
}

impl Constant {
    pub fn float(value: f64) -> Self {
        Constant::Float(FloatBits::new(value))
    }

    pub fn prim_type(&self) -> PrimType {
        match self {
            Constant::Int(_) => PrimType::Int,
            Constant::Float(_) => PrimType::Float,
            Constant::Bool(_) => PrimType::Bool,
            Constant::Str(_) => PrimType::String,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Float(v) => write!(f, "{v:?}f"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Operand: either a variable or a literal.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arg {
    Var(VarId),
    Const(Constant),
}

impl Arg {
    pub fn int(value: i64) -> Self {
        Arg::Const(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Arg::Const(Constant::Bool(value))
    }

    pub fn str(value: &str) -> Self {
        Arg::Const(Constant::Str(value.to_owned()))
    }

    #[inline]
    pub fn var(&self) -> Option<VarId> {
        match self {
            Arg::Var(v) => Some(*v),
            Arg::Const(_) => None,
        }
    }

    #[inline]
    pub fn constant(&self) -> Option<&Constant> {
        match self {
            Arg::Const(c) => Some(c),
            Arg::Var(_) => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Arg::Const(_))
    }

    /// Integer literal, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        self.constant().and_then(Constant::as_int)
    }
}

impl From<VarId> for Arg {
    fn from(v: VarId) -> Self {
        Arg::Var(v)
    }
}

impl From<Constant> for Arg {
    fn from(c: Constant) -> Self {
        Arg::Const(c)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Var(v) => write!(f, "{v:?}"),
            Arg::Const(c) => write!(f, "{c:?}"),
        }
    }
}
