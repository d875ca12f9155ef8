//! Computed values: structural descriptions of what an instruction computes.
//!
//! A [`ComputedValue`] is an operation applied to an ordered list of
//! inputs, each either a plain [`Arg`] or another computed value. Equality
//! is purely structural; semantic equivalences such as `x + 1 - 1 == x`
//! are established by merging classes, never by redefining equality.

use std::fmt;

use smallvec::SmallVec;

use flux_ir::{Arg, BuiltinOp, Constant, Name, OpMode, VarId};

/// The two independent equivalence relations maintained per scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CongruenceKind {
    /// Locations holding equal values.
    Value,
    /// Names for the same storage location.
    Alias,
}

impl CongruenceKind {
    pub const ALL: [CongruenceKind; 2] = [CongruenceKind::Value, CongruenceKind::Alias];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            CongruenceKind::Value => 0,
            CongruenceKind::Alias => 1,
        }
    }
}

/// Operation of a computed value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Primitive operator over values (local) or futures (async).
    Builtin(BuiltinOp, OpMode),
    /// A future set from a value.
    Assign,
    /// The value read out of a future.
    Retrieve,
    /// Asynchronous future-to-future copy.
    Copy,
    /// A field of a struct.
    StructField(Name),
    /// A member of an array at an index.
    ArrayMember,
    /// The referand of a reference.
    Deref,
    /// Whether a file is mapped.
    IsMapped,
    /// Result of asking a file for its name.
    GetFilename,
    /// The path a file was mapped to.
    Filename,
    /// Call to a pure function.
    Call(Name, OpMode),
}

impl Opcode {
    /// Whether the identity of an input matters, not just its value.
    ///
    /// Inputs of these operations only substitute through alias
    /// congruence.
    pub fn identity_inputs(self) -> bool {
        matches!(
            self,
            Opcode::StructField(_)
                | Opcode::ArrayMember
                | Opcode::Deref
                | Opcode::IsMapped
                | Opcode::GetFilename
                | Opcode::Filename
        )
    }
}

/// An argument or a computed value: the element type of congruence classes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ArgOrCv {
    Arg(Arg),
    Cv(Box<ComputedValue>),
}

/// An operation applied to inputs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ComputedValue {
    pub op: Opcode,
    pub inputs: SmallVec<[ArgOrCv; 2]>,
}

impl ComputedValue {
    /// A computed value over plain arguments.
    pub fn new(op: Opcode, args: impl IntoIterator<Item = Arg>) -> Self {
        ComputedValue {
            op,
            inputs: args.into_iter().map(ArgOrCv::Arg).collect(),
        }
    }

    /// The `i`th input, if it is a plain argument.
    pub fn arg(&self, i: usize) -> Option<&Arg> {
        self.inputs.get(i).and_then(ArgOrCv::arg)
    }

    /// `Assign` of a literal: a future known to hold `c`.
    pub fn assigned_constant(&self) -> Option<&Constant> {
        match (self.op, self.inputs.as_slice()) {
            (Opcode::Assign, [ArgOrCv::Arg(Arg::Const(c))]) => Some(c),
            _ => None,
        }
    }

    /// Variables appearing directly as inputs.
    pub fn input_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.inputs
            .iter()
            .filter_map(|i| i.arg().and_then(Arg::var))
    }
}

impl ArgOrCv {
    #[inline]
    pub fn arg(&self) -> Option<&Arg> {
        match self {
            ArgOrCv::Arg(a) => Some(a),
            ArgOrCv::Cv(_) => None,
        }
    }

    #[inline]
    pub fn cv(&self) -> Option<&ComputedValue> {
        match self {
            ArgOrCv::Cv(cv) => Some(cv),
            ArgOrCv::Arg(_) => None,
        }
    }

    #[inline]
    pub fn var(&self) -> Option<VarId> {
        self.arg().and_then(Arg::var)
    }

    #[inline]
    pub fn constant(&self) -> Option<&Constant> {
        self.arg().and_then(Arg::constant)
    }

    pub fn is_arg(&self) -> bool {
        matches!(self, ArgOrCv::Arg(_))
    }
}

impl From<Arg> for ArgOrCv {
    fn from(arg: Arg) -> Self {
        ArgOrCv::Arg(arg)
    }
}

impl From<VarId> for ArgOrCv {
    fn from(v: VarId) -> Self {
        ArgOrCv::Arg(Arg::Var(v))
    }
}

impl From<ComputedValue> for ArgOrCv {
    fn from(cv: ComputedValue) -> Self {
        ArgOrCv::Cv(Box::new(cv))
    }
}

impl fmt::Debug for ArgOrCv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgOrCv::Arg(a) => write!(f, "{a:?}"),
            ArgOrCv::Cv(cv) => write!(f, "{cv:?}"),
        }
    }
}

impl fmt::Debug for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Opcode::Builtin(op, OpMode::Local) => write!(f, "{op:?}")?,
            Opcode::Builtin(op, OpMode::Async) => write!(f, "{op:?}@async")?,
            Opcode::Call(func, OpMode::Local) => write!(f, "call {}", func.raw())?,
            Opcode::Call(func, OpMode::Async) => write!(f, "call {}@async", func.raw())?,
            Opcode::StructField(field) => write!(f, "field {}", field.raw())?,
            other => write!(f, "{other:?}")?,
        }
        f.debug_list().entries(self.inputs.iter()).finish()
    }
}
