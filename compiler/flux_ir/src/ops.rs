//! Primitive operators and refcount vocabulary.

use crate::PrimType;

/// Primitive operator applied by [`Instruction::Builtin`](crate::Instruction::Builtin).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuiltinOp {
    // ── Integer ─────────────────────────────────────────────
    PlusInt,
    MinusInt,
    MultInt,
    DivInt,
    ModInt,
    NegateInt,
    AbsInt,
    MaxInt,
    MinInt,
    EqInt,
    NeqInt,
    LtInt,
    LteInt,
    GtInt,
    GteInt,

    // ── Float ───────────────────────────────────────────────
    PlusFloat,
    MinusFloat,
    MultFloat,
    DivFloat,
    NegateFloat,
    EqFloat,
    LtFloat,
    GtFloat,
    IntToFloat,
    FloatToInt,

    // ── Boolean ─────────────────────────────────────────────
    And,
    Or,
    Not,
    EqBool,

    // ── String ──────────────────────────────────────────────
    StrCat,
    EqString,
    StrLen,
    IntToString,
    ParseInt,

    /// Identity on any value type.
    CopyValue,
}

impl BuiltinOp {
    /// Number of operands, or `None` for variadic operators.
    pub fn arity(self) -> Option<usize> {
        use BuiltinOp::*;
        match self {
            NegateInt | AbsInt | NegateFloat | IntToFloat | FloatToInt | Not | StrLen
            | IntToString | ParseInt | CopyValue => Some(1),
            StrCat => None,
            _ => Some(2),
        }
    }

    /// Type of the result, or `None` when it follows the operand (`CopyValue`).
    pub fn result_type(self) -> Option<PrimType> {
        use BuiltinOp::*;
        match self {
            PlusInt | MinusInt | MultInt | DivInt | ModInt | NegateInt | AbsInt | MaxInt
            | MinInt | FloatToInt | StrLen | ParseInt => Some(PrimType::Int),
            PlusFloat | MinusFloat | MultFloat | DivFloat | NegateFloat | IntToFloat => {
                Some(PrimType::Float)
            }
            EqInt | NeqInt | LtInt | LteInt | GtInt | GteInt | EqFloat | LtFloat | GtFloat
            | And | Or | Not | EqBool | EqString => Some(PrimType::Bool),
            StrCat | IntToString => Some(PrimType::String),
            CopyValue => None,
        }
    }

    /// Whether operand order is irrelevant.
    pub fn is_commutative(self) -> bool {
        use BuiltinOp::*;
        matches!(
            self,
            PlusInt
                | MultInt
                | MaxInt
                | MinInt
                | EqInt
                | NeqInt
                | PlusFloat
                | MultFloat
                | EqFloat
                | And
                | Or
                | EqBool
                | EqString
        )
    }
}

/// Whether an operation runs inline on values or as a task on futures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpMode {
    /// Executes immediately on local values.
    Local,
    /// Spawns a task that waits for future inputs and sets future outputs.
    Async,
}

/// Kind of reference-count hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RcKind {
    Read,
    Write,
}

impl RcKind {
    pub const ALL: [RcKind; 2] = [RcKind::Read, RcKind::Write];
}

/// Direction of a refcount change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RcDir {
    Incr,
    Decr,
}

impl RcDir {
    /// Direction implied by the sign of `amount`; `None` for zero.
    #[inline]
    pub fn of(amount: i64) -> Option<RcDir> {
        match amount.signum() {
            1 => Some(RcDir::Incr),
            -1 => Some(RcDir::Decr),
            _ => None,
        }
    }
}

/// A pair of read/write hold counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HoldCounts {
    pub read: i64,
    pub write: i64,
}

impl HoldCounts {
    pub const ZERO: HoldCounts = HoldCounts { read: 0, write: 0 };

    #[inline]
    pub fn get(self, kind: RcKind) -> i64 {
        match kind {
            RcKind::Read => self.read,
            RcKind::Write => self.write,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, kind: RcKind) -> &mut i64 {
        match kind {
            RcKind::Read => &mut self.read,
            RcKind::Write => &mut self.write,
        }
    }
}
