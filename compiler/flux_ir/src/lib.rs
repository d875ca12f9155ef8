//! Flux IR: the tree the middle-end optimizer consumes and produces.
//!
//! A [`Program`] owns a variable arena, its functions, a function-signature
//! table and the global constants. Each [`Function`] body is a tree of
//! [`Block`]s; statements are either [`Instruction`]s or
//! [`Continuation`]s that own nested blocks.
//!
//! The optimizer is a tree-to-tree transform. It reads this IR and returns
//! it augmented with explicit [`Instruction::RefCount`] operations, cleanup
//! lists, loop refcount lists and substituted operands. There is no wire
//! or file format here beyond the optional `serde` derives.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `name` | Interned identifiers |
//! | `types` | Types, storage classes, mapped-ness |
//! | `var` | Variable arena |
//! | `arg` | Operands and constants |
//! | `ops` | Primitive operators, hold kinds |
//! | `instr` | Instructions and their hold/use queries |
//! | `block` | Blocks, statements, continuations |
//! | `program` | Functions, signatures, global constants |
//! | `flags` | Optimization knobs |
//! | `build` | Function builder |

mod arg;
mod block;
pub mod build;
mod flags;
mod instr;
mod name;
mod ops;
mod program;
mod types;
mod var;

pub use arg::{Arg, Constant, FloatBits};
pub use block::{
    Block, BlockId, Continuation, Declaration, LoopRefcounts, RcDelta, Statement,
};
pub use build::FunctionBuilder;
pub use flags::OptFlags;
pub use instr::{InputSlot, Instruction, PiggybackSlot, SlotAccepts};
pub use name::{Name, StringInterner};
pub use ops::{BuiltinOp, HoldCounts, OpMode, RcDir, RcKind};
pub use program::{Function, FunctionSig, FunctionSigs, GlobalConstants, Program};
pub use types::{Mapped, PrimType, Storage, Type};
pub use var::{VarId, VarTable, Variable};
