//! Instructions and the per-instruction queries the optimizer relies on.
//!
//! Every query is a pure function of the instruction (plus the variable
//! table where storage or type matters). Hold accounting follows one
//! rule: async operations *consume* one hold per refcounted operand they
//! hand to the spawned task, `LoadRef` *produces* the holds it acquires,
//! and everything else borrows.

use smallvec::SmallVec;

use crate::{Arg, BuiltinOp, HoldCounts, Name, OpMode, RcKind, VarId, VarTable};

/// One IR instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    /// `dst = op(args)`. Local mode works on values; async mode on futures.
    Builtin {
        op: BuiltinOp,
        mode: OpMode,
        dst: VarId,
        args: Vec<Arg>,
    },
    /// Set future `dst` from a value, releasing `write_decr` write holds.
    Store { dst: VarId, src: Arg, write_decr: i64 },
    /// Read closed future `src` into value `dst`, releasing `read_decr` read holds.
    Retrieve { dst: VarId, src: VarId, read_decr: i64 },
    /// Asynchronously copy future `src` into future `dst`.
    Copy { dst: VarId, src: VarId },
    /// `dst` aliases field `field` of struct `src`.
    StructAlias { dst: VarId, src: VarId, field: Name },
    /// `dst` aliases member `index` of `array`.
    ArrayAlias { dst: VarId, array: VarId, index: Arg },
    /// Store a reference to `member` at `index` of `array`.
    ArrayInsert { array: VarId, index: Arg, member: VarId },
    /// `dst` aliases the referand of `src`, acquiring `acquire` holds on it.
    LoadRef {
        dst: VarId,
        src: VarId,
        acquire: HoldCounts,
    },
    /// `dst = is_mapped(file)`.
    IsMapped { dst: VarId, file: VarId },
    /// `dst = filename(file)`.
    GetFilename { dst: VarId, file: VarId },
    /// Map `file` to path `filename`.
    SetFilename { file: VarId, filename: Arg },
    /// Call a function. Async calls spawn; local calls run inline on values.
    Call {
        func: Name,
        mode: OpMode,
        outputs: Vec<VarId>,
        inputs: Vec<Arg>,
    },
    /// Explicit refcount change emitted by placement.
    RefCount {
        var: VarId,
        kind: RcKind,
        amount: i64,
    },
}

/// How an input operand may be rewritten by value numbering.
#[derive(Debug)]
pub enum InputSlot<'a> {
    /// A value operand; may become another value or a constant.
    Value(&'a mut Arg),
    /// A future operand that may also be a literal; a variable may only
    /// be replaced by a value-congruent variable.
    FutureArg(&'a mut Arg),
    /// A future operand; only value-congruent variables substitute.
    Future(&'a mut VarId),
    /// Identity matters (aliasing, mapping); only alias-congruent
    /// variables substitute.
    Identity(&'a mut VarId),
}

/// Whether a piggyback slot can absorb increments as well as decrements.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotAccepts {
    Decrement,
    Both,
}

/// A place on an existing instruction where a refcount change can ride
/// along for free.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PiggybackSlot {
    pub var: VarId,
    pub kind: RcKind,
    pub accepts: SlotAccepts,
}

type VarList = SmallVec<[VarId; 4]>;
type HoldList = SmallVec<[(VarId, RcKind); 4]>;

fn arg_vars(args: &[Arg]) -> impl Iterator<Item = VarId> + '_ {
    args.iter().filter_map(Arg::var)
}

impl Instruction {
    /// Variables read by this instruction.
    pub fn inputs(&self) -> VarList {
        let mut out = VarList::new();
        match self {
            Instruction::Builtin { args, .. } => out.extend(arg_vars(args)),
            Instruction::Store { src, .. } => out.extend(src.var()),
            Instruction::Retrieve { src, .. }
            | Instruction::Copy { src, .. }
            | Instruction::StructAlias { src, .. }
            | Instruction::LoadRef { src, .. } => out.push(*src),
            Instruction::ArrayAlias { array, index, .. } => {
                out.push(*array);
                out.extend(index.var());
            }
            Instruction::ArrayInsert { index, member, .. } => {
                out.extend(index.var());
                out.push(*member);
            }
            Instruction::IsMapped { file, .. } | Instruction::GetFilename { file, .. } => {
                out.push(*file);
            }
            Instruction::SetFilename { filename, .. } => out.extend(filename.var()),
            Instruction::Call { inputs, .. } => out.extend(arg_vars(inputs)),
            Instruction::RefCount { var, .. } => out.push(*var),
        }
        out
    }

    /// Variables written or defined by this instruction.
    pub fn outputs(&self) -> VarList {
        let mut out = VarList::new();
        match self {
            Instruction::Builtin { dst, .. }
            | Instruction::Store { dst, .. }
            | Instruction::Retrieve { dst, .. }
            | Instruction::Copy { dst, .. }
            | Instruction::StructAlias { dst, .. }
            | Instruction::ArrayAlias { dst, .. }
            | Instruction::LoadRef { dst, .. }
            | Instruction::IsMapped { dst, .. }
            | Instruction::GetFilename { dst, .. } => out.push(*dst),
            Instruction::ArrayInsert { array, .. } => out.push(*array),
            Instruction::SetFilename { file, .. } => out.push(*file),
            Instruction::Call { outputs, .. } => out.extend(outputs.iter().copied()),
            Instruction::RefCount { .. } => {}
        }
        out
    }

    /// Outputs whose storage requires initialization and is initialized here.
    pub fn initialized_vars(&self, vars: &VarTable) -> VarList {
        self.outputs()
            .into_iter()
            .filter(|v| vars.get(*v).needs_init())
            .collect()
    }

    /// Holds handed off to a spawned task or container.
    pub fn consumed_holds(&self, vars: &VarTable) -> HoldList {
        let mut out = HoldList::new();
        let mut push = |v: VarId, kind: RcKind| {
            if vars.is_refcounted(v) {
                out.push((v, kind));
            }
        };
        match self {
            Instruction::Builtin {
                mode: OpMode::Async,
                dst,
                args,
                ..
            } => {
                arg_vars(args).for_each(|v| push(v, RcKind::Read));
                push(*dst, RcKind::Write);
            }
            Instruction::Call {
                mode: OpMode::Async,
                outputs,
                inputs,
                ..
            } => {
                arg_vars(inputs).for_each(|v| push(v, RcKind::Read));
                outputs.iter().for_each(|v| push(*v, RcKind::Write));
            }
            Instruction::Copy { dst, src } => {
                push(*src, RcKind::Read);
                push(*dst, RcKind::Write);
            }
            Instruction::ArrayInsert { member, .. } => push(*member, RcKind::Read),
            _ => {}
        }
        out
    }

    /// Holds that exist after this instruction and did not before.
    pub fn produced_holds(&self) -> SmallVec<[(VarId, RcKind, i64); 2]> {
        let mut out = SmallVec::new();
        if let Instruction::LoadRef { dst, acquire, .. } = self {
            for kind in RcKind::ALL {
                if acquire.get(kind) != 0 {
                    out.push((*dst, kind, acquire.get(kind)));
                }
            }
        }
        out
    }

    /// Refcounted variables accessed synchronously, i.e. while this
    /// instruction executes rather than from a spawned task.
    pub fn sync_uses(&self, vars: &VarTable) -> HoldList {
        let mut out = HoldList::new();
        let mut push = |v: VarId, kind: RcKind| {
            if vars.is_refcounted(v) {
                out.push((v, kind));
            }
        };
        match self {
            Instruction::Retrieve { src, .. }
            | Instruction::StructAlias { src, .. }
            | Instruction::LoadRef { src, .. } => push(*src, RcKind::Read),
            Instruction::Store { dst, .. } => push(*dst, RcKind::Write),
            Instruction::ArrayAlias { array, .. } => push(*array, RcKind::Read),
            Instruction::ArrayInsert { array, .. } => push(*array, RcKind::Write),
            Instruction::IsMapped { file, .. } | Instruction::GetFilename { file, .. } => {
                push(*file, RcKind::Read);
            }
            Instruction::SetFilename { file, .. } => push(*file, RcKind::Write),
            Instruction::Call {
                mode: OpMode::Local,
                outputs,
                inputs,
                ..
            } => {
                arg_vars(inputs).for_each(|v| push(v, RcKind::Read));
                outputs.iter().for_each(|v| push(*v, RcKind::Write));
            }
            _ => {}
        }
        out
    }

    /// Places where a pending refcount change can be absorbed.
    pub fn piggyback_slots(&self) -> SmallVec<[PiggybackSlot; 2]> {
        let mut out = SmallVec::new();
        match self {
            Instruction::Retrieve { src, .. } => out.push(PiggybackSlot {
                var: *src,
                kind: RcKind::Read,
                accepts: SlotAccepts::Decrement,
            }),
            Instruction::Store { dst, .. } => out.push(PiggybackSlot {
                var: *dst,
                kind: RcKind::Write,
                accepts: SlotAccepts::Decrement,
            }),
            Instruction::LoadRef { dst, .. } => {
                for kind in RcKind::ALL {
                    out.push(PiggybackSlot {
                        var: *dst,
                        kind,
                        accepts: SlotAccepts::Both,
                    });
                }
            }
            _ => {}
        }
        out
    }

    /// Fold a refcount change of `amount` on `var` into this instruction.
    ///
    /// Returns `false` (leaving the instruction untouched) when no slot
    /// accepts it.
    pub fn absorb(&mut self, var: VarId, kind: RcKind, amount: i64) -> bool {
        match self {
            Instruction::Retrieve { src, read_decr, .. }
                if *src == var && kind == RcKind::Read && amount < 0 =>
            {
                *read_decr -= amount;
                true
            }
            Instruction::Store {
                dst, write_decr, ..
            } if *dst == var && kind == RcKind::Write && amount < 0 => {
                *write_decr -= amount;
                true
            }
            Instruction::LoadRef { dst, acquire, .. } if *dst == var => {
                let slot = acquire.get_mut(kind);
                if *slot + amount < 0 {
                    return false;
                }
                *slot += amount;
                true
            }
            _ => false,
        }
    }

    /// Refcount changes already riding on this instruction, as signed
    /// deltas applied when it executes (excluding produced holds).
    pub fn piggybacked(&self) -> SmallVec<[(VarId, RcKind, i64); 2]> {
        let mut out = SmallVec::new();
        match self {
            Instruction::Retrieve { src, read_decr, .. } if *read_decr != 0 => {
                out.push((*src, RcKind::Read, -*read_decr));
            }
            Instruction::Store {
                dst, write_decr, ..
            } if *write_decr != 0 => out.push((*dst, RcKind::Write, -*write_decr)),
            Instruction::RefCount { var, kind, amount } => out.push((*var, *kind, *amount)),
            _ => {}
        }
        out
    }

    /// Mutable view of the input operands for substitution.
    pub fn input_slots_mut(&mut self) -> Vec<InputSlot<'_>> {
        match self {
            Instruction::Builtin {
                mode: OpMode::Local,
                args,
                ..
            } => args.iter_mut().map(InputSlot::Value).collect(),
            Instruction::Builtin {
                mode: OpMode::Async,
                args,
                ..
            } => args.iter_mut().map(InputSlot::FutureArg).collect(),
            Instruction::Store { src, .. } => vec![InputSlot::Value(src)],
            Instruction::Retrieve { src, .. } | Instruction::Copy { src, .. } => {
                vec![InputSlot::Future(src)]
            }
            Instruction::StructAlias { src, .. } | Instruction::LoadRef { src, .. } => {
                vec![InputSlot::Identity(src)]
            }
            Instruction::ArrayAlias { array, index, .. } => {
                vec![InputSlot::Identity(array), InputSlot::Value(index)]
            }
            Instruction::ArrayInsert { index, member, .. } => {
                vec![InputSlot::Value(index), InputSlot::Identity(member)]
            }
            Instruction::IsMapped { file, .. } | Instruction::GetFilename { file, .. } => {
                vec![InputSlot::Identity(file)]
            }
            Instruction::SetFilename { filename, .. } => vec![InputSlot::Value(filename)],
            Instruction::Call {
                mode: OpMode::Local,
                inputs,
                ..
            } => inputs.iter_mut().map(InputSlot::Value).collect(),
            Instruction::Call {
                mode: OpMode::Async,
                inputs,
                ..
            } => inputs.iter_mut().map(InputSlot::FutureArg).collect(),
            Instruction::RefCount { .. } => Vec::new(),
        }
    }

    /// Whether executing this instruction spawns a task.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Instruction::Builtin {
                mode: OpMode::Async,
                ..
            } | Instruction::Call {
                mode: OpMode::Async,
                ..
            } | Instruction::Copy { .. }
        )
    }

    pub fn is_refcount(&self) -> bool {
        matches!(self, Instruction::RefCount { .. })
    }
}
