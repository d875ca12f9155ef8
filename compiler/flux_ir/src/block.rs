//! Blocks, statements and continuations: the lexical scope tree.
//!
//! A [`Block`] is one scope. It declares variables, runs its statements in
//! order, and runs its cleanup list on every exit. A [`Continuation`] is a
//! statement that owns nested blocks and decides how often, and on which
//! task, they run.

use std::fmt;

use flux_stack::ensure_sufficient_stack;

use crate::{Arg, HoldCounts, Instruction, RcKind, VarId};

/// Identifier of a block, unique within a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        BlockId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Declaration of a variable in a block, with the holds it is allocated with.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Declaration {
    pub var: VarId,
    pub init: HoldCounts,
}

/// One refcount change attached to a loop's control.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RcDelta {
    pub var: VarId,
    pub kind: RcKind,
    pub amount: i64,
}

/// Refcount changes applied by a loop's own control instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopRefcounts {
    /// Applied once before the first iteration, multiplied by the number
    /// of iterations.
    pub start_incrs: Vec<RcDelta>,
    /// Applied at the end of every iteration.
    pub end_decrs: Vec<RcDelta>,
}

impl LoopRefcounts {
    pub fn is_empty(&self) -> bool {
        self.start_incrs.is_empty() && self.end_decrs.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Statement {
    Instr(Instruction),
    Cont(Continuation),
}

/// Control-flow construct owning nested blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Continuation {
    /// Two-way conditional on a boolean value.
    If {
        cond: VarId,
        then_block: Block,
        else_block: Block,
    },
    /// Multi-way branch on an integer value. Exhaustive iff `default` is set.
    Switch {
        on: VarId,
        cases: Vec<(i64, Block)>,
        default: Option<Block>,
    },
    /// Synchronous block that runs exactly once.
    Nested { block: Block },
    /// Task that runs its block once after every `wait_for` future is set.
    Wait { wait_for: Vec<VarId>, block: Block },
    /// Inclusive integer range loop. `var` is declared in `block`.
    RangeLoop {
        var: VarId,
        start: Arg,
        end: Arg,
        step: Arg,
        spawn: bool,
        block: Block,
        rc: LoopRefcounts,
    },
    /// Loop over the members of `container`. `member` is declared in `block`.
    Foreach {
        container: VarId,
        member: VarId,
        spawn: bool,
        block: Block,
        rc: LoopRefcounts,
    },
}

impl Continuation {
    /// Whether the nested blocks run on a task of their own.
    pub fn is_async(&self) -> bool {
        match self {
            Continuation::Wait { .. } => true,
            Continuation::RangeLoop { spawn, .. } | Continuation::Foreach { spawn, .. } => *spawn,
            Continuation::If { .. } | Continuation::Switch { .. } | Continuation::Nested { .. } => {
                false
            }
        }
    }

    /// Whether the (single) nested block runs exactly once whenever the
    /// continuation is reached.
    pub fn runs_once(&self) -> bool {
        matches!(self, Continuation::Nested { .. } | Continuation::Wait { .. })
    }

    /// Whether the continuation is a branch set whose arms are mutually
    /// exclusive and jointly exhaustive.
    pub fn is_exhaustive(&self) -> bool {
        match self {
            Continuation::If { .. } => true,
            Continuation::Switch { default, .. } => default.is_some(),
            _ => false,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Continuation::If { .. } | Continuation::Switch { .. })
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Continuation::RangeLoop { .. } | Continuation::Foreach { .. }
        )
    }

    /// Statically known iteration count of a loop.
    ///
    /// Range loops are inclusive: `start..=end` by `step`. The count is only
    /// known when all three bounds are integer literals and `step > 0`.
    pub fn iterations(&self) -> Option<u64> {
        let Continuation::RangeLoop {
            start, end, step, ..
        } = self
        else {
            return None;
        };
        let (start, end, step) = (start.as_int()?, end.as_int()?, step.as_int()?);
        if step <= 0 {
            return None;
        }
        if end < start {
            return Some(0);
        }
        let span = i128::from(end) - i128::from(start);
        u64::try_from(span / i128::from(step) + 1).ok()
    }

    pub fn loop_refcounts(&self) -> Option<&LoopRefcounts> {
        match self {
            Continuation::RangeLoop { rc, .. } | Continuation::Foreach { rc, .. } => Some(rc),
            _ => None,
        }
    }

    pub fn loop_refcounts_mut(&mut self) -> Option<&mut LoopRefcounts> {
        match self {
            Continuation::RangeLoop { rc, .. } | Continuation::Foreach { rc, .. } => Some(rc),
            _ => None,
        }
    }

    /// Nested blocks in source order.
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            Continuation::If {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Continuation::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, b)| b)
                .chain(default.iter())
                .collect(),
            Continuation::Nested { block }
            | Continuation::Wait { block, .. }
            | Continuation::RangeLoop { block, .. }
            | Continuation::Foreach { block, .. } => vec![block],
        }
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Continuation::If {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Continuation::Switch { cases, default, .. } => cases
                .iter_mut()
                .map(|(_, b)| b)
                .chain(default.iter_mut())
                .collect(),
            Continuation::Nested { block }
            | Continuation::Wait { block, .. }
            | Continuation::RangeLoop { block, .. }
            | Continuation::Foreach { block, .. } => vec![block],
        }
    }

    /// Variables the continuation's own control reads (conditions, bounds,
    /// awaited futures, iterated containers).
    pub fn control_inputs(&self) -> Vec<VarId> {
        match self {
            Continuation::If { cond, .. } => vec![*cond],
            Continuation::Switch { on, .. } => vec![*on],
            Continuation::Nested { .. } => Vec::new(),
            Continuation::Wait { wait_for, .. } => wait_for.clone(),
            Continuation::RangeLoop {
                start, end, step, ..
            } => [start, end, step].into_iter().filter_map(Arg::var).collect(),
            Continuation::Foreach { container, .. } => vec![*container],
        }
    }

    /// Mutable view of value-typed control operands (range bounds).
    pub fn control_args_mut(&mut self) -> Vec<&mut Arg> {
        match self {
            Continuation::RangeLoop {
                start, end, step, ..
            } => vec![start, end, step],
            _ => Vec::new(),
        }
    }

    /// Variables initialized by the continuation on entry to its block.
    pub fn bound_vars(&self) -> Vec<VarId> {
        match self {
            Continuation::RangeLoop { var, .. } => vec![*var],
            Continuation::Foreach { member, .. } => vec![*member],
            _ => Vec::new(),
        }
    }
}

/// A lexical scope.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    pub id: BlockId,
    pub variables: Vec<Declaration>,
    pub statements: Vec<Statement>,
    /// Instructions run on every exit from the block.
    pub cleanups: Vec<Instruction>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Block {
            id,
            variables: Vec::new(),
            statements: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    pub fn declares(&self, var: VarId) -> bool {
        self.variables.iter().any(|d| d.var == var)
    }

    pub fn declaration_mut(&mut self, var: VarId) -> Option<&mut Declaration> {
        self.variables.iter_mut().find(|d| d.var == var)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Instr(i) => Some(i),
            Statement::Cont(_) => None,
        })
    }

    /// Visit this block and every nested block, parents before children.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Block)) {
        ensure_sufficient_stack(|| {
            f(self);
            for stmt in &self.statements {
                if let Statement::Cont(cont) = stmt {
                    for block in cont.blocks() {
                        block.walk(f);
                    }
                }
            }
        });
    }

    /// Every variable declared in this block or a nested one.
    pub fn declared_in_subtree(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.walk(&mut |b| out.extend(b.variables.iter().map(|d| d.var)));
        out
    }

    /// Find a nested block by id.
    pub fn find(&self, id: BlockId) -> Option<&Block> {
        let mut found = None;
        self.walk(&mut |b| {
            if b.id == id && found.is_none() {
                found = Some(b);
            }
        });
        found
    }
}
