//! Shorthand for placement tests.

use flux_ir::{Block, BlockId, Function, Instruction, OptFlags, Program, RcKind, Statement, VarId};

use crate::{check_balance, place_refcounts, PlacementStats};

/// Place refcounts in function `idx`, panicking on internal errors.
pub(crate) fn place(program: &mut Program, idx: usize, flags: OptFlags) -> PlacementStats {
    place_refcounts(
        &mut program.functions[idx],
        &mut program.vars,
        &mut program.names,
        flags,
    )
    .unwrap_or_else(|e| panic!("placement failed: {e}"))
}

/// Assert the placed function balances for a few unknown loop lengths.
pub(crate) fn assert_balanced(program: &Program, idx: usize) {
    for n in [0, 1, 3] {
        if let Err(e) = check_balance(&program.functions[idx], &program.vars, n) {
            panic!("unbalanced with {n} unknown iterations: {e}");
        }
    }
}

pub(crate) fn block(func: &Function, id: u32) -> &Block {
    func.body
        .find(BlockId::new(id))
        .unwrap_or_else(|| panic!("no block {id}"))
}

/// `RefCount` amounts on `var` among the statements of `block` (not nested).
pub(crate) fn stmt_refcounts(block: &Block, var: VarId) -> Vec<(RcKind, i64)> {
    block
        .instructions()
        .filter_map(|i| refcount_on(i, var))
        .collect()
}

/// `RefCount` amounts on `var` in the cleanup list of `block`.
pub(crate) fn cleanup_refcounts(block: &Block, var: VarId) -> Vec<(RcKind, i64)> {
    block
        .cleanups
        .iter()
        .filter_map(|i| refcount_on(i, var))
        .collect()
}

/// Every `RefCount` instruction on `var` anywhere in the function.
pub(crate) fn count_refcount_ops(func: &Function, var: VarId) -> usize {
    let mut n = 0;
    func.body.walk(&mut |b| {
        n += b
            .instructions()
            .chain(b.cleanups.iter())
            .filter(|i| refcount_on(i, var).is_some())
            .count();
    });
    n
}

fn refcount_on(instr: &Instruction, var: VarId) -> Option<(RcKind, i64)> {
    match instr {
        Instruction::RefCount { var: v, kind, amount } if *v == var => Some((*kind, *amount)),
        _ => None,
    }
}

/// The first continuation among the statements of `block`.
pub(crate) fn first_cont(block: &Block) -> &flux_ir::Continuation {
    block
        .statements
        .iter()
        .find_map(|s| match s {
            Statement::Cont(c) => Some(c),
            Statement::Instr(_) => None,
        })
        .unwrap_or_else(|| panic!("block {:?} has no continuation", block.id))
}
