//! Shorthand for value-numbering tests.

use flux_ir::{Block, Instruction, OptFlags, Program, Statement};

use crate::{number_values, VnStats};

/// Number values in function `idx`, panicking on internal errors.
pub(crate) fn number(program: &mut Program, idx: usize, flags: OptFlags) -> VnStats {
    number_values(
        &mut program.functions[idx],
        &program.vars,
        &program.sigs,
        &program.globals,
        &program.names,
        flags,
    )
    .unwrap_or_else(|e| panic!("value numbering failed: {e}"))
}

/// The `i`th statement of `block`, which must be an instruction.
pub(crate) fn instr(block: &Block, i: usize) -> &Instruction {
    match block.statements.get(i) {
        Some(Statement::Instr(instr)) => instr,
        other => panic!("statement {i} of {:?} is not an instruction: {other:?}", block.id),
    }
}

/// The blocks of the `i`th statement of `block`, which must be a continuation.
pub(crate) fn cont_blocks(block: &Block, i: usize) -> Vec<&Block> {
    match block.statements.get(i) {
        Some(Statement::Cont(cont)) => cont.blocks(),
        other => panic!("statement {i} of {:?} is not a continuation: {other:?}", block.id),
    }
}
