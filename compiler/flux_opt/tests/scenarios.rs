//! End-to-end scenarios through the full pipeline.

#![allow(clippy::unwrap_used, reason = "Tests can panic")]

use flux_ir::{
    Arg, Block, BuiltinOp, Continuation, Function, FunctionBuilder, HoldCounts, Instruction,
    OptFlags, PrimType, Program, RcKind, Statement, Type, VarId,
};
use flux_opt::{optimize, OptReport};
use flux_refcount::check_balance;
use pretty_assertions::assert_eq;

// -- Helpers --

fn run(program: &mut Program, flags: OptFlags) -> OptReport {
    optimize(program, flags).unwrap_or_else(|e| panic!("optimize failed: {e}"))
}

fn assert_balanced(program: &Program) {
    for n in [0, 1, 3] {
        if let Err(e) = check_balance(&program.functions[0], &program.vars, n) {
            panic!("unbalanced with {n} unknown iterations: {e}");
        }
    }
}

fn refcount_on(instr: &Instruction, var: VarId) -> Option<(RcKind, i64)> {
    match instr {
        Instruction::RefCount { var: v, kind, amount } if *v == var => Some((*kind, *amount)),
        _ => None,
    }
}

fn stmt_refcounts(block: &Block, var: VarId) -> Vec<(RcKind, i64)> {
    block
        .instructions()
        .filter_map(|i| refcount_on(i, var))
        .collect()
}

fn cleanup_refcounts(block: &Block, var: VarId) -> Vec<(RcKind, i64)> {
    block
        .cleanups
        .iter()
        .filter_map(|i| refcount_on(i, var))
        .collect()
}

fn count_refcount_ops(func: &Function, var: VarId) -> usize {
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

fn first_cont(block: &Block) -> &Continuation {
    block
        .statements
        .iter()
        .find_map(|s| match s {
            Statement::Cont(c) => Some(c),
            Statement::Instr(_) => None,
        })
        .unwrap()
}

// -- Scenarios --

/// A future nobody touches costs nothing at all.
#[test]
fn unused_future_is_free() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let x = f.future("x");
    f.finish();

    let report = run(&mut program, OptFlags::all());

    let func = &program.functions[0];
    assert_eq!(func.body.variables[0].init, HoldCounts::ZERO);
    assert_eq!(count_refcount_ops(func, x), 0);
    assert_eq!(report.emitted(), 0);
    assert_balanced(&program);
}

/// Ten spawned iterations each reading `x` are paid for in one increment
/// before the loop, and each iteration's read releases its own hold.
#[test]
fn known_loop_batches_reads() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let x = f.input("x", Type::Future(PrimType::Int));
    f.range_loop(Arg::int(1), Arg::int(10), Arg::int(1), true, |f, _| {
        let v = f.value("v", PrimType::Int);
        f.retrieve(v, x);
    });
    f.finish();

    run(&mut program, OptFlags::PIGGYBACK | OptFlags::BATCH);

    let func = &program.functions[0];
    assert_eq!(stmt_refcounts(&func.body, x), vec![(RcKind::Read, 10)]);
    let Continuation::RangeLoop { rc, block, .. } = first_cont(&func.body) else {
        panic!("expected a range loop");
    };
    assert!(rc.is_empty());
    assert_eq!(stmt_refcounts(block, x), vec![]);
    assert_balanced(&program);
}

/// Both arms read `x` asynchronously, so the parent takes the hold once.
#[test]
fn exhaustive_branch_hoists_shared_read() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let c = f.input("c", Type::Value(PrimType::Bool));
    let x = f.future("x");
    let arm = |f: &mut FunctionBuilder<'_>| {
        let t = f.future("t");
        f.async_op(BuiltinOp::PlusInt, t, vec![x.into(), Arg::int(1)]);
    };
    f.if_else(c, arm, arm);
    f.finish();

    run(&mut program, OptFlags::HOIST);

    let func = &program.functions[0];
    assert_eq!(stmt_refcounts(&func.body, x), vec![(RcKind::Read, 1)]);
    let Continuation::If {
        then_block,
        else_block,
        ..
    } = first_cont(&func.body)
    else {
        panic!("expected a branch");
    };
    assert_eq!(stmt_refcounts(then_block, x), vec![]);
    assert_eq!(stmt_refcounts(else_block, x), vec![]);
    assert_balanced(&program);
}

/// Both arms load `y` with a write hold that must be released; the parent
/// releases it once after the branch.
#[test]
fn exhaustive_branch_hoists_shared_release() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let c = f.input("c", Type::Value(PrimType::Bool));
    let r = f.input("r", Type::Ref(Box::new(Type::Future(PrimType::Int))));
    let y = f.alias("y", Type::Future(PrimType::Int));
    let load = |f: &mut FunctionBuilder<'_>| f.load_ref(y, r, HoldCounts { read: 0, write: 1 });
    f.if_else(c, load, load);
    f.finish();

    run(&mut program, OptFlags::HOIST);

    let func = &program.functions[0];
    assert_eq!(cleanup_refcounts(&func.body, y), vec![(RcKind::Write, -1)]);
    assert_eq!(count_refcount_ops(func, y), 1);
    let Continuation::If {
        then_block,
        else_block,
        ..
    } = first_cont(&func.body)
    else {
        panic!("expected a branch");
    };
    assert_eq!(stmt_refcounts(then_block, y), vec![]);
    assert_eq!(cleanup_refcounts(then_block, y), vec![]);
    assert_eq!(cleanup_refcounts(else_block, y), vec![]);
    assert_balanced(&program);
}

/// `(x + 5) - 5` is `x`: the subtraction becomes a copy of `x`, and
/// placement then pays for that copy instead of the arithmetic.
#[test]
fn offsets_cancel_before_placement() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let x = f.input("x", Type::Future(PrimType::Int));
    let y = f.future("y");
    let z = f.future("z");
    f.async_op(BuiltinOp::PlusInt, y, vec![x.into(), Arg::int(5)]);
    f.async_op(BuiltinOp::MinusInt, z, vec![y.into(), Arg::int(5)]);
    f.finish();

    let report = run(&mut program, OptFlags::VALUE_NUMBERING);

    let func = &program.functions[0];
    let writes_z = func
        .body
        .instructions()
        .find(|i| !matches!(i, Instruction::RefCount { .. }) && i.outputs().contains(&z))
        .unwrap();
    assert_eq!(writes_z, &Instruction::Copy { dst: z, src: x });
    let stats = report.functions[0].value_numbering.unwrap();
    assert_eq!(stats.eliminated, 1);
    assert_balanced(&program);
}

/// With every knob off the pipeline only places refcounts.
#[test]
fn no_knobs_skips_value_numbering() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let x = f.input("x", Type::Future(PrimType::Int));
    let y = f.future("y");
    f.async_op(BuiltinOp::PlusInt, y, vec![x.into(), Arg::int(0)]);
    f.finish();

    let report = run(&mut program, OptFlags::empty());

    assert_eq!(report.functions[0].value_numbering, None);
    assert!(program.functions[0]
        .body
        .instructions()
        .any(|i| matches!(i, Instruction::Builtin { dst, .. } if *dst == y)));
    assert_balanced(&program);
}
