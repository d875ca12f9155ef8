#![allow(clippy::unwrap_used)]

use flux_ir::{
    Arg, BuiltinOp, Constant, FunctionSigs, GlobalConstants, Mapped, Name, OpMode, OptFlags,
    PrimType, RcKind, Storage, Type, VarId, VarTable, Variable,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::{ArgOrCv, CongruenceKind, CongruenceModel, ComputedValue, Opcode, VnError};

const VALUE: CongruenceKind = CongruenceKind::Value;

fn push(vars: &mut VarTable, ty: Type, storage: Storage) -> VarId {
    vars.push(Variable {
        name: Name::EMPTY,
        ty,
        storage,
        mapped: Mapped::No,
    })
}

fn int_values(vars: &mut VarTable, n: usize) -> Vec<VarId> {
    (0..n)
        .map(|_| push(vars, Type::Value(PrimType::Int), Storage::Local))
        .collect()
}

fn v(id: VarId) -> ArgOrCv {
    id.into()
}

fn all_initialized(_: VarId, _: RcKind) -> bool {
    true
}

fn plus_one(x: VarId) -> ComputedValue {
    ComputedValue::new(
        Opcode::Builtin(BuiltinOp::PlusInt, OpMode::Local),
        [Arg::Var(x), Arg::int(1)],
    )
}

// Classes

/// Merging is transitive and the oldest name stays representative.
#[test]
fn merge_is_transitive() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 3);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.merge(VALUE, v(ids[0]), v(ids[1])).unwrap();
    model.merge(VALUE, v(ids[1]), v(ids[2])).unwrap();
    assert!(model.congruent(VALUE, &v(ids[0]), &v(ids[2])));
    assert_eq!(model.find_canonical(VALUE, &v(ids[2])), v(ids[0]));
    assert!(!model.congruent(CongruenceKind::Alias, &v(ids[0]), &v(ids[2])));
}

/// A literal always beats a variable for representative.
#[test]
fn constant_is_representative() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 2);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.merge(VALUE, v(ids[0]), v(ids[1])).unwrap();
    model.merge(VALUE, v(ids[1]), Arg::int(7).into()).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(ids[0])), Arg::int(7).into());
}

/// Recomputing the same expression lands in the same class.
#[test]
fn equal_expressions_are_congruent() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 3);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.add(VALUE, &plus_one(ids[0]), Arg::Var(ids[1])).unwrap();
    model.add(VALUE, &plus_one(ids[0]), Arg::Var(ids[2])).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(ids[2])), v(ids[1]));
}

/// Commutative operands are ordered before comparison.
#[test]
fn commutative_operands_ordered() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 4);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    let mult = |a: VarId, b: VarId| {
        ComputedValue::new(
            Opcode::Builtin(BuiltinOp::MultInt, OpMode::Local),
            [Arg::Var(a), Arg::Var(b)],
        )
    };

    model.add(VALUE, &mult(ids[0], ids[1]), Arg::Var(ids[2])).unwrap();
    model.add(VALUE, &mult(ids[1], ids[0]), Arg::Var(ids[3])).unwrap();
    assert!(model.congruent(VALUE, &v(ids[2]), &v(ids[3])));
}

/// Learning that two inputs are equal makes values computed from them equal.
#[test]
fn merge_recanonicalizes_dependents() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 4);
    let (a, b, y, z) = (ids[0], ids[1], ids[2], ids[3]);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.add(VALUE, &plus_one(a), Arg::Var(y)).unwrap();
    model.add(VALUE, &plus_one(b), Arg::Var(z)).unwrap();
    assert!(!model.congruent(VALUE, &v(y), &v(z)));

    model.merge(VALUE, v(a), v(b)).unwrap();
    assert!(model.congruent(VALUE, &v(y), &v(z)));
    assert_eq!(model.find_canonical(VALUE, &v(z)), v(y));
}

/// Learning an input's literal value folds values computed from it.
#[test]
fn merge_with_constant_folds_dependents() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 2);
    let (x, y) = (ids[0], ids[1]);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.add(VALUE, &plus_one(x), Arg::Var(y)).unwrap();
    model.merge(VALUE, v(x), Arg::int(4).into()).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(y)), Arg::int(5).into());
}

// Futures and constants

/// A future stored a literal and then retrieved yields the literal.
#[test]
fn store_then_retrieve_is_constant() {
    let mut vars = VarTable::new();
    let f = push(&mut vars, Type::Future(PrimType::Int), Storage::Stack);
    let r = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model
        .add(VALUE, &ComputedValue::new(Opcode::Assign, [Arg::int(3)]), Arg::Var(f))
        .unwrap();
    model
        .add(VALUE, &ComputedValue::new(Opcode::Retrieve, [Arg::Var(f)]), Arg::Var(r))
        .unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(r)), Arg::int(3).into());
}

/// With shared constants, a future assigned a literal joins the
/// program's constant variable for it.
#[test]
fn shared_constant_becomes_representative() {
    let mut vars = VarTable::new();
    let g = push(&mut vars, Type::Future(PrimType::Int), Storage::GlobalConst);
    let f = push(&mut vars, Type::Future(PrimType::Int), Storage::Stack);
    let mut globals = GlobalConstants::default();
    globals.insert(Constant::Int(5), g);
    let sigs = FunctionSigs::default();

    let assign = ComputedValue::new(Opcode::Assign, [Arg::int(5)]);
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.add(VALUE, &assign, Arg::Var(f)).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(f)), v(g));

    let off = OptFlags::all() - OptFlags::SHARED_CONSTANTS;
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, off);
    model.add(VALUE, &assign, Arg::Var(f)).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(f)), v(f));
}

// Errors

#[test]
fn type_mismatch_is_reported() {
    let mut vars = VarTable::new();
    let i = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let s = push(&mut vars, Type::Value(PrimType::String), Storage::Local);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    let err = model.merge(VALUE, v(i), v(s)).unwrap_err();
    assert_eq!(
        err,
        VnError::TypeMismatch {
            kind: VALUE,
            winner: Arg::Var(i),
            winner_ty: Type::Value(PrimType::Int),
            loser: Arg::Var(s),
            loser_ty: Type::Value(PrimType::String),
        }
    );
}

#[test]
fn conflicting_constants_are_reported() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 1);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.merge(VALUE, v(ids[0]), Arg::int(1).into()).unwrap();
    let err = model.merge(VALUE, v(ids[0]), Arg::int(2).into()).unwrap_err();
    assert!(matches!(err, VnError::ConflictingConstants { .. }));
}

// Scopes

/// Merges made in a scope vanish with it unless promoted.
#[test]
fn scoped_merges_roll_back_or_promote() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 2);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    model.push_scope(false);
    model.merge(VALUE, v(ids[0]), v(ids[1])).unwrap();
    let merges = model.pop_scope();
    assert!(!model.congruent(VALUE, &v(ids[0]), &v(ids[1])));
    assert_eq!(merges.len(), 1);

    model.promote(merges).unwrap();
    assert!(model.congruent(VALUE, &v(ids[0]), &v(ids[1])));
}

/// A local value declared outside a task is not accessible inside it;
/// a future is.
#[test]
fn locals_do_not_cross_tasks() {
    let mut vars = VarTable::new();
    let x = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let f = push(&mut vars, Type::Future(PrimType::Int), Storage::Stack);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.declare(x);
    model.declare(f);

    model.push_scope(false);
    assert!(model.is_accessible(x));
    model.push_scope(true);
    assert!(!model.is_accessible(x));
    assert!(model.is_accessible(f));
}

// Replacement

/// A later name is replaced by the representative.
#[test]
fn replacement_is_representative() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 2);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.declare(ids[0]);
    model.declare(ids[1]);

    model.merge(VALUE, v(ids[0]), v(ids[1])).unwrap();
    let init = all_initialized;
    assert_eq!(
        model.replacement_for(VALUE, ids[1], &init),
        Some(Arg::Var(ids[0]))
    );
    assert_eq!(model.replacement_for(VALUE, ids[0], &init), None);
}

/// An uninitialized representative falls back to another member.
#[test]
fn replacement_skips_uninitialized() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 3);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    for id in &ids {
        model.declare(*id);
    }
    model.merge(VALUE, v(a), v(b)).unwrap();
    model.merge(VALUE, v(a), v(c)).unwrap();

    let init = |var: VarId, _: RcKind| var != a;
    assert_eq!(model.replacement_for(VALUE, c, &init), Some(Arg::Var(b)));

    let none = |var: VarId, _: RcKind| var == c;
    assert_eq!(model.replacement_for(VALUE, c, &none), None);
}

/// An inaccessible representative falls back to an accessible member.
#[test]
fn replacement_skips_inaccessible() {
    let mut vars = VarTable::new();
    let x = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let y = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let z = push(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.declare(x);

    model.push_scope(true);
    model.declare(y);
    model.declare(z);
    model.merge(VALUE, v(x), v(y)).unwrap();
    model.merge(VALUE, v(y), v(z)).unwrap();
    assert_eq!(model.find_canonical(VALUE, &v(z)), v(x));
    assert_eq!(
        model.replacement_for(VALUE, z, &all_initialized),
        Some(Arg::Var(y))
    );
}

/// Variables whose mapping is not statically "no" are never replaced or
/// offered as replacements.
#[test]
fn mapped_variables_are_opaque() {
    let mut vars = VarTable::new();
    let a = push(&mut vars, Type::File, Storage::Stack);
    let b = push(&mut vars, Type::File, Storage::Stack);
    vars.get_mut(a).mapped = Mapped::Maybe;
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.declare(a);
    model.declare(b);

    model.merge(VALUE, v(a), v(b)).unwrap();
    assert_eq!(model.replacement_for(VALUE, a, &all_initialized), None);
    assert_eq!(model.replacement_for(VALUE, b, &all_initialized), None);
}

/// Alias congruence never offers a literal.
#[test]
fn alias_replacement_is_never_constant() {
    let mut vars = VarTable::new();
    let ids = int_values(&mut vars, 1);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model.declare(ids[0]);
    model
        .merge(CongruenceKind::Alias, v(ids[0]), Arg::int(1).into())
        .unwrap();
    assert_eq!(
        model.replacement_for(CongruenceKind::Alias, ids[0], &all_initialized),
        None
    );
    assert_eq!(
        model.replacement_for(VALUE, ids[0], &all_initialized),
        None
    );
}

proptest! {
    /// Classes are exactly the connected components of the merges made.
    #[test]
    fn classes_match_reference_partition(
        pairs in prop::collection::vec((0usize..8, 0usize..8), 0..16)
    ) {
        let mut vars = VarTable::new();
        let ids = int_values(&mut vars, 8);
        let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
        let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

        let mut label: Vec<usize> = (0..8).collect();
        for (a, b) in pairs {
            model.merge(VALUE, v(ids[a]), v(ids[b])).unwrap();
            let (from, to) = (label[b], label[a]);
            for l in &mut label {
                if *l == from {
                    *l = to;
                }
            }
        }
        for a in 0..8 {
            for b in 0..8 {
                prop_assert_eq!(
                    model.congruent(VALUE, &v(ids[a]), &v(ids[b])),
                    label[a] == label[b]
                );
            }
        }
    }
}
