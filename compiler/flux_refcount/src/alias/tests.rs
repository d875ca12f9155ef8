#![allow(clippy::unwrap_used)]

use flux_ir::{
    Arg, Block, BlockId, FunctionBuilder, Instruction, PrimType, Program, Storage, Type,
};
use pretty_assertions::assert_eq;

use super::{AliasKey, AliasModel, PathElem};
use crate::RefcountError;

fn struct_ty(program: &mut Program, name: &str) -> Type {
    Type::Struct(program.names.intern(name))
}

fn int_array() -> Type {
    Type::Array(Box::new(Type::Future(PrimType::Int)))
}

// Canonical keys

/// A field alias is keyed by its struct's root plus the field.
#[test]
fn struct_field_extends_parent_key() {
    let mut program = Program::default();
    let ty = struct_ty(&mut program, "Pair");
    let mut f = FunctionBuilder::new(&mut program, "main");
    let s = f.input("s", ty);
    let a = f.alias("a", Type::Future(PrimType::Int));
    f.struct_alias(a, s, "left");
    let idx = f.finish();

    let model = AliasModel::from_function(&program.functions[idx]);
    let left = program.names.intern("left");
    let key = model.canonical_key(a);
    assert_eq!(key.root, s);
    assert_eq!(key.path.as_slice(), &[PathElem::Field(left)]);
}

/// Trailing fields are stripped for refcounting; array indices are kept.
#[test]
fn refcount_key_strips_trailing_fields_only() {
    let mut program = Program::default();
    let ty = struct_ty(&mut program, "Rec");
    let mut f = FunctionBuilder::new(&mut program, "main");
    let arr = f.input("arr", Type::Array(Box::new(ty.clone())));
    let rec = f.alias("rec", ty);
    let fld = f.alias("fld", Type::Future(PrimType::Int));
    f.array_alias(rec, arr, Arg::int(2));
    f.struct_alias(fld, rec, "x");
    let idx = f.finish();

    let model = AliasModel::from_function(&program.functions[idx]);
    let key = model.refcount_key(fld);
    assert_eq!(key.root, arr);
    assert_eq!(key.path.as_slice(), &[PathElem::Index(2)]);
    assert_eq!(model.canonical_key(fld).path.len(), 2);
}

/// Non-constant indices establish no fact.
#[test]
fn dynamic_index_is_its_own_root() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let arr = f.input("arr", int_array());
    let i = f.value("i", PrimType::Int);
    let m = f.alias("m", Type::Future(PrimType::Int));
    f.array_alias(m, arr, Arg::Var(i));
    let idx = f.finish();

    let model = AliasModel::from_function(&program.functions[idx]);
    assert_eq!(model.canonical_key(m), AliasKey::var(m));
}

/// Keys computed before a container was known re-canonicalize afterwards.
#[test]
fn knowledge_growth_recanonicalizes() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let arr = f.input("arr", int_array());
    let x = f.future("x");
    let _ = f.finish();

    let mut model = AliasModel::new();
    let early = model.refcount_key(x);
    assert_eq!(early, AliasKey::var(x));

    model.update(&Instruction::ArrayInsert {
        array: arr,
        index: Arg::int(0),
        member: x,
    });
    let late = model.canonicalize(&early);
    assert_eq!(late.root, arr);
    assert_eq!(late.path.as_slice(), &[PathElem::Index(0)]);
}

/// A second container for the same variable is ignored.
#[test]
fn first_container_wins() {
    let mut model = AliasModel::new();
    let (a, b, x) = (
        flux_ir::VarId::new(0),
        flux_ir::VarId::new(1),
        flux_ir::VarId::new(2),
    );
    model.record_alias(a, PathElem::Index(0), x);
    model.record_alias(b, PathElem::Index(1), x);
    assert_eq!(model.canonical_key(x).root, a);
}

/// Cyclic facts are refused instead of looping forever.
#[test]
fn cycles_are_refused() {
    let mut model = AliasModel::new();
    let (a, b) = (flux_ir::VarId::new(0), flux_ir::VarId::new(1));
    model.record_alias(a, PathElem::Index(0), b);
    model.record_alias(b, PathElem::Index(0), a);
    assert_eq!(model.canonical_key(a), AliasKey::var(a));
    assert_eq!(model.canonical_key(b).root, a);
}

// Resolution

/// Every inhabitant of a location is reported, in discovery order.
#[test]
fn inhabitants_of_shared_location() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let arr = f.input("arr", int_array());
    let m1 = f.alias("m1", Type::Future(PrimType::Int));
    let m2 = f.alias("m2", Type::Future(PrimType::Int));
    f.array_alias(m1, arr, Arg::int(3));
    f.array_alias(m2, arr, Arg::int(3));
    let idx = f.finish();

    let model = AliasModel::from_function(&program.functions[idx]);
    let key = model.canonical_key(m2);
    assert_eq!(model.inhabitants(&key), vec![m1, m2]);
    assert_eq!(model.resolve(&key, |v| v == m2), Some(m2));
    assert_eq!(model.resolve(&key, |_| false), None);
}

/// A missing suffix is materialized from the deepest accessible prefix.
#[test]
fn synthesizes_missing_alias() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let arr = f.input("arr", int_array());
    let _ = f.finish();

    let mut model = AliasModel::new();
    let key = AliasKey {
        root: arr,
        path: [PathElem::Index(1)].into_iter().collect(),
    };
    let mut block = Block::new(BlockId::new(7));
    let resolved = model
        .resolve_or_synthesize(
            &key,
            &mut block,
            &mut program.vars,
            &mut program.names,
            |v| v == arr,
        )
        .unwrap();

    assert_ne!(resolved.var, arr);
    assert_eq!(program.vars.storage(resolved.var), Storage::Alias);
    assert_eq!(program.vars.ty(resolved.var), &Type::Future(PrimType::Int));
    assert!(block.declares(resolved.var));
    assert_eq!(
        resolved.materialize,
        vec![Instruction::ArrayAlias {
            dst: resolved.var,
            array: arr,
            index: Arg::int(1),
        }]
    );
    assert_eq!(model.canonical_key(resolved.var), key);
}

/// An inaccessible root cannot be resolved.
#[test]
fn inaccessible_root_is_an_error() {
    let mut program = Program::default();
    let mut f = FunctionBuilder::new(&mut program, "main");
    let x = f.future("x");
    let _ = f.finish();

    let mut model = AliasModel::new();
    let mut block = Block::new(BlockId::new(1));
    let err = model
        .resolve_or_synthesize(
            &AliasKey::var(x),
            &mut block,
            &mut program.vars,
            &mut program.names,
            |_| false,
        )
        .unwrap_err();
    assert!(matches!(err, RefcountError::UnresolvedKey { .. }));
}
