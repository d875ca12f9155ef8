#![allow(clippy::unwrap_used)]

use flux_ir::{
    Arg, BuiltinOp, Constant, FunctionSigs, GlobalConstants, Mapped, Name, OpMode, OptFlags,
    PrimType, Storage, Type, VarId, VarTable, Variable,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::{eval, fold};
use crate::{ArgOrCv, CongruenceKind, CongruenceModel, ComputedValue, Opcode};

fn int(v: i64) -> Constant {
    Constant::Int(v)
}

fn string(s: &str) -> Constant {
    Constant::Str(s.to_owned())
}

fn var(vars: &mut VarTable, ty: Type, storage: Storage) -> VarId {
    vars.push(Variable {
        name: Name::EMPTY,
        ty,
        storage,
        mapped: Mapped::No,
    })
}

// Evaluation

/// Integer arithmetic and comparison.
#[test]
fn eval_integer_ops() {
    assert_eq!(eval(BuiltinOp::PlusInt, &[int(2), int(3)]), Some(int(5)));
    assert_eq!(eval(BuiltinOp::MinusInt, &[int(2), int(3)]), Some(int(-1)));
    assert_eq!(eval(BuiltinOp::MultInt, &[int(4), int(-3)]), Some(int(-12)));
    assert_eq!(eval(BuiltinOp::DivInt, &[int(7), int(2)]), Some(int(3)));
    assert_eq!(eval(BuiltinOp::ModInt, &[int(7), int(2)]), Some(int(1)));
    assert_eq!(eval(BuiltinOp::NegateInt, &[int(7)]), Some(int(-7)));
    assert_eq!(eval(BuiltinOp::MaxInt, &[int(7), int(9)]), Some(int(9)));
    assert_eq!(eval(BuiltinOp::MinInt, &[int(7), int(9)]), Some(int(7)));
    assert_eq!(
        eval(BuiltinOp::LtInt, &[int(7), int(9)]),
        Some(Constant::Bool(true))
    );
    assert_eq!(
        eval(BuiltinOp::EqInt, &[int(7), int(9)]),
        Some(Constant::Bool(false))
    );
}

/// Anything the runtime would trap on stays unevaluated.
#[test]
fn eval_refuses_runtime_errors() {
    assert_eq!(eval(BuiltinOp::DivInt, &[int(1), int(0)]), None);
    assert_eq!(eval(BuiltinOp::ModInt, &[int(1), int(0)]), None);
    assert_eq!(eval(BuiltinOp::PlusInt, &[int(i64::MAX), int(1)]), None);
    assert_eq!(eval(BuiltinOp::NegateInt, &[int(i64::MIN)]), None);
    assert_eq!(eval(BuiltinOp::DivInt, &[int(i64::MIN), int(-1)]), None);
    assert_eq!(eval(BuiltinOp::ParseInt, &[string("12x")]), None);
    assert_eq!(eval(BuiltinOp::FloatToInt, &[Constant::float(1e300)]), None);
    assert_eq!(eval(BuiltinOp::FloatToInt, &[Constant::float(f64::NAN)]), None);
}

/// Wrong operand kinds or counts never evaluate.
#[test]
fn eval_rejects_ill_typed() {
    assert_eq!(eval(BuiltinOp::PlusInt, &[int(1), Constant::Bool(true)]), None);
    assert_eq!(eval(BuiltinOp::PlusInt, &[int(1)]), None);
    assert_eq!(eval(BuiltinOp::StrCat, &[string("a"), int(1)]), None);
}

#[test]
fn eval_float_and_conversions() {
    assert_eq!(
        eval(BuiltinOp::PlusFloat, &[Constant::float(1.5), Constant::float(2.0)]),
        Some(Constant::float(3.5))
    );
    assert_eq!(eval(BuiltinOp::IntToFloat, &[int(3)]), Some(Constant::float(3.0)));
    assert_eq!(eval(BuiltinOp::FloatToInt, &[Constant::float(-2.7)]), Some(int(-2)));
}

#[test]
fn eval_strings() {
    assert_eq!(
        eval(BuiltinOp::StrCat, &[string("ab"), string("c"), string("")]),
        Some(string("abc"))
    );
    assert_eq!(eval(BuiltinOp::StrLen, &[string("héllo")]), Some(int(5)));
    assert_eq!(eval(BuiltinOp::IntToString, &[int(-4)]), Some(string("-4")));
    assert_eq!(eval(BuiltinOp::ParseInt, &[string("42")]), Some(int(42)));
    assert_eq!(
        eval(BuiltinOp::EqString, &[string("a"), string("a")]),
        Some(Constant::Bool(true))
    );
}

// Folding against the model

/// `and` with a literal `false` folds whatever the other operand is.
#[test]
fn and_short_circuits() {
    let mut vars = VarTable::new();
    let b = var(&mut vars, Type::Value(PrimType::Bool), Storage::Local);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    let and = ComputedValue::new(
        Opcode::Builtin(BuiltinOp::And, OpMode::Local),
        [Arg::Var(b), Arg::bool(false)],
    );
    assert_eq!(fold(&model, &and), Some(Arg::bool(false).into()));

    let or = ComputedValue::new(
        Opcode::Builtin(BuiltinOp::Or, OpMode::Local),
        [Arg::Var(b), Arg::bool(false)],
    );
    assert_eq!(fold(&model, &or), None);
}

/// An async add over futures known to hold literals folds to an
/// assignment of the sum.
#[test]
fn async_folds_through_known_futures() {
    let mut vars = VarTable::new();
    let x = var(&mut vars, Type::Future(PrimType::Int), Storage::Stack);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let mut model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    model
        .add(
            CongruenceKind::Value,
            &ComputedValue::new(Opcode::Assign, [Arg::int(4)]),
            Arg::Var(x),
        )
        .unwrap();

    let sum = ComputedValue::new(
        Opcode::Builtin(BuiltinOp::PlusInt, OpMode::Async),
        [Arg::Var(x), Arg::int(1)],
    );
    let expected: ArgOrCv = ComputedValue::new(Opcode::Assign, [Arg::int(5)]).into();
    assert_eq!(fold(&model, &sum), Some(expected));
}

/// Local operands that are variables are never looked through.
#[test]
fn local_var_operand_does_not_fold() {
    let mut vars = VarTable::new();
    let x = var(&mut vars, Type::Value(PrimType::Int), Storage::Local);
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
    let sum = ComputedValue::new(
        Opcode::Builtin(BuiltinOp::PlusInt, OpMode::Local),
        [Arg::Var(x), Arg::int(1)],
    );
    assert_eq!(fold(&model, &sum), None);
}

/// Statically known mapping answers `is_mapped`; unknown does not.
#[test]
fn is_mapped_follows_static_mapping() {
    let mut vars = VarTable::new();
    let known = var(&mut vars, Type::File, Storage::Stack);
    let unknown = var(&mut vars, Type::File, Storage::Stack);
    vars.get_mut(unknown).mapped = Mapped::Maybe;
    let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
    let model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    let query = |f| ComputedValue::new(Opcode::IsMapped, [Arg::Var(f)]);
    assert_eq!(fold(&model, &query(known)), Some(Arg::bool(false).into()));
    assert_eq!(fold(&model, &query(unknown)), None);
}

/// Pure calls with a builtin equivalent fold like the builtin.
#[test]
fn pure_call_folds_via_equivalent() {
    let vars = VarTable::new();
    let globals = GlobalConstants::default();
    let mut sigs = FunctionSigs::default();
    let plus = Name::from_raw(1);
    let impure = Name::from_raw(2);
    sigs.insert(
        plus,
        flux_ir::FunctionSig {
            pure: true,
            builtin_equiv: Some(BuiltinOp::PlusInt),
        },
    );
    sigs.insert(
        impure,
        flux_ir::FunctionSig {
            pure: false,
            builtin_equiv: Some(BuiltinOp::PlusInt),
        },
    );
    let model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());

    let call = |f| ComputedValue::new(Opcode::Call(f, OpMode::Local), [Arg::int(2), Arg::int(3)]);
    assert_eq!(fold(&model, &call(plus)), Some(Arg::int(5).into()));
    assert_eq!(fold(&model, &call(impure)), None);
}

proptest! {
    /// Integer folding agrees with checked machine arithmetic.
    #[test]
    fn integer_eval_matches_checked(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(eval(BuiltinOp::PlusInt, &[int(a), int(b)]), a.checked_add(b).map(int));
        prop_assert_eq!(eval(BuiltinOp::MinusInt, &[int(a), int(b)]), a.checked_sub(b).map(int));
        prop_assert_eq!(eval(BuiltinOp::MultInt, &[int(a), int(b)]), a.checked_mul(b).map(int));
        prop_assert_eq!(eval(BuiltinOp::DivInt, &[int(a), int(b)]), a.checked_div(b).map(int));
        prop_assert_eq!(eval(BuiltinOp::ModInt, &[int(a), int(b)]), a.checked_rem(b).map(int));
    }

    /// A folded result is already canonical: folding it again changes nothing.
    #[test]
    fn folding_is_idempotent(a in -1000i64..1000, b in -1000i64..1000) {
        let vars = VarTable::new();
        let (globals, sigs) = (GlobalConstants::default(), FunctionSigs::default());
        let model = CongruenceModel::new(&vars, &globals, &sigs, OptFlags::all());
        let sum = |mode| {
            ComputedValue::new(Opcode::Builtin(BuiltinOp::PlusInt, mode), [Arg::int(a), Arg::int(b)])
        };

        let local = fold(&model, &sum(OpMode::Local)).unwrap();
        prop_assert_eq!(&local, &ArgOrCv::from(Arg::int(a + b)));
        let copied = ComputedValue::new(
            Opcode::Builtin(BuiltinOp::CopyValue, OpMode::Local),
            [Arg::int(a + b)],
        );
        prop_assert_eq!(fold(&model, &copied), Some(local));

        let assigned = fold(&model, &sum(OpMode::Async)).unwrap();
        prop_assert_eq!(fold(&model, assigned.cv().unwrap()), None);
    }

    /// Printing then parsing an integer is the identity.
    #[test]
    fn int_string_round_trip(a in any::<i64>()) {
        let s = eval(BuiltinOp::IntToString, &[int(a)]).unwrap();
        prop_assert_eq!(eval(BuiltinOp::ParseInt, &[s]), Some(int(a)));
    }
}
