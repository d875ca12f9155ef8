//! Linear integer algebra.
//!
//! Integer add/subtract against a single variable is normalized to
//! `x + c`. When `x` is itself known to be `y + d`, the value is also
//! `y + (c + d)`, and a zero offset is plain `y`. That is enough to relate
//! adjacent array indices (`a[i]`, `a[i + 1]`) and to cancel `+ c - c`
//! without a symbolic algebra engine.

use flux_ir::{Arg, BuiltinOp, Constant, OpMode, VarId};

use crate::{ArgOrCv, CongruenceKind, CongruenceModel, ComputedValue, Opcode};

/// `(mode, x, c)` for `x + c`, `c + x` and `x - c`.
fn as_offset(cv: &ComputedValue) -> Option<(OpMode, VarId, i64)> {
    let Opcode::Builtin(op, mode) = cv.op else {
        return None;
    };
    let (a, b) = (cv.arg(0)?, cv.arg(1)?);
    match (op, a, b) {
        (BuiltinOp::PlusInt, Arg::Var(x), Arg::Const(Constant::Int(c)))
        | (BuiltinOp::PlusInt, Arg::Const(Constant::Int(c)), Arg::Var(x)) => Some((mode, *x, *c)),
        (BuiltinOp::MinusInt, Arg::Var(x), Arg::Const(Constant::Int(c))) => {
            Some((mode, *x, c.checked_neg()?))
        }
        _ => None,
    }
}

fn offset_value(mode: OpMode, x: VarId, offset: i64) -> ArgOrCv {
    if offset == 0 {
        return x.into();
    }
    ComputedValue::new(
        Opcode::Builtin(BuiltinOp::PlusInt, mode),
        [Arg::Var(x), Arg::int(offset)],
    )
    .into()
}

/// Canonical `x + c` form of an add or subtract, if it is one.
pub(crate) fn normalize(cv: &ComputedValue) -> Option<ArgOrCv> {
    let (mode, x, offset) = as_offset(cv)?;
    Some(offset_value(mode, x, offset))
}

/// Values equal to `canon` through one level of offset chaining.
pub(crate) fn alternatives(model: &CongruenceModel<'_>, canon: &ArgOrCv) -> Vec<ArgOrCv> {
    let Some((mode, x, offset)) = canon.cv().and_then(as_offset) else {
        return Vec::new();
    };
    model
        .members(CongruenceKind::Value, &x.into())
        .iter()
        .filter_map(|member| {
            let (inner_mode, y, inner) = as_offset(member.cv()?)?;
            if inner_mode != mode {
                return None;
            }
            Some(offset_value(mode, y, offset.checked_add(inner)?))
        })
        .collect()
}
