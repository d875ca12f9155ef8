//! Constant folding.
//!
//! [`fold`] evaluates a computed value whose inputs are already canonical.
//! It consults the congruence model only to read what futures are known
//! to hold, and never changes it.
//!
//! | Operation | Folds when |
//! |-----------|------------|
//! | local builtin | every operand is a literal (`and`/`or` short-circuit) |
//! | async builtin | every operand is a literal or a future with a known value |
//! | retrieve | the future is known to hold a literal |
//! | is-mapped | the file's mapping is statically known |
//! | get-filename | the file was mapped to a known name |
//! | pure call | the callee has a builtin equivalent that folds |
//!
//! Folding a local operation yields the literal; folding an async one
//! yields an `Assign` of the literal, i.e. a future holding it.

use flux_ir::{Arg, BuiltinOp, Constant, OpMode};

use crate::{ArgOrCv, CongruenceKind, CongruenceModel, ComputedValue, Opcode};

/// Evaluate `cv`, or `None` if it does not reduce.
pub(crate) fn fold(model: &CongruenceModel<'_>, cv: &ComputedValue) -> Option<ArgOrCv> {
    match cv.op {
        Opcode::Builtin(op, mode) => fold_builtin(op, mode, &operand_values(model, cv, mode)),
        Opcode::Retrieve => {
            let future = cv.arg(0)?.var()?;
            model.retrieve_result(future).map(|c| Arg::Const(c).into())
        }
        Opcode::IsMapped => {
            let file = cv.arg(0)?.var()?;
            let mapped = model.vars().get(file).mapped.known()?;
            Some(Arg::bool(mapped).into())
        }
        Opcode::GetFilename => {
            let file = cv.arg(0)?.clone();
            let filename = ComputedValue::new(Opcode::Filename, [file]).into();
            match model.lookup(CongruenceKind::Value, &filename)? {
                name @ ArgOrCv::Arg(_) => Some(name),
                ArgOrCv::Cv(_) => None,
            }
        }
        Opcode::Call(func, mode) => {
            let sig = model.sigs().get(func)?;
            if !sig.pure {
                return None;
            }
            let values = operand_values(model, cv, mode);
            let consts = all_known(&values)?;
            let result = eval(sig.builtin_equiv?, &consts)?;
            Some(as_result(result, mode))
        }
        Opcode::Assign
        | Opcode::Copy
        | Opcode::StructField(_)
        | Opcode::ArrayMember
        | Opcode::Deref
        | Opcode::Filename => None,
    }
}

fn fold_builtin(op: BuiltinOp, mode: OpMode, values: &[Option<Constant>]) -> Option<ArgOrCv> {
    if let Some(result) = short_circuit(op, values) {
        return Some(as_result(result, mode));
    }
    let consts = all_known(values)?;
    eval(op, &consts).map(|c| as_result(c, mode))
}

/// `and` with a false operand, `or` with a true one.
fn short_circuit(op: BuiltinOp, values: &[Option<Constant>]) -> Option<Constant> {
    let absorbing = match op {
        BuiltinOp::And => false,
        BuiltinOp::Or => true,
        _ => return None,
    };
    values
        .iter()
        .any(|v| v.as_ref().and_then(Constant::as_bool) == Some(absorbing))
        .then_some(Constant::Bool(absorbing))
}

/// Literal value of each operand, where known.
///
/// Local operands are values, so only literals are known. Async operands
/// are futures whose contents may be known from earlier assignments.
fn operand_values(
    model: &CongruenceModel<'_>,
    cv: &ComputedValue,
    mode: OpMode,
) -> Vec<Option<Constant>> {
    cv.inputs
        .iter()
        .map(|input| match (input, mode) {
            (ArgOrCv::Arg(Arg::Const(c)), _) => Some(c.clone()),
            (ArgOrCv::Arg(Arg::Var(v)), OpMode::Async) => model.retrieve_result(*v),
            _ => None,
        })
        .collect()
}

fn all_known(values: &[Option<Constant>]) -> Option<Vec<Constant>> {
    values.iter().cloned().collect()
}

fn as_result(value: Constant, mode: OpMode) -> ArgOrCv {
    match mode {
        OpMode::Local => Arg::Const(value).into(),
        OpMode::Async => ComputedValue::new(Opcode::Assign, [Arg::Const(value)]).into(),
    }
}

/// Apply `op` to literal operands.
///
/// Returns `None` for operand kinds the operator does not take, and for
/// results the runtime would reject: integer overflow, division by zero,
/// unparseable strings, out-of-range float conversion.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
pub fn eval(op: BuiltinOp, args: &[Constant]) -> Option<Constant> {
    use BuiltinOp::*;
    use Constant::{Bool, Float, Int, Str};

    if op.arity().is_some_and(|n| n != args.len()) {
        return None;
    }
    let float = |x: f64| Some(Constant::float(x));
    match (op, args) {
        // ── Integer ─────────────────────────────────────────
        (PlusInt, [Int(a), Int(b)]) => a.checked_add(*b).map(Int),
        (MinusInt, [Int(a), Int(b)]) => a.checked_sub(*b).map(Int),
        (MultInt, [Int(a), Int(b)]) => a.checked_mul(*b).map(Int),
        (DivInt, [Int(a), Int(b)]) => a.checked_div(*b).map(Int),
        (ModInt, [Int(a), Int(b)]) => a.checked_rem(*b).map(Int),
        (NegateInt, [Int(a)]) => a.checked_neg().map(Int),
        (AbsInt, [Int(a)]) => a.checked_abs().map(Int),
        (MaxInt, [Int(a), Int(b)]) => Some(Int(*a.max(b))),
        (MinInt, [Int(a), Int(b)]) => Some(Int(*a.min(b))),
        (EqInt, [Int(a), Int(b)]) => Some(Bool(a == b)),
        (NeqInt, [Int(a), Int(b)]) => Some(Bool(a != b)),
        (LtInt, [Int(a), Int(b)]) => Some(Bool(a < b)),
        (LteInt, [Int(a), Int(b)]) => Some(Bool(a <= b)),
        (GtInt, [Int(a), Int(b)]) => Some(Bool(a > b)),
        (GteInt, [Int(a), Int(b)]) => Some(Bool(a >= b)),

        // ── Float ───────────────────────────────────────────
        (PlusFloat, [Float(a), Float(b)]) => float(a.get() + b.get()),
        (MinusFloat, [Float(a), Float(b)]) => float(a.get() - b.get()),
        (MultFloat, [Float(a), Float(b)]) => float(a.get() * b.get()),
        (DivFloat, [Float(a), Float(b)]) => float(a.get() / b.get()),
        (NegateFloat, [Float(a)]) => float(-a.get()),
        (EqFloat, [Float(a), Float(b)]) => Some(Bool(a.get() == b.get())),
        (LtFloat, [Float(a), Float(b)]) => Some(Bool(a.get() < b.get())),
        (GtFloat, [Float(a), Float(b)]) => Some(Bool(a.get() > b.get())),
        (IntToFloat, [Int(a)]) => float(*a as f64),
        (FloatToInt, [Float(a)]) => {
            let x = a.get().trunc();
            // i64::MAX as f64 rounds up to 2^63, which is out of range.
            (x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64).then(|| Int(x as i64))
        }

        // ── Boolean ─────────────────────────────────────────
        (And, [Bool(a), Bool(b)]) => Some(Bool(*a && *b)),
        (Or, [Bool(a), Bool(b)]) => Some(Bool(*a || *b)),
        (Not, [Bool(a)]) => Some(Bool(!a)),
        (EqBool, [Bool(a), Bool(b)]) => Some(Bool(a == b)),

        // ── String ──────────────────────────────────────────
        (StrCat, parts) => {
            let mut out = String::new();
            for part in parts {
                let Str(s) = part else {
                    return None;
                };
                out.push_str(s);
            }
            Some(Str(out))
        }
        (EqString, [Str(a), Str(b)]) => Some(Bool(a == b)),
        (StrLen, [Str(s)]) => i64::try_from(s.chars().count()).ok().map(Int),
        (IntToString, [Int(a)]) => Some(Str(a.to_string())),
        (ParseInt, [Str(s)]) => s.parse().ok().map(Int),

        (CopyValue, [c]) => Some(c.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
