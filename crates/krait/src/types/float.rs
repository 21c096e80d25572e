//! The `float` type.
//!
//! Float handlers accept int-like right operands (the reflected half of
//! `1 + 2.5`): integers coerce through `f64`, raising `OverflowError` when a
//! big integer exceeds float range. Modulo and floor division follow
//! Python's floor semantics, where the result sign tracks the divisor.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::{HostClass, Object},
    py_hash,
    types::{
        PyType, TypeFlags, TypeRef,
        int::bigint_to_f64,
        slots::{Slot, SlotImpl, SlotTable},
    },
    vm::ThreadState,
};

/// Views a value as a float if its type is float or int-like.
fn float_val(obj: &Object) -> RunResult<Option<f64>> {
    match obj {
        Object::Float(v) => Ok(Some(*v)),
        Object::Int(v) => Ok(Some(*v as f64)),
        Object::Bool(b) => Ok(Some(f64::from(*b))),
        Object::BigInt(b) => bigint_to_f64(b).map(Some),
        _ => Ok(None),
    }
}

macro_rules! float_binary {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let (Some($a), Some($b)) = (float_val(lhs)?, float_val(rhs)?) else {
                return Ok(Object::NotImplemented);
            };
            $body
        }
    };
}

float_binary!(float_add, |a, b| Ok(Object::Float(a + b)));
float_binary!(float_sub, |a, b| Ok(Object::Float(a - b)));
float_binary!(float_mul, |a, b| Ok(Object::Float(a * b)));

float_binary!(float_truediv, |a, b| {
    if b == 0.0 {
        return Err(RunError::exc(ExcType::ZeroDivisionError, "float division by zero"));
    }
    Ok(Object::Float(a / b))
});

float_binary!(float_floordiv, |a, b| {
    if b == 0.0 {
        return Err(RunError::exc(
            ExcType::ZeroDivisionError,
            "float floor division by zero",
        ));
    }
    Ok(Object::Float((a / b).floor()))
});

float_binary!(float_mod, |a, b| {
    if b == 0.0 {
        return Err(RunError::exc(ExcType::ZeroDivisionError, "float modulo"));
    }
    // Result sign follows the divisor.
    let mut r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r += b;
    }
    Ok(Object::Float(r))
});

float_binary!(float_pow, |a, b| {
    if a == 0.0 && b < 0.0 {
        return Err(RunError::exc(
            ExcType::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        ));
    }
    Ok(Object::Float(a.powf(b)))
});

macro_rules! float_reflected {
    ($name:ident, $forward:ident) => {
        fn $name(recv: &Object, other: &Object, ts: &mut ThreadState) -> RunResult<Object> {
            $forward(other, recv, ts)
        }
    };
}

float_reflected!(float_radd, float_add);
float_reflected!(float_rsub, float_sub);
float_reflected!(float_rmul, float_mul);
float_reflected!(float_rtruediv, float_truediv);
float_reflected!(float_rfloordiv, float_floordiv);
float_reflected!(float_rmod, float_mod);
float_reflected!(float_rpow, float_pow);

fn float_neg(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) => Ok(Object::Float(-x)),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_pos(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) => Ok(Object::Float(x)),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_abs(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) => Ok(Object::Float(x.abs())),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_bool(v: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    match v.as_float() {
        Some(x) => Ok(x != 0.0),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_hash(v: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    match v.as_float() {
        Some(x) => Ok(py_hash::hash_f64(x)),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_repr_slot(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) => Ok(Object::str(float_repr(x))),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_int(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) if x.is_nan() => Err(RunError::exc(
            ExcType::ValueError,
            "cannot convert float NaN to integer",
        )),
        Some(x) if x.is_infinite() => Err(RunError::exc(
            ExcType::OverflowError,
            "cannot convert float infinity to integer",
        )),
        Some(x) => {
            let truncated = x.trunc();
            if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
                Ok(Object::Int(truncated as i64))
            } else {
                let big: num_bigint::BigInt = num_traits::FromPrimitive::from_f64(truncated)
                    .ok_or_else(|| RunError::internal("finite float failed integer conversion"))?;
                Ok(Object::from_bigint(big))
            }
        }
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

fn float_float(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v.as_float() {
        Some(x) => Ok(Object::Float(x)),
        None => Err(RunError::internal("float slot invoked on non-float operand")),
    }
}

macro_rules! float_compare {
    ($name:ident, $op:tt) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let (Some(a), Some(b)) = (float_val(lhs)?, float_val(rhs)?) else {
                return Ok(Object::NotImplemented);
            };
            Ok(Object::Bool(a $op b))
        }
    };
}

float_compare!(float_eq, ==);
float_compare!(float_ne, !=);
float_compare!(float_lt, <);
float_compare!(float_le, <=);
float_compare!(float_gt, >);
float_compare!(float_ge, >=);

/// Exact-pair handler for float + float: never returns `NotImplemented`.
fn float_add_exact(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    float_add(lhs, rhs, ts)
}

/// Renders a float the way Python's `repr` does: shortest round-trip form,
/// a trailing `.0` for integral values, and `e+NN`/`e-NN` exponents.
#[must_use]
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    let printed = buffer.format(value);
    // ryu prints `2.5e16`; Python spells the exponent `2.5e+16` and pads it
    // to at least two digits (`1e-07`).
    match printed.find(['e', 'E']) {
        Some(pos) => {
            let mantissa = &printed[..pos];
            let exp = &printed[pos + 1..];
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ("-", digits),
                None => ("+", exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => printed.to_owned(),
    }
}

/// Builds the `float` type.
#[must_use]
pub(crate) fn make_float_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Add, SlotImpl::Binary(float_add));
    table.set(Slot::Sub, SlotImpl::Binary(float_sub));
    table.set(Slot::Mul, SlotImpl::Binary(float_mul));
    table.set(Slot::TrueDiv, SlotImpl::Binary(float_truediv));
    table.set(Slot::FloorDiv, SlotImpl::Binary(float_floordiv));
    table.set(Slot::Mod, SlotImpl::Binary(float_mod));
    table.set(Slot::Pow, SlotImpl::Binary(float_pow));
    table.set(Slot::RAdd, SlotImpl::Binary(float_radd));
    table.set(Slot::RSub, SlotImpl::Binary(float_rsub));
    table.set(Slot::RMul, SlotImpl::Binary(float_rmul));
    table.set(Slot::RTrueDiv, SlotImpl::Binary(float_rtruediv));
    table.set(Slot::RFloorDiv, SlotImpl::Binary(float_rfloordiv));
    table.set(Slot::RMod, SlotImpl::Binary(float_rmod));
    table.set(Slot::RPow, SlotImpl::Binary(float_rpow));
    table.set(Slot::Neg, SlotImpl::Unary(float_neg));
    table.set(Slot::Pos, SlotImpl::Unary(float_pos));
    table.set(Slot::Abs, SlotImpl::Unary(float_abs));
    table.set(Slot::Bool, SlotImpl::Bool(float_bool));
    table.set(Slot::Hash, SlotImpl::Hash(float_hash));
    table.set(Slot::Repr, SlotImpl::Unary(float_repr_slot));
    table.set(Slot::Str, SlotImpl::Unary(float_repr_slot));
    table.set(Slot::Int, SlotImpl::Unary(float_int));
    table.set(Slot::Float, SlotImpl::Unary(float_float));
    table.set(Slot::Eq, SlotImpl::Binary(float_eq));
    table.set(Slot::Ne, SlotImpl::Binary(float_ne));
    table.set(Slot::Lt, SlotImpl::Binary(float_lt));
    table.set(Slot::Le, SlotImpl::Binary(float_le));
    table.set(Slot::Gt, SlotImpl::Binary(float_gt));
    table.set(Slot::Ge, SlotImpl::Binary(float_ge));
    table.set_exact(Slot::Add, HostClass::Float, HostClass::Float, float_add_exact);

    PyType::new_builtin("float", vec![Rc::clone(object)], table, Vec::new(), TypeFlags::default())
}
