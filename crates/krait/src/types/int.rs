//! The `int` type and its two host representations, plus `bool`.
//!
//! Python has one integer type; this engine backs it with `Object::Int(i64)`
//! for values that fit and `Object::BigInt` past that. Handlers for the
//! small representation use checked arithmetic and promote to the big
//! representation on overflow; every result funnels through
//! [`Object::from_bigint`] so values demote back as soon as they fit.
//!
//! `bool` is a proper subclass of `int`: its slot table reuses the integer
//! handlers (a `True` operand behaves as `1`), overriding only `repr`.

use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::{HostClass, Object},
    py_hash,
    types::{
        PyType, TypeFlags, TypeRef,
        slots::{Slot, SlotImpl, SlotTable},
    },
    vm::ThreadState,
};

/// A borrowed view of an integer operand, whichever representation backs it.
enum IntVal<'a> {
    Small(i64),
    Big(&'a BigInt),
}

impl IntVal<'_> {
    fn to_bigint(&self) -> BigInt {
        match self {
            IntVal::Small(v) => BigInt::from(*v),
            IntVal::Big(b) => (*b).clone(),
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            IntVal::Small(v) => *v == 0,
            IntVal::Big(b) => b.is_zero(),
        }
    }
}

/// Views a value as an integer if its type is int-like (`int` or `bool`).
fn int_val(obj: &Object) -> Option<IntVal<'_>> {
    match obj {
        Object::Int(v) => Some(IntVal::Small(*v)),
        Object::Bool(b) => Some(IntVal::Small(i64::from(*b))),
        Object::BigInt(b) => Some(IntVal::Big(b)),
        _ => None,
    }
}

fn zero_division() -> RunError {
    RunError::exc(ExcType::ZeroDivisionError, "integer division or modulo by zero")
}

macro_rules! arith_handler {
    ($name:ident, $checked:ident, $big_op:tt) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
                return Ok(Object::NotImplemented);
            };
            if let (IntVal::Small(x), IntVal::Small(y)) = (&a, &b)
                && let Some(v) = x.$checked(*y)
            {
                return Ok(Object::Int(v));
            }
            // Overflow or big operand: go through the big representation.
            Ok(Object::from_bigint(a.to_bigint() $big_op b.to_bigint()))
        }
    };
}

arith_handler!(int_add, checked_add, +);
arith_handler!(int_sub, checked_sub, -);
arith_handler!(int_mul, checked_mul, *);

macro_rules! reflected_handler {
    ($name:ident, $forward:ident) => {
        fn $name(recv: &Object, other: &Object, ts: &mut ThreadState) -> RunResult<Object> {
            $forward(other, recv, ts)
        }
    };
}

reflected_handler!(int_radd, int_add);
reflected_handler!(int_rsub, int_sub);
reflected_handler!(int_rmul, int_mul);
reflected_handler!(int_rfloordiv, int_floordiv);
reflected_handler!(int_rmod, int_mod);
reflected_handler!(int_rtruediv, int_truediv);
reflected_handler!(int_rpow, int_pow);
reflected_handler!(int_rlshift, int_lshift);
reflected_handler!(int_rrshift, int_rshift);
reflected_handler!(int_rand, int_and);
reflected_handler!(int_ror, int_or);
reflected_handler!(int_rxor, int_xor);

fn int_floordiv(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    if b.is_zero() {
        return Err(zero_division());
    }
    if let (IntVal::Small(x), IntVal::Small(y)) = (&a, &b) {
        // i64::MIN // -1 overflows the small representation.
        if !(*x == i64::MIN && *y == -1) {
            return Ok(Object::Int(Integer::div_floor(x, y)));
        }
    }
    Ok(Object::from_bigint(Integer::div_floor(&a.to_bigint(), &b.to_bigint())))
}

fn int_mod(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    if b.is_zero() {
        return Err(zero_division());
    }
    if let (IntVal::Small(x), IntVal::Small(y)) = (&a, &b)
        && !(*x == i64::MIN && *y == -1)
    {
        return Ok(Object::Int(Integer::mod_floor(x, y)));
    }
    Ok(Object::from_bigint(Integer::mod_floor(&a.to_bigint(), &b.to_bigint())))
}

fn int_truediv(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    if b.is_zero() {
        return Err(RunError::exc(ExcType::ZeroDivisionError, "division by zero"));
    }
    let x = bigint_to_f64(&a.to_bigint())?;
    let y = bigint_to_f64(&b.to_bigint())?;
    Ok(Object::Float(x / y))
}

fn int_pow(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    let exp = b.to_bigint();
    if exp.is_negative() {
        // A negative exponent moves the operation into float territory.
        let base = bigint_to_f64(&a.to_bigint())?;
        let e = exp.to_f64().unwrap_or(f64::NEG_INFINITY);
        if base == 0.0 {
            return Err(RunError::exc(
                ExcType::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Object::Float(base.powf(e)));
    }
    let Some(exp) = exp.to_u32() else {
        return Err(RunError::exc(ExcType::OverflowError, "exponent too large"));
    };
    Ok(Object::from_bigint(num_traits::pow::pow(a.to_bigint(), exp as usize)))
}

fn shift_count(b: &IntVal<'_>) -> RunResult<usize> {
    let count = b.to_bigint();
    if count.is_negative() {
        return Err(RunError::exc(ExcType::ValueError, "negative shift count"));
    }
    count
        .to_usize()
        .ok_or_else(|| RunError::exc(ExcType::OverflowError, "shift count too large"))
}

fn int_lshift(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    let count = shift_count(&b)?;
    if let IntVal::Small(x) = &a
        && count < 64
        && let Some(v) = x.checked_shl(count as u32)
        // checked_shl wraps the count, not the value; verify round trip
        && v >> count == *x
    {
        return Ok(Object::Int(v));
    }
    Ok(Object::from_bigint(a.to_bigint() << count))
}

fn int_rshift(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
        return Ok(Object::NotImplemented);
    };
    let count = shift_count(&b)?;
    match a {
        IntVal::Small(x) => {
            let shift = count.min(63) as u32;
            Ok(Object::Int(x >> shift))
        }
        IntVal::Big(x) => Ok(Object::from_bigint(x.clone() >> count)),
    }
}

macro_rules! bitwise_handler {
    ($name:ident, $op:tt) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
                return Ok(Object::NotImplemented);
            };
            if let (IntVal::Small(x), IntVal::Small(y)) = (&a, &b) {
                return Ok(Object::Int(x $op y));
            }
            Ok(Object::from_bigint(a.to_bigint() $op b.to_bigint()))
        }
    };
}

bitwise_handler!(int_and, &);
bitwise_handler!(int_or, |);
bitwise_handler!(int_xor, ^);

fn int_neg(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(IntVal::Small(x)) => match x.checked_neg() {
            Some(n) => Ok(Object::Int(n)),
            None => Ok(Object::from_bigint(-BigInt::from(x))),
        },
        Some(IntVal::Big(b)) => Ok(Object::from_bigint(-b.clone())),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_pos(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(IntVal::Small(x)) => Ok(Object::Int(x)),
        Some(IntVal::Big(b)) => Ok(Object::BigInt(Rc::new(b.clone()))),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_invert(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(IntVal::Small(x)) => match x.checked_neg().and_then(|n| n.checked_sub(1)) {
            Some(n) => Ok(Object::Int(n)),
            None => Ok(Object::from_bigint(-BigInt::from(x) - 1)),
        },
        Some(IntVal::Big(b)) => Ok(Object::from_bigint(-b.clone() - 1)),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_abs(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(IntVal::Small(x)) => match x.checked_abs() {
            Some(n) => Ok(Object::Int(n)),
            None => Ok(Object::from_bigint(BigInt::from(x).abs())),
        },
        Some(IntVal::Big(b)) => Ok(Object::from_bigint(b.abs())),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_bool(v: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    match int_val(v) {
        Some(val) => Ok(!val.is_zero()),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_hash_small(v: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    match v.as_int() {
        Some(x) => Ok(py_hash::hash_i64(x)),
        None => Err(RunError::internal("small-int hash invoked on non-small operand")),
    }
}

fn int_hash_big(v: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    match v {
        Object::BigInt(b) => Ok(py_hash::hash_bigint(b)),
        _ => Err(RunError::internal("big-int hash invoked on non-big operand")),
    }
}

fn int_repr(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(IntVal::Small(x)) => Ok(Object::str(x.to_string())),
        Some(IntVal::Big(b)) => Ok(Object::str(b.to_string())),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_index(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v {
        Object::Bool(b) => Ok(Object::Int(i64::from(*b))),
        other @ (Object::Int(_) | Object::BigInt(_)) => Ok(other.clone()),
        _ => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

fn int_float(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match int_val(v) {
        Some(val) => Ok(Object::Float(bigint_to_f64(&val.to_bigint())?)),
        None => Err(RunError::internal("int slot invoked on non-int operand")),
    }
}

/// Converts to f64, raising `OverflowError` when the magnitude exceeds what
/// a float can represent.
pub(crate) fn bigint_to_f64(value: &BigInt) -> RunResult<f64> {
    let f = value.to_f64().unwrap_or(f64::INFINITY);
    if f.is_infinite() {
        return Err(RunError::exc(
            ExcType::OverflowError,
            "int too large to convert to float",
        ));
    }
    Ok(f)
}

macro_rules! compare_handler {
    ($name:ident, $ord_ok:expr) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let (Some(a), Some(b)) = (int_val(lhs), int_val(rhs)) else {
                return Ok(Object::NotImplemented);
            };
            let ordering = match (&a, &b) {
                (IntVal::Small(x), IntVal::Small(y)) => x.cmp(y),
                _ => a.to_bigint().cmp(&b.to_bigint()),
            };
            let accepts: fn(std::cmp::Ordering) -> bool = $ord_ok;
            Ok(Object::Bool(accepts(ordering)))
        }
    };
}

compare_handler!(int_eq, |o| o == std::cmp::Ordering::Equal);
compare_handler!(int_ne, |o| o != std::cmp::Ordering::Equal);
compare_handler!(int_lt, |o| o == std::cmp::Ordering::Less);
compare_handler!(int_le, |o| o != std::cmp::Ordering::Greater);
compare_handler!(int_gt, |o| o == std::cmp::Ordering::Greater);
compare_handler!(int_ge, |o| o != std::cmp::Ordering::Less);

/// Exact-pair handler for small + small: never returns `NotImplemented`.
fn int_add_exact(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    int_add(lhs, rhs, ts)
}

fn int_sub_exact(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    int_sub(lhs, rhs, ts)
}

fn int_mul_exact(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    int_mul(lhs, rhs, ts)
}

fn shared_numeric_slots(table: &mut SlotTable) {
    table.set(Slot::Add, SlotImpl::Binary(int_add));
    table.set(Slot::Sub, SlotImpl::Binary(int_sub));
    table.set(Slot::Mul, SlotImpl::Binary(int_mul));
    table.set(Slot::TrueDiv, SlotImpl::Binary(int_truediv));
    table.set(Slot::FloorDiv, SlotImpl::Binary(int_floordiv));
    table.set(Slot::Mod, SlotImpl::Binary(int_mod));
    table.set(Slot::Pow, SlotImpl::Binary(int_pow));
    table.set(Slot::LShift, SlotImpl::Binary(int_lshift));
    table.set(Slot::RShift, SlotImpl::Binary(int_rshift));
    table.set(Slot::And, SlotImpl::Binary(int_and));
    table.set(Slot::Or, SlotImpl::Binary(int_or));
    table.set(Slot::Xor, SlotImpl::Binary(int_xor));
    table.set(Slot::RAdd, SlotImpl::Binary(int_radd));
    table.set(Slot::RSub, SlotImpl::Binary(int_rsub));
    table.set(Slot::RMul, SlotImpl::Binary(int_rmul));
    table.set(Slot::RTrueDiv, SlotImpl::Binary(int_rtruediv));
    table.set(Slot::RFloorDiv, SlotImpl::Binary(int_rfloordiv));
    table.set(Slot::RMod, SlotImpl::Binary(int_rmod));
    table.set(Slot::RPow, SlotImpl::Binary(int_rpow));
    table.set(Slot::RLShift, SlotImpl::Binary(int_rlshift));
    table.set(Slot::RRShift, SlotImpl::Binary(int_rrshift));
    table.set(Slot::RAnd, SlotImpl::Binary(int_rand));
    table.set(Slot::ROr, SlotImpl::Binary(int_ror));
    table.set(Slot::RXor, SlotImpl::Binary(int_rxor));
    table.set(Slot::Neg, SlotImpl::Unary(int_neg));
    table.set(Slot::Pos, SlotImpl::Unary(int_pos));
    table.set(Slot::Invert, SlotImpl::Unary(int_invert));
    table.set(Slot::Abs, SlotImpl::Unary(int_abs));
    table.set(Slot::Bool, SlotImpl::Bool(int_bool));
    table.set(Slot::Index, SlotImpl::Unary(int_index));
    table.set(Slot::Int, SlotImpl::Unary(int_index));
    table.set(Slot::Float, SlotImpl::Unary(int_float));
    table.set(Slot::Eq, SlotImpl::Binary(int_eq));
    table.set(Slot::Ne, SlotImpl::Binary(int_ne));
    table.set(Slot::Lt, SlotImpl::Binary(int_lt));
    table.set(Slot::Le, SlotImpl::Binary(int_le));
    table.set(Slot::Gt, SlotImpl::Binary(int_gt));
    table.set(Slot::Ge, SlotImpl::Binary(int_ge));
}

/// Builds the `int` type. Accepted host classes: `SmallInt` and `BigInt`.
#[must_use]
pub(crate) fn make_int_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    shared_numeric_slots(&mut table);
    // Representation-specialized entries: hash and repr resolve per host
    // class; everything else views operands uniformly.
    table.set_for(Slot::Hash, HostClass::SmallInt, SlotImpl::Hash(int_hash_small));
    table.set_for(Slot::Hash, HostClass::BigInt, SlotImpl::Hash(int_hash_big));
    table.set(Slot::Repr, SlotImpl::Unary(int_repr));
    table.set(Slot::Str, SlotImpl::Unary(int_repr));
    // Small + small pairs can never answer NotImplemented; publish them as
    // exact handles so dispatch skips the reflected protocol.
    table.set_exact(Slot::Add, HostClass::SmallInt, HostClass::SmallInt, int_add_exact);
    table.set_exact(Slot::Sub, HostClass::SmallInt, HostClass::SmallInt, int_sub_exact);
    table.set_exact(Slot::Mul, HostClass::SmallInt, HostClass::SmallInt, int_mul_exact);

    PyType::new_builtin("int", vec![Rc::clone(object)], table, Vec::new(), TypeFlags::default())
}

fn bool_repr(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match v {
        Object::Bool(true) => Ok(Object::str("True")),
        Object::Bool(false) => Ok(Object::str("False")),
        _ => Err(RunError::internal("bool slot invoked on non-bool operand")),
    }
}

/// Builds the `bool` type as a subclass of `int`.
///
/// Arithmetic reuses the integer handlers (so `True + True == 2`); only the
/// textual slots differ.
#[must_use]
pub(crate) fn make_bool_type(int_type: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    shared_numeric_slots(&mut table);
    table.set(Slot::Hash, SlotImpl::Hash(int_hash_small));
    table.set(Slot::Repr, SlotImpl::Unary(bool_repr));
    table.set(Slot::Str, SlotImpl::Unary(bool_repr));

    PyType::new_builtin(
        "bool",
        vec![Rc::clone(int_type)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{interp::Interpreter, vm::ThreadState};

    fn ts() -> ThreadState {
        ThreadState::new(Interpreter::new_rc())
    }

    #[test]
    fn small_add_overflow_promotes() {
        let mut ts = ts();
        let r = int_add(&Object::Int(i64::MAX), &Object::Int(1), &mut ts).unwrap();
        assert!(matches!(r, Object::BigInt(_)));
        // And the symmetric subtraction demotes back to the small repr.
        let back = int_sub(&r, &Object::Int(1), &mut ts).unwrap();
        assert_eq!(back.as_int(), Some(i64::MAX));
    }

    #[test]
    fn floor_division_follows_python() {
        let mut ts = ts();
        let r = int_floordiv(&Object::Int(-7), &Object::Int(2), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(-4));
        let r = int_mod(&Object::Int(-7), &Object::Int(2), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(1));
    }

    #[test]
    fn division_by_zero() {
        let mut ts = ts();
        let err = int_floordiv(&Object::Int(1), &Object::Int(0), &mut ts).unwrap_err();
        assert!(err.is_exception_type(ExcType::ZeroDivisionError));
        let err = int_truediv(&Object::Int(1), &Object::Int(0), &mut ts).unwrap_err();
        assert!(err.is_exception_type(ExcType::ZeroDivisionError));
    }

    #[test]
    fn truediv_yields_float() {
        let mut ts = ts();
        let r = int_truediv(&Object::Int(7), &Object::Int(2), &mut ts).unwrap();
        assert_eq!(r.as_float(), Some(3.5));
    }

    #[test]
    fn non_int_operand_is_not_implemented() {
        let mut ts = ts();
        let r = int_add(&Object::Int(1), &Object::str("x"), &mut ts).unwrap();
        assert!(matches!(r, Object::NotImplemented));
    }

    #[test]
    fn bool_behaves_as_int() {
        let mut ts = ts();
        let r = int_add(&Object::Bool(true), &Object::Bool(true), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(2));
    }

    #[test]
    fn shifts() {
        let mut ts = ts();
        let r = int_lshift(&Object::Int(1), &Object::Int(70), &mut ts).unwrap();
        assert!(matches!(r, Object::BigInt(_)));
        let r = int_rshift(&Object::Int(-8), &Object::Int(1), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(-4));
        let err = int_lshift(&Object::Int(1), &Object::Int(-1), &mut ts).unwrap_err();
        assert!(err.is_exception_type(ExcType::ValueError));
    }

    #[test]
    fn negative_exponent_goes_float() {
        let mut ts = ts();
        let r = int_pow(&Object::Int(2), &Object::Int(-1), &mut ts).unwrap();
        assert_eq!(r.as_float(), Some(0.5));
        let r = int_pow(&Object::Int(2), &Object::Int(10), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(1024));
    }

    #[test]
    fn invert() {
        let mut ts = ts();
        let r = int_invert(&Object::Int(5), &mut ts).unwrap();
        assert_eq!(r.as_int(), Some(-6));
    }
}
