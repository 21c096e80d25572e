//! The `tuple` type.

use std::{cmp::Ordering, rc::Rc};

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    py_hash,
    types::{
        PyType, TypeFlags, TypeRef,
        iter::SeqIter,
        slots::{Slot, SlotImpl, SlotTable},
        str::normalize_index,
    },
    vm::ThreadState,
};

fn expect_tuple(obj: &Object) -> RunResult<&Rc<[Object]>> {
    match obj {
        Object::Tuple(items) => Ok(items),
        _ => Err(RunError::internal("tuple slot invoked on non-tuple operand")),
    }
}

fn tuple_getitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_tuple(obj)?.clone();
    let Some(index) = ts.try_index(key)? else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("tuple indices must be integers or slices, not {}", key.type_name()),
        ));
    };
    let index = normalize_index(index, items.len())
        .ok_or_else(|| RunError::exc(ExcType::IndexError, "tuple index out of range"))?;
    Ok(items[index].clone())
}

fn tuple_len(obj: &Object, _ts: &mut ThreadState) -> RunResult<usize> {
    Ok(expect_tuple(obj)?.len())
}

fn tuple_contains(container: &Object, item: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_tuple(container)?.clone();
    for candidate in items.iter() {
        if ts.py_eq(item, candidate)? {
            return Ok(Object::Bool(true));
        }
    }
    Ok(Object::Bool(false))
}

fn tuple_iter(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(SeqIter::over_tuple(expect_tuple(obj)?.clone()))
}

fn tuple_add(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let a = expect_tuple(lhs)?;
    let Object::Tuple(b) = rhs else {
        return Ok(Object::NotImplemented);
    };
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend(a.iter().cloned());
    out.extend(b.iter().cloned());
    Ok(Object::tuple(out))
}

fn repeat_items(items: &[Object], count: &Object) -> Option<Object> {
    let n = count.as_int()?;
    let n = usize::try_from(n).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Some(Object::tuple(out))
}

fn tuple_mul(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_tuple(lhs)?;
    Ok(repeat_items(items, rhs).unwrap_or(Object::NotImplemented))
}

fn tuple_rmul(recv: &Object, other: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_tuple(recv)?;
    Ok(repeat_items(items, other).unwrap_or(Object::NotImplemented))
}

fn tuple_bool(obj: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    Ok(!expect_tuple(obj)?.is_empty())
}

fn tuple_hash(obj: &Object, ts: &mut ThreadState) -> RunResult<i64> {
    let items = expect_tuple(obj)?.clone();
    let mut lanes = Vec::with_capacity(items.len());
    for item in items.iter() {
        lanes.push(ts.hash_object(item)?);
    }
    Ok(py_hash::hash_tuple_lanes(lanes.into_iter()))
}

fn tuple_repr(obj: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_tuple(obj)?.clone();
    let mut out = String::from("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&ts.repr(item)?);
    }
    if items.len() == 1 {
        out.push(',');
    }
    out.push(')');
    Ok(Object::str(out))
}

/// Compares two element sequences lexicographically with full rich
/// comparison on the elements; shared by tuple and list.
pub(crate) fn compare_sequences(a: &[Object], b: &[Object], ts: &mut ThreadState) -> RunResult<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !ts.py_eq(x, y)? {
            return if ts.py_lt(x, y)? {
                Ok(Ordering::Less)
            } else {
                Ok(Ordering::Greater)
            };
        }
    }
    Ok(a.len().cmp(&b.len()))
}

macro_rules! tuple_compare {
    ($name:ident, $accepts:expr) => {
        fn $name(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
            let a = expect_tuple(lhs)?.clone();
            let Object::Tuple(b) = rhs else {
                return Ok(Object::NotImplemented);
            };
            let b = b.clone();
            let ordering = compare_sequences(&a, &b, ts)?;
            let accepts: fn(Ordering) -> bool = $accepts;
            Ok(Object::Bool(accepts(ordering)))
        }
    };
}

tuple_compare!(tuple_eq, |o| o == Ordering::Equal);
tuple_compare!(tuple_ne, |o| o != Ordering::Equal);
tuple_compare!(tuple_lt, |o| o == Ordering::Less);
tuple_compare!(tuple_le, |o| o != Ordering::Greater);
tuple_compare!(tuple_gt, |o| o == Ordering::Greater);
tuple_compare!(tuple_ge, |o| o != Ordering::Less);

/// Builds the `tuple` type.
#[must_use]
pub(crate) fn make_tuple_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::GetItem, SlotImpl::Binary(tuple_getitem));
    table.set(Slot::Len, SlotImpl::Len(tuple_len));
    table.set(Slot::Contains, SlotImpl::Binary(tuple_contains));
    table.set(Slot::Iter, SlotImpl::Unary(tuple_iter));
    table.set(Slot::Add, SlotImpl::Binary(tuple_add));
    table.set(Slot::Mul, SlotImpl::Binary(tuple_mul));
    table.set(Slot::RMul, SlotImpl::Binary(tuple_rmul));
    table.set(Slot::Bool, SlotImpl::Bool(tuple_bool));
    table.set(Slot::Hash, SlotImpl::Hash(tuple_hash));
    table.set(Slot::Repr, SlotImpl::Unary(tuple_repr));
    table.set(Slot::Str, SlotImpl::Unary(tuple_repr));
    table.set(Slot::Eq, SlotImpl::Binary(tuple_eq));
    table.set(Slot::Ne, SlotImpl::Binary(tuple_ne));
    table.set(Slot::Lt, SlotImpl::Binary(tuple_lt));
    table.set(Slot::Le, SlotImpl::Binary(tuple_le));
    table.set(Slot::Gt, SlotImpl::Binary(tuple_gt));
    table.set(Slot::Ge, SlotImpl::Binary(tuple_ge));

    PyType::new_builtin("tuple", vec![Rc::clone(object)], table, Vec::new(), TypeFlags::default())
}
