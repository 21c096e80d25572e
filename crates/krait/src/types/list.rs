//! The `list` type: slots, in-place operators, and method descriptors.

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    types::{
        MethodDescr, PyType, TypeAttr, TypeFlags, TypeRef,
        iter::SeqIter,
        slots::{Slot, SlotImpl, SlotTable},
        str::normalize_index,
        tuple::compare_sequences,
    },
    vm::{
        ThreadState,
        call::{CallArgs, NativeFunction},
    },
};

fn expect_list(obj: &Object) -> RunResult<&Rc<RefCell<Vec<Object>>>> {
    match obj {
        Object::List(items) => Ok(items),
        _ => Err(RunError::internal("list slot invoked on non-list operand")),
    }
}

fn list_getitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(obj)?.clone();
    let Some(index) = ts.try_index(key)? else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("list indices must be integers or slices, not {}", key.type_name()),
        ));
    };
    let items = items.borrow();
    let index = normalize_index(index, items.len())
        .ok_or_else(|| RunError::exc(ExcType::IndexError, "list index out of range"))?;
    Ok(items[index].clone())
}

fn list_setitem(obj: &Object, key: &Object, value: Object, ts: &mut ThreadState) -> RunResult<()> {
    let items = expect_list(obj)?.clone();
    let Some(index) = ts.try_index(key)? else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("list indices must be integers or slices, not {}", key.type_name()),
        ));
    };
    let mut items = items.borrow_mut();
    let len = items.len();
    let index = normalize_index(index, len)
        .ok_or_else(|| RunError::exc(ExcType::IndexError, "list assignment index out of range"))?;
    items[index] = value;
    Ok(())
}

fn list_delitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<()> {
    let items = expect_list(obj)?.clone();
    let Some(index) = ts.try_index(key)? else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("list indices must be integers or slices, not {}", key.type_name()),
        ));
    };
    let mut items = items.borrow_mut();
    let len = items.len();
    let index = normalize_index(index, len)
        .ok_or_else(|| RunError::exc(ExcType::IndexError, "list assignment index out of range"))?;
    items.remove(index);
    Ok(())
}

fn list_len(obj: &Object, _ts: &mut ThreadState) -> RunResult<usize> {
    Ok(expect_list(obj)?.borrow().len())
}

fn list_contains(container: &Object, item: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(container)?.clone();
    let len = items.borrow().len();
    for i in 0..len {
        // Re-read each element: equality checks can run user code that
        // mutates the list.
        let candidate = match items.borrow().get(i) {
            Some(c) => c.clone(),
            None => break,
        };
        if ts.py_eq(item, &candidate)? {
            return Ok(Object::Bool(true));
        }
    }
    Ok(Object::Bool(false))
}

fn list_iter(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(SeqIter::over_list(expect_list(obj)?.clone()))
}

fn list_add(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let a = expect_list(lhs)?;
    let Object::List(b) = rhs else {
        return Ok(Object::NotImplemented);
    };
    let mut out = a.borrow().clone();
    out.extend(b.borrow().iter().cloned());
    Ok(Object::list(out))
}

fn list_iadd(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let a = expect_list(lhs)?;
    // `list += iterable` extends in place and accepts any iterable.
    let extra = ts.collect_iterable(rhs)?;
    a.borrow_mut().extend(extra);
    Ok(lhs.clone())
}

fn repeat_list(items: &[Object], count: &Object) -> Option<Vec<Object>> {
    let n = count.as_int()?;
    let n = usize::try_from(n).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Some(out)
}

fn list_mul(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(lhs)?.borrow();
    Ok(repeat_list(&items, rhs).map_or(Object::NotImplemented, Object::list))
}

fn list_rmul(recv: &Object, other: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(recv)?.borrow();
    Ok(repeat_list(&items, other).map_or(Object::NotImplemented, Object::list))
}

fn list_imul(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(lhs)?;
    let repeated = {
        let borrowed = items.borrow();
        repeat_list(&borrowed, rhs)
    };
    match repeated {
        Some(new_items) => {
            *items.borrow_mut() = new_items;
            Ok(lhs.clone())
        }
        None => Ok(Object::NotImplemented),
    }
}

fn list_bool(obj: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    Ok(!expect_list(obj)?.borrow().is_empty())
}

fn list_repr(obj: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_list(obj)?.clone();
    let len = items.borrow().len();
    let mut out = String::from("[");
    for i in 0..len {
        let item = match items.borrow().get(i) {
            Some(item) => item.clone(),
            None => break,
        };
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&ts.repr(&item)?);
    }
    out.push(']');
    Ok(Object::str(out))
}

macro_rules! list_compare {
    ($name:ident, $accepts:expr) => {
        fn $name(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
            let a = expect_list(lhs)?.borrow().clone();
            let Object::List(b) = rhs else {
                return Ok(Object::NotImplemented);
            };
            let b = b.borrow().clone();
            let ordering = compare_sequences(&a, &b, ts)?;
            let accepts: fn(Ordering) -> bool = $accepts;
            Ok(Object::Bool(accepts(ordering)))
        }
    };
}

list_compare!(list_eq, |o| o == Ordering::Equal);
list_compare!(list_ne, |o| o != Ordering::Equal);
list_compare!(list_lt, |o| o == Ordering::Less);
list_compare!(list_le, |o| o != Ordering::Greater);
list_compare!(list_gt, |o| o == Ordering::Greater);
list_compare!(list_ge, |o| o != Ordering::Less);

// --- method descriptors ---

fn receiver_list(items: &[Object], name: &str) -> RunResult<Rc<RefCell<Vec<Object>>>> {
    match items.first() {
        Some(Object::List(list)) => Ok(Rc::clone(list)),
        _ => Err(RunError::internal(format!("list.{name} called without a list receiver"))),
    }
}

fn list_append(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("append")?;
    let [recv, item] = args.exact("append")?;
    let list = receiver_list(std::slice::from_ref(&recv), "append")?;
    list.borrow_mut().push(item);
    Ok(Object::None)
}

fn list_extend(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("extend")?;
    let [recv, iterable] = args.exact("extend")?;
    let list = receiver_list(std::slice::from_ref(&recv), "extend")?;
    let extra = ts.collect_iterable(&iterable)?;
    list.borrow_mut().extend(extra);
    Ok(Object::None)
}

fn list_pop(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("pop")?;
    let items = args.between("pop", 1, 2)?;
    let list = receiver_list(&items, "pop")?;
    let mut list = list.borrow_mut();
    if list.is_empty() {
        return Err(RunError::exc(ExcType::IndexError, "pop from empty list"));
    }
    let len = list.len();
    let index = match items.get(1) {
        None => len - 1,
        Some(idx) => {
            let Some(idx) = idx.as_int() else {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!("'{}' object cannot be interpreted as an integer", idx.type_name()),
                ));
            };
            normalize_index(idx, len).ok_or_else(|| RunError::exc(ExcType::IndexError, "pop index out of range"))?
        }
    };
    Ok(list.remove(index))
}

fn list_insert(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("insert")?;
    let [recv, index, item] = args.exact("insert")?;
    let list = receiver_list(std::slice::from_ref(&recv), "insert")?;
    let Some(index) = index.as_int() else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("'{}' object cannot be interpreted as an integer", index.type_name()),
        ));
    };
    let mut list = list.borrow_mut();
    let len = list.len() as i64;
    // insert clamps rather than raising, matching Python.
    let position = if index < 0 {
        (index + len).max(0)
    } else {
        index.min(len)
    } as usize;
    list.insert(position, item);
    Ok(Object::None)
}

fn list_count(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("count")?;
    let [recv, item] = args.exact("count")?;
    let list = receiver_list(std::slice::from_ref(&recv), "count")?;
    let len = list.borrow().len();
    let mut count = 0i64;
    for i in 0..len {
        let candidate = match list.borrow().get(i) {
            Some(c) => c.clone(),
            None => break,
        };
        if ts.py_eq(&item, &candidate)? {
            count += 1;
        }
    }
    Ok(Object::Int(count))
}

fn list_index(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("index")?;
    let [recv, item] = args.exact("index")?;
    let list = receiver_list(std::slice::from_ref(&recv), "index")?;
    let len = list.borrow().len();
    for i in 0..len {
        let candidate = match list.borrow().get(i) {
            Some(c) => c.clone(),
            None => break,
        };
        if ts.py_eq(&item, &candidate)? {
            return Ok(Object::Int(i as i64));
        }
    }
    Err(RunError::exc(
        ExcType::ValueError,
        format!("{} is not in list", ts.repr(&item)?),
    ))
}

fn method(name: &str, f: crate::vm::call::NativeFn) -> (Rc<str>, TypeAttr) {
    let name: Rc<str> = Rc::from(name);
    let func = Object::Native(NativeFunction::new(Rc::clone(&name), f));
    (Rc::clone(&name), TypeAttr::Method(MethodDescr::new(name, func)))
}

/// Builds the `list` type.
#[must_use]
pub(crate) fn make_list_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::GetItem, SlotImpl::Binary(list_getitem));
    table.set(Slot::SetItem, SlotImpl::SetItem(list_setitem));
    table.set(Slot::DelItem, SlotImpl::DelItem(list_delitem));
    table.set(Slot::Len, SlotImpl::Len(list_len));
    table.set(Slot::Contains, SlotImpl::Binary(list_contains));
    table.set(Slot::Iter, SlotImpl::Unary(list_iter));
    table.set(Slot::Add, SlotImpl::Binary(list_add));
    table.set(Slot::IAdd, SlotImpl::Binary(list_iadd));
    table.set(Slot::Mul, SlotImpl::Binary(list_mul));
    table.set(Slot::RMul, SlotImpl::Binary(list_rmul));
    table.set(Slot::IMul, SlotImpl::Binary(list_imul));
    table.set(Slot::Bool, SlotImpl::Bool(list_bool));
    table.set(Slot::Repr, SlotImpl::Unary(list_repr));
    table.set(Slot::Str, SlotImpl::Unary(list_repr));
    table.set(Slot::Eq, SlotImpl::Binary(list_eq));
    table.set(Slot::Ne, SlotImpl::Binary(list_ne));
    table.set(Slot::Lt, SlotImpl::Binary(list_lt));
    table.set(Slot::Le, SlotImpl::Binary(list_le));
    table.set(Slot::Gt, SlotImpl::Binary(list_gt));
    table.set(Slot::Ge, SlotImpl::Binary(list_ge));

    let attrs = vec![
        method("append", list_append),
        method("extend", list_extend),
        method("pop", list_pop),
        method("insert", list_insert),
        method("count", list_count),
        method("index", list_index),
    ];

    PyType::new_builtin("list", vec![Rc::clone(object)], table, attrs, TypeFlags::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;

    fn ts() -> ThreadState {
        ThreadState::new(Interpreter::new_rc())
    }

    #[test]
    fn item_access() {
        let mut ts = ts();
        let l = Object::list(vec![Object::Int(1), Object::Int(2)]);
        assert_eq!(list_getitem(&l, &Object::Int(-1), &mut ts).unwrap().as_int(), Some(2));
        list_setitem(&l, &Object::Int(0), Object::Int(9), &mut ts).unwrap();
        assert_eq!(list_getitem(&l, &Object::Int(0), &mut ts).unwrap().as_int(), Some(9));
        list_delitem(&l, &Object::Int(0), &mut ts).unwrap();
        assert_eq!(list_len(&l, &mut ts).unwrap(), 1);
        let err = list_setitem(&l, &Object::Int(5), Object::None, &mut ts).unwrap_err();
        assert!(err.is_exception_type(ExcType::IndexError));
    }

    #[test]
    fn iadd_mutates_in_place() {
        let mut ts = ts();
        let l = Object::list(vec![Object::Int(1)]);
        let result = list_iadd(&l, &Object::tuple(vec![Object::Int(2)]), &mut ts).unwrap();
        assert!(result.is(&l));
        assert_eq!(list_len(&l, &mut ts).unwrap(), 2);
    }

    #[test]
    fn append_and_pop() {
        let mut ts = ts();
        let l = Object::list(vec![]);
        list_append(&mut ts, CallArgs::positional(vec![l.clone(), Object::Int(5)])).unwrap();
        let popped = list_pop(&mut ts, CallArgs::positional(vec![l.clone()])).unwrap();
        assert_eq!(popped.as_int(), Some(5));
        let err = list_pop(&mut ts, CallArgs::positional(vec![l])).unwrap_err();
        assert!(err.is_exception_type(ExcType::IndexError));
    }

    #[test]
    fn insert_clamps() {
        let mut ts = ts();
        let l = Object::list(vec![Object::Int(1)]);
        list_insert(
            &mut ts,
            CallArgs::positional(vec![l.clone(), Object::Int(100), Object::Int(2)]),
        )
        .unwrap();
        list_insert(
            &mut ts,
            CallArgs::positional(vec![l.clone(), Object::Int(-100), Object::Int(0)]),
        )
        .unwrap();
        let items = expect_list(&l).unwrap().borrow().clone();
        let values: Vec<Option<i64>> = items.iter().map(Object::as_int).collect();
        assert_eq!(values, vec![Some(0), Some(1), Some(2)]);
    }
}
