//! The `str` type: slots plus the method descriptors the call protocol
//! exercises.
//!
//! Indexing and `find` work in characters, not bytes, to match Python
//! semantics on non-ASCII text.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    py_hash,
    types::{
        MethodDescr, PyType, TypeAttr, TypeFlags, TypeRef,
        iter::SeqIter,
        slots::{Slot, SlotImpl, SlotTable},
    },
    vm::{
        ThreadState,
        call::{CallArgs, NativeFunction},
    },
};

fn expect_str(obj: &Object) -> RunResult<&str> {
    obj.as_str()
        .ok_or_else(|| RunError::internal("str slot invoked on non-str operand"))
}

fn str_add(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let a = expect_str(lhs)?;
    let Some(b) = rhs.as_str() else {
        return Ok(Object::NotImplemented);
    };
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    Ok(Object::str(out))
}

fn repeat_str(s: &str, count: &Object) -> Option<Object> {
    let n = count.as_int()?;
    let n = usize::try_from(n).unwrap_or(0);
    Some(Object::str(s.repeat(n)))
}

fn str_mul(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let s = expect_str(lhs)?;
    Ok(repeat_str(s, rhs).unwrap_or(Object::NotImplemented))
}

fn str_rmul(recv: &Object, other: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let s = expect_str(recv)?;
    Ok(repeat_str(s, other).unwrap_or(Object::NotImplemented))
}

fn str_contains(container: &Object, item: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    let haystack = expect_str(container)?;
    let Some(needle) = item.as_str() else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!(
                "'in <string>' requires string as left operand, not {}",
                item.type_name()
            ),
        ));
    };
    Ok(Object::Bool(haystack.contains(needle)))
}

fn str_getitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let s = expect_str(obj)?.to_owned();
    let Some(index) = ts.try_index(key)? else {
        return Err(RunError::exc(ExcType::TypeError, "string indices must be integers"));
    };
    let len = s.chars().count();
    let index = normalize_index(index, len)
        .ok_or_else(|| RunError::exc(ExcType::IndexError, "string index out of range"))?;
    let ch = s
        .chars()
        .nth(index)
        .ok_or_else(|| RunError::internal("char index vanished after bounds check"))?;
    Ok(Object::str(ch.to_string()))
}

/// Maps a possibly negative index into `0..len`, or `None` when out of range.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let adjusted = if index < 0 { index + len } else { index };
    if (0..len).contains(&adjusted) {
        usize::try_from(adjusted).ok()
    } else {
        None
    }
}

fn str_len(obj: &Object, _ts: &mut ThreadState) -> RunResult<usize> {
    Ok(expect_str(obj)?.chars().count())
}

fn str_hash(obj: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    Ok(py_hash::hash_str(expect_str(obj)?))
}

fn str_bool(obj: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    Ok(!expect_str(obj)?.is_empty())
}

fn str_iter(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Str(s) => Ok(SeqIter::over_str(Rc::clone(s))),
        _ => Err(RunError::internal("str slot invoked on non-str operand")),
    }
}

fn str_str(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(obj.clone())
}

fn str_repr_slot(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(Object::str(str_repr(expect_str(obj)?)))
}

/// Quotes a string the way Python's `repr` does: single quotes unless the
/// content contains one (and no double quote), with control characters
/// escaped.
#[must_use]
pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

macro_rules! str_compare {
    ($name:ident, $op:tt) => {
        fn $name(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
            let a = expect_str(lhs)?;
            let Some(b) = rhs.as_str() else {
                return Ok(Object::NotImplemented);
            };
            Ok(Object::Bool(a $op b))
        }
    };
}

str_compare!(str_eq, ==);
str_compare!(str_ne, !=);
str_compare!(str_lt, <);
str_compare!(str_le, <=);
str_compare!(str_gt, >);
str_compare!(str_ge, >=);

// --- method descriptors ---

fn str_upper(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("upper")?;
    let [recv] = args.exact("upper")?;
    let s = recv
        .as_str()
        .ok_or_else(|| RunError::internal("str.upper called without a str receiver"))?;
    Ok(Object::str(s.to_uppercase()))
}

fn str_lower(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("lower")?;
    let [recv] = args.exact("lower")?;
    let s = recv
        .as_str()
        .ok_or_else(|| RunError::internal("str.lower called without a str receiver"))?;
    Ok(Object::str(s.to_lowercase()))
}

fn str_strip(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("strip")?;
    let items = args.between("strip", 1, 2)?;
    let s = method_receiver_owned(&items, "strip")?;
    match items.get(1) {
        None | Some(Object::None) => Ok(Object::str(s.trim())),
        Some(chars) => {
            let Some(set) = chars.as_str() else {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!("strip arg must be None or str, not {}", chars.type_name()),
                ));
            };
            let set: Vec<char> = set.chars().collect();
            Ok(Object::str(s.trim_matches(|c| set.contains(&c))))
        }
    }
}

fn method_receiver_owned<'a>(items: &'a [Object], name: &str) -> RunResult<&'a str> {
    items
        .first()
        .and_then(Object::as_str)
        .ok_or_else(|| RunError::internal(format!("str.{name} called without a str receiver")))
}

fn str_split(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("split")?;
    let items = args.between("split", 1, 2)?;
    let s = method_receiver_owned(&items, "split")?;
    let parts: Vec<Object> = match items.get(1) {
        None | Some(Object::None) => s.split_whitespace().map(Object::str).collect(),
        Some(sep) => {
            let Some(sep) = sep.as_str() else {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!("must be str or None, not {}", sep.type_name()),
                ));
            };
            if sep.is_empty() {
                return Err(RunError::exc(ExcType::ValueError, "empty separator"));
            }
            s.split(sep).map(Object::str).collect()
        }
    };
    Ok(Object::list(parts))
}

fn str_join(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("join")?;
    let [recv, iterable] = args.exact("join")?;
    let sep = recv
        .as_str()
        .ok_or_else(|| RunError::internal("str.join called without a str receiver"))?;
    let items = ts.collect_iterable(&iterable)?;
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let Some(part) = item.as_str() else {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!("sequence item {i}: expected str instance, {} found", item.type_name()),
            ));
        };
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(part);
    }
    Ok(Object::str(out))
}

fn prefix_arg(items: &[Object], name: &str) -> RunResult<Rc<str>> {
    match items.get(1) {
        Some(Object::Str(s)) => Ok(Rc::clone(s)),
        Some(other) => Err(RunError::exc(
            ExcType::TypeError,
            format!("{name} first arg must be str, not {}", other.type_name()),
        )),
        None => Err(RunError::internal(format!("str.{name} missing its argument"))),
    }
}

fn str_startswith(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("startswith")?;
    let items = args.between("startswith", 2, 2)?;
    let s = method_receiver_owned(&items, "startswith")?;
    let prefix = prefix_arg(&items, "startswith")?;
    Ok(Object::Bool(s.starts_with(&*prefix)))
}

fn str_endswith(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("endswith")?;
    let items = args.between("endswith", 2, 2)?;
    let s = method_receiver_owned(&items, "endswith")?;
    let suffix = prefix_arg(&items, "endswith")?;
    Ok(Object::Bool(s.ends_with(&*suffix)))
}

fn str_find(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("find")?;
    let items = args.between("find", 2, 2)?;
    let s = method_receiver_owned(&items, "find")?;
    let needle = prefix_arg(&items, "find")?;
    match s.find(&*needle) {
        // Python reports the index in characters.
        Some(byte_idx) => Ok(Object::Int(s[..byte_idx].chars().count() as i64)),
        None => Ok(Object::Int(-1)),
    }
}

fn str_replace(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("replace")?;
    let items = args.between("replace", 3, 3)?;
    let s = method_receiver_owned(&items, "replace")?;
    let (Some(old), Some(new)) = (items[1].as_str(), items[2].as_str()) else {
        return Err(RunError::exc(
            ExcType::TypeError,
            "replace() argument must be str",
        ));
    };
    Ok(Object::str(s.replace(old, new)))
}

fn method(name: &str, f: crate::vm::call::NativeFn) -> (Rc<str>, TypeAttr) {
    let name: Rc<str> = Rc::from(name);
    let func = Object::Native(NativeFunction::new(Rc::clone(&name), f));
    (Rc::clone(&name), TypeAttr::Method(MethodDescr::new(name, func)))
}

/// Builds the `str` type.
#[must_use]
pub(crate) fn make_str_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Add, SlotImpl::Binary(str_add));
    table.set(Slot::Mul, SlotImpl::Binary(str_mul));
    table.set(Slot::RMul, SlotImpl::Binary(str_rmul));
    table.set(Slot::Contains, SlotImpl::Binary(str_contains));
    table.set(Slot::GetItem, SlotImpl::Binary(str_getitem));
    table.set(Slot::Len, SlotImpl::Len(str_len));
    table.set(Slot::Hash, SlotImpl::Hash(str_hash));
    table.set(Slot::Bool, SlotImpl::Bool(str_bool));
    table.set(Slot::Iter, SlotImpl::Unary(str_iter));
    table.set(Slot::Str, SlotImpl::Unary(str_str));
    table.set(Slot::Repr, SlotImpl::Unary(str_repr_slot));
    table.set(Slot::Eq, SlotImpl::Binary(str_eq));
    table.set(Slot::Ne, SlotImpl::Binary(str_ne));
    table.set(Slot::Lt, SlotImpl::Binary(str_lt));
    table.set(Slot::Le, SlotImpl::Binary(str_le));
    table.set(Slot::Gt, SlotImpl::Binary(str_gt));
    table.set(Slot::Ge, SlotImpl::Binary(str_ge));

    let attrs = vec![
        method("upper", str_upper),
        method("lower", str_lower),
        method("strip", str_strip),
        method("split", str_split),
        method("join", str_join),
        method("startswith", str_startswith),
        method("endswith", str_endswith),
        method("find", str_find),
        method("replace", str_replace),
    ];

    PyType::new_builtin("str", vec![Rc::clone(object)], table, attrs, TypeFlags::default())
}
