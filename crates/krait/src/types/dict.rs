//! The `dict` type.
//!
//! Uses a `hashbrown::HashTable<usize>` for hash lookups combined with a
//! dense `Vec<DictEntry>` that preserves insertion order (Python 3.7+
//! behavior). The hash table maps entry hashes to indices into the entries
//! vector.
//!
//! Hashes are computed by the caller (through the `hash` slot, which may run
//! user code); probing equality uses [`py_key_eq`], which covers the
//! hashable builtins by value and everything else by identity.

use std::rc::Rc;

use hashbrown::HashTable;

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

#[derive(Debug)]
struct DictEntry {
    key: Object,
    value: Object,
    /// Kept alongside the pair; the table needs it when re-inserting
    /// entries after a removal.
    hash: u64,
}

/// An insertion-ordered mapping keyed by Python equality.
#[derive(Debug, Default)]
pub struct Dict {
    indices: HashTable<usize>,
    entries: Vec<DictEntry>,
}

/// Equality used for dict-key probing.
///
/// Numeric values compare across representations (`1 == 1.0 == True`),
/// strings by content, tuples element-wise; everything else falls back to
/// identity. Matching [`crate::py_hash`] guarantees the hash/eq contract.
#[must_use]
pub(crate) fn py_key_eq(a: &Object, b: &Object) -> bool {
    fn numeric_view(obj: &Object) -> Option<f64> {
        // Exact comparison on the f64 axis is fine here: keys equal under
        // Python also land on the same f64 or the same BigInt branch below.
        match obj {
            Object::Int(v) => Some(*v as f64),
            Object::Bool(v) => Some(f64::from(*v)),
            Object::Float(v) => Some(*v),
            _ => None,
        }
    }

    match (a, b) {
        (Object::BigInt(x), Object::BigInt(y)) => x == y,
        (Object::Str(x), Object::Str(y)) => x == y,
        (Object::Tuple(x), Object::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(i, j)| py_key_eq(i, j))
        }
        _ => match (numeric_view(a), numeric_view(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a.is(b),
        },
    }
}

impl Dict {
    /// Creates an empty dict.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dict is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_index(&self, key: &Object, hash: u64) -> Option<usize> {
        self.indices
            .find(hash, |&idx| {
                self.entries[idx].hash == hash && py_key_eq(&self.entries[idx].key, key)
            })
            .copied()
    }

    /// Inserts or replaces, preserving insertion order on replacement.
    pub fn insert(&mut self, key: Object, hash: u64, value: Object) {
        if let Some(index) = self.find_index(&key, hash) {
            self.entries[index].value = value;
            return;
        }
        let index = self.entries.len();
        self.entries.push(DictEntry { key, value, hash });
        self.indices.insert_unique(hash, index, |&idx| self.entries[idx].hash);
    }

    /// Looks a key up.
    #[must_use]
    pub fn get(&self, key: &Object, hash: u64) -> Option<Object> {
        self.find_index(key, hash).map(|idx| self.entries[idx].value.clone())
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains(&self, key: &Object, hash: u64) -> bool {
        self.find_index(key, hash).is_some()
    }

    /// Removes a key, returning its value.
    ///
    /// Later entries shift down to preserve insertion order, so the index
    /// table is rebuilt.
    pub fn remove(&mut self, key: &Object, hash: u64) -> Option<Object> {
        let index = self.find_index(key, hash)?;
        let entry = self.entries.remove(index);
        self.rebuild_indices();
        Some(entry.value)
    }

    fn rebuild_indices(&mut self) {
        self.indices.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.indices.insert_unique(entry.hash, idx, |&i| self.entries[i].hash);
        }
    }

    /// Convenience access for string keys (globals, builtins, kwargs).
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Object> {
        let hash = py_hash::hash_str(key) as u64;
        self.indices
            .find(hash, |&idx| {
                self.entries[idx].hash == hash && self.entries[idx].key.as_str() == Some(key)
            })
            .map(|&idx| self.entries[idx].value.clone())
    }

    /// Convenience insertion for string keys.
    pub fn insert_str(&mut self, key: &str, value: Object) {
        let hash = py_hash::hash_str(key) as u64;
        self.insert(Object::str(key), hash, value);
    }

    /// Convenience removal for string keys.
    pub fn remove_str(&mut self, key: &str) -> Option<Object> {
        let hash = py_hash::hash_str(key) as u64;
        self.remove(&Object::str(key), hash)
    }

    /// The keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Object> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// The values in insertion order.
    #[must_use]
    pub fn values(&self) -> Vec<Object> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    /// The `(key, value)` pairs in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<(Object, Object)> {
        self.entries.iter().map(|e| (e.key.clone(), e.value.clone())).collect()
    }

    /// The `(key, hash, value)` triples in insertion order, for merging.
    #[must_use]
    pub(crate) fn raw_items(&self) -> Vec<(Object, u64, Object)> {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.hash, e.value.clone()))
            .collect()
    }
}

fn expect_dict(obj: &Object) -> RunResult<&Rc<std::cell::RefCell<Dict>>> {
    match obj {
        Object::Dict(map) => Ok(map),
        _ => Err(RunError::internal("dict slot invoked on non-dict operand")),
    }
}

fn key_error(ts: &mut ThreadState, key: &Object) -> RunError {
    let rendered = ts.repr(key).unwrap_or_else(|_| Rc::from("<unreprable key>"));
    RunError::exc(ExcType::KeyError, rendered.to_string())
}

fn dict_getitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let map = expect_dict(obj)?.clone();
    let hash = ts.hash_object(key)? as u64;
    match map.borrow().get(key, hash) {
        Some(value) => Ok(value),
        None => Err(key_error(ts, key)),
    }
}

fn dict_setitem(obj: &Object, key: &Object, value: Object, ts: &mut ThreadState) -> RunResult<()> {
    let map = expect_dict(obj)?.clone();
    let hash = ts.hash_object(key)? as u64;
    map.borrow_mut().insert(key.clone(), hash, value);
    Ok(())
}

fn dict_delitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<()> {
    let map = expect_dict(obj)?.clone();
    let hash = ts.hash_object(key)? as u64;
    match map.borrow_mut().remove(key, hash) {
        Some(_) => Ok(()),
        None => Err(key_error(ts, key)),
    }
}

fn dict_len(obj: &Object, _ts: &mut ThreadState) -> RunResult<usize> {
    Ok(expect_dict(obj)?.borrow().len())
}

fn dict_contains(container: &Object, item: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let map = expect_dict(container)?.clone();
    let hash = ts.hash_object(item)? as u64;
    let present = map.borrow().contains(item, hash);
    Ok(Object::Bool(present))
}

fn dict_iter(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    // Iterating a dict yields its keys; iteration walks a snapshot taken
    // here, so mutating the dict inside the loop cannot skew indices.
    Ok(SeqIter::over_items(expect_dict(obj)?.borrow().keys()))
}

fn dict_bool(obj: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    Ok(!expect_dict(obj)?.borrow().is_empty())
}

fn dict_repr(obj: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    let items = expect_dict(obj)?.borrow().items();
    let mut out = String::from("{");
    for (i, (key, value)) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&ts.repr(key)?);
        out.push_str(": ");
        out.push_str(&ts.repr(value)?);
    }
    out.push('}');
    Ok(Object::str(out))
}

fn dict_eq_impl(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Option<bool>> {
    let a = expect_dict(lhs)?.clone();
    let Object::Dict(b) = rhs else {
        return Ok(None);
    };
    if a.borrow().len() != b.borrow().len() {
        return Ok(Some(false));
    }
    let items = a.borrow().raw_items();
    for (key, hash, value) in items {
        let Some(other_value) = b.borrow().get(&key, hash) else {
            return Ok(Some(false));
        };
        if !ts.py_eq(&value, &other_value)? {
            return Ok(Some(false));
        }
    }
    Ok(Some(true))
}

fn dict_eq(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    Ok(dict_eq_impl(lhs, rhs, ts)?.map_or(Object::NotImplemented, Object::Bool))
}

fn dict_ne(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
    Ok(dict_eq_impl(lhs, rhs, ts)?.map_or(Object::NotImplemented, |eq| Object::Bool(!eq)))
}

// --- method descriptors ---

fn receiver_dict(items: &[Object], name: &str) -> RunResult<Rc<std::cell::RefCell<Dict>>> {
    match items.first() {
        Some(Object::Dict(map)) => Ok(Rc::clone(map)),
        _ => Err(RunError::internal(format!("dict.{name} called without a dict receiver"))),
    }
}

fn dict_get(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("get")?;
    let items = args.between("get", 2, 3)?;
    let map = receiver_dict(&items, "get")?;
    let key = &items[1];
    let hash = ts.hash_object(key)? as u64;
    let found = map.borrow().get(key, hash);
    Ok(found.unwrap_or_else(|| items.get(2).cloned().unwrap_or(Object::None)))
}

fn dict_keys(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("keys")?;
    let [recv] = args.exact("keys")?;
    let map = receiver_dict(std::slice::from_ref(&recv), "keys")?;
    let keys = map.borrow().keys();
    Ok(Object::list(keys))
}

fn dict_values(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("values")?;
    let [recv] = args.exact("values")?;
    let map = receiver_dict(std::slice::from_ref(&recv), "values")?;
    let values = map.borrow().values();
    Ok(Object::list(values))
}

fn dict_items(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("items")?;
    let [recv] = args.exact("items")?;
    let map = receiver_dict(std::slice::from_ref(&recv), "items")?;
    let items = map.borrow().items();
    Ok(Object::list(
        items
            .into_iter()
            .map(|(k, v)| Object::tuple(vec![k, v]))
            .collect(),
    ))
}

fn dict_pop(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("pop")?;
    let items = args.between("pop", 2, 3)?;
    let map = receiver_dict(&items, "pop")?;
    let key = &items[1];
    let hash = ts.hash_object(key)? as u64;
    let removed = map.borrow_mut().remove(key, hash);
    match removed {
        Some(value) => Ok(value),
        None => match items.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(key_error(ts, key)),
        },
    }
}

fn dict_update(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("update")?;
    let [recv, other] = args.exact("update")?;
    let map = receiver_dict(std::slice::from_ref(&recv), "update")?;
    let Object::Dict(other) = &other else {
        return Err(RunError::exc(
            ExcType::TypeError,
            format!("'{}' object is not a mapping", other.type_name()),
        ));
    };
    let incoming = other.borrow().raw_items();
    let mut map = map.borrow_mut();
    for (key, hash, value) in incoming {
        map.insert(key, hash, value);
    }
    Ok(Object::None)
}

fn method(name: &str, f: crate::vm::call::NativeFn) -> (Rc<str>, TypeAttr) {
    let name: Rc<str> = Rc::from(name);
    let func = Object::Native(NativeFunction::new(Rc::clone(&name), f));
    (Rc::clone(&name), TypeAttr::Method(MethodDescr::new(name, func)))
}

/// Builds the `dict` type.
#[must_use]
pub(crate) fn make_dict_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::GetItem, SlotImpl::Binary(dict_getitem));
    table.set(Slot::SetItem, SlotImpl::SetItem(dict_setitem));
    table.set(Slot::DelItem, SlotImpl::DelItem(dict_delitem));
    table.set(Slot::Len, SlotImpl::Len(dict_len));
    table.set(Slot::Contains, SlotImpl::Binary(dict_contains));
    table.set(Slot::Iter, SlotImpl::Unary(dict_iter));
    table.set(Slot::Bool, SlotImpl::Bool(dict_bool));
    table.set(Slot::Repr, SlotImpl::Unary(dict_repr));
    table.set(Slot::Str, SlotImpl::Unary(dict_repr));
    table.set(Slot::Eq, SlotImpl::Binary(dict_eq));
    table.set(Slot::Ne, SlotImpl::Binary(dict_ne));

    let attrs = vec![
        method("get", dict_get),
        method("keys", dict_keys),
        method("values", dict_values),
        method("items", dict_items),
        method("pop", dict_pop),
        method("update", dict_update),
    ];

    PyType::new_builtin("dict", vec![Rc::clone(object)], table, attrs, TypeFlags::default())
}
