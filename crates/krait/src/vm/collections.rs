//! Container construction, unpacking, and the iteration protocol.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    types::{Slot, SlotImpl, dict::Dict},
    vm::ThreadState,
};

impl ThreadState {
    /// Subscript load (`obj[key]`) via the `getitem` slot.
    pub fn getitem(&mut self, obj: &Object, key: &Object) -> RunResult<Object> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::GetItem) {
            Some(SlotImpl::Binary(f)) => f(obj, key, self),
            Some(_) => Err(RunError::internal("getitem slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("'{}' object is not subscriptable", class.name()),
            )),
        }
    }

    /// Subscript store (`obj[key] = value`) via the `setitem` slot.
    pub fn setitem(&mut self, obj: &Object, key: &Object, value: Object) -> RunResult<()> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::SetItem) {
            Some(SlotImpl::SetItem(f)) => f(obj, key, value, self),
            Some(_) => Err(RunError::internal("setitem slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("'{}' object does not support item assignment", class.name()),
            )),
        }
    }

    /// Subscript delete (`del obj[key]`) via the `delitem` slot.
    pub fn delitem(&mut self, obj: &Object, key: &Object) -> RunResult<()> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::DelItem) {
            Some(SlotImpl::DelItem(f)) => f(obj, key, self),
            Some(_) => Err(RunError::internal("delitem slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("'{}' object doesn't support item deletion", class.name()),
            )),
        }
    }

    /// Coerces a value to a sequence index via the `index` slot.
    ///
    /// Small ints and bools convert directly; big integers saturate (they
    /// are out of range for any real sequence); anything else consults the
    /// `index` slot and returns `None` when there is none.
    pub(crate) fn try_index(&mut self, key: &Object) -> RunResult<Option<i64>> {
        fn saturate(obj: &Object) -> Option<i64> {
            match obj {
                Object::BigInt(b) => Some(if num_traits::Signed::is_negative(&**b) {
                    i64::MIN
                } else {
                    i64::MAX
                }),
                other => other.as_int(),
            }
        }

        if let Some(v) = saturate(key) {
            return Ok(Some(v));
        }
        let class = key.class(self.interp());
        match class.lookup_slot(key, Slot::Index) {
            Some(SlotImpl::Unary(f)) => {
                let result = f(key, self)?;
                Ok(saturate(&result))
            }
            _ => Ok(None),
        }
    }

    /// `GetIter`: resolves the `iter` slot, raising `TypeError` for
    /// non-iterables.
    pub fn iterate(&mut self, obj: &Object) -> RunResult<Object> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Iter) {
            Some(SlotImpl::Unary(f)) => f(obj, self),
            Some(_) => Err(RunError::internal("iter slot has wrong arity")),
            None => Err(ExcType::not_iterable(class.name())),
        }
    }

    /// Invokes the `next` slot, raising `TypeError` for non-iterators.
    /// `StopIteration` propagates to the caller.
    pub fn call_next(&mut self, iterator: &Object) -> RunResult<Object> {
        let class = iterator.class(self.interp());
        match class.lookup_slot(iterator, Slot::Next) {
            Some(SlotImpl::Unary(f)) => f(iterator, self),
            Some(_) => Err(RunError::internal("next slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("'{}' object is not an iterator", class.name()),
            )),
        }
    }

    /// Advances an iterator, converting `StopIteration` into `None`.
    pub fn iter_next(&mut self, iterator: &Object) -> RunResult<Option<Object>> {
        match self.call_next(iterator) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_stop_iteration() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Drains an iterable into a vector via the iteration protocol, with
    /// fast paths for the builtin sequences.
    pub fn collect_iterable(&mut self, obj: &Object) -> RunResult<Vec<Object>> {
        match obj {
            Object::Tuple(items) => Ok(items.to_vec()),
            Object::List(items) => Ok(items.borrow().clone()),
            _ => {
                let iter = self.iterate(obj)?;
                let mut out = Vec::new();
                while let Some(item) = self.iter_next(&iter)? {
                    out.push(item);
                }
                Ok(out)
            }
        }
    }

    /// `UnpackSequence n`: exactly `n` items out of an iterable.
    pub(crate) fn unpack_sequence(&mut self, obj: &Object, n: usize) -> RunResult<Vec<Object>> {
        let items = self.collect_for_unpack(obj)?;
        match items.len().cmp(&n) {
            std::cmp::Ordering::Equal => Ok(items),
            std::cmp::Ordering::Less => Err(RunError::exc(
                ExcType::ValueError,
                format!("not enough values to unpack (expected {n}, got {})", items.len()),
            )),
            std::cmp::Ordering::Greater => Err(RunError::exc(
                ExcType::ValueError,
                format!("too many values to unpack (expected {n})"),
            )),
        }
    }

    /// `UnpackEx`: `before` leading items, a middle list, `after` trailing
    /// items.
    pub(crate) fn unpack_ex(
        &mut self,
        obj: &Object,
        before: usize,
        after: usize,
    ) -> RunResult<(Vec<Object>, Vec<Object>, Vec<Object>)> {
        let mut items = self.collect_for_unpack(obj)?;
        if items.len() < before + after {
            return Err(RunError::exc(
                ExcType::ValueError,
                format!(
                    "not enough values to unpack (expected at least {}, got {})",
                    before + after,
                    items.len()
                ),
            ));
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(before);
        Ok((items, middle, tail))
    }

    fn collect_for_unpack(&mut self, obj: &Object) -> RunResult<Vec<Object>> {
        if matches!(obj, Object::Tuple(_) | Object::List(_)) {
            return self.collect_iterable(obj);
        }
        let class_name = obj.class(self.interp()).name().to_owned();
        self.collect_iterable(obj).map_err(|err| {
            if err.is_exception_type(ExcType::TypeError) {
                RunError::exc(
                    ExcType::TypeError,
                    format!("cannot unpack non-iterable {class_name} object"),
                )
            } else {
                err
            }
        })
    }

    /// `BuildMap n`: consumes `2n` stack values laid out as
    /// `k1, v1, ..., kn, vn`.
    pub(crate) fn build_map(&mut self, pairs: Vec<Object>) -> RunResult<Object> {
        let mut dict = Dict::new();
        let mut iter = pairs.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let hash = self.hash_object(&key)? as u64;
            dict.insert(key, hash, value);
        }
        Ok(Object::Dict(Rc::new(std::cell::RefCell::new(dict))))
    }

    /// `BuildConstKeyMap n`: keys come as a tuple, values off the stack.
    pub(crate) fn build_const_key_map(&mut self, keys: &Object, values: Vec<Object>) -> RunResult<Object> {
        let Object::Tuple(keys) = keys else {
            return Err(RunError::exc(
                ExcType::SystemError,
                "bad BUILD_CONST_KEY_MAP keys argument",
            ));
        };
        if keys.len() != values.len() {
            return Err(RunError::exc(
                ExcType::SystemError,
                "bad BUILD_CONST_KEY_MAP keys argument",
            ));
        }
        let mut dict = Dict::new();
        for (key, value) in keys.iter().zip(values) {
            let hash = self.hash_object(key)? as u64;
            dict.insert(key.clone(), hash, value);
        }
        Ok(Object::Dict(Rc::new(std::cell::RefCell::new(dict))))
    }

    /// `DictUpdate`: merges `other` into `target`, overwriting duplicates.
    pub(crate) fn dict_update(&mut self, target: &Object, other: &Object) -> RunResult<()> {
        let Object::Dict(target) = target else {
            return Err(RunError::internal("DictUpdate target is not a dict"));
        };
        let Object::Dict(other) = other else {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!("'{}' object is not a mapping", other.type_name()),
            ));
        };
        let incoming = other.borrow().raw_items();
        let mut target = target.borrow_mut();
        for (key, hash, value) in incoming {
            target.insert(key, hash, value);
        }
        Ok(())
    }

    /// `DictMerge`: like update, but duplicate keys are a `TypeError`
    /// naming the callable the kwargs are being built for.
    pub(crate) fn dict_merge(&mut self, target: &Object, other: &Object, callee: &Object) -> RunResult<()> {
        let Object::Dict(target) = target else {
            return Err(RunError::internal("DictMerge target is not a dict"));
        };
        let Object::Dict(other) = other else {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!(
                    "{} argument after ** must be a mapping, not {}",
                    callable_label(callee),
                    other.type_name()
                ),
            ));
        };
        let incoming = other.borrow().raw_items();
        let mut target = target.borrow_mut();
        for (key, hash, value) in incoming {
            if target.contains(&key, hash) {
                let rendered = key.as_str().map_or_else(|| key.to_string(), str::to_owned);
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!(
                        "{} got multiple values for keyword argument '{rendered}'",
                        callable_label(callee)
                    ),
                ));
            }
            target.insert(key, hash, value);
        }
        Ok(())
    }
}

/// Renders a callable for `DictMerge` error messages (`f()`-style).
fn callable_label(callee: &Object) -> String {
    match callee {
        Object::Function(f) => format!("{}()", f.qualname()),
        Object::Native(f) => format!("{}()", f.name()),
        Object::BoundMethod(bm) => callable_label(&bm.func),
        Object::Type(t) => format!("{}()", t.name()),
        other => format!("{}()", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;

    fn ts() -> ThreadState {
        ThreadState::new(Interpreter::new_rc())
    }

    #[test]
    fn unpack_exact() {
        let mut ts = ts();
        let t = Object::tuple(vec![Object::Int(1), Object::Int(2)]);
        let items = ts.unpack_sequence(&t, 2).unwrap();
        assert_eq!(items.len(), 2);

        let err = ts.unpack_sequence(&t, 3).unwrap_err();
        let RunError::Exc(exc) = err else { panic!() };
        assert_eq!(exc.message(), Some("not enough values to unpack (expected 3, got 2)"));

        let err = ts.unpack_sequence(&t, 1).unwrap_err();
        let RunError::Exc(exc) = err else { panic!() };
        assert_eq!(exc.message(), Some("too many values to unpack (expected 1)"));
    }

    #[test]
    fn unpack_non_iterable() {
        let mut ts = ts();
        let err = ts.unpack_sequence(&Object::Int(1), 1).unwrap_err();
        let RunError::Exc(exc) = err else { panic!() };
        assert_eq!(exc.message(), Some("cannot unpack non-iterable int object"));
    }

    #[test]
    fn unpack_ex_splits() {
        let mut ts = ts();
        let t = Object::tuple((1..=5).map(Object::Int).collect());
        let (before, middle, after) = ts.unpack_ex(&t, 1, 2).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(middle.len(), 2);
        assert_eq!(after.len(), 2);
        assert_eq!(before[0].as_int(), Some(1));
        assert_eq!(middle[1].as_int(), Some(3));
        assert_eq!(after[1].as_int(), Some(5));
    }

    #[test]
    fn string_iteration() {
        let mut ts = ts();
        let items = ts.collect_iterable(&Object::str("ab")).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_str(), Some("a"));
    }

    #[test]
    fn dict_merge_rejects_duplicates() {
        let mut ts = ts();
        let target = ts.build_map(vec![Object::str("x"), Object::Int(1)]).unwrap();
        let other = ts.build_map(vec![Object::str("x"), Object::Int(2)]).unwrap();
        let callee = Object::str("ignored");
        let err = ts.dict_merge(&target, &other, &callee).unwrap_err();
        assert!(err.is_exception_type(ExcType::TypeError));
    }
}
