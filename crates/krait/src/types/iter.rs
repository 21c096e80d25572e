//! The sequence iterator produced by `GetIter`.
//!
//! One iterator representation covers every builtin sequence: tuples and
//! strings snapshot nothing (they are immutable), list iterators read
//! through the shared list so appends during iteration are visible, and
//! dict iterators walk a key snapshot taken at `GetIter` time.

use std::{cell::RefCell, rc::Rc};

use crate::{
    exception::{ExcType, Exception, RunError, RunResult},
    object::Object,
    types::{PyType, TypeFlags, TypeRef, slots::{Slot, SlotImpl, SlotTable}},
    vm::ThreadState,
};

#[derive(Debug)]
enum IterTarget {
    Tuple(Rc<[Object]>),
    List(Rc<RefCell<Vec<Object>>>),
    Str(Rc<str>),
    /// Pre-collected items (dict keys).
    Items(Vec<Object>),
}

/// A position over a builtin sequence.
#[derive(Debug)]
pub struct SeqIter {
    target: IterTarget,
    /// Element index; for strings, a byte offset at a char boundary.
    index: usize,
}

impl SeqIter {
    /// Wraps a tuple in a fresh iterator object.
    #[must_use]
    pub fn over_tuple(items: Rc<[Object]>) -> Object {
        Self::wrap(IterTarget::Tuple(items))
    }

    /// Wraps a list in a fresh iterator object. The list is read through,
    /// not snapshotted.
    #[must_use]
    pub fn over_list(items: Rc<RefCell<Vec<Object>>>) -> Object {
        Self::wrap(IterTarget::List(items))
    }

    /// Wraps string content in a fresh iterator object yielding one-char
    /// strings.
    #[must_use]
    pub fn over_str(content: Rc<str>) -> Object {
        Self::wrap(IterTarget::Str(content))
    }

    /// Wraps pre-collected items in a fresh iterator object.
    #[must_use]
    pub fn over_items(items: Vec<Object>) -> Object {
        Self::wrap(IterTarget::Items(items))
    }

    fn wrap(target: IterTarget) -> Object {
        Object::Iter(Rc::new(RefCell::new(Self { target, index: 0 })))
    }

    /// Advances the iterator, returning `None` when exhausted.
    pub fn advance(&mut self) -> Option<Object> {
        match &self.target {
            IterTarget::Tuple(items) => {
                let item = items.get(self.index)?.clone();
                self.index += 1;
                Some(item)
            }
            IterTarget::List(items) => {
                let item = items.borrow().get(self.index)?.clone();
                self.index += 1;
                Some(item)
            }
            IterTarget::Str(content) => {
                let ch = content[self.index..].chars().next()?;
                self.index += ch.len_utf8();
                Some(Object::str(ch.to_string()))
            }
            IterTarget::Items(items) => {
                let item = items.get(self.index)?.clone();
                self.index += 1;
                Some(item)
            }
        }
    }
}

fn iter_iter(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    // iter(iterator) is the iterator itself.
    Ok(obj.clone())
}

fn iter_next(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Iter(it) => match it.borrow_mut().advance() {
            Some(item) => Ok(item),
            None => Err(Exception::bare(ExcType::StopIteration).into()),
        },
        _ => Err(RunError::internal("iterator slot invoked on non-iterator operand")),
    }
}

/// Builds the `iterator` type.
#[must_use]
pub(crate) fn make_iterator_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Iter, SlotImpl::Unary(iter_iter));
    table.set(Slot::Next, SlotImpl::Unary(iter_next));

    PyType::new_builtin(
        "iterator",
        vec![Rc::clone(object)],
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

    #[test]
    fn list_iterator_sees_appends() {
        let list = Rc::new(RefCell::new(vec![Object::Int(1)]));
        let iter = SeqIter::over_list(Rc::clone(&list));
        let Object::Iter(it) = iter else { panic!("expected iterator") };
        assert_eq!(it.borrow_mut().advance().and_then(|v| v.as_int()), Some(1));
        list.borrow_mut().push(Object::Int(2));
        assert_eq!(it.borrow_mut().advance().and_then(|v| v.as_int()), Some(2));
        assert!(it.borrow_mut().advance().is_none());
    }

    #[test]
    fn str_iterator_yields_chars() {
        let iter = SeqIter::over_str(Rc::from("hé"));
        let Object::Iter(it) = iter else { panic!("expected iterator") };
        assert_eq!(it.borrow_mut().advance().as_ref().and_then(|v| v.as_str()), Some("h"));
        assert_eq!(it.borrow_mut().advance().as_ref().and_then(|v| v.as_str()), Some("é"));
        assert!(it.borrow_mut().advance().is_none());
    }
}
