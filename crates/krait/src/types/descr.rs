//! Descriptors stored in type dictionaries.
//!
//! Attribute entries are a tagged variant rather than a class hierarchy:
//! a plain value, a method descriptor (non-data, binds its receiver), a
//! get-set descriptor (data, host get/set/delete handlers), or a member
//! descriptor (data, direct field access on the host representation).
//! The classification drives the generic attribute algorithm: data
//! descriptors win over the instance dict, non-data descriptors lose to it.

use std::{cell::Cell as StdCell, rc::Rc};

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::{BoundMethod, Object},
    vm::ThreadState,
};

/// Handle signature for get-set descriptor reads.
pub type GetSetGetFn = fn(&Object, &mut ThreadState) -> RunResult<Object>;
/// Handle signature for get-set descriptor writes.
pub type GetSetSetFn = fn(&Object, Object, &mut ThreadState) -> RunResult<()>;
/// Handle signature for get-set descriptor deletes.
pub type GetSetDelFn = fn(&Object, &mut ThreadState) -> RunResult<()>;
/// Handle signature for member descriptor reads (plain field access).
pub type MemberGetFn = fn(&Object) -> RunResult<Object>;
/// Handle signature for member descriptor writes.
pub type MemberSetFn = fn(&Object, Object) -> RunResult<()>;

/// A non-data descriptor whose `get` binds the receiver to produce a
/// callable.
///
/// Marked as a *method descriptor* so the `LoadMethod` path can skip the
/// short-lived bound-method allocation and push `(callable, receiver)`
/// directly.
#[derive(Debug)]
pub struct MethodDescr {
    /// The attribute name this descriptor is stored under.
    pub name: Rc<str>,
    /// The underlying callable (native function or def function).
    pub func: Object,
    /// How many times `get` has produced a bound method. The method-call
    /// fast path is observable through this staying flat.
    pub bind_count: StdCell<usize>,
}

impl MethodDescr {
    /// Wraps a callable as a method descriptor.
    #[must_use]
    pub fn new(name: Rc<str>, func: Object) -> Rc<Self> {
        Rc::new(Self {
            name,
            func,
            bind_count: StdCell::new(0),
        })
    }

    /// Binds the receiver, producing a bound method.
    #[must_use]
    pub fn bind(&self, receiver: Object) -> Object {
        self.bind_count.set(self.bind_count.get() + 1);
        Object::BoundMethod(Rc::new(BoundMethod {
            func: self.func.clone(),
            receiver,
        }))
    }
}

/// A data descriptor with host-level get/set/delete handles.
#[derive(Debug)]
pub struct GetSetDescr {
    pub name: Rc<str>,
    pub get: GetSetGetFn,
    pub set: Option<GetSetSetFn>,
    pub del: Option<GetSetDelFn>,
}

/// A data descriptor exposing a fixed field of the host representation.
///
/// Readonly members reject `set`/`delete`; non-optional members reject
/// `delete` even when writable.
#[derive(Debug)]
pub struct MemberDescr {
    pub name: Rc<str>,
    pub get: MemberGetFn,
    pub set: Option<MemberSetFn>,
}

/// An attribute entry in a type dictionary.
#[derive(Debug, Clone)]
pub enum TypeAttr {
    /// Plain value; returned as-is, shadowed by the instance dict.
    Plain(Object),
    /// Non-data method descriptor; binds the receiver on `get`.
    Method(Rc<MethodDescr>),
    /// Data descriptor with get/set/delete handles.
    GetSet(Rc<GetSetDescr>),
    /// Data descriptor reading a fixed host field.
    Member(Rc<MemberDescr>),
}

impl TypeAttr {
    /// Whether this entry is a data descriptor (has `set` or `delete`).
    ///
    /// Data descriptors take priority over the instance dictionary.
    #[must_use]
    pub fn is_data_descriptor(&self) -> bool {
        match self {
            Self::Plain(_) | Self::Method(_) => false,
            Self::GetSet(_) | Self::Member(_) => true,
        }
    }

    /// Whether this entry is a method descriptor recognized by the
    /// method-call fast path.
    #[must_use]
    pub fn is_method_descriptor(&self) -> bool {
        matches!(self, Self::Method(_))
    }

    /// The descriptor `get(descr, obj, type)` contract.
    pub fn get(&self, obj: &Object, ts: &mut ThreadState) -> RunResult<Object> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Method(descr) => Ok(descr.bind(obj.clone())),
            Self::GetSet(descr) => (descr.get)(obj, ts),
            Self::Member(descr) => (descr.get)(obj),
        }
    }

    /// The descriptor `set(descr, obj, value)` contract.
    ///
    /// Readonly entries raise `AttributeError`; entries that are not data
    /// descriptors at all return `Ok(None)` so the caller can fall through
    /// to the instance dictionary.
    pub fn set(&self, obj: &Object, value: Object, ts: &mut ThreadState) -> RunResult<Option<()>> {
        match self {
            Self::Plain(_) | Self::Method(_) => Ok(None),
            Self::GetSet(descr) => match descr.set {
                Some(set) => set(obj, value, ts).map(Some),
                None => Err(readonly(&descr.name, obj)),
            },
            Self::Member(descr) => match descr.set {
                Some(set) => set(obj, value).map(Some),
                None => Err(readonly(&descr.name, obj)),
            },
        }
    }

    /// The descriptor `delete(descr, obj)` contract, with the same
    /// fall-through convention as [`TypeAttr::set`].
    pub fn delete(&self, obj: &Object, ts: &mut ThreadState) -> RunResult<Option<()>> {
        match self {
            Self::Plain(_) | Self::Method(_) => Ok(None),
            Self::GetSet(descr) => match descr.del {
                Some(del) => del(obj, ts).map(Some),
                None => Err(undeletable(&descr.name, obj)),
            },
            Self::Member(descr) => {
                // Members are fields of the host representation; they can be
                // overwritten but never removed.
                Err(undeletable(&descr.name, obj))
            }
        }
    }
}

fn readonly(name: &str, obj: &Object) -> RunError {
    RunError::exc(
        ExcType::AttributeError,
        format!("attribute '{name}' of '{}' objects is not writable", obj.type_name()),
    )
}

fn undeletable(name: &str, obj: &Object) -> RunError {
    RunError::exc(
        ExcType::AttributeError,
        format!("attribute '{name}' of '{}' objects cannot be deleted", obj.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let plain = TypeAttr::Plain(Object::Int(1));
        assert!(!plain.is_data_descriptor());
        assert!(!plain.is_method_descriptor());

        let member = TypeAttr::Member(Rc::new(MemberDescr {
            name: Rc::from("x"),
            get: |_| Ok(Object::None),
            set: None,
        }));
        assert!(member.is_data_descriptor());

        let method = TypeAttr::Method(MethodDescr::new(Rc::from("m"), Object::None));
        assert!(method.is_method_descriptor());
        assert!(!method.is_data_descriptor());
    }

    #[test]
    fn method_bind_counts() {
        let descr = MethodDescr::new(Rc::from("m"), Object::Int(1));
        assert_eq!(descr.bind_count.get(), 0);
        let bound = descr.bind(Object::Int(2));
        assert_eq!(descr.bind_count.get(), 1);
        match bound {
            Object::BoundMethod(bm) => {
                assert_eq!(bm.func.as_int(), Some(1));
                assert_eq!(bm.receiver.as_int(), Some(2));
            }
            other => panic!("expected bound method, got {other:?}"),
        }
    }
}
