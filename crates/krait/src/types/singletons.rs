//! The singleton types (`NoneType`, `NotImplementedType`, `ellipsis`) and
//! the structural types: `object`, `type`, `function`,
//! `builtin_function_or_method`, `method`, `cell`, `code`.
//!
//! `object` is the MRO root. Its slot table carries the defaults every
//! user type inherits by table copy: identity equality, id-based hash, and
//! the `<X object at 0x...>` repr.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    py_hash,
    types::{
        GetSetDescr, MemberDescr, PyType, TypeAttr, TypeFlags, TypeRef,
        slots::{Slot, SlotImpl, SlotTable},
    },
    vm::ThreadState,
};

fn object_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(Object::str(format!(
        "<{} object at {:#x}>",
        obj.type_name(),
        obj.address()
    )))
}

fn object_hash(obj: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    // Default hash is the object identity folded into the numeric ring.
    Ok(py_hash::hash_i64(obj.address() as i64))
}

fn object_eq(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    if lhs.is(rhs) {
        Ok(Object::Bool(true))
    } else {
        Ok(Object::NotImplemented)
    }
}

fn object_ne(lhs: &Object, rhs: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    if lhs.is(rhs) {
        Ok(Object::Bool(false))
    } else {
        Ok(Object::NotImplemented)
    }
}

/// Builds the `object` type, root of every MRO.
#[must_use]
pub(crate) fn make_object_type() -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(object_repr));
    table.set(Slot::Str, SlotImpl::Unary(object_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));
    table.set(Slot::Eq, SlotImpl::Binary(object_eq));
    table.set(Slot::Ne, SlotImpl::Binary(object_ne));

    PyType::new_builtin("object", Vec::new(), table, Vec::new(), TypeFlags::default())
}

fn none_repr(_obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(Object::str("None"))
}

fn none_bool(_obj: &Object, _ts: &mut ThreadState) -> RunResult<bool> {
    Ok(false)
}

fn none_hash(_obj: &Object, _ts: &mut ThreadState) -> RunResult<i64> {
    // An arbitrary fixed value; there is only one None.
    Ok(py_hash::hash_i64(0x6e6f_6e65))
}

/// Builds `NoneType`.
#[must_use]
pub(crate) fn make_none_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(none_repr));
    table.set(Slot::Str, SlotImpl::Unary(none_repr));
    table.set(Slot::Bool, SlotImpl::Bool(none_bool));
    table.set(Slot::Hash, SlotImpl::Hash(none_hash));
    table.set(Slot::Eq, SlotImpl::Binary(object_eq));
    table.set(Slot::Ne, SlotImpl::Binary(object_ne));

    PyType::new_builtin(
        "NoneType",
        vec![Rc::clone(object)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn not_implemented_repr(_obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(Object::str("NotImplemented"))
}

/// Builds `NotImplementedType`.
#[must_use]
pub(crate) fn make_not_implemented_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(not_implemented_repr));
    table.set(Slot::Str, SlotImpl::Unary(not_implemented_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    PyType::new_builtin(
        "NotImplementedType",
        vec![Rc::clone(object)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn ellipsis_repr(_obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    Ok(Object::str("Ellipsis"))
}

/// Builds `ellipsis`.
#[must_use]
pub(crate) fn make_ellipsis_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(ellipsis_repr));
    table.set(Slot::Str, SlotImpl::Unary(ellipsis_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    PyType::new_builtin(
        "ellipsis",
        vec![Rc::clone(object)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn type_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Type(t) => Ok(Object::str(format!("<class '{}'>", t.name()))),
        _ => Err(RunError::internal("type slot invoked on non-type operand")),
    }
}

fn type_name_get(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Type(t) => Ok(Object::str(t.name())),
        _ => Err(RunError::internal("type slot invoked on non-type operand")),
    }
}

/// Builds the `type` type (the metatype of every class).
#[must_use]
pub(crate) fn make_type_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(type_repr));
    table.set(Slot::Str, SlotImpl::Unary(type_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    let name_descr: Rc<str> = Rc::from("__name__");
    let attrs = vec![(
        Rc::clone(&name_descr),
        TypeAttr::GetSet(Rc::new(GetSetDescr {
            name: name_descr,
            get: type_name_get,
            set: None,
            del: None,
        })),
    )];

    PyType::new_builtin(
        "type",
        vec![Rc::clone(object)],
        table,
        attrs,
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn function_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Function(f) => Ok(Object::str(format!(
            "<function {} at {:#x}>",
            f.qualname(),
            obj.address()
        ))),
        _ => Err(RunError::internal("function slot invoked on non-function operand")),
    }
}

fn function_name_get(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Function(f) => Ok(Object::str(f.qualname())),
        _ => Err(RunError::internal("function slot invoked on non-function operand")),
    }
}

fn function_defaults_get(obj: &Object) -> RunResult<Object> {
    match obj {
        Object::Function(f) => Ok(match f.defaults() {
            Some(values) => Object::tuple(values.to_vec()),
            None => Object::None,
        }),
        _ => Err(RunError::internal("function slot invoked on non-function operand")),
    }
}

fn function_code_get(obj: &Object) -> RunResult<Object> {
    match obj {
        Object::Function(f) => Ok(Object::Code(f.code_rc())),
        _ => Err(RunError::internal("function slot invoked on non-function operand")),
    }
}

/// Builds the `function` type.
#[must_use]
pub(crate) fn make_function_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(function_repr));
    table.set(Slot::Str, SlotImpl::Unary(function_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    let name: Rc<str> = Rc::from("__name__");
    let defaults: Rc<str> = Rc::from("__defaults__");
    let code: Rc<str> = Rc::from("__code__");
    let attrs = vec![
        (
            Rc::clone(&name),
            TypeAttr::GetSet(Rc::new(GetSetDescr {
                name,
                get: function_name_get,
                set: None,
                del: None,
            })),
        ),
        (
            Rc::clone(&defaults),
            TypeAttr::Member(Rc::new(MemberDescr {
                name: defaults,
                get: function_defaults_get,
                set: None,
            })),
        ),
        (
            Rc::clone(&code),
            TypeAttr::Member(Rc::new(MemberDescr {
                name: code,
                get: function_code_get,
                set: None,
            })),
        ),
    ];

    PyType::new_builtin(
        "function",
        vec![Rc::clone(object)],
        table,
        attrs,
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn native_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Native(f) => Ok(Object::str(format!("<built-in function {}>", f.name()))),
        _ => Err(RunError::internal("builtin-function slot invoked on wrong operand")),
    }
}

/// Builds the `builtin_function_or_method` type.
#[must_use]
pub(crate) fn make_builtin_function_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(native_repr));
    table.set(Slot::Str, SlotImpl::Unary(native_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    PyType::new_builtin(
        "builtin_function_or_method",
        vec![Rc::clone(object)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn method_func_get(obj: &Object) -> RunResult<Object> {
    match obj {
        Object::BoundMethod(bm) => Ok(bm.func.clone()),
        _ => Err(RunError::internal("method slot invoked on non-method operand")),
    }
}

fn method_self_get(obj: &Object) -> RunResult<Object> {
    match obj {
        Object::BoundMethod(bm) => Ok(bm.receiver.clone()),
        _ => Err(RunError::internal("method slot invoked on non-method operand")),
    }
}

/// Builds the `method` type (bound methods).
#[must_use]
pub(crate) fn make_method_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(object_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    let func: Rc<str> = Rc::from("__func__");
    let self_: Rc<str> = Rc::from("__self__");
    let attrs = vec![
        (
            Rc::clone(&func),
            TypeAttr::Member(Rc::new(MemberDescr {
                name: func,
                get: method_func_get,
                set: None,
            })),
        ),
        (
            Rc::clone(&self_),
            TypeAttr::Member(Rc::new(MemberDescr {
                name: self_,
                get: method_self_get,
                set: None,
            })),
        ),
    ];

    PyType::new_builtin(
        "method",
        vec![Rc::clone(object)],
        table,
        attrs,
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn cell_contents_get(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Cell(cell) => cell
            .get()
            .ok_or_else(|| RunError::exc(ExcType::ValueError, "Cell is empty")),
        _ => Err(RunError::internal("cell slot invoked on non-cell operand")),
    }
}

fn cell_contents_set(obj: &Object, value: Object, _ts: &mut ThreadState) -> RunResult<()> {
    match obj {
        Object::Cell(cell) => {
            cell.set(value);
            Ok(())
        }
        _ => Err(RunError::internal("cell slot invoked on non-cell operand")),
    }
}

fn cell_contents_del(obj: &Object, _ts: &mut ThreadState) -> RunResult<()> {
    match obj {
        Object::Cell(cell) => {
            if cell.clear().is_none() {
                return Err(RunError::exc(ExcType::ValueError, "Cell is empty"));
            }
            Ok(())
        }
        _ => Err(RunError::internal("cell slot invoked on non-cell operand")),
    }
}

fn cell_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Cell(cell) => Ok(Object::str(if cell.is_set() {
            format!("<cell at {:#x}>", obj.address())
        } else {
            format!("<cell at {:#x}: empty>", obj.address())
        })),
        _ => Err(RunError::internal("cell slot invoked on non-cell operand")),
    }
}

/// Builds the `cell` type.
#[must_use]
pub(crate) fn make_cell_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(cell_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    let contents: Rc<str> = Rc::from("cell_contents");
    let attrs = vec![(
        Rc::clone(&contents),
        TypeAttr::GetSet(Rc::new(GetSetDescr {
            name: contents,
            get: cell_contents_get,
            set: Some(cell_contents_set),
            del: Some(cell_contents_del),
        })),
    )];

    PyType::new_builtin(
        "cell",
        vec![Rc::clone(object)],
        table,
        attrs,
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}

fn code_repr(obj: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
    match obj {
        Object::Code(code) => Ok(Object::str(format!(
            "<code object {} at {:#x}>",
            code.qualname,
            obj.address()
        ))),
        _ => Err(RunError::internal("code slot invoked on non-code operand")),
    }
}

/// Builds the `code` type.
#[must_use]
pub(crate) fn make_code_type(object: &TypeRef) -> TypeRef {
    let mut table = SlotTable::new();
    table.set(Slot::Repr, SlotImpl::Unary(code_repr));
    table.set(Slot::Hash, SlotImpl::Hash(object_hash));

    PyType::new_builtin(
        "code",
        vec![Rc::clone(object)],
        table,
        Vec::new(),
        TypeFlags {
            basetype: false,
            custom_getattr: false,
        },
    )
}
