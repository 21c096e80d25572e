//! The interpreter: the builtin type registry and the builtins namespace
//! functions bind against.
//!
//! Types have identity across the process lifetime, so everything here is
//! built once and shared by reference. After construction the registry is
//! treated as immutable during dispatch.

use std::{cell::RefCell, rc::Rc};

use num_bigint::BigInt;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    types::{
        TypeRef,
        dict::Dict,
        float::make_float_type,
        int::{make_bool_type, make_int_type},
        iter::make_iterator_type,
        list::make_list_type,
        singletons::{
            make_builtin_function_type, make_cell_type, make_code_type, make_ellipsis_type, make_function_type,
            make_method_type, make_none_type, make_not_implemented_type, make_object_type, make_type_type,
        },
        str::make_str_type,
        tuple::make_tuple_type,
    },
    vm::{
        ThreadState,
        call::{CallArgs, NativeFunction},
    },
};

/// The builtin type registry.
#[derive(Debug)]
pub struct CoreTypes {
    pub object: TypeRef,
    pub type_: TypeRef,
    pub none: TypeRef,
    pub not_implemented: TypeRef,
    pub ellipsis: TypeRef,
    pub bool_: TypeRef,
    pub int: TypeRef,
    pub float: TypeRef,
    pub str_: TypeRef,
    pub tuple: TypeRef,
    pub list: TypeRef,
    pub dict: TypeRef,
    pub iterator: TypeRef,
    pub function: TypeRef,
    pub builtin_function: TypeRef,
    pub method: TypeRef,
    pub cell: TypeRef,
    pub code: TypeRef,
}

/// A process-wide interpreter: types plus the builtins dict.
#[derive(Debug)]
pub struct Interpreter {
    pub types: CoreTypes,
    builtins: Rc<RefCell<Dict>>,
}

impl Interpreter {
    /// Builds a fresh interpreter with all builtin types and builtins.
    #[must_use]
    pub fn new_rc() -> Rc<Self> {
        let object = make_object_type();
        let int = make_int_type(&object);
        let types = CoreTypes {
            type_: make_type_type(&object),
            none: make_none_type(&object),
            not_implemented: make_not_implemented_type(&object),
            ellipsis: make_ellipsis_type(&object),
            bool_: make_bool_type(&int),
            float: make_float_type(&object),
            str_: make_str_type(&object),
            tuple: make_tuple_type(&object),
            list: make_list_type(&object),
            dict: make_dict_type_local(&object),
            iterator: make_iterator_type(&object),
            function: make_function_type(&object),
            builtin_function: make_builtin_function_type(&object),
            method: make_method_type(&object),
            cell: make_cell_type(&object),
            code: make_code_type(&object),
            int,
            object,
        };

        let mut builtins = Dict::new();
        for (name, f) in BUILTIN_FUNCTIONS {
            builtins.insert_str(name, Object::Native(NativeFunction::new(Rc::from(*name), *f)));
        }
        builtins.insert_str("object", Object::Type(Rc::clone(&types.object)));
        builtins.insert_str("type", Object::Type(Rc::clone(&types.type_)));
        builtins.insert_str("bool", Object::Type(Rc::clone(&types.bool_)));
        builtins.insert_str("int", Object::Type(Rc::clone(&types.int)));
        builtins.insert_str("float", Object::Type(Rc::clone(&types.float)));
        builtins.insert_str("str", Object::Type(Rc::clone(&types.str_)));
        builtins.insert_str("tuple", Object::Type(Rc::clone(&types.tuple)));
        builtins.insert_str("list", Object::Type(Rc::clone(&types.list)));
        builtins.insert_str("dict", Object::Type(Rc::clone(&types.dict)));

        Rc::new(Self {
            types,
            builtins: Rc::new(RefCell::new(builtins)),
        })
    }

    /// The builtins mapping shared by module-level functions.
    #[must_use]
    pub fn builtins_dict(&self) -> Rc<RefCell<Dict>> {
        Rc::clone(&self.builtins)
    }
}

// `types::dict` exports its constructor under the same name as the module;
// rename locally to keep the imports above tidy.
use crate::types::dict::make_dict_type as make_dict_type_local;

type BuiltinFn = crate::vm::call::NativeFn;

static BUILTIN_FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("len", builtin_len),
    ("abs", builtin_abs),
    ("repr", builtin_repr),
    ("iter", builtin_iter),
    ("next", builtin_next),
    ("print", builtin_print),
];

fn builtin_len(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("len")?;
    let [obj] = args.exact("len")?;
    let len = ts.len_of(&obj)?;
    Ok(Object::Int(len as i64))
}

fn builtin_abs(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("abs")?;
    let [obj] = args.exact("abs")?;
    ts.unary_slot_op(crate::types::Slot::Abs, &obj, "abs()")
}

fn builtin_repr(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("repr")?;
    let [obj] = args.exact("repr")?;
    let rendered = ts.repr(&obj)?;
    Ok(Object::Str(rendered))
}

fn builtin_iter(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("iter")?;
    let [obj] = args.exact("iter")?;
    ts.iterate(&obj)
}

fn builtin_next(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("next")?;
    let items = args.between("next", 1, 2)?;
    match ts.call_next(&items[0]) {
        Ok(value) => Ok(value),
        Err(err) if err.is_stop_iteration() => match items.into_iter().nth(1) {
            Some(default) => Ok(default),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

fn builtin_print(ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
    args.check_no_kwargs("print")?;
    use std::io::Write;
    let mut line = String::new();
    for (i, obj) in args.args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&ts.str_of(obj)?);
    }
    line.push('\n');
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(line.as_bytes())
        .map_err(|e| RunError::internal(format!("stdout write failed: {e}")))?;
    Ok(Object::None)
}

/// Parses an integer literal the way `int(str)` does.
pub(crate) fn parse_int_literal(text: &str) -> RunResult<Object> {
    let trimmed = text.trim();
    match trimmed.parse::<i64>() {
        Ok(v) => Ok(Object::Int(v)),
        Err(_) => match trimmed.parse::<BigInt>() {
            Ok(v) => Ok(Object::from_bigint(v)),
            Err(_) => Err(RunError::exc(
                ExcType::ValueError,
                format!("invalid literal for int() with base 10: {}", crate::types::str::str_repr(text)),
            )),
        },
    }
}

/// Parses a float literal the way `float(str)` does.
pub(crate) fn parse_float_literal(text: &str) -> RunResult<Object> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(v) => Ok(Object::Float(v)),
        Err(_) => Err(RunError::exc(
            ExcType::ValueError,
            format!("could not convert string to float: {}", crate::types::str::str_repr(text)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_populated() {
        let interp = Interpreter::new_rc();
        let builtins = interp.builtins_dict();
        let builtins = builtins.borrow();
        assert!(builtins.get_str("len").is_some());
        assert!(builtins.get_str("print").is_some());
        assert!(matches!(builtins.get_str("int"), Some(Object::Type(_))));
        assert!(builtins.get_str("nope").is_none());
    }

    #[test]
    fn bool_is_subtype_of_int() {
        let interp = Interpreter::new_rc();
        assert!(interp.types.bool_.is_proper_subtype_of(&interp.types.int));
        assert!(interp.types.int.is_subtype_of(&interp.types.object));
        assert!(!interp.types.int.is_subtype_of(&interp.types.bool_));
    }

    #[test]
    fn int_literal_parsing() {
        assert_eq!(parse_int_literal(" 42 ").unwrap().as_int(), Some(42));
        assert!(matches!(
            parse_int_literal("123456789012345678901234567890").unwrap(),
            Object::BigInt(_)
        ));
        assert!(parse_int_literal("nope").is_err());
    }
}
