//! The call protocol: argument containers, native functions, callable
//! dispatch, and type instantiation.

use std::{cell::RefCell, rc::Rc};

use smallvec::SmallVec;

use crate::{
    exception::{ExcType, RunError, RunResult},
    frame::Frame,
    function::Function,
    interp::{parse_float_literal, parse_int_literal},
    object::{Instance, Object},
    types::{
        Slot, SlotImpl, TypeRef,
        dict::Dict,
    },
    vm::ThreadState,
};

/// Host function signature for builtins and native methods.
pub type NativeFn = fn(&mut ThreadState, CallArgs) -> RunResult<Object>;

/// A function implemented in the host language.
pub struct NativeFunction {
    name: Rc<str>,
    func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

impl NativeFunction {
    /// Wraps a host function under a Python-visible name.
    #[must_use]
    pub fn new(name: Rc<str>, func: NativeFn) -> Rc<Self> {
        Rc::new(Self { name, func })
    }

    /// The Python-visible name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying host function.
    #[must_use]
    pub fn func(&self) -> NativeFn {
        self.func
    }
}

/// Arguments to a call: positional values plus keyword pairs.
///
/// Most calls pass at most a handful of positional arguments, so the
/// positional buffer is inline up to four entries.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub args: SmallVec<[Object; 4]>,
    pub kwargs: Vec<(Rc<str>, Object)>,
}

impl CallArgs {
    /// Positional-only arguments.
    #[must_use]
    pub fn positional(args: Vec<Object>) -> Self {
        Self {
            args: SmallVec::from_vec(args),
            kwargs: Vec::new(),
        }
    }

    /// Returns the arguments with `receiver` prepended (method binding).
    #[must_use]
    pub fn prepended(mut self, receiver: Object) -> Self {
        self.args.insert(0, receiver);
        self
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether there are no arguments at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Rejects keyword arguments for callees that take none.
    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        if self.kwargs.is_empty() {
            Ok(())
        } else {
            Err(RunError::exc(
                ExcType::TypeError,
                format!("{name}() takes no keyword arguments"),
            ))
        }
    }

    /// Consumes the arguments, requiring exactly `N` positional values.
    pub fn exact<const N: usize>(self, name: &str) -> RunResult<[Object; N]> {
        let given = self.args.len();
        <[Object; N]>::try_from(self.args.into_vec()).map_err(|_| {
            RunError::exc(
                ExcType::TypeError,
                format!("{name}() takes {N} argument{} ({given} given)", if N == 1 { "" } else { "s" }),
            )
        })
    }

    /// Consumes the arguments, requiring between `min` and `max` positional
    /// values.
    pub fn between(self, name: &str, min: usize, max: usize) -> RunResult<SmallVec<[Object; 4]>> {
        let given = self.args.len();
        if given < min || given > max {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!("{name}() takes from {min} to {max} arguments ({given} given)"),
            ));
        }
        Ok(self.args)
    }
}

impl ThreadState {
    /// Calls any callable with the given arguments.
    ///
    /// Def functions push a frame and recursively enter the dispatch loop;
    /// native functions run in the host; bound methods unwrap to their
    /// underlying callable with the receiver prepended; types construct.
    /// Anything else goes through its type's `call` slot.
    pub fn call(&mut self, callable: &Object, args: CallArgs) -> RunResult<Object> {
        match callable {
            Object::Function(f) => self.call_function(&Rc::clone(f), args),
            Object::Native(native) => (native.func())(self, args),
            Object::BoundMethod(bm) => {
                let func = bm.func.clone();
                let args = args.prepended(bm.receiver.clone());
                self.call(&func, args)
            }
            Object::Type(t) => self.call_type(&Rc::clone(t), args),
            other => {
                let class = other.class(self.interp());
                match class.lookup_slot(other, Slot::Call) {
                    Some(SlotImpl::Call(f)) => f(other, args, self),
                    Some(_) => Err(RunError::internal("call slot has wrong arity")),
                    None => Err(ExcType::not_callable(&other.type_name())),
                }
            }
        }
    }

    /// Calls a def function: bind arguments, push a frame, evaluate.
    pub(crate) fn call_function(&mut self, function: &Rc<Function>, args: CallArgs) -> RunResult<Object> {
        let mut frame = Frame::new(Rc::clone(function), None);
        function.bind_args(&mut frame.fast, args)?;
        self.eval(frame)
    }

    /// Calls a type object: a conversion for the builtin types, an
    /// allocate-then-`__init__` sequence for user types.
    pub(crate) fn call_type(&mut self, class: &TypeRef, args: CallArgs) -> RunResult<Object> {
        let types = &self.interp().types;
        if Rc::ptr_eq(class, &types.type_) {
            args.check_no_kwargs("type")?;
            let [obj] = args.exact("type")?;
            return Ok(Object::Type(obj.class(self.interp())));
        }
        if Rc::ptr_eq(class, &types.int) {
            args.check_no_kwargs("int")?;
            let items = args.between("int", 0, 1)?;
            return match items.first() {
                None => Ok(Object::Int(0)),
                Some(Object::Str(s)) => parse_int_literal(s),
                Some(obj) => self.convert_via_slot(obj, Slot::Int, "int"),
            };
        }
        if Rc::ptr_eq(class, &types.float) {
            args.check_no_kwargs("float")?;
            let items = args.between("float", 0, 1)?;
            return match items.first() {
                None => Ok(Object::Float(0.0)),
                Some(Object::Str(s)) => parse_float_literal(s),
                Some(obj) => self.convert_via_slot(obj, Slot::Float, "float"),
            };
        }
        if Rc::ptr_eq(class, &types.bool_) {
            args.check_no_kwargs("bool")?;
            let items = args.between("bool", 0, 1)?;
            return match items.first() {
                None => Ok(Object::Bool(false)),
                Some(obj) => Ok(Object::Bool(self.truthy(obj)?)),
            };
        }
        if Rc::ptr_eq(class, &types.str_) {
            args.check_no_kwargs("str")?;
            let items = args.between("str", 0, 1)?;
            return match items.first() {
                None => Ok(Object::str("")),
                Some(obj) => {
                    let rendered = self.str_of(obj)?;
                    Ok(Object::Str(rendered))
                }
            };
        }
        if Rc::ptr_eq(class, &types.list) {
            args.check_no_kwargs("list")?;
            let items = args.between("list", 0, 1)?;
            return match items.first() {
                None => Ok(Object::list(Vec::new())),
                Some(obj) => Ok(Object::list(self.collect_iterable(obj)?)),
            };
        }
        if Rc::ptr_eq(class, &types.tuple) {
            args.check_no_kwargs("tuple")?;
            let items = args.between("tuple", 0, 1)?;
            return match items.first() {
                None => Ok(Object::tuple(Vec::new())),
                Some(obj) => Ok(Object::tuple(self.collect_iterable(obj)?)),
            };
        }
        if Rc::ptr_eq(class, &types.dict) {
            args.check_no_kwargs("dict")?;
            let items = args.between("dict", 0, 1)?;
            return match items.first() {
                None => Ok(Object::Dict(Rc::new(RefCell::new(Dict::new())))),
                Some(Object::Dict(src)) => {
                    let mut copy = Dict::new();
                    for (key, hash, value) in src.borrow().raw_items() {
                        copy.insert(key, hash, value);
                    }
                    Ok(Object::Dict(Rc::new(RefCell::new(copy))))
                }
                Some(other) => Err(RunError::exc(
                    ExcType::TypeError,
                    format!("'{}' object is not a mapping", other.type_name()),
                )),
            };
        }
        if Rc::ptr_eq(class, &types.object) {
            args.check_no_kwargs("object")?;
            let _ = args.exact::<0>("object")?;
            return Ok(Object::Instance(Instance::new(Rc::clone(class))));
        }

        // The remaining builtin types are not constructible.
        let is_core = [
            &types.none,
            &types.not_implemented,
            &types.ellipsis,
            &types.iterator,
            &types.function,
            &types.builtin_function,
            &types.method,
            &types.cell,
            &types.code,
        ]
        .into_iter()
        .any(|t| Rc::ptr_eq(class, t));
        if is_core {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!("cannot create '{}' instances", class.name()),
            ));
        }

        // User type: allocate an instance, then run __init__ if present.
        let instance = Object::Instance(Instance::new(Rc::clone(class)));
        if let Some(init) = class.lookup("__init__") {
            let bound = init.get(&instance, self)?;
            let result = self.call(&bound, args)?;
            if !result.is_none() {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!("__init__() should return None, not '{}'", result.type_name()),
                ));
            }
        } else if !args.is_empty() {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!("{}() takes no arguments", class.name()),
            ));
        }
        Ok(instance)
    }

    fn convert_via_slot(&mut self, obj: &Object, slot: Slot, target: &str) -> RunResult<Object> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, slot) {
            Some(SlotImpl::Unary(f)) => f(obj, self),
            Some(_) => Err(RunError::internal("conversion slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!(
                    "{target}() argument must be a string or a real number, not '{}'",
                    obj.type_name()
                ),
            )),
        }
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
    fn call_native() {
        let mut ts = ts();
        fn double(_ts: &mut ThreadState, args: CallArgs) -> RunResult<Object> {
            let [v] = args.exact("double")?;
            Ok(Object::Int(v.as_int().unwrap_or(0) * 2))
        }
        let f = Object::Native(NativeFunction::new(Rc::from("double"), double));
        let r = ts.call(&f, CallArgs::positional(vec![Object::Int(21)])).unwrap();
        assert_eq!(r.as_int(), Some(42));
    }

    #[test]
    fn builtin_type_conversions() {
        let mut ts = ts();
        let int_type = Object::Type(Rc::clone(&ts.interp().types.int));
        let r = ts
            .call(&int_type, CallArgs::positional(vec![Object::str("42")]))
            .unwrap();
        assert_eq!(r.as_int(), Some(42));
        let r = ts
            .call(&int_type, CallArgs::positional(vec![Object::Float(3.9)]))
            .unwrap();
        assert_eq!(r.as_int(), Some(3));

        let bool_type = Object::Type(Rc::clone(&ts.interp().types.bool_));
        let r = ts
            .call(&bool_type, CallArgs::positional(vec![Object::str("")]))
            .unwrap();
        assert!(matches!(r, Object::Bool(false)));
    }

    #[test]
    fn type_of_value() {
        let mut ts = ts();
        let type_type = Object::Type(Rc::clone(&ts.interp().types.type_));
        let r = ts
            .call(&type_type, CallArgs::positional(vec![Object::Int(1)]))
            .unwrap();
        let Object::Type(t) = r else { panic!("expected type") };
        assert_eq!(t.name(), "int");
    }

    #[test]
    fn uncallable_object() {
        let mut ts = ts();
        let err = ts.call(&Object::Int(3), CallArgs::default()).unwrap_err();
        assert!(err.is_exception_type(ExcType::TypeError));
    }
}
