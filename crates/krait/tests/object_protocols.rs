//! Descriptor, truthiness, repr and locals behavior exercised through the
//! host-facing API.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use krait::{
    CallArgs, CodeBuilder, CodeFlags, ExcType, Frame, Function, Instance, Interpreter, Object, Opcode, PyType,
    RunError, ThreadState, VarKind,
};

fn thread() -> ThreadState {
    ThreadState::new(Interpreter::new_rc())
}

#[test]
fn cell_contents_is_a_data_descriptor() {
    let mut ts = thread();
    let cell = Object::Cell(Rc::new(krait::Cell::empty()));
    let name: Rc<str> = Rc::from("cell_contents");

    // Empty cell: reading raises ValueError.
    let err = ts.getattr(&cell, &name).unwrap_err();
    assert!(err.is_exception_type(ExcType::ValueError));

    // The set handle fills the cell.
    ts.setattr(&cell, &name, Object::Int(9)).unwrap();
    assert_eq!(ts.getattr(&cell, &name).unwrap().as_int(), Some(9));

    // The delete handle empties it again.
    ts.delattr(&cell, &name).unwrap();
    let err = ts.delattr(&cell, &name).unwrap_err();
    assert!(err.is_exception_type(ExcType::ValueError));
}

#[test]
fn function_dunder_attributes() {
    let interp = Interpreter::new_rc();
    let mut b = CodeBuilder::new("sample");
    b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    let k = b.add_const(Object::None);
    b.emit_arg(Opcode::LoadConst, k);
    b.emit(Opcode::ReturnValue);
    let f = Object::Function(Rc::new(Function::module(Rc::new(b.build()), &interp)));

    let mut ts = ThreadState::new(interp);
    let name: Rc<str> = Rc::from("__name__");
    assert_eq!(ts.getattr(&f, &name).unwrap().as_str(), Some("sample"));

    let defaults: Rc<str> = Rc::from("__defaults__");
    assert!(ts.getattr(&f, &defaults).unwrap().is_none());

    // Members reject writes with an AttributeError.
    let err = ts.setattr(&f, &defaults, Object::Int(1)).unwrap_err();
    assert!(err.is_exception_type(ExcType::AttributeError));

    let code: Rc<str> = Rc::from("__code__");
    assert!(matches!(ts.getattr(&f, &code).unwrap(), Object::Code(_)));
}

#[test]
fn truthiness_follows_bool_then_len() {
    let mut ts = thread();
    assert!(!ts.truthy(&Object::None).unwrap());
    assert!(!ts.truthy(&Object::Int(0)).unwrap());
    assert!(ts.truthy(&Object::Int(-1)).unwrap());
    assert!(!ts.truthy(&Object::str("")).unwrap());
    assert!(ts.truthy(&Object::str("x")).unwrap());
    assert!(!ts.truthy(&Object::list(vec![])).unwrap());
    assert!(ts.truthy(&Object::list(vec![Object::None])).unwrap());
    // No bool slot, no len slot: objects default to true.
    let class = PyType::new_user("Blank", vec![Rc::clone(&ts.interp().types.object)], vec![]).unwrap();
    assert!(ts.truthy(&Object::Instance(Instance::new(class))).unwrap());
}

#[test]
fn repr_handles_self_reference() {
    let mut ts = thread();
    let inner = Object::list(vec![Object::Int(1)]);
    let Object::List(list) = &inner else { unreachable!() };
    list.borrow_mut().push(inner.clone());
    let rendered = ts.repr(&inner).unwrap();
    assert_eq!(&*rendered, "[1, ...]");
}

#[test]
fn repr_of_builtin_values() {
    let mut ts = thread();
    assert_eq!(&*ts.repr(&Object::Int(5)).unwrap(), "5");
    assert_eq!(&*ts.repr(&Object::Float(1.0)).unwrap(), "1.0");
    assert_eq!(&*ts.repr(&Object::str("a'b")).unwrap(), "\"a'b\"");
    assert_eq!(&*ts.repr(&Object::None).unwrap(), "None");
    assert_eq!(&*ts.repr(&Object::Bool(true)).unwrap(), "True");
    let t = Object::tuple(vec![Object::Int(1), Object::str("x")]);
    assert_eq!(&*ts.repr(&t).unwrap(), "(1, 'x')");
    let d = {
        let mut dict = krait::Dict::new();
        dict.insert_str("k", Object::Int(1));
        Object::Dict(Rc::new(std::cell::RefCell::new(dict)))
    };
    assert_eq!(&*ts.repr(&d).unwrap(), "{'k': 1}");
}

#[test]
fn user_class_instantiation_runs_init() {
    // class Box:
    //     def __init__(self, value):
    //         self.value = value
    let interp = Interpreter::new_rc();
    let mut ib = CodeBuilder::new("Box.__init__");
    let _ = ib.add_var("self", VarKind::Plain);
    let _ = ib.add_var("value", VarKind::Plain);
    ib.arg_counts(2, 0, 0);
    ib.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    let value_name = ib.add_name("value");
    let none = ib.add_const(Object::None);
    ib.emit_arg(Opcode::LoadFast, 1);
    ib.emit_arg(Opcode::LoadFast, 0);
    ib.emit_arg(Opcode::StoreAttr, value_name);
    ib.emit_arg(Opcode::LoadConst, none);
    ib.emit(Opcode::ReturnValue);
    let init = Object::Function(Rc::new(Function::module(Rc::new(ib.build()), &interp)));

    let class = PyType::new_user(
        "Box",
        vec![Rc::clone(&interp.types.object)],
        vec![(Rc::from("__init__"), init)],
    )
    .unwrap();

    let mut ts = ThreadState::new(interp);
    let boxed = ts
        .call(
            &Object::Type(class),
            CallArgs::positional(vec![Object::Int(31)]),
        )
        .unwrap();
    let value: Rc<str> = Rc::from("value");
    assert_eq!(ts.getattr(&boxed, &value).unwrap().as_int(), Some(31));
}

#[test]
fn user_dunders_drive_operators_and_len() {
    // class Vec with __len__ and __bool__ via __len__ fallback.
    fn vec_len(_ts: &mut ThreadState, args: CallArgs) -> Result<Object, RunError> {
        let [_recv] = args.exact("__len__")?;
        Ok(Object::Int(0))
    }
    let interp = Interpreter::new_rc();
    let class = PyType::new_user(
        "Vec",
        vec![Rc::clone(&interp.types.object)],
        vec![(
            Rc::from("__len__"),
            Object::Native(krait::NativeFunction::new(Rc::from("__len__"), vec_len)),
        )],
    )
    .unwrap();
    let mut ts = ThreadState::new(interp);
    let v = Object::Instance(Instance::new(class));
    assert_eq!(ts.len_of(&v).unwrap(), 0);
    // len() == 0 makes the instance falsy.
    assert!(!ts.truthy(&v).unwrap());
}

#[test]
fn materialized_locals_snapshot() {
    let interp = Interpreter::new_rc();
    let mut b = CodeBuilder::new("f");
    let _ = b.add_var("x", VarKind::Plain);
    let _ = b.add_var("c", VarKind::Cell);
    b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    let function = Rc::new(Function::module(Rc::new(b.build()), &interp));
    let frame = Frame::new(function, None);
    // Nothing bound yet: the snapshot is empty.
    let Object::Dict(locals) = frame.materialized_locals() else {
        panic!("expected dict");
    };
    assert_eq!(locals.borrow().len(), 0);
}

#[test]
fn unhashable_types_are_rejected_as_dict_keys() {
    let mut ts = thread();
    let err = ts.hash_object(&Object::list(vec![])).unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(exc.message(), Some("unhashable type: 'list'"));

    let hash_int = ts.hash_object(&Object::Int(1)).unwrap();
    let hash_float = ts.hash_object(&Object::Float(1.0)).unwrap();
    let hash_true = ts.hash_object(&Object::Bool(true)).unwrap();
    assert_eq!(hash_int, hash_float);
    assert_eq!(hash_int, hash_true);
}

#[test]
fn str_methods_via_call_protocol() {
    let mut ts = thread();
    let s = Object::str("  a,b  ");
    let strip: Rc<str> = Rc::from("strip");
    let bound = ts.getattr(&s, &strip).unwrap();
    let stripped = ts.call(&bound, CallArgs::default()).unwrap();
    assert_eq!(stripped.as_str(), Some("a,b"));

    let split: Rc<str> = Rc::from("split");
    let bound = ts.getattr(&stripped, &split).unwrap();
    let parts = ts
        .call(&bound, CallArgs::positional(vec![Object::str(",")]))
        .unwrap();
    let Object::List(parts) = parts else { panic!("expected list") };
    assert_eq!(parts.borrow().len(), 2);
}
