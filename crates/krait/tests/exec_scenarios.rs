//! End-to-end execution scenarios: hand-assembled code objects run through
//! the full dispatch loop.

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;

use krait::{
    BinaryOpKind, CodeBuilder, CodeFlags, Frame, Function, Interpreter, Object, Opcode, PyType, RunError, ThreadState,
    TypeAttr, VarKind,
};

/// Builds and runs a module-level code object against a fresh interpreter.
fn run(build: impl FnOnce(&mut CodeBuilder)) -> Result<Object, RunError> {
    let interp = Interpreter::new_rc();
    run_with(&interp, build)
}

fn run_with(interp: &Rc<Interpreter>, build: impl FnOnce(&mut CodeBuilder)) -> Result<Object, RunError> {
    let mut b = CodeBuilder::new("<test>");
    build(&mut b);
    let code = Rc::new(b.build());
    let function = Rc::new(Function::module(code, interp));
    let mut thread = ThreadState::new(Rc::clone(interp));
    Frame::new(function, None).eval(&mut thread)
}

#[test]
fn scenario_add_two_constants() {
    let result = run(|b| {
        let one = b.add_const(Object::Int(1));
        let two = b.add_const(Object::Int(2));
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(3));
}

#[test]
fn scenario_unpack_through_names() {
    // Non-optimized module code: names resolve through the locals mapping,
    // which aliases globals at module level.
    let result = run(|b| {
        let t = b.add_const(Object::tuple(vec![Object::Int(10), Object::Int(20), Object::Int(30)]));
        let a = b.add_name("a");
        let b_name = b.add_name("b");
        let c = b.add_name("c");
        b.emit_arg(Opcode::LoadConst, t);
        b.emit_arg(Opcode::UnpackSequence, 3);
        b.emit_arg(Opcode::StoreName, a);
        b.emit_arg(Opcode::StoreName, b_name);
        b.emit_arg(Opcode::StoreName, c);
        b.emit_arg(Opcode::LoadName, b_name);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(20));
}

#[test]
fn scenario_for_loop_sum() {
    // total = 0
    // for item in [1, 2, 3, 4]:
    //     total = total + item
    // return total
    let result = run(|b| {
        let zero = b.add_const(Object::Int(0));
        let total = b.add_name("total");
        b.emit_arg(Opcode::LoadConst, zero);
        b.emit_arg(Opcode::StoreName, total);
        for v in 1..=4 {
            let k = b.add_const(Object::Int(v));
            b.emit_arg(Opcode::LoadConst, k);
        }
        b.emit_arg(Opcode::BuildList, 4);
        b.emit(Opcode::GetIter);
        let loop_start = b.current_offset();
        let end = b.emit_jump(Opcode::ForIter);
        b.emit_arg(Opcode::LoadName, total);
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
        b.emit_arg(Opcode::StoreName, total);
        b.emit_jump_back(Opcode::JumpBackward, loop_start);
        b.patch_jump(end);
        b.emit_arg(Opcode::LoadName, total);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(10));
}

#[test]
fn scenario_closure_cell() {
    let interp = Interpreter::new_rc();

    // inner: COPY_FREE_VARS 1; LOAD_DEREF 0; RETURN_VALUE
    let mut inner = CodeBuilder::new("outer.<locals>.inner");
    let _ = inner.add_var("x", VarKind::Free);
    inner.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED);
    inner.emit_arg(Opcode::CopyFreeVars, 1);
    inner.emit_arg(Opcode::LoadDeref, 0);
    inner.emit(Opcode::ReturnValue);
    let inner_code = Rc::new(inner.build());

    // outer: make a cell for x, store 7 through it, build the closure.
    let returned = run_with(&interp, |b| {
        let _ = b.add_var("x", VarKind::Cell);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        let seven = b.add_const(Object::Int(7));
        let code_const = b.add_const(Object::Code(Rc::clone(&inner_code)));
        let name_const = b.add_const(Object::str("inner"));
        b.emit_arg(Opcode::MakeCell, 0);
        b.emit_arg(Opcode::LoadConst, seven);
        b.emit_arg(Opcode::StoreDeref, 0);
        b.emit_arg(Opcode::LoadClosure, 0);
        b.emit_arg(Opcode::BuildTuple, 1);
        b.emit_arg(Opcode::LoadConst, code_const);
        b.emit_arg(Opcode::LoadConst, name_const);
        b.emit_arg(Opcode::MakeFunction, 0x8);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert!(matches!(returned, Object::Function(_)));

    // Invoke the returned function through the CALL protocol.
    let result = run_with(&interp, |b| {
        let f = b.add_const(returned.clone());
        b.emit(Opcode::PushNull);
        b.emit_arg(Opcode::LoadConst, f);
        b.emit_arg(Opcode::Precall, 0);
        b.emit_arg(Opcode::Call, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(7));
}

#[test]
fn scenario_load_method_fast_path() {
    let interp = Interpreter::new_rc();

    let bind_count = || {
        let Some(TypeAttr::Method(descr)) = interp.types.str_.own_attr("upper") else {
            panic!("str.upper is not a method descriptor");
        };
        descr.bind_count.get()
    };
    let baseline = bind_count();

    let result = run_with(&interp, |b| {
        let s = b.add_const(Object::str("ab"));
        let upper = b.add_name("upper");
        b.emit_arg(Opcode::LoadConst, s);
        b.emit_arg(Opcode::LoadMethod, upper);
        b.emit_arg(Opcode::Precall, 0);
        b.emit_arg(Opcode::Call, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("AB"));
    // The fast path never allocated a bound method.
    assert_eq!(bind_count(), baseline);

    // The ordinary attribute path binds exactly once.
    let result = run_with(&interp, |b| {
        let s = b.add_const(Object::str("ab"));
        let upper = b.add_name("upper");
        b.emit(Opcode::PushNull);
        b.emit_arg(Opcode::LoadConst, s);
        b.emit_arg(Opcode::LoadAttr, upper);
        b.emit_arg(Opcode::Precall, 0);
        b.emit_arg(Opcode::Call, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("AB"));
    assert_eq!(bind_count(), baseline + 1);
}

thread_local! {
    static DUNDER_CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn record(call: &'static str) {
    DUNDER_CALLS.with(|calls| calls.borrow_mut().push(call));
}

fn take_calls() -> Vec<&'static str> {
    DUNDER_CALLS.with(|calls| calls.borrow_mut().drain(..).collect())
}

fn parent_add(_ts: &mut ThreadState, _args: krait::CallArgs) -> Result<Object, RunError> {
    record("P.__add__");
    Ok(Object::NotImplemented)
}

fn child_radd(_ts: &mut ThreadState, _args: krait::CallArgs) -> Result<Object, RunError> {
    record("S.__radd__");
    Ok(Object::str("from-radd"))
}

#[test]
fn scenario_reflected_operation_prefers_subclass() {
    let interp = Interpreter::new_rc();
    let parent = PyType::new_user(
        "P",
        vec![Rc::clone(&interp.types.object)],
        vec![(
            Rc::from("__add__"),
            Object::Native(krait::NativeFunction::new(Rc::from("__add__"), parent_add)),
        )],
    )
    .unwrap();
    let child = PyType::new_user(
        "S",
        vec![Rc::clone(&parent)],
        vec![(
            Rc::from("__radd__"),
            Object::Native(krait::NativeFunction::new(Rc::from("__radd__"), child_radd)),
        )],
    )
    .unwrap();

    let p = Object::Instance(krait::Instance::new(Rc::clone(&parent)));
    let s = Object::Instance(krait::Instance::new(Rc::clone(&child)));

    // parent + child: the subclass's reflected handler is consulted first
    // and wins outright.
    take_calls();
    let result = run_with(&interp, |b| {
        let lhs = b.add_const(p.clone());
        let rhs = b.add_const(s.clone());
        b.emit_arg(Opcode::LoadConst, lhs);
        b.emit_arg(Opcode::LoadConst, rhs);
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("from-radd"));
    assert_eq!(take_calls(), vec!["S.__radd__"]);

    // child + parent: the (inherited) __add__ is consulted first; with no
    // __radd__ on the parent the operation fails.
    let err = run_with(&interp, |b| {
        let lhs = b.add_const(s);
        let rhs = b.add_const(p);
        b.emit_arg(Opcode::LoadConst, lhs);
        b.emit_arg(Opcode::LoadConst, rhs);
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    assert_eq!(take_calls(), vec!["P.__add__"]);
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(
        exc.message(),
        Some("unsupported operand type(s) for +: 'S' and 'P'")
    );
}

#[test]
fn call_with_keyword_names() {
    // def f(a, b): return (a, b)   called as f(1, b=2)
    let interp = Interpreter::new_rc();
    let mut fb = CodeBuilder::new("f");
    let _ = fb.add_var("a", VarKind::Plain);
    let _ = fb.add_var("b", VarKind::Plain);
    fb.arg_counts(2, 0, 0);
    fb.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    fb.emit_arg(Opcode::LoadFast, 0);
    fb.emit_arg(Opcode::LoadFast, 1);
    fb.emit_arg(Opcode::BuildTuple, 2);
    fb.emit(Opcode::ReturnValue);
    let f = Object::Function(Rc::new(Function::module(Rc::new(fb.build()), &interp)));

    let result = run_with(&interp, |b| {
        let f = b.add_const(f.clone());
        let one = b.add_const(Object::Int(1));
        let two = b.add_const(Object::Int(2));
        let kwnames = b.add_const(Object::tuple(vec![Object::str("b")]));
        b.emit(Opcode::PushNull);
        b.emit_arg(Opcode::LoadConst, f);
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::KwNames, kwnames);
        b.emit_arg(Opcode::Precall, 2);
        b.emit_arg(Opcode::Call, 2);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    let Object::Tuple(items) = result else { panic!("expected tuple") };
    assert_eq!(items[0].as_int(), Some(1));
    assert_eq!(items[1].as_int(), Some(2));
}

#[test]
fn call_function_ex_expands_arguments() {
    // def f(a, b, c): return a + b + c   called as f(*(1, 2), **{'c': 3})
    let interp = Interpreter::new_rc();
    let mut fb = CodeBuilder::new("f");
    for name in ["a", "b", "c"] {
        let _ = fb.add_var(name, VarKind::Plain);
    }
    fb.arg_counts(3, 0, 0);
    fb.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    fb.emit_arg(Opcode::LoadFast, 0);
    fb.emit_arg(Opcode::LoadFast, 1);
    fb.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    fb.emit_arg(Opcode::LoadFast, 2);
    fb.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    fb.emit(Opcode::ReturnValue);
    let f = Object::Function(Rc::new(Function::module(Rc::new(fb.build()), &interp)));

    let result = run_with(&interp, |b| {
        let f = b.add_const(f.clone());
        let pos = b.add_const(Object::tuple(vec![Object::Int(1), Object::Int(2)]));
        let key = b.add_const(Object::str("c"));
        let three = b.add_const(Object::Int(3));
        b.emit_arg(Opcode::LoadConst, f);
        b.emit_arg(Opcode::LoadConst, pos);
        b.emit_arg(Opcode::LoadConst, key);
        b.emit_arg(Opcode::LoadConst, three);
        b.emit_arg(Opcode::BuildMap, 1);
        b.emit_arg(Opcode::CallFunctionEx, 1);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(6));
}

#[test]
fn load_global_resolves_builtins_and_pushes_null() {
    let result = run(|b| {
        // "len" is name 0; the argument's low bit asks for the null
        // sentinel below the callable, so arg = (0 << 1) | 1.
        let _ = b.add_name("len");
        let t = b.add_const(Object::tuple(vec![Object::Int(1), Object::Int(2)]));
        b.emit_arg(Opcode::LoadGlobal, 1);
        b.emit_arg(Opcode::LoadConst, t);
        b.emit_arg(Opcode::Precall, 1);
        b.emit_arg(Opcode::Call, 1);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(2));
}

#[test]
fn name_errors_have_python_messages() {
    let err = run(|b| {
        let missing = b.add_name("missing");
        b.emit_arg(Opcode::LoadName, missing);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(exc.message(), Some("name 'missing' is not defined"));

    let err = run(|b| {
        let _ = b.add_var("x", VarKind::Plain);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        b.emit_arg(Opcode::LoadFast, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(
        exc.message(),
        Some("cannot access local variable 'x' where it is not associated with a value")
    );
}

#[test]
fn attribute_round_trip_on_instances() {
    let interp = Interpreter::new_rc();
    let class = PyType::new_user("Point", vec![Rc::clone(&interp.types.object)], vec![]).unwrap();
    let point = Object::Instance(krait::Instance::new(class));

    let result = run_with(&interp, |b| {
        let obj = b.add_const(point.clone());
        let val = b.add_const(Object::Int(11));
        let x = b.add_name("x");
        // point.x = 11; return point.x
        b.emit_arg(Opcode::LoadConst, val);
        b.emit_arg(Opcode::LoadConst, obj);
        b.emit_arg(Opcode::StoreAttr, x);
        b.emit_arg(Opcode::LoadConst, obj);
        b.emit_arg(Opcode::LoadAttr, x);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(11));

    let err = run_with(&interp, |b| {
        let obj = b.add_const(point.clone());
        let x = b.add_name("x");
        b.emit_arg(Opcode::LoadConst, obj);
        b.emit_arg(Opcode::DeleteAttr, x);
        b.emit_arg(Opcode::LoadConst, obj);
        b.emit_arg(Opcode::LoadAttr, x);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(exc.message(), Some("'Point' object has no attribute 'x'"));
}

#[test]
fn dict_merge_rejects_duplicate_keyword() {
    // f(**{'a': 1}, **{'a': 2}) style merge conflict.
    let interp = Interpreter::new_rc();
    let mut fb = CodeBuilder::new("f");
    let _ = fb.add_var("a", VarKind::Plain);
    fb.arg_counts(1, 0, 0);
    fb.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    fb.emit_arg(Opcode::LoadFast, 0);
    fb.emit(Opcode::ReturnValue);
    let f = Object::Function(Rc::new(Function::module(Rc::new(fb.build()), &interp)));

    let err = run_with(&interp, |b| {
        let f = b.add_const(f.clone());
        let empty = b.add_const(Object::tuple(vec![]));
        let key = b.add_const(Object::str("a"));
        let one = b.add_const(Object::Int(1));
        let two = b.add_const(Object::Int(2));
        b.emit_arg(Opcode::LoadConst, f);
        b.emit_arg(Opcode::LoadConst, empty);
        // first kwargs dict
        b.emit_arg(Opcode::LoadConst, key);
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::BuildMap, 1);
        // second kwargs dict merged in
        b.emit_arg(Opcode::LoadConst, key);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::BuildMap, 1);
        b.emit_arg(Opcode::DictMerge, 1);
        b.emit_arg(Opcode::CallFunctionEx, 1);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(
        exc.message(),
        Some("f() got multiple values for keyword argument 'a'")
    );
}

#[test]
fn unpack_ex_builds_middle_list() {
    let result = run(|b| {
        let t = b.add_const(Object::tuple((1..=5).map(Object::Int).collect()));
        // a, *rest, z = (1, 2, 3, 4, 5); return rest
        b.emit_arg(Opcode::LoadConst, t);
        b.emit_arg(Opcode::UnpackEx, (1 << 8) | 1);
        b.emit(Opcode::PopTop);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    let Object::List(items) = result else { panic!("expected list") };
    let values: Vec<Option<i64>> = items.borrow().iter().map(Object::as_int).collect();
    assert_eq!(values, vec![Some(2), Some(3), Some(4)]);
}

#[test]
fn conditional_jumps_and_comparison() {
    // return 'yes' if 2 < 3 else 'no'
    let result = run(|b| {
        let two = b.add_const(Object::Int(2));
        let three = b.add_const(Object::Int(3));
        let yes = b.add_const(Object::str("yes"));
        let no = b.add_const(Object::str("no"));
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::LoadConst, three);
        b.emit_arg(Opcode::CompareOp, krait::CompareOpKind::Lt as u32);
        let else_branch = b.emit_jump(Opcode::PopJumpForwardIfFalse);
        b.emit_arg(Opcode::LoadConst, yes);
        b.emit(Opcode::ReturnValue);
        b.patch_jump(else_branch);
        b.emit_arg(Opcode::LoadConst, no);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("yes"));
}

#[test]
fn subscripts_and_containment() {
    let result = run(|b| {
        let key = b.add_const(Object::str("k"));
        let val = b.add_const(Object::Int(5));
        // d = {'k': 5}; return d['k']
        b.emit_arg(Opcode::LoadConst, key);
        b.emit_arg(Opcode::LoadConst, val);
        b.emit_arg(Opcode::BuildMap, 1);
        b.emit_arg(Opcode::LoadConst, key);
        b.emit(Opcode::BinarySubscr);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(5));

    // `2 in (1, 2, 3)`: the item sits below the container on the stack.
    let result = run(|b| {
        let item = b.add_const(Object::Int(2));
        b.emit_arg(Opcode::LoadConst, item);
        for v in 1..=3 {
            let k = b.add_const(Object::Int(v));
            b.emit_arg(Opcode::LoadConst, k);
        }
        b.emit_arg(Opcode::BuildTuple, 3);
        b.emit_arg(Opcode::ContainsOp, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert!(matches!(result, Object::Bool(true)));
}
