//! Invariant checks on the dispatch machinery: jump arithmetic,
//! `ExtendedArg` chaining, cell lifecycles, stack discipline.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use krait::{
    BinaryOpKind, CodeBuilder, CodeFlags, ExcType, Frame, Function, Interpreter, Object, Opcode, RunError, ThreadState,
    VarKind,
    tracer::{RecordingTracer, VmTracer},
};

fn run(build: impl FnOnce(&mut CodeBuilder)) -> Result<Object, RunError> {
    let interp = Interpreter::new_rc();
    let mut b = CodeBuilder::new("<test>");
    build(&mut b);
    let function = Rc::new(Function::module(Rc::new(b.build()), &interp));
    let mut thread = ThreadState::new(interp);
    Frame::new(function, None).eval(&mut thread)
}

/// A dispatch tracer whose recording outlives the thread state.
#[derive(Clone, Default)]
struct SharedTracer(Rc<std::cell::RefCell<RecordingTracer>>);

impl VmTracer for SharedTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, arg: u32, frame_depth: usize) {
        self.0.borrow_mut().on_instruction(ip, opcode, arg, frame_depth);
    }
}

/// Runs and returns the executed instruction pointers alongside the result.
fn run_traced(build: impl FnOnce(&mut CodeBuilder)) -> (Result<Object, RunError>, Vec<usize>) {
    let interp = Interpreter::new_rc();
    let mut b = CodeBuilder::new("<test>");
    build(&mut b);
    let function = Rc::new(Function::module(Rc::new(b.build()), &interp));
    let tracer = SharedTracer::default();
    let mut thread = ThreadState::with_tracer(interp, Box::new(tracer.clone()));
    let result = Frame::new(function, None).eval(&mut thread);
    let ips = tracer.0.borrow().events.iter().map(|e| e.ip).collect();
    (result, ips)
}

#[test]
fn jump_round_trip_lands_one_past_the_origin() {
    // words: 0 JumpForward 2 | 1 (skipped) | 2 JumpForward 2 | 3 JumpBackward 2 | 4 (skipped) | 5 LoadConst | 6 Return
    //
    // Executing 0 jumps to 3; the backward jump of the same distance lands
    // at 2, one word past where the forward jump executed from.
    let (result, ips) = run_traced(|b| {
        let k = b.add_const(Object::Int(99));
        b.emit_arg(Opcode::JumpForward, 2); // 0
        b.emit(Opcode::Nop); // 1
        b.emit_arg(Opcode::JumpForward, 2); // 2: lands at 5
        b.emit_arg(Opcode::JumpBackward, 2); // 3: lands at 2
        b.emit(Opcode::Nop); // 4
        b.emit_arg(Opcode::LoadConst, k); // 5
        b.emit(Opcode::ReturnValue); // 6
    });
    assert_eq!(result.unwrap().as_int(), Some(99));
    assert_eq!(ips, vec![0, 3, 2, 5, 6]);
}

#[test]
fn extended_arg_chains_combine_left_shifted() {
    // A two-prefix chain addresses constant 0x1_02_03 = 66051.
    let wide_index = 0x0001_0203usize;
    let result = run(|b| {
        for i in 0..=wide_index {
            let _ = b.add_const(Object::Int(i as i64));
        }
        b.emit_arg(Opcode::LoadConst, wide_index as u32);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(66051));
}

#[test]
fn make_cell_preserves_prior_value() {
    // A slot holding a value before MakeCell reads back through LoadDeref.
    let result = run(|b| {
        let _ = b.add_var("x", VarKind::Cell);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        let k = b.add_const(Object::Int(42));
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::StoreFast, 0);
        b.emit_arg(Opcode::MakeCell, 0);
        b.emit_arg(Opcode::LoadDeref, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_int(), Some(42));

    // An empty slot becomes an empty cell; LoadDeref raises.
    let err = run(|b| {
        let _ = b.add_var("x", VarKind::Cell);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        b.emit_arg(Opcode::MakeCell, 0);
        b.emit_arg(Opcode::LoadDeref, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    assert!(err.is_exception_type(ExcType::UnboundLocalError));
}

#[test]
fn delete_deref_empties_the_cell() {
    let err = run(|b| {
        let _ = b.add_var("x", VarKind::Cell);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        let k = b.add_const(Object::Int(1));
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::StoreFast, 0);
        b.emit_arg(Opcode::MakeCell, 0);
        b.emit_arg(Opcode::DeleteDeref, 0);
        b.emit_arg(Opcode::LoadDeref, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    assert!(err.is_exception_type(ExcType::UnboundLocalError));
}

#[test]
fn store_then_load_fast_is_identity() {
    let result = run(|b| {
        let _ = b.add_var("x", VarKind::Plain);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        let k = b.add_const(Object::str("payload"));
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::StoreFast, 0);
        b.emit_arg(Opcode::LoadFast, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("payload"));
}

#[test]
fn delete_fast_unbinds() {
    let err = run(|b| {
        let _ = b.add_var("x", VarKind::Plain);
        b.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        let k = b.add_const(Object::Int(1));
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::StoreFast, 0);
        b.emit_arg(Opcode::DeleteFast, 0);
        b.emit_arg(Opcode::LoadFast, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    assert!(err.is_exception_type(ExcType::UnboundLocalError));
}

#[test]
fn build_tuple_then_unpack_restores_order() {
    // Push 1 2 3, pack, unpack: the stack holds the items in their
    // original order again, so popping rebuilds (1, 2, 3).
    let result = run(|b| {
        for v in 1..=3 {
            let k = b.add_const(Object::Int(v));
            b.emit_arg(Opcode::LoadConst, k);
        }
        b.emit_arg(Opcode::BuildTuple, 3);
        b.emit_arg(Opcode::UnpackSequence, 3);
        b.emit_arg(Opcode::BuildTuple, 3);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    let Object::Tuple(items) = result else { panic!("expected tuple") };
    // UnpackSequence pushes in reverse so assignments pop in source order;
    // repacking therefore reverses.
    let values: Vec<Option<i64>> = items.iter().map(Object::as_int).collect();
    assert_eq!(values, vec![Some(3), Some(2), Some(1)]);
}

#[test]
fn copy_and_swap() {
    let result = run(|b| {
        let one = b.add_const(Object::Int(1));
        let two = b.add_const(Object::Int(2));
        // stack: 1 2 -> swap -> 2 1 -> copy depth 2 -> 2 1 2
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::LoadConst, two);
        b.emit_arg(Opcode::Swap, 2);
        b.emit_arg(Opcode::Copy, 2);
        b.emit_arg(Opcode::BuildTuple, 3);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    let Object::Tuple(items) = result else { panic!("expected tuple") };
    let values: Vec<Option<i64>> = items.iter().map(Object::as_int).collect();
    assert_eq!(values, vec![Some(2), Some(1), Some(2)]);
}

#[test]
fn value_stack_overflow_is_an_internal_error() {
    let err = run(|b| {
        b.stacksize(1);
        let k = b.add_const(Object::Int(1));
        b.emit_arg(Opcode::LoadConst, k);
        b.emit_arg(Opcode::LoadConst, k);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap_err();
    let RunError::Internal(msg) = err else { panic!("expected internal error") };
    assert!(msg.contains("value stack overflow"));
    assert!(msg.contains("LoadConst"));
}

#[test]
fn empty_thread_surface_raises_system_error() {
    let interp = Interpreter::new_rc();
    let thread = ThreadState::new(interp);
    assert!(thread.current_frame().is_err());
    assert!(thread.globals().is_err());
    assert!(thread.builtins().is_err());
    assert!(thread.locals().is_err());
    assert!(thread.interpreter().is_err());
    let err = thread.current_frame().unwrap_err();
    assert!(err.is_exception_type(ExcType::SystemError));
}

#[test]
fn frame_stack_is_balanced_after_nested_calls() {
    let interp = Interpreter::new_rc();

    // def inner(): return 5
    let mut ib = CodeBuilder::new("inner");
    ib.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
    let k = ib.add_const(Object::Int(5));
    ib.emit_arg(Opcode::LoadConst, k);
    ib.emit(Opcode::ReturnValue);
    let inner = Object::Function(Rc::new(Function::module(Rc::new(ib.build()), &interp)));

    let mut b = CodeBuilder::new("<module>");
    let f = b.add_const(inner);
    b.emit(Opcode::PushNull);
    b.emit_arg(Opcode::LoadConst, f);
    b.emit_arg(Opcode::Call, 0);
    b.emit(Opcode::ReturnValue);
    let function = Rc::new(Function::module(Rc::new(b.build()), &interp));

    let mut thread = ThreadState::new(interp);
    let result = Frame::new(function, None).eval(&mut thread).unwrap();
    assert_eq!(result.as_int(), Some(5));
    assert!(thread.frames().is_empty());
}

#[test]
fn recursion_limit_raises_recursion_error() {
    // Run on a thread with a larger stack: the dispatch loop's per-frame
    // stack usage is big enough that 64 nested `eval` calls can exceed the
    // default test-thread stack before the interpreter's own recursion
    // check has a chance to fire.
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let interp = Interpreter::new_rc();

            // def f(): return f()   -- via a global self-reference
            let globals = Rc::new(std::cell::RefCell::new(krait::Dict::new()));
            let mut fb = CodeBuilder::new("f");
            fb.flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
            let _ = fb.add_name("f");
            fb.emit_arg(Opcode::LoadGlobal, 1); // (0 << 1) | 1: push null + f
            fb.emit_arg(Opcode::Call, 0);
            fb.emit(Opcode::ReturnValue);
            let f = Rc::new(Function::with_globals(Rc::new(fb.build()), Rc::clone(&globals), &interp));
            globals.borrow_mut().insert_str("f", Object::Function(Rc::clone(&f)));

            let mut thread = ThreadState::new(interp);
            thread.set_recursion_limit(64);
            let err = Frame::new(f, None).eval(&mut thread).unwrap_err();
            assert!(err.is_exception_type(ExcType::RecursionError));
            assert!(thread.frames().is_empty());
        })
        .expect("spawn test thread")
        .join()
        .expect("test thread panicked");
}

#[test]
fn binary_op_without_handlers_raises_type_error() {
    let interp = Interpreter::new_rc();
    let bare = krait::PyType::new_user("Bare", vec![Rc::clone(&interp.types.object)], vec![]).unwrap();
    let a = Object::Instance(krait::Instance::new(Rc::clone(&bare)));
    let b_obj = Object::Instance(krait::Instance::new(bare));
    let mut thread = ThreadState::new(interp);
    let err = thread.binary_op(BinaryOpKind::Add, &a, &b_obj).unwrap_err();
    let RunError::Exc(exc) = err else { panic!("expected exception") };
    assert_eq!(
        exc.message(),
        Some("unsupported operand type(s) for +: 'Bare' and 'Bare'")
    );
}

#[test]
fn for_iter_consumes_stop_iteration() {
    // Iterating an empty list: FOR_ITER pops the iterator and jumps; the
    // StopIteration never escapes.
    let result = run(|b| {
        let sentinel = b.add_const(Object::str("done"));
        b.emit_arg(Opcode::BuildList, 0);
        b.emit(Opcode::GetIter);
        let end = b.emit_jump(Opcode::ForIter);
        b.emit(Opcode::PopTop);
        b.patch_jump(end);
        b.emit_arg(Opcode::LoadConst, sentinel);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert_eq!(result.as_str(), Some("done"));
}

#[test]
fn is_and_is_not() {
    let result = run(|b| {
        let none = b.add_const(Object::None);
        b.emit_arg(Opcode::LoadConst, none);
        b.emit_arg(Opcode::LoadConst, none);
        b.emit_arg(Opcode::IsOp, 0);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert!(matches!(result, Object::Bool(true)));

    let result = run(|b| {
        let none = b.add_const(Object::None);
        let one = b.add_const(Object::Int(1));
        b.emit_arg(Opcode::LoadConst, none);
        b.emit_arg(Opcode::LoadConst, one);
        b.emit_arg(Opcode::IsOp, 1);
        b.emit(Opcode::ReturnValue);
    })
    .unwrap();
    assert!(matches!(result, Object::Bool(true)));
}
