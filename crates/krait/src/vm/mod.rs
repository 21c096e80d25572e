//! The per-thread execution engine: the frame stack and the dispatch loop.
//!
//! One `ThreadState` belongs to one host thread (every value is an `Rc`,
//! so the type is `!Send` by construction). Evaluation is recursive: a
//! `Call` that reaches a def function pushes a frame onto this thread's
//! stack and re-enters the loop; `ReturnValue` pops it.

pub mod attr;
pub mod binary;
pub mod call;
pub mod collections;
pub mod compare;

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    cell::Cell,
    code::VarKind,
    exception::{ExcType, RunError, RunResult},
    frame::Frame,
    function::Function,
    interp::Interpreter,
    object::Object,
    opcode::{BinaryOpKind, CompareOpKind, Opcode},
    tracer::{NoopTracer, VmTracer},
    types::{Slot, SlotImpl, dict::Dict},
};

use call::CallArgs;

/// Default bound on the frame-stack depth.
///
/// Evaluation recurses on the host stack, so this limit is what stands
/// between deep Python recursion and a host stack overflow.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// What the dispatch loop should do after one instruction.
enum Flow {
    Continue,
    Return(Object),
}

/// The state of one logical Python thread: its frame stack plus the
/// ambient interpreter reference.
pub struct ThreadState {
    interp: Rc<Interpreter>,
    frames: Vec<Frame>,
    recursion_limit: usize,
    tracer: Box<dyn VmTracer>,
    /// Addresses of containers currently being rendered by `repr`;
    /// re-entry prints `...` instead of recursing forever.
    repr_guard: Vec<usize>,
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadState(depth={})", self.frames.len())
    }
}

impl ThreadState {
    /// Creates a thread state bound to an interpreter.
    #[must_use]
    pub fn new(interp: Rc<Interpreter>) -> Self {
        Self::with_tracer(interp, Box::new(NoopTracer))
    }

    /// Creates a thread state with a custom dispatch tracer.
    #[must_use]
    pub fn with_tracer(interp: Rc<Interpreter>, tracer: Box<dyn VmTracer>) -> Self {
        Self {
            interp,
            frames: Vec::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            tracer,
            repr_guard: Vec::new(),
        }
    }

    /// Replaces the recursion limit (the frame-stack depth bound).
    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit;
    }

    /// The ambient interpreter.
    #[must_use]
    pub fn interp(&self) -> &Interpreter {
        &self.interp
    }

    /// The live frame stack, bottom first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    // --- thread-state surface ---

    /// The currently executing frame.
    pub fn current_frame(&self) -> RunResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| RunError::exc(ExcType::SystemError, "no current frame on this thread"))
    }

    /// The prior frame of the one at `depth` from the top (`f_back`).
    #[must_use]
    pub fn back_frame(&self, depth: usize) -> Option<&Frame> {
        self.frames.len().checked_sub(depth + 2).map(|i| &self.frames[i])
    }

    /// The current globals dict.
    pub fn globals(&self) -> RunResult<Rc<std::cell::RefCell<Dict>>> {
        Ok(self.current_frame()?.globals())
    }

    /// The current builtins mapping.
    pub fn builtins(&self) -> RunResult<Rc<std::cell::RefCell<Dict>>> {
        Ok(self.current_frame()?.builtins())
    }

    /// The current locals mapping, materialized on demand.
    pub fn locals(&self) -> RunResult<Object> {
        Ok(self.current_frame()?.materialized_locals())
    }

    /// The current interpreter, read from the top frame.
    pub fn interpreter(&self) -> RunResult<Rc<Interpreter>> {
        Ok(Rc::clone(self.current_frame()?.function().interp()))
    }

    // --- evaluation ---

    /// Pushes `frame` and runs its dispatch loop to completion.
    ///
    /// The frame is popped again on every exit path; a Python exception or
    /// internal error unwinds cleanly and re-raises.
    pub(crate) fn eval(&mut self, frame: Frame) -> RunResult<Object> {
        if self.frames.len() >= self.recursion_limit {
            return Err(RunError::exc(
                ExcType::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        self.tracer.on_frame_push(frame.function().qualname());
        self.frames.push(frame);
        let result = self.run_top();
        let frame = self.frames.pop().expect("frame stack corrupted during eval");
        self.tracer.on_frame_pop(frame.function().qualname());
        result
    }

    /// The dispatch loop over the top frame's instruction stream.
    fn run_top(&mut self) -> RunResult<Object> {
        let mut ext: u32 = 0;
        let mut kwnames: Option<Vec<Rc<str>>> = None;
        loop {
            let instr_ip = self.frame_ref().ip;
            let word = self.frame().fetch_word()?;
            let Some(op) = Opcode::from_word(word) else {
                return Err(RunError::internal(format!(
                    "invalid opcode {:#04x} at ip {instr_ip}",
                    word >> 8
                )));
            };
            let arg = ext | u32::from(word & 0xff);
            if op == Opcode::ExtendedArg {
                // Prefixes chain: each shifts the accumulated argument by
                // one byte and ORs in the next word's argument.
                ext = arg << 8;
                continue;
            }
            ext = 0;

            let depth = self.frames.len();
            self.tracer.on_instruction(instr_ip, op, arg, depth);

            match self.execute(op, arg, &mut kwnames) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(err) => return Err(err.with_loop_context(op, instr_ip)),
            }
        }
    }

    /// The reserved asynchronous-event poll at backward jumps. A no-op
    /// extension point in this engine.
    #[inline]
    fn poll_interrupt(&mut self) -> RunResult<()> {
        Ok(())
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn frame_ref(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn push(&mut self, value: Object) -> RunResult<()> {
        self.frame().push(value)
    }

    fn pop(&mut self) -> RunResult<Object> {
        self.frame().pop()
    }

    /// Pops the top `n` values, preserving stack order in the result.
    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Object>> {
        let frame = self.frame();
        if frame.stack.len() < n {
            return Err(RunError::internal("value stack underflow"));
        }
        let at = frame.stack.len() - n;
        Ok(frame.stack.split_off(at))
    }

    fn jump_forward(&mut self, distance: usize) -> RunResult<()> {
        let frame = self.frame();
        let target = frame.ip + distance;
        if target > frame.code().len() {
            return Err(RunError::internal("forward jump past the end of the code"));
        }
        frame.ip = target;
        Ok(())
    }

    fn jump_backward(&mut self, distance: usize) -> RunResult<()> {
        let frame = self.frame();
        let Some(target) = frame.ip.checked_sub(distance) else {
            return Err(RunError::internal("backward jump before the start of the code"));
        };
        frame.ip = target;
        Ok(())
    }

    #[expect(clippy::too_many_lines, reason = "one arm per opcode")]
    fn execute(&mut self, op: Opcode, arg: u32, kwnames: &mut Option<Vec<Rc<str>>>) -> RunResult<Flow> {
        match op {
            Opcode::Nop | Opcode::Resume | Opcode::Cache | Opcode::Precall => {}
            Opcode::ExtendedArg => {
                return Err(RunError::internal("ExtendedArg must be folded by the fetch loop"));
            }

            // ============================================================
            // Stack shuffling
            // ============================================================
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::PushNull => self.push(Object::Undefined)?,
            Opcode::Copy => {
                if arg == 0 {
                    return Err(RunError::internal("Copy needs a positive operand"));
                }
                let value = self.frame_ref().peek(arg as usize)?.clone();
                self.push(value)?;
            }
            Opcode::Swap => {
                let depth = arg as usize;
                let frame = self.frame();
                let len = frame.stack.len();
                if depth == 0 || depth > len {
                    return Err(RunError::internal("Swap operand out of range"));
                }
                frame.stack.swap(len - 1, len - depth);
            }

            // ============================================================
            // Constants and fast locals
            // ============================================================
            Opcode::LoadConst => {
                let value = self.frame_ref().code().const_at(arg as usize)?;
                self.push(value)?;
            }
            Opcode::LoadFast | Opcode::LoadClosure => {
                let slot = arg as usize;
                let value = {
                    let frame = self.frame_ref();
                    match frame.fast.get(slot) {
                        None => return Err(RunError::internal("fast-local index out of range")),
                        Some(Object::Undefined) => {
                            let name = frame.code().layout.name_of(slot).to_owned();
                            return Err(ExcType::unbound_local(&name));
                        }
                        Some(value) => value.clone(),
                    }
                };
                self.push(value)?;
            }
            Opcode::StoreFast => {
                let value = self.pop()?;
                let slot = arg as usize;
                let frame = self.frame();
                match frame.fast.get_mut(slot) {
                    Some(entry) => *entry = value,
                    None => return Err(RunError::internal("fast-local index out of range")),
                }
            }
            Opcode::DeleteFast => {
                let slot = arg as usize;
                {
                    let frame = self.frame_ref();
                    match frame.fast.get(slot) {
                        None => return Err(RunError::internal("fast-local index out of range")),
                        Some(Object::Undefined) => {
                            let name = frame.code().layout.name_of(slot).to_owned();
                            return Err(ExcType::unbound_local(&name));
                        }
                        Some(_) => {}
                    }
                }
                self.frame().fast[slot] = Object::Undefined;
            }

            // ============================================================
            // Cells and closures
            // ============================================================
            Opcode::MakeCell => {
                let slot = arg as usize;
                let frame = self.frame();
                let Some(entry) = frame.fast.get_mut(slot) else {
                    return Err(RunError::internal("MakeCell slot out of range"));
                };
                let current = std::mem::replace(entry, Object::Undefined);
                let cell = if current.is_undefined() {
                    Cell::empty()
                } else {
                    Cell::new(current)
                };
                *entry = Object::Cell(Rc::new(cell));
            }
            Opcode::CopyFreeVars => {
                let count = arg as usize;
                let frame = self.frame();
                let closure: Vec<Rc<Cell>> = frame.function.closure().to_vec();
                if closure.len() < count {
                    return Err(RunError::internal("CopyFreeVars exceeds the function's closure"));
                }
                let first_free = frame.code().layout.first_free();
                if first_free + count > frame.fast.len() {
                    return Err(RunError::internal("CopyFreeVars exceeds the free-variable slice"));
                }
                for (offset, cell) in closure.into_iter().take(count).enumerate() {
                    frame.fast[first_free + offset] = Object::Cell(cell);
                }
            }
            Opcode::LoadDeref => {
                let value = self.cell_at(arg as usize, |cell, frame, slot| {
                    cell.get().ok_or_else(|| unbound_deref(frame, slot))
                })?;
                self.push(value)?;
            }
            Opcode::StoreDeref => {
                let value = self.pop()?;
                self.cell_at(arg as usize, move |cell, _, _| {
                    cell.set(value);
                    Ok(())
                })?;
            }
            Opcode::DeleteDeref => {
                self.cell_at(arg as usize, |cell, frame, slot| {
                    cell.clear().map(|_| ()).ok_or_else(|| unbound_deref(frame, slot))
                })?;
            }

            // ============================================================
            // Name resolution
            // ============================================================
            Opcode::LoadName => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let value = match self.locals_load(&name)? {
                    Some(value) => value,
                    None => self
                        .namespace_load(&name)?
                        .ok_or_else(|| ExcType::name_error(&name))?,
                };
                self.push(value)?;
            }
            Opcode::StoreName => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let value = self.pop()?;
                self.locals_store(&name, value)?;
            }
            Opcode::DeleteName => {
                let name = self.frame_ref().code().name(arg as usize)?;
                self.locals_delete(&name)?;
            }
            Opcode::LoadGlobal => {
                let name = self.frame_ref().code().name((arg >> 1) as usize)?;
                let value = self
                    .namespace_load(&name)?
                    .ok_or_else(|| ExcType::name_error(&name))?;
                if arg & 1 == 1 {
                    self.push(Object::Undefined)?;
                }
                self.push(value)?;
            }
            Opcode::StoreGlobal => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let value = self.pop()?;
                let globals = self.frame_ref().globals();
                globals.borrow_mut().insert_str(&name, value);
            }
            Opcode::DeleteGlobal => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let globals = self.frame_ref().globals();
                let removed = globals.borrow_mut().remove_str(&name);
                if removed.is_none() {
                    return Err(ExcType::name_error(&name));
                }
            }

            // ============================================================
            // Attributes
            // ============================================================
            Opcode::LoadAttr => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let obj = self.pop()?;
                let value = self.getattr(&obj, &name)?;
                self.push(value)?;
            }
            Opcode::StoreAttr => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let obj = self.pop()?;
                let value = self.pop()?;
                self.setattr(&obj, &name, value)?;
            }
            Opcode::DeleteAttr => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let obj = self.pop()?;
                self.delattr(&obj, &name)?;
            }
            Opcode::LoadMethod => {
                let name = self.frame_ref().code().name(arg as usize)?;
                let obj = self.pop()?;
                let (callable, receiver_or_value) = self.load_method(&obj, &name)?;
                self.push(callable)?;
                self.push(receiver_or_value)?;
            }

            // ============================================================
            // Unary and binary operations
            // ============================================================
            Opcode::UnaryNegative => {
                let operand = self.pop()?;
                let result = self.unary_op(Slot::Neg, "-", &operand)?;
                self.push(result)?;
            }
            Opcode::UnaryPositive => {
                let operand = self.pop()?;
                let result = self.unary_op(Slot::Pos, "+", &operand)?;
                self.push(result)?;
            }
            Opcode::UnaryInvert => {
                let operand = self.pop()?;
                let result = self.unary_op(Slot::Invert, "~", &operand)?;
                self.push(result)?;
            }
            Opcode::UnaryNot => {
                let operand = self.pop()?;
                let truth = self.truthy(&operand)?;
                self.push(Object::Bool(!truth))?;
            }
            Opcode::BinaryOp => {
                let kind = BinaryOpKind::from_repr(arg as u8)
                    .ok_or_else(|| RunError::internal(format!("invalid BinaryOp sub-opcode {arg}")))?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.binary_op(kind, &lhs, &rhs)?;
                self.push(result)?;
            }

            // ============================================================
            // Subscripts
            // ============================================================
            Opcode::BinarySubscr => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let result = self.getitem(&obj, &key)?;
                self.push(result)?;
            }
            Opcode::StoreSubscr => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let value = self.pop()?;
                self.setitem(&obj, &key, value)?;
            }
            Opcode::DeleteSubscr => {
                let key = self.pop()?;
                let obj = self.pop()?;
                self.delitem(&obj, &key)?;
            }

            // ============================================================
            // Comparisons
            // ============================================================
            Opcode::CompareOp => {
                let kind = CompareOpKind::from_repr(arg as u8)
                    .ok_or_else(|| RunError::internal(format!("invalid CompareOp sub-opcode {arg}")))?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.compare_op(kind, &lhs, &rhs)?;
                self.push(result)?;
            }
            Opcode::IsOp => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let identical = lhs.is(&rhs);
                self.push(Object::Bool(identical != (arg == 1)))?;
            }
            Opcode::ContainsOp => {
                let container = self.pop()?;
                let item = self.pop()?;
                let found = self.contains_op(&container, &item)?;
                self.push(Object::Bool(found != (arg == 1)))?;
            }

            // ============================================================
            // Container construction
            // ============================================================
            Opcode::BuildTuple => {
                let items = self.pop_n(arg as usize)?;
                self.push(Object::tuple(items))?;
            }
            Opcode::BuildList => {
                let items = self.pop_n(arg as usize)?;
                self.push(Object::list(items))?;
            }
            Opcode::BuildMap => {
                let pairs = self.pop_n(2 * arg as usize)?;
                let map = self.build_map(pairs)?;
                self.push(map)?;
            }
            Opcode::BuildConstKeyMap => {
                let keys = self.pop()?;
                let values = self.pop_n(arg as usize)?;
                let map = self.build_const_key_map(&keys, values)?;
                self.push(map)?;
            }
            Opcode::ListAppend => {
                let value = self.pop()?;
                let target = self.frame_ref().peek(arg as usize)?.clone();
                let Object::List(list) = target else {
                    return Err(RunError::internal("ListAppend target is not a list"));
                };
                list.borrow_mut().push(value);
            }
            Opcode::ListExtend => {
                let iterable = self.pop()?;
                let target = self.frame_ref().peek(arg as usize)?.clone();
                let Object::List(list) = target else {
                    return Err(RunError::internal("ListExtend target is not a list"));
                };
                let items = self.collect_iterable(&iterable)?;
                list.borrow_mut().extend(items);
            }
            Opcode::ListToTuple => {
                let list = self.pop()?;
                let Object::List(items) = list else {
                    return Err(RunError::internal("ListToTuple operand is not a list"));
                };
                let items = items.borrow().clone();
                self.push(Object::tuple(items))?;
            }
            Opcode::DictUpdate => {
                let other = self.pop()?;
                let target = self.frame_ref().peek(arg as usize)?.clone();
                self.dict_update(&target, &other)?;
            }
            Opcode::DictMerge => {
                let other = self.pop()?;
                let target = self.frame_ref().peek(arg as usize)?.clone();
                let callee = self.frame_ref().peek(arg as usize + 2)?.clone();
                self.dict_merge(&target, &other, &callee)?;
            }

            // ============================================================
            // Unpacking
            // ============================================================
            Opcode::UnpackSequence => {
                let obj = self.pop()?;
                let items = self.unpack_sequence(&obj, arg as usize)?;
                for item in items.into_iter().rev() {
                    self.push(item)?;
                }
            }
            Opcode::UnpackEx => {
                let before = (arg & 0xff) as usize;
                let after = (arg >> 8) as usize;
                let obj = self.pop()?;
                let (head, middle, tail) = self.unpack_ex(&obj, before, after)?;
                for item in tail.into_iter().rev() {
                    self.push(item)?;
                }
                self.push(Object::list(middle))?;
                for item in head.into_iter().rev() {
                    self.push(item)?;
                }
            }

            // ============================================================
            // Iteration
            // ============================================================
            Opcode::GetIter => {
                let obj = self.pop()?;
                let iter = self.iterate(&obj)?;
                self.push(iter)?;
            }
            Opcode::ForIter => {
                let iter = self.frame_ref().top()?.clone();
                match self.iter_next(&iter)? {
                    Some(value) => self.push(value)?,
                    None => {
                        // Exhausted: drop the iterator and jump past the
                        // loop body.
                        self.pop()?;
                        self.jump_forward(arg as usize)?;
                    }
                }
            }

            // ============================================================
            // Jumps
            // ============================================================
            Opcode::JumpForward => self.jump_forward(arg as usize)?,
            Opcode::JumpBackward | Opcode::JumpBackwardNoInterrupt | Opcode::JumpBackwardQuick => {
                self.poll_interrupt()?;
                self.jump_backward(arg as usize)?;
            }
            Opcode::PopJumpForwardIfTrue => {
                let value = self.pop()?;
                if self.truthy(&value)? {
                    self.jump_forward(arg as usize)?;
                }
            }
            Opcode::PopJumpForwardIfFalse => {
                let value = self.pop()?;
                if !self.truthy(&value)? {
                    self.jump_forward(arg as usize)?;
                }
            }
            Opcode::PopJumpForwardIfNone => {
                let value = self.pop()?;
                if value.is_none() {
                    self.jump_forward(arg as usize)?;
                }
            }
            Opcode::PopJumpForwardIfNotNone => {
                let value = self.pop()?;
                if !value.is_none() {
                    self.jump_forward(arg as usize)?;
                }
            }
            Opcode::PopJumpBackwardIfTrue => {
                let value = self.pop()?;
                if self.truthy(&value)? {
                    self.jump_backward(arg as usize)?;
                }
            }
            Opcode::PopJumpBackwardIfFalse => {
                let value = self.pop()?;
                if !self.truthy(&value)? {
                    self.jump_backward(arg as usize)?;
                }
            }
            Opcode::PopJumpBackwardIfNone => {
                let value = self.pop()?;
                if value.is_none() {
                    self.jump_backward(arg as usize)?;
                }
            }
            Opcode::PopJumpBackwardIfNotNone => {
                let value = self.pop()?;
                if !value.is_none() {
                    self.jump_backward(arg as usize)?;
                }
            }
            Opcode::JumpIfTrueOrPop => {
                let top = self.frame_ref().top()?.clone();
                if self.truthy(&top)? {
                    self.jump_forward(arg as usize)?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::JumpIfFalseOrPop => {
                let top = self.frame_ref().top()?.clone();
                if self.truthy(&top)? {
                    self.pop()?;
                } else {
                    self.jump_forward(arg as usize)?;
                }
            }

            // ============================================================
            // Calls and function construction
            // ============================================================
            Opcode::KwNames => {
                let names_tuple = self.frame_ref().code().const_at(arg as usize)?;
                let Object::Tuple(items) = names_tuple else {
                    return Err(RunError::internal("KwNames constant is not a tuple"));
                };
                let mut names = Vec::with_capacity(items.len());
                for item in items.iter() {
                    match item {
                        Object::Str(s) => names.push(Rc::clone(s)),
                        _ => return Err(RunError::internal("KwNames constant holds a non-string")),
                    }
                }
                *kwnames = Some(names);
            }
            Opcode::Call => {
                let argc = arg as usize;
                let kw = kwnames.take().unwrap_or_default();
                let mut drained = self.pop_n(argc + 2)?;

                // Layout: [maybe_method, self_or_callable, args...]. A
                // non-null first slot is the LoadMethod fast path: the
                // callable plus a leading receiver argument.
                let maybe_method = drained.remove(0);
                let (callable, mut positional) = if maybe_method.is_undefined() {
                    let callable = drained.remove(0);
                    (callable, drained)
                } else {
                    (maybe_method, drained)
                };
                if callable.is_undefined() {
                    return Err(RunError::internal("Call found no callable on the stack"));
                }

                // The trailing arguments bind to the pending kwnames.
                if kw.len() > positional.len() {
                    return Err(RunError::internal("kwnames longer than the argument list"));
                }
                let kw_values = positional.split_off(positional.len() - kw.len());
                let args = CallArgs {
                    args: SmallVec::from_vec(positional),
                    kwargs: kw.into_iter().zip(kw_values).collect(),
                };
                let result = self.call(&callable, args)?;
                self.push(result)?;
            }
            Opcode::CallFunctionEx => {
                let kwdict = if arg & 1 == 1 { Some(self.pop()?) } else { None };
                let posargs = self.pop()?;
                let callable = self.pop()?;

                let positional = match &posargs {
                    Object::Tuple(items) => items.to_vec(),
                    Object::List(items) => items.borrow().clone(),
                    other => {
                        return Err(RunError::exc(
                            ExcType::TypeError,
                            format!("argument after * must be an iterable, not {}", other.type_name()),
                        ));
                    }
                };
                let mut kwargs = Vec::new();
                if let Some(kwdict) = kwdict {
                    let Object::Dict(map) = &kwdict else {
                        return Err(RunError::exc(
                            ExcType::TypeError,
                            format!("argument after ** must be a mapping, not {}", kwdict.type_name()),
                        ));
                    };
                    for (key, value) in map.borrow().items() {
                        let Some(key) = key.as_str() else {
                            return Err(RunError::exc(ExcType::TypeError, "keywords must be strings"));
                        };
                        kwargs.push((Rc::from(key), value));
                    }
                }
                let result = self.call(
                    &callable,
                    CallArgs {
                        args: SmallVec::from_vec(positional),
                        kwargs,
                    },
                )?;
                self.push(result)?;
            }
            Opcode::MakeFunction => {
                let name = self.pop()?;
                if name.as_str().is_none() {
                    return Err(RunError::internal("MakeFunction name is not a string"));
                }
                let Object::Code(code) = self.pop()? else {
                    return Err(RunError::internal("MakeFunction operand is not a code object"));
                };

                let closure: Rc<[Rc<Cell>]> = if arg & 0x8 == 0 {
                    Rc::from(Vec::new())
                } else {
                    let Object::Tuple(cells) = self.pop()? else {
                        return Err(RunError::internal("MakeFunction closure is not a tuple"));
                    };
                    let mut out = Vec::with_capacity(cells.len());
                    for value in cells.iter() {
                        match value {
                            Object::Cell(cell) => out.push(Rc::clone(cell)),
                            _ => return Err(RunError::internal("MakeFunction closure holds a non-cell")),
                        }
                    }
                    Rc::from(out)
                };
                let annotations = if arg & 0x4 == 0 { None } else { Some(self.pop()?) };
                let kwdefaults = if arg & 0x2 == 0 {
                    None
                } else {
                    match self.pop()? {
                        Object::Dict(map) => Some(map),
                        _ => return Err(RunError::internal("MakeFunction kwdefaults is not a dict")),
                    }
                };
                let defaults = if arg & 0x1 == 0 {
                    None
                } else {
                    match self.pop()? {
                        Object::Tuple(items) => Some(items),
                        _ => return Err(RunError::internal("MakeFunction defaults is not a tuple")),
                    }
                };

                let (globals, builtins, interp) = {
                    let function = self.frame_ref().function();
                    (
                        Rc::clone(function.globals()),
                        Rc::clone(function.builtins()),
                        Rc::clone(function.interp()),
                    )
                };
                let function = Function::new(
                    code, globals, builtins, interp, defaults, kwdefaults, annotations, closure,
                );
                self.push(Object::Function(Rc::new(function)))?;
            }

            Opcode::ReturnValue => {
                let value = self.pop()?;
                let frame = self.frame();
                frame.stack.clear();
                frame.return_value = value.clone();
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Continue)
    }

    /// Runs a closure against the cell stored in fast-local `slot`.
    fn cell_at<T>(
        &mut self,
        slot: usize,
        action: impl FnOnce(&Cell, &Frame, usize) -> RunResult<T>,
    ) -> RunResult<T> {
        let frame = self.frame_ref();
        match frame.fast.get(slot) {
            Some(Object::Cell(cell)) => action(cell, frame, slot),
            Some(_) => Err(RunError::internal("deref instruction on a slot that holds no cell")),
            None => Err(RunError::internal("deref slot out of range")),
        }
    }

    // --- name-resolution helpers ---

    /// Reads a name from the frame's locals mapping.
    fn locals_load(&mut self, name: &Rc<str>) -> RunResult<Option<Object>> {
        let mapping = self.frame_ref().locals.clone();
        match mapping {
            None => Err(ExcType::no_locals("loading", name)),
            Some(Object::Dict(map)) => Ok(map.borrow().get_str(name)),
            Some(other) => match self.getitem(&other, &Object::Str(Rc::clone(name))) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.is_exception_type(ExcType::KeyError) => Ok(None),
                Err(err) => Err(err),
            },
        }
    }

    /// Writes a name into the frame's locals mapping.
    fn locals_store(&mut self, name: &Rc<str>, value: Object) -> RunResult<()> {
        let mapping = self.frame_ref().locals.clone();
        match mapping {
            None => Err(ExcType::no_locals("storing", name)),
            Some(Object::Dict(map)) => {
                map.borrow_mut().insert_str(name, value);
                Ok(())
            }
            Some(other) => self.setitem(&other, &Object::Str(Rc::clone(name)), value),
        }
    }

    /// Deletes a name from the frame's locals mapping.
    fn locals_delete(&mut self, name: &Rc<str>) -> RunResult<()> {
        let mapping = self.frame_ref().locals.clone();
        match mapping {
            None => Err(ExcType::no_locals("deleting", name)),
            Some(Object::Dict(map)) => match map.borrow_mut().remove_str(name) {
                Some(_) => Ok(()),
                None => Err(ExcType::name_error(name)),
            },
            Some(other) => match self.delitem(&other, &Object::Str(Rc::clone(name))) {
                Ok(()) => Ok(()),
                Err(err) if err.is_exception_type(ExcType::KeyError) => Err(ExcType::name_error(name)),
                Err(err) => Err(err),
            },
        }
    }

    /// Resolves a name in globals, then builtins.
    fn namespace_load(&self, name: &str) -> RunResult<Option<Object>> {
        let frame = self.frame_ref();
        if let Some(value) = frame.globals().borrow().get_str(name) {
            return Ok(Some(value));
        }
        Ok(frame.builtins().borrow().get_str(name))
    }

    // --- object protocol helpers ---

    /// Python truth testing: the `bool` slot, then `len`, then true.
    pub fn truthy(&mut self, obj: &Object) -> RunResult<bool> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Bool) {
            Some(SlotImpl::Bool(f)) => return f(obj, self),
            Some(_) => return Err(RunError::internal("bool slot has wrong arity")),
            None => {}
        }
        match class.lookup_slot(obj, Slot::Len) {
            Some(SlotImpl::Len(f)) => Ok(f(obj, self)? != 0),
            Some(_) => Err(RunError::internal("len slot has wrong arity")),
            None => Ok(true),
        }
    }

    /// `len(obj)` via the `len` slot.
    pub fn len_of(&mut self, obj: &Object) -> RunResult<usize> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Len) {
            Some(SlotImpl::Len(f)) => f(obj, self),
            Some(_) => Err(RunError::internal("len slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("object of type '{}' has no len()", class.name()),
            )),
        }
    }

    /// `hash(obj)` via the `hash` slot.
    pub fn hash_object(&mut self, obj: &Object) -> RunResult<i64> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Hash) {
            Some(SlotImpl::Hash(f)) => f(obj, self),
            Some(_) => Err(RunError::internal("hash slot has wrong arity")),
            None => Err(RunError::exc(
                ExcType::TypeError,
                format!("unhashable type: '{}'", class.name()),
            )),
        }
    }

    /// `repr(obj)`, with re-entrancy protection for self-referential
    /// containers.
    pub fn repr(&mut self, obj: &Object) -> RunResult<Rc<str>> {
        let address = obj.address();
        if address != 0 && self.repr_guard.contains(&address) {
            return Ok(Rc::from("..."));
        }
        if address != 0 {
            self.repr_guard.push(address);
        }
        let result = self.repr_inner(obj);
        if address != 0 {
            self.repr_guard.pop();
        }
        result
    }

    fn repr_inner(&mut self, obj: &Object) -> RunResult<Rc<str>> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Repr) {
            Some(SlotImpl::Unary(f)) => match f(obj, self)? {
                Object::Str(s) => Ok(s),
                other => Err(RunError::exc(
                    ExcType::TypeError,
                    format!("__repr__ returned non-string (type {})", other.type_name()),
                )),
            },
            Some(_) => Err(RunError::internal("repr slot has wrong arity")),
            None => Ok(Rc::from(format!(
                "<{} object at {:#x}>",
                class.name(),
                obj.address()
            ))),
        }
    }

    /// `str(obj)`: the `str` slot, falling back to `repr`.
    pub fn str_of(&mut self, obj: &Object) -> RunResult<Rc<str>> {
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::Str) {
            Some(SlotImpl::Unary(f)) => match f(obj, self)? {
                Object::Str(s) => Ok(s),
                other => Err(RunError::exc(
                    ExcType::TypeError,
                    format!("__str__ returned non-string (type {})", other.type_name()),
                )),
            },
            Some(_) => Err(RunError::internal("str slot has wrong arity")),
            None => self.repr(obj),
        }
    }
}

/// The unbound error for an empty cell: free variables blame the enclosing
/// scope, cell locals read as ordinary unbound locals.
fn unbound_deref(frame: &Frame, slot: usize) -> RunError {
    let layout = &frame.code().layout;
    let name = layout.name_of(slot).to_owned();
    let is_free = layout
        .vars()
        .get(slot)
        .is_some_and(|v| matches!(v.kind, VarKind::Free));
    if is_free {
        ExcType::unbound_free(&name)
    } else {
        ExcType::unbound_local(&name)
    }
}
