#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython hashing")]
#![expect(clippy::module_name_repetitions, reason = "type names follow Python's vocabulary")]

mod cell;
mod code;
mod exception;
mod frame;
mod function;
mod interp;
mod object;
mod opcode;
mod py_hash;
pub mod tracer;
mod types;
mod vm;

pub use crate::{
    cell::Cell,
    code::{Code, CodeBuilder, CodeFlags, JumpLabel, VarDef, VarKind, VarLayout},
    exception::{ExcType, Exception, RunError, RunResult},
    frame::Frame,
    function::Function,
    interp::{CoreTypes, Interpreter},
    object::{BoundMethod, HostClass, Instance, Object},
    opcode::{BinaryOpKind, CompareOpKind, Opcode},
    types::{
        GetSetDescr, MemberDescr, MethodDescr, PyType, Slot, SlotImpl, SlotTable, TypeAttr, TypeFlags, TypeRef,
        dict::Dict,
    },
    vm::{
        DEFAULT_RECURSION_LIMIT, ThreadState,
        call::{CallArgs, NativeFn, NativeFunction},
    },
};
