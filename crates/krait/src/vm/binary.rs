//! The numeric abstract layer: unary and binary operator entry points.
//!
//! Binary dispatch follows the reflected-operand protocol: with `v` on the
//! left and `w` on the right,
//! - same type: try `op(v, w)` only;
//! - `type(w)` a proper subclass of `type(v)`: try `rop(w, v)` first, then
//!   `op(v, w)`;
//! - otherwise `op(v, w)` first, then `rop(w, v)`.
//!
//! `NotImplemented` from every consulted handler becomes `TypeError`. When
//! the left type publishes an exact per-(left, right) handle for the pair,
//! that handle short-circuits the whole protocol. In-place sub-opcodes
//! consult the left operand's in-place slot before the plain pair.

use crate::{
    exception::{ExcType, RunResult},
    object::Object,
    opcode::BinaryOpKind,
    types::{Slot, SlotImpl, TypeRef},
    vm::ThreadState,
};

/// The slot pair and error symbol for one `BINARY_OP` sub-opcode.
fn binary_slots(kind: BinaryOpKind) -> (Slot, Option<Slot>, &'static str) {
    match kind {
        BinaryOpKind::Add => (Slot::Add, None, "+"),
        BinaryOpKind::And => (Slot::And, None, "&"),
        BinaryOpKind::FloorDivide => (Slot::FloorDiv, None, "//"),
        BinaryOpKind::Lshift => (Slot::LShift, None, "<<"),
        BinaryOpKind::MatrixMultiply => (Slot::MatMul, None, "@"),
        BinaryOpKind::Multiply => (Slot::Mul, None, "*"),
        BinaryOpKind::Remainder => (Slot::Mod, None, "%"),
        BinaryOpKind::Or => (Slot::Or, None, "|"),
        BinaryOpKind::Power => (Slot::Pow, None, "** or pow()"),
        BinaryOpKind::Rshift => (Slot::RShift, None, ">>"),
        BinaryOpKind::Subtract => (Slot::Sub, None, "-"),
        BinaryOpKind::TrueDivide => (Slot::TrueDiv, None, "/"),
        BinaryOpKind::Xor => (Slot::Xor, None, "^"),
        BinaryOpKind::InplaceAdd => (Slot::Add, Some(Slot::IAdd), "+="),
        BinaryOpKind::InplaceAnd => (Slot::And, Some(Slot::IAnd), "&="),
        BinaryOpKind::InplaceFloorDivide => (Slot::FloorDiv, Some(Slot::IFloorDiv), "//="),
        BinaryOpKind::InplaceLshift => (Slot::LShift, Some(Slot::ILShift), "<<="),
        BinaryOpKind::InplaceMatrixMultiply => (Slot::MatMul, Some(Slot::IMatMul), "@="),
        BinaryOpKind::InplaceMultiply => (Slot::Mul, Some(Slot::IMul), "*="),
        BinaryOpKind::InplaceRemainder => (Slot::Mod, Some(Slot::IMod), "%="),
        BinaryOpKind::InplaceOr => (Slot::Or, Some(Slot::IOr), "|="),
        BinaryOpKind::InplacePower => (Slot::Pow, Some(Slot::IPow), "**="),
        BinaryOpKind::InplaceRshift => (Slot::RShift, Some(Slot::IRShift), ">>="),
        BinaryOpKind::InplaceSubtract => (Slot::Sub, Some(Slot::ISub), "-="),
        BinaryOpKind::InplaceTrueDivide => (Slot::TrueDiv, Some(Slot::ITrueDiv), "/="),
        BinaryOpKind::InplaceXor => (Slot::Xor, Some(Slot::IXor), "^="),
    }
}

impl ThreadState {
    /// Executes a `BINARY_OP` sub-opcode on `(lhs, rhs)`.
    pub fn binary_op(&mut self, kind: BinaryOpKind, lhs: &Object, rhs: &Object) -> RunResult<Object> {
        let (slot, inplace, symbol) = binary_slots(kind);
        if let Some(inplace_slot) = inplace {
            let class = lhs.class(self.interp());
            if let Some(result) = self.try_binary_slot(&class, inplace_slot, lhs, rhs)? {
                return Ok(result);
            }
        }
        self.binary_dispatch(slot, symbol, lhs, rhs)
    }

    /// The reflected-operand protocol for one slot pair.
    pub(crate) fn binary_dispatch(&mut self, op: Slot, symbol: &str, lhs: &Object, rhs: &Object) -> RunResult<Object> {
        let left_type = lhs.class(self.interp());
        let right_type = rhs.class(self.interp());

        // Exact per-(left, right) handles never answer NotImplemented and
        // skip the protocol entirely.
        if let Some(f) = left_type.lookup_exact(op, lhs, rhs) {
            return f(lhs, rhs, self);
        }

        let rop = op.reflected();
        if std::rc::Rc::ptr_eq(&left_type, &right_type) {
            if let Some(result) = self.try_binary_slot(&left_type, op, lhs, rhs)? {
                return Ok(result);
            }
        } else if right_type.is_proper_subtype_of(&left_type) {
            // The subclass gets the first word.
            if let Some(rop) = rop
                && let Some(result) = self.try_binary_slot(&right_type, rop, rhs, lhs)?
            {
                return Ok(result);
            }
            if let Some(result) = self.try_binary_slot(&left_type, op, lhs, rhs)? {
                return Ok(result);
            }
        } else {
            if let Some(result) = self.try_binary_slot(&left_type, op, lhs, rhs)? {
                return Ok(result);
            }
            if let Some(rop) = rop
                && let Some(result) = self.try_binary_slot(&right_type, rop, rhs, lhs)?
            {
                return Ok(result);
            }
        }

        Err(ExcType::binary_type_error(symbol, left_type.name(), right_type.name()))
    }

    /// Invokes a binary slot handle, mapping an empty slot or a
    /// `NotImplemented` answer to `None`.
    pub(crate) fn try_binary_slot(
        &mut self,
        class: &TypeRef,
        slot: Slot,
        receiver: &Object,
        other: &Object,
    ) -> RunResult<Option<Object>> {
        match class.lookup_slot(receiver, slot) {
            Some(SlotImpl::Binary(f)) => match f(receiver, other, self)? {
                Object::NotImplemented => Ok(None),
                result => Ok(Some(result)),
            },
            Some(_) => Err(crate::exception::RunError::internal("binary slot has wrong arity")),
            None => Ok(None),
        }
    }

    /// Executes a unary operation via its slot, raising the conventional
    /// `TypeError` when the slot is empty.
    pub fn unary_op(&mut self, slot: Slot, symbol: &str, operand: &Object) -> RunResult<Object> {
        let class = operand.class(self.interp());
        match class.lookup_slot(operand, slot) {
            Some(SlotImpl::Unary(f)) => f(operand, self),
            Some(_) => Err(crate::exception::RunError::internal("unary slot has wrong arity")),
            None => Err(ExcType::unary_type_error(symbol, class.name())),
        }
    }

    /// Like [`ThreadState::unary_op`] but phrased for builtins such as
    /// `abs()`, which name the function rather than an operator.
    pub(crate) fn unary_slot_op(&mut self, slot: Slot, operand: &Object, what: &str) -> RunResult<Object> {
        let class = operand.class(self.interp());
        match class.lookup_slot(operand, slot) {
            Some(SlotImpl::Unary(f)) => f(operand, self),
            Some(_) => Err(crate::exception::RunError::internal("unary slot has wrong arity")),
            None => Err(crate::exception::RunError::exc(
                crate::exception::ExcType::TypeError,
                format!("bad operand type for {what}: '{}'", class.name()),
            )),
        }
    }
}
