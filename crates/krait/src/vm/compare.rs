//! Comparison dispatch: the six-way rich comparison table, identity tests,
//! and membership.

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    opcode::CompareOpKind,
    types::{Slot, SlotImpl},
    vm::ThreadState,
};

fn compare_slot(kind: CompareOpKind) -> Slot {
    match kind {
        CompareOpKind::Lt => Slot::Lt,
        CompareOpKind::Le => Slot::Le,
        CompareOpKind::Eq => Slot::Eq,
        CompareOpKind::Ne => Slot::Ne,
        CompareOpKind::Gt => Slot::Gt,
        CompareOpKind::Ge => Slot::Ge,
    }
}

impl ThreadState {
    /// Executes a `COMPARE_OP`, honoring the same subclass-priority rules
    /// as binary arithmetic, with the equality fallback to identity.
    pub fn compare_op(&mut self, kind: CompareOpKind, lhs: &Object, rhs: &Object) -> RunResult<Object> {
        let left_type = lhs.class(self.interp());
        let right_type = rhs.class(self.interp());
        let slot = compare_slot(kind);
        let swapped = compare_slot(kind.swapped());

        if std::rc::Rc::ptr_eq(&left_type, &right_type) {
            if let Some(result) = self.try_binary_slot(&left_type, slot, lhs, rhs)? {
                return Ok(result);
            }
        } else if right_type.is_proper_subtype_of(&left_type) {
            if let Some(result) = self.try_binary_slot(&right_type, swapped, rhs, lhs)? {
                return Ok(result);
            }
            if let Some(result) = self.try_binary_slot(&left_type, slot, lhs, rhs)? {
                return Ok(result);
            }
        } else {
            if let Some(result) = self.try_binary_slot(&left_type, slot, lhs, rhs)? {
                return Ok(result);
            }
            if let Some(result) = self.try_binary_slot(&right_type, swapped, rhs, lhs)? {
                return Ok(result);
            }
        }

        match kind {
            CompareOpKind::Eq => Ok(Object::Bool(lhs.is(rhs))),
            CompareOpKind::Ne => Ok(Object::Bool(!lhs.is(rhs))),
            ordering => Err(RunError::exc(
                ExcType::TypeError,
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    ordering.symbol(),
                    left_type.name(),
                    right_type.name()
                ),
            )),
        }
    }

    /// Python equality as a host bool.
    pub fn py_eq(&mut self, lhs: &Object, rhs: &Object) -> RunResult<bool> {
        let result = self.compare_op(CompareOpKind::Eq, lhs, rhs)?;
        self.truthy(&result)
    }

    /// Python `<` as a host bool.
    pub(crate) fn py_lt(&mut self, lhs: &Object, rhs: &Object) -> RunResult<bool> {
        let result = self.compare_op(CompareOpKind::Lt, lhs, rhs)?;
        self.truthy(&result)
    }

    /// Membership (`item in container`), delegating to the container's
    /// `contains` slot with an iteration fallback.
    pub fn contains_op(&mut self, container: &Object, item: &Object) -> RunResult<bool> {
        let class = container.class(self.interp());
        match class.lookup_slot(container, Slot::Contains) {
            Some(SlotImpl::Binary(f)) => {
                let result = f(container, item, self)?;
                self.truthy(&result)
            }
            Some(_) => Err(RunError::internal("contains slot has wrong arity")),
            None => {
                // No contains slot: walk the iterator protocol.
                let iter = self.iterate(container).map_err(|_| {
                    RunError::exc(
                        ExcType::TypeError,
                        format!("argument of type '{}' is not iterable", class.name()),
                    )
                })?;
                while let Some(candidate) = self.iter_next(&iter)? {
                    if self.py_eq(item, &candidate)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
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
    fn cross_representation_equality() {
        let mut ts = ts();
        assert!(ts.py_eq(&Object::Int(1), &Object::Float(1.0)).unwrap());
        assert!(ts.py_eq(&Object::Bool(true), &Object::Int(1)).unwrap());
        assert!(!ts.py_eq(&Object::Int(1), &Object::str("1")).unwrap());
    }

    #[test]
    fn default_equality_is_identity() {
        let mut ts = ts();
        let a = Object::list(vec![]);
        // list == int: both sides NotImplemented, equality falls back to
        // identity.
        assert!(!ts.py_eq(&a, &Object::Int(1)).unwrap());
        let r = ts.compare_op(CompareOpKind::Ne, &a, &Object::Int(1)).unwrap();
        assert!(matches!(r, Object::Bool(true)));
    }

    #[test]
    fn unorderable_types_raise() {
        let mut ts = ts();
        let err = ts
            .compare_op(CompareOpKind::Lt, &Object::Int(1), &Object::str("a"))
            .unwrap_err();
        let RunError::Exc(exc) = err else { panic!("expected exception") };
        assert_eq!(
            exc.message(),
            Some("'<' not supported between instances of 'int' and 'str'")
        );
    }

    #[test]
    fn membership() {
        let mut ts = ts();
        let list = Object::list(vec![Object::Int(1), Object::Int(2)]);
        assert!(ts.contains_op(&list, &Object::Int(2)).unwrap());
        assert!(!ts.contains_op(&list, &Object::Int(3)).unwrap());
        assert!(ts.contains_op(&Object::str("abc"), &Object::str("bc")).unwrap());
        let err = ts.contains_op(&Object::Int(5), &Object::Int(1)).unwrap_err();
        assert!(err.is_exception_type(ExcType::TypeError));
    }
}
