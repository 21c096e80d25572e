//! The type objects instructions operate on.
//!
//! A `PyType` carries a name, its bases and C3-linearized MRO, a dictionary
//! of attribute descriptors, a slot table resolved per host representation,
//! and flags. Builtin types hand-write their slot tables (one file per type
//! in this module); user-defined types populate slots with per-slot
//! trampolines that resolve `__add__`-style names along the MRO and call
//! whatever they find.

pub mod descr;
pub mod dict;
pub mod float;
pub mod int;
pub mod iter;
pub mod list;
pub mod singletons;
pub mod slots;
pub mod str;
pub mod tuple;

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    vm::{ThreadState, call::CallArgs},
};

pub use descr::{GetSetDescr, MemberDescr, MethodDescr, TypeAttr};
pub use slots::{Slot, SlotImpl, SlotTable};

/// Reference-counted handle to a type object. Types have identity across
/// the process lifetime; comparisons are by pointer.
pub type TypeRef = Rc<PyType>;

/// Behavior flags of a type.
#[derive(Debug, Clone, Copy)]
pub struct TypeFlags {
    /// Whether the type may be subclassed.
    pub basetype: bool,
    /// Whether the type overrides the generic attribute lookup. When set,
    /// the `LoadMethod` fast path is disabled for its instances.
    pub custom_getattr: bool,
}

impl Default for TypeFlags {
    fn default() -> Self {
        Self {
            basetype: true,
            custom_getattr: false,
        }
    }
}

/// A Python type: name, MRO, attribute dictionary, slot table, flags.
pub struct PyType {
    name: Rc<str>,
    bases: Vec<TypeRef>,
    /// Linearized MRO including this type at position zero. Set once right
    /// after construction; empty only during that window.
    mro: OnceCell<Vec<TypeRef>>,
    dict: RefCell<IndexMap<Rc<str>, TypeAttr, ahash::RandomState>>,
    slots: SlotTable,
    flags: TypeFlags,
}

impl std::fmt::Debug for PyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

impl PyType {
    /// Creates a builtin type with a hand-written slot table.
    ///
    /// The MRO is the type itself followed by the linearization of its
    /// bases; builtin hierarchies are simple enough that construction
    /// cannot fail.
    #[must_use]
    pub(crate) fn new_builtin(
        name: &str,
        bases: Vec<TypeRef>,
        slots: SlotTable,
        attrs: Vec<(Rc<str>, TypeAttr)>,
        flags: TypeFlags,
    ) -> TypeRef {
        let t = Rc::new(Self {
            name: Rc::from(name),
            bases,
            mro: OnceCell::new(),
            dict: RefCell::new(attrs.into_iter().collect()),
            slots,
            flags,
        });
        let mro = c3_linearize(&t).expect("builtin type hierarchy must linearize");
        t.mro.set(mro).expect("mro set exactly once");
        t
    }

    /// Creates a user-defined type.
    ///
    /// Callable attribute values become method descriptors; everything else
    /// is stored plain. The slot table starts as a copy of the first base's
    /// table (slot inheritance), then every dunder name defined in `attrs`
    /// installs the matching trampoline.
    pub fn new_user(name: &str, bases: Vec<TypeRef>, attrs: Vec<(Rc<str>, Object)>) -> RunResult<TypeRef> {
        for base in &bases {
            if !base.flags.basetype {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!("type '{}' is not an acceptable base type", base.name),
                ));
            }
        }

        let dict: IndexMap<Rc<str>, TypeAttr, ahash::RandomState> = attrs
            .into_iter()
            .map(|(attr_name, value)| {
                let entry = Self::attr_from_value(&attr_name, value);
                (attr_name, entry)
            })
            .collect();

        let mut slots = bases.first().map(|b| b.slots.clone()).unwrap_or_default();
        let mut flags = TypeFlags::default();
        for (dunder, slot, handle) in DUNDER_SLOTS {
            if dict.contains_key(*dunder) {
                slots.set(*slot, *handle);
            }
        }
        if dict.contains_key("__getattribute__") {
            slots.set(Slot::GetAttr, SlotImpl::GetAttr(user_getattribute));
            flags.custom_getattr = true;
        } else if bases.iter().any(|b| b.flags.custom_getattr) {
            flags.custom_getattr = true;
        }

        let t = Rc::new(Self {
            name: Rc::from(name),
            bases,
            mro: OnceCell::new(),
            dict: RefCell::new(dict),
            slots,
            flags,
        });
        let mro = c3_linearize(&t).ok_or_else(|| {
            RunError::exc(
                ExcType::TypeError,
                "Cannot create a consistent method resolution order (MRO) for bases",
            )
        })?;
        t.mro.set(mro).expect("mro set exactly once");
        Ok(t)
    }

    /// Classifies an attribute value the way class creation does: callables
    /// become method descriptors, everything else is plain.
    #[must_use]
    pub fn attr_from_value(name: &str, value: Object) -> TypeAttr {
        match value {
            callable @ (Object::Function(_) | Object::Native(_)) => {
                TypeAttr::Method(MethodDescr::new(Rc::from(name), callable))
            }
            other => TypeAttr::Plain(other),
        }
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The behavior flags.
    #[must_use]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// The direct bases.
    #[must_use]
    pub fn bases(&self) -> &[TypeRef] {
        &self.bases
    }

    /// The linearized MRO, this type first.
    #[must_use]
    pub fn mro(&self) -> &[TypeRef] {
        self.mro.get().map_or(&[], Vec::as_slice)
    }

    /// Whether `self` appears in `other`'s position in the subtype lattice:
    /// true when `other` is in `self`'s MRO.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        self.mro().iter().any(|t| std::ptr::eq(Rc::as_ptr(t), other))
    }

    /// Whether `self` is a strict subtype of `other`.
    #[must_use]
    pub fn is_proper_subtype_of(&self, other: &Self) -> bool {
        !std::ptr::eq(self, other) && self.is_subtype_of(other)
    }

    /// Looks up `name` along the MRO, returning the first descriptor found.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TypeAttr> {
        for t in self.mro() {
            if let Some(attr) = t.dict.borrow().get(name) {
                return Some(attr.clone());
            }
        }
        None
    }

    /// Inserts an attribute into this type's own dictionary.
    pub fn set_attr(&self, name: Rc<str>, attr: TypeAttr) {
        self.dict.borrow_mut().insert(name, attr);
    }

    /// Reads an attribute entry of this type's own dictionary (no MRO walk).
    #[must_use]
    pub fn own_attr(&self, name: &str) -> Option<TypeAttr> {
        self.dict.borrow().get(name).cloned()
    }

    /// Removes an attribute from this type's own dictionary.
    pub fn remove_attr(&self, name: &str) -> Option<TypeAttr> {
        self.dict.borrow_mut().shift_remove(name)
    }

    /// Resolves the slot handle for `(operand, slot)`.
    #[must_use]
    pub fn lookup_slot(&self, operand: &Object, slot: Slot) -> Option<SlotImpl> {
        self.slots.lookup(operand, slot)
    }

    /// Whether the slot has any handle.
    #[must_use]
    pub fn has_slot(&self, slot: Slot) -> bool {
        self.slots.has(slot)
    }

    /// Resolves an exact per-(left, right) binary handle, if published.
    #[must_use]
    pub fn lookup_exact(&self, slot: Slot, left: &Object, right: &Object) -> Option<slots::BinaryFn> {
        self.slots.lookup_exact(slot, left, right)
    }
}

/// C3 linearization: `L(T) = T + merge(L(B1), ..., L(Bn), [B1, ..., Bn])`.
///
/// Returns `None` when no consistent order exists.
fn c3_linearize(t: &TypeRef) -> Option<Vec<TypeRef>> {
    let mut sequences: Vec<Vec<TypeRef>> = t.bases.iter().map(|b| b.mro().to_vec()).collect();
    if !t.bases.is_empty() {
        sequences.push(t.bases.clone());
    }

    let mut result = vec![Rc::clone(t)];
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }

        // A head is a good candidate when it appears in no other sequence's
        // tail.
        let mut candidate = None;
        for seq in &sequences {
            let head = &seq[0];
            let in_a_tail = sequences
                .iter()
                .any(|s| s[1..].iter().any(|t| Rc::ptr_eq(t, head)));
            if !in_a_tail {
                candidate = Some(Rc::clone(head));
                break;
            }
        }
        let candidate = candidate?;

        for s in &mut sequences {
            if Rc::ptr_eq(&s[0], &candidate) {
                s.remove(0);
            }
        }
        result.push(candidate);
    }
}

/// Resolves `name` as a special method on `type(obj)` and binds it.
///
/// Special-method lookup goes through the type, never the instance dict;
/// this is the hook every dunder trampoline uses.
fn lookup_special(obj: &Object, name: &str, ts: &mut ThreadState) -> Option<Object> {
    let class = obj.class(ts.interp());
    let attr = class.lookup(name)?;
    match attr {
        TypeAttr::Plain(value) => Some(value),
        TypeAttr::Method(descr) => Some(descr.bind(obj.clone())),
        // Get-set/member descriptors never implement special methods here.
        TypeAttr::GetSet(_) | TypeAttr::Member(_) => None,
    }
}

fn dispatch_unary(obj: &Object, ts: &mut ThreadState, name: &str) -> RunResult<Object> {
    match lookup_special(obj, name, ts) {
        Some(callable) => ts.call(&callable, CallArgs::default()),
        None => Err(RunError::internal(format!(
            "slot trampoline installed but {name} vanished from the MRO"
        ))),
    }
}

fn dispatch_binary(lhs: &Object, rhs: &Object, ts: &mut ThreadState, name: &str) -> RunResult<Object> {
    match lookup_special(lhs, name, ts) {
        Some(callable) => ts.call(&callable, CallArgs::positional(vec![rhs.clone()])),
        None => Ok(Object::NotImplemented),
    }
}

macro_rules! unary_trampolines {
    ($(($fn_name:ident, $dunder:literal)),+ $(,)?) => {
        $(
            fn $fn_name(obj: &Object, ts: &mut ThreadState) -> RunResult<Object> {
                dispatch_unary(obj, ts, $dunder)
            }
        )+
    };
}

macro_rules! binary_trampolines {
    ($(($fn_name:ident, $dunder:literal)),+ $(,)?) => {
        $(
            fn $fn_name(lhs: &Object, rhs: &Object, ts: &mut ThreadState) -> RunResult<Object> {
                dispatch_binary(lhs, rhs, ts, $dunder)
            }
        )+
    };
}

unary_trampolines![
    (user_neg, "__neg__"),
    (user_pos, "__pos__"),
    (user_invert, "__invert__"),
    (user_abs, "__abs__"),
    (user_repr, "__repr__"),
    (user_str, "__str__"),
    (user_iter, "__iter__"),
    (user_next, "__next__"),
    (user_index, "__index__"),
    (user_int, "__int__"),
    (user_float, "__float__"),
];

binary_trampolines![
    (user_add, "__add__"),
    (user_sub, "__sub__"),
    (user_mul, "__mul__"),
    (user_matmul, "__matmul__"),
    (user_truediv, "__truediv__"),
    (user_floordiv, "__floordiv__"),
    (user_mod, "__mod__"),
    (user_pow, "__pow__"),
    (user_lshift, "__lshift__"),
    (user_rshift, "__rshift__"),
    (user_and, "__and__"),
    (user_or, "__or__"),
    (user_xor, "__xor__"),
    (user_radd, "__radd__"),
    (user_rsub, "__rsub__"),
    (user_rmul, "__rmul__"),
    (user_rmatmul, "__rmatmul__"),
    (user_rtruediv, "__rtruediv__"),
    (user_rfloordiv, "__rfloordiv__"),
    (user_rmod, "__rmod__"),
    (user_rpow, "__rpow__"),
    (user_rlshift, "__rlshift__"),
    (user_rrshift, "__rrshift__"),
    (user_rand, "__rand__"),
    (user_ror, "__ror__"),
    (user_rxor, "__rxor__"),
    (user_iadd, "__iadd__"),
    (user_isub, "__isub__"),
    (user_imul, "__imul__"),
    (user_imatmul, "__imatmul__"),
    (user_itruediv, "__itruediv__"),
    (user_ifloordiv, "__ifloordiv__"),
    (user_imod, "__imod__"),
    (user_ipow, "__ipow__"),
    (user_ilshift, "__ilshift__"),
    (user_irshift, "__irshift__"),
    (user_iand, "__iand__"),
    (user_ior, "__ior__"),
    (user_ixor, "__ixor__"),
    (user_eq, "__eq__"),
    (user_ne, "__ne__"),
    (user_lt, "__lt__"),
    (user_le, "__le__"),
    (user_gt, "__gt__"),
    (user_ge, "__ge__"),
    (user_getitem, "__getitem__"),
    (user_contains, "__contains__"),
];

fn user_bool(obj: &Object, ts: &mut ThreadState) -> RunResult<bool> {
    let result = dispatch_unary(obj, ts, "__bool__")?;
    match result {
        Object::Bool(b) => Ok(b),
        other => Err(RunError::exc(
            ExcType::TypeError,
            format!("__bool__ should return bool, returned {}", other.type_name()),
        )),
    }
}

fn user_len(obj: &Object, ts: &mut ThreadState) -> RunResult<usize> {
    let result = dispatch_unary(obj, ts, "__len__")?;
    match result.as_int() {
        Some(len) if len >= 0 => Ok(usize::try_from(len).unwrap_or(usize::MAX)),
        Some(_) => Err(RunError::exc(ExcType::ValueError, "__len__() should return >= 0")),
        None => Err(RunError::exc(
            ExcType::TypeError,
            format!("'{}' object cannot be interpreted as an integer", result.type_name()),
        )),
    }
}

fn user_hash(obj: &Object, ts: &mut ThreadState) -> RunResult<i64> {
    let result = dispatch_unary(obj, ts, "__hash__")?;
    match &result {
        Object::Int(v) => Ok(crate::py_hash::hash_i64(*v)),
        Object::BigInt(v) => Ok(crate::py_hash::hash_bigint(v)),
        other => Err(RunError::exc(
            ExcType::TypeError,
            format!("__hash__ method should return an integer, returned {}", other.type_name()),
        )),
    }
}

fn user_setitem(obj: &Object, key: &Object, value: Object, ts: &mut ThreadState) -> RunResult<()> {
    match lookup_special(obj, "__setitem__", ts) {
        Some(callable) => {
            ts.call(&callable, CallArgs::positional(vec![key.clone(), value]))?;
            Ok(())
        }
        None => Err(RunError::internal("slot trampoline installed but __setitem__ vanished")),
    }
}

fn user_delitem(obj: &Object, key: &Object, ts: &mut ThreadState) -> RunResult<()> {
    match lookup_special(obj, "__delitem__", ts) {
        Some(callable) => {
            ts.call(&callable, CallArgs::positional(vec![key.clone()]))?;
            Ok(())
        }
        None => Err(RunError::internal("slot trampoline installed but __delitem__ vanished")),
    }
}

fn user_call(obj: &Object, args: CallArgs, ts: &mut ThreadState) -> RunResult<Object> {
    match lookup_special(obj, "__call__", ts) {
        Some(callable) => ts.call(&callable, args),
        None => Err(ExcType::not_callable(&obj.type_name())),
    }
}

fn user_getattribute(obj: &Object, name: &Rc<str>, ts: &mut ThreadState) -> RunResult<Object> {
    match lookup_special(obj, "__getattribute__", ts) {
        Some(callable) => ts.call(&callable, CallArgs::positional(vec![Object::Str(Rc::clone(name))])),
        None => Err(RunError::internal(
            "slot trampoline installed but __getattribute__ vanished",
        )),
    }
}

/// Dunder name to slot mapping used when building user types.
static DUNDER_SLOTS: &[(&str, Slot, SlotImpl)] = &[
    ("__neg__", Slot::Neg, SlotImpl::Unary(user_neg)),
    ("__pos__", Slot::Pos, SlotImpl::Unary(user_pos)),
    ("__invert__", Slot::Invert, SlotImpl::Unary(user_invert)),
    ("__abs__", Slot::Abs, SlotImpl::Unary(user_abs)),
    ("__bool__", Slot::Bool, SlotImpl::Bool(user_bool)),
    ("__hash__", Slot::Hash, SlotImpl::Hash(user_hash)),
    ("__repr__", Slot::Repr, SlotImpl::Unary(user_repr)),
    ("__str__", Slot::Str, SlotImpl::Unary(user_str)),
    ("__iter__", Slot::Iter, SlotImpl::Unary(user_iter)),
    ("__next__", Slot::Next, SlotImpl::Unary(user_next)),
    ("__index__", Slot::Index, SlotImpl::Unary(user_index)),
    ("__int__", Slot::Int, SlotImpl::Unary(user_int)),
    ("__float__", Slot::Float, SlotImpl::Unary(user_float)),
    ("__len__", Slot::Len, SlotImpl::Len(user_len)),
    ("__call__", Slot::Call, SlotImpl::Call(user_call)),
    ("__contains__", Slot::Contains, SlotImpl::Binary(user_contains)),
    ("__getitem__", Slot::GetItem, SlotImpl::Binary(user_getitem)),
    ("__setitem__", Slot::SetItem, SlotImpl::SetItem(user_setitem)),
    ("__delitem__", Slot::DelItem, SlotImpl::DelItem(user_delitem)),
    ("__add__", Slot::Add, SlotImpl::Binary(user_add)),
    ("__sub__", Slot::Sub, SlotImpl::Binary(user_sub)),
    ("__mul__", Slot::Mul, SlotImpl::Binary(user_mul)),
    ("__matmul__", Slot::MatMul, SlotImpl::Binary(user_matmul)),
    ("__truediv__", Slot::TrueDiv, SlotImpl::Binary(user_truediv)),
    ("__floordiv__", Slot::FloorDiv, SlotImpl::Binary(user_floordiv)),
    ("__mod__", Slot::Mod, SlotImpl::Binary(user_mod)),
    ("__pow__", Slot::Pow, SlotImpl::Binary(user_pow)),
    ("__lshift__", Slot::LShift, SlotImpl::Binary(user_lshift)),
    ("__rshift__", Slot::RShift, SlotImpl::Binary(user_rshift)),
    ("__and__", Slot::And, SlotImpl::Binary(user_and)),
    ("__or__", Slot::Or, SlotImpl::Binary(user_or)),
    ("__xor__", Slot::Xor, SlotImpl::Binary(user_xor)),
    ("__radd__", Slot::RAdd, SlotImpl::Binary(user_radd)),
    ("__rsub__", Slot::RSub, SlotImpl::Binary(user_rsub)),
    ("__rmul__", Slot::RMul, SlotImpl::Binary(user_rmul)),
    ("__rmatmul__", Slot::RMatMul, SlotImpl::Binary(user_rmatmul)),
    ("__rtruediv__", Slot::RTrueDiv, SlotImpl::Binary(user_rtruediv)),
    ("__rfloordiv__", Slot::RFloorDiv, SlotImpl::Binary(user_rfloordiv)),
    ("__rmod__", Slot::RMod, SlotImpl::Binary(user_rmod)),
    ("__rpow__", Slot::RPow, SlotImpl::Binary(user_rpow)),
    ("__rlshift__", Slot::RLShift, SlotImpl::Binary(user_rlshift)),
    ("__rrshift__", Slot::RRShift, SlotImpl::Binary(user_rrshift)),
    ("__rand__", Slot::RAnd, SlotImpl::Binary(user_rand)),
    ("__ror__", Slot::ROr, SlotImpl::Binary(user_ror)),
    ("__rxor__", Slot::RXor, SlotImpl::Binary(user_rxor)),
    ("__iadd__", Slot::IAdd, SlotImpl::Binary(user_iadd)),
    ("__isub__", Slot::ISub, SlotImpl::Binary(user_isub)),
    ("__imul__", Slot::IMul, SlotImpl::Binary(user_imul)),
    ("__imatmul__", Slot::IMatMul, SlotImpl::Binary(user_imatmul)),
    ("__itruediv__", Slot::ITrueDiv, SlotImpl::Binary(user_itruediv)),
    ("__ifloordiv__", Slot::IFloorDiv, SlotImpl::Binary(user_ifloordiv)),
    ("__imod__", Slot::IMod, SlotImpl::Binary(user_imod)),
    ("__ipow__", Slot::IPow, SlotImpl::Binary(user_ipow)),
    ("__ilshift__", Slot::ILShift, SlotImpl::Binary(user_ilshift)),
    ("__irshift__", Slot::IRShift, SlotImpl::Binary(user_irshift)),
    ("__iand__", Slot::IAnd, SlotImpl::Binary(user_iand)),
    ("__ior__", Slot::IOr, SlotImpl::Binary(user_ior)),
    ("__ixor__", Slot::IXor, SlotImpl::Binary(user_ixor)),
    ("__eq__", Slot::Eq, SlotImpl::Binary(user_eq)),
    ("__ne__", Slot::Ne, SlotImpl::Binary(user_ne)),
    ("__lt__", Slot::Lt, SlotImpl::Binary(user_lt)),
    ("__le__", Slot::Le, SlotImpl::Binary(user_le)),
    ("__gt__", Slot::Gt, SlotImpl::Binary(user_gt)),
    ("__ge__", Slot::Ge, SlotImpl::Binary(user_ge)),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_type(name: &str, bases: Vec<TypeRef>) -> TypeRef {
        PyType::new_builtin(name, bases, SlotTable::new(), Vec::new(), TypeFlags::default())
    }

    #[test]
    fn linear_mro() {
        let object = bare_type("object", vec![]);
        let a = bare_type("A", vec![Rc::clone(&object)]);
        let b = bare_type("B", vec![Rc::clone(&a)]);

        let names: Vec<&str> = b.mro().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["B", "A", "object"]);
        assert!(b.is_subtype_of(&a));
        assert!(b.is_proper_subtype_of(&a));
        assert!(!a.is_subtype_of(&b));
        assert!(a.is_subtype_of(&a));
        assert!(!a.is_proper_subtype_of(&a));
    }

    #[test]
    fn diamond_mro_is_c3() {
        let object = bare_type("object", vec![]);
        let a = bare_type("A", vec![Rc::clone(&object)]);
        let b = bare_type("B", vec![Rc::clone(&a)]);
        let c = bare_type("C", vec![Rc::clone(&a)]);
        let d = bare_type("D", vec![Rc::clone(&b), Rc::clone(&c)]);

        let names: Vec<&str> = d.mro().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["D", "B", "C", "A", "object"]);
    }

    #[test]
    fn mro_lookup_order() {
        let object = bare_type("object", vec![]);
        let a = bare_type("A", vec![Rc::clone(&object)]);
        a.set_attr(Rc::from("x"), TypeAttr::Plain(Object::Int(1)));
        let b = bare_type("B", vec![Rc::clone(&a)]);
        b.set_attr(Rc::from("x"), TypeAttr::Plain(Object::Int(2)));

        match b.lookup("x") {
            Some(TypeAttr::Plain(Object::Int(2))) => {}
            other => panic!("expected B's x, got {other:?}"),
        }
        match a.lookup("x") {
            Some(TypeAttr::Plain(Object::Int(1))) => {}
            other => panic!("expected A's x, got {other:?}"),
        }
        assert!(b.lookup("y").is_none());
    }
}
