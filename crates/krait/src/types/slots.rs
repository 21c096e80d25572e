//! Numbered operations on a type, and the tables that resolve them.
//!
//! Every type exposes a fixed set of slots. Each slot yields either an empty
//! marker or a handle of the prescribed arity. Because one Python type may
//! admit several host representations (`int` admits small and big integers),
//! an entry is either shared across representations or a per-host-class row;
//! [`SlotTable::lookup`] specializes on the actual host class of the
//! operand. Binary slots may additionally publish per-(left, right) handles
//! that are guaranteed not to return `NotImplemented`; those short-circuit
//! the reflected-operand protocol entirely.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;
use strum::EnumCount;

use crate::{
    exception::RunResult,
    object::{HostClass, Object},
    vm::{ThreadState, call::CallArgs},
};

/// Handle signature for one-operand slots (`neg`, `repr`, `iter`, ...).
pub type UnaryFn = fn(&Object, &mut ThreadState) -> RunResult<Object>;
/// Handle signature for two-operand slots (`add`, `getitem`, `contains`, ...).
pub type BinaryFn = fn(&Object, &Object, &mut ThreadState) -> RunResult<Object>;
/// Handle signature for item assignment.
pub type SetItemFn = fn(&Object, &Object, Object, &mut ThreadState) -> RunResult<()>;
/// Handle signature for item deletion.
pub type DelItemFn = fn(&Object, &Object, &mut ThreadState) -> RunResult<()>;
/// Handle signature for attribute lookup overrides.
pub type GetAttrFn = fn(&Object, &Rc<str>, &mut ThreadState) -> RunResult<Object>;
/// Handle signature for attribute assignment.
pub type SetAttrFn = fn(&Object, &Rc<str>, Object, &mut ThreadState) -> RunResult<()>;
/// Handle signature for attribute deletion.
pub type DelAttrFn = fn(&Object, &Rc<str>, &mut ThreadState) -> RunResult<()>;
/// Handle signature for the call slot.
pub type CallFn = fn(&Object, CallArgs, &mut ThreadState) -> RunResult<Object>;
/// Handle signature for the hash slot.
pub type HashFn = fn(&Object, &mut ThreadState) -> RunResult<i64>;
/// Handle signature for the truth-value slot.
pub type BoolFn = fn(&Object, &mut ThreadState) -> RunResult<bool>;
/// Handle signature for the length slot.
pub type LenFn = fn(&Object, &mut ThreadState) -> RunResult<usize>;

/// The slot enumeration: every numbered operation a type can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount)]
#[repr(usize)]
pub enum Slot {
    // unary
    Neg,
    Pos,
    Invert,
    Abs,
    // protocols
    Bool,
    Hash,
    Repr,
    Str,
    Iter,
    Next,
    Index,
    Int,
    Float,
    Len,
    Call,
    Contains,
    // attribute access
    GetAttr,
    SetAttr,
    DelAttr,
    // items
    GetItem,
    SetItem,
    DelItem,
    // binary
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Or,
    Xor,
    // reflected binary
    RAdd,
    RSub,
    RMul,
    RMatMul,
    RTrueDiv,
    RFloorDiv,
    RMod,
    RPow,
    RLShift,
    RRShift,
    RAnd,
    ROr,
    RXor,
    // in-place binary
    IAdd,
    ISub,
    IMul,
    IMatMul,
    ITrueDiv,
    IFloorDiv,
    IMod,
    IPow,
    ILShift,
    IRShift,
    IAnd,
    IOr,
    IXor,
    // comparisons
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Slot {
    /// The reflected alternate of a binary slot, if it has one.
    #[must_use]
    pub fn reflected(self) -> Option<Self> {
        Some(match self {
            Self::Add => Self::RAdd,
            Self::Sub => Self::RSub,
            Self::Mul => Self::RMul,
            Self::MatMul => Self::RMatMul,
            Self::TrueDiv => Self::RTrueDiv,
            Self::FloorDiv => Self::RFloorDiv,
            Self::Mod => Self::RMod,
            Self::Pow => Self::RPow,
            Self::LShift => Self::RLShift,
            Self::RShift => Self::RRShift,
            Self::And => Self::RAnd,
            Self::Or => Self::ROr,
            Self::Xor => Self::RXor,
            _ => return None,
        })
    }
}

/// A slot handle prepared for a specific representation, tagged by arity.
#[derive(Clone, Copy)]
pub enum SlotImpl {
    Unary(UnaryFn),
    Binary(BinaryFn),
    SetItem(SetItemFn),
    DelItem(DelItemFn),
    GetAttr(GetAttrFn),
    SetAttr(SetAttrFn),
    DelAttr(DelAttrFn),
    Call(CallFn),
    Hash(HashFn),
    Bool(BoolFn),
    Len(LenFn),
}

impl std::fmt::Debug for SlotImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arity = match self {
            Self::Unary(_) => "unary",
            Self::Binary(_) => "binary",
            Self::SetItem(_) => "setitem",
            Self::DelItem(_) => "delitem",
            Self::GetAttr(_) => "getattr",
            Self::SetAttr(_) => "setattr",
            Self::DelAttr(_) => "delattr",
            Self::Call(_) => "call",
            Self::Hash(_) => "hash",
            Self::Bool(_) => "bool",
            Self::Len(_) => "len",
        };
        write!(f, "SlotImpl::{arity}")
    }
}

/// One slot of a type: empty, shared across representations, or keyed by
/// the host class of the primary operand.
#[derive(Debug, Clone, Default)]
pub enum SlotEntry {
    #[default]
    Empty,
    Shared(SlotImpl),
    PerClass(SmallVec<[(HostClass, SlotImpl); 2]>),
}

/// The MRO-resolved slot table of a type.
#[derive(Debug, Clone)]
pub struct SlotTable {
    entries: Vec<SlotEntry>,
    /// Per-(left-class, right-class) binary handles that never return
    /// `NotImplemented`; consulted before the reflected-operand protocol.
    exact: AHashMap<(Slot, HostClass, HostClass), BinaryFn>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    /// Creates a table with every slot empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![SlotEntry::Empty; Slot::COUNT],
            exact: AHashMap::new(),
        }
    }

    /// Installs a handle shared by every representation of the type.
    pub fn set(&mut self, slot: Slot, handle: SlotImpl) {
        self.entries[slot as usize] = SlotEntry::Shared(handle);
    }

    /// Installs a handle for one host representation of the type.
    pub fn set_for(&mut self, slot: Slot, class: HostClass, handle: SlotImpl) {
        match &mut self.entries[slot as usize] {
            SlotEntry::PerClass(rows) => rows.push((class, handle)),
            entry @ (SlotEntry::Empty | SlotEntry::Shared(_)) => {
                let mut rows = SmallVec::new();
                rows.push((class, handle));
                *entry = SlotEntry::PerClass(rows);
            }
        }
    }

    /// Publishes a per-(left, right) handle guaranteed not to return
    /// `NotImplemented`.
    pub fn set_exact(&mut self, slot: Slot, left: HostClass, right: HostClass, handle: BinaryFn) {
        self.exact.insert((slot, left, right), handle);
    }

    /// Resolves the handle for `(operand, slot)`, specialized to the actual
    /// host class of `operand`, or `None` when the slot is empty.
    #[must_use]
    pub fn lookup(&self, operand: &Object, slot: Slot) -> Option<SlotImpl> {
        match &self.entries[slot as usize] {
            SlotEntry::Empty => None,
            SlotEntry::Shared(handle) => Some(*handle),
            SlotEntry::PerClass(rows) => {
                let class = HostClass::of(operand);
                rows.iter().find(|(c, _)| *c == class).map(|(_, h)| *h)
            }
        }
    }

    /// Whether the slot has any handle at all (for any representation).
    #[must_use]
    pub fn has(&self, slot: Slot) -> bool {
        !matches!(self.entries[slot as usize], SlotEntry::Empty)
    }

    /// Resolves an exact per-(left, right) binary handle.
    #[must_use]
    pub fn lookup_exact(&self, slot: Slot, left: &Object, right: &Object) -> Option<BinaryFn> {
        if self.exact.is_empty() {
            return None;
        }
        self.exact
            .get(&(slot, HostClass::of(left), HostClass::of(right)))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::RunError;

    fn neg_small(v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
        match v {
            Object::Int(i) => Ok(Object::Int(-i)),
            _ => Err(RunError::internal("wrong representation")),
        }
    }

    fn neg_big(_v: &Object, _ts: &mut ThreadState) -> RunResult<Object> {
        Ok(Object::None)
    }

    #[test]
    fn per_class_lookup_specializes() {
        let mut table = SlotTable::new();
        table.set_for(Slot::Neg, HostClass::SmallInt, SlotImpl::Unary(neg_small));
        table.set_for(Slot::Neg, HostClass::BigInt, SlotImpl::Unary(neg_big));

        let small = Object::Int(3);
        match table.lookup(&small, Slot::Neg) {
            Some(SlotImpl::Unary(f)) => assert!(std::ptr::fn_addr_eq(f, neg_small as UnaryFn)),
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(table.lookup(&small, Slot::Add).is_none());
        assert!(table.has(Slot::Neg));
        assert!(!table.has(Slot::Add));
    }

    #[test]
    fn shared_lookup_ignores_representation() {
        let mut table = SlotTable::new();
        table.set(Slot::Repr, SlotImpl::Unary(neg_big));
        assert!(table.lookup(&Object::Int(1), Slot::Repr).is_some());
        assert!(table.lookup(&Object::Float(1.0), Slot::Repr).is_some());
    }
}
