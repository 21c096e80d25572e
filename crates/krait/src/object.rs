//! The uniform value type representing Python objects at runtime.
//!
//! `Object` is a sum of host representations: small immediate values are
//! stored inline, everything else sits behind an `Rc`. Every value has
//! exactly one Python type, discoverable via [`Object::class`]; a single
//! Python type may be backed by several host representations (`int` is
//! `Int(i64)` until it overflows and `BigInt` after).
//!
//! `Rc` rather than an arena keeps the engine simple and makes every
//! container of objects `!Send`, which is exactly the threading contract:
//! frames, value stacks and fast locals are never shared across host
//! threads.

use std::{cell::RefCell, fmt, rc::Rc};

use num_bigint::BigInt;

use crate::{
    cell::Cell,
    code::Code,
    function::Function,
    interp::Interpreter,
    types::{TypeRef, dict::Dict, iter::SeqIter},
    vm::call::NativeFunction,
};

/// A user-defined object carrying an instance dictionary.
#[derive(Debug)]
pub struct Instance {
    /// The Python class this instance belongs to.
    pub class: TypeRef,
    /// The instance `__dict__`, insertion-ordered.
    pub dict: RefCell<indexmap::IndexMap<Rc<str>, Object, ahash::RandomState>>,
}

impl Instance {
    /// Allocates a fresh instance of `class` with an empty dict.
    #[must_use]
    pub fn new(class: TypeRef) -> Rc<Self> {
        Rc::new(Self {
            class,
            dict: RefCell::new(indexmap::IndexMap::default()),
        })
    }
}

/// A callable bound to its receiver, produced by descriptor binding.
#[derive(Debug)]
pub struct BoundMethod {
    /// The underlying callable (a def function or a native function).
    pub func: Object,
    /// The receiver passed as the leading argument on call.
    pub receiver: Object,
}

/// Primary value type representing Python objects at runtime.
///
/// `None`, `True`, `False`, `NotImplemented` and `Ellipsis` are singletons
/// in the Python sense: identity comparison on them is variant (and payload)
/// equality, which is indistinguishable from pointer identity for values
/// that carry no mutable state.
#[derive(Debug, Clone)]
pub enum Object {
    /// The empty-slot marker: an unbound fast local before assignment, and
    /// the call-protocol null sentinel pushed by `PushNull`/`LoadMethod`.
    /// Never escapes evaluation.
    Undefined,
    None,
    /// Returned by binary slot handlers to signal that the operation is not
    /// supported for the given operand types; the abstract layer then tries
    /// the reflected handler on the other operand.
    NotImplemented,
    Ellipsis,
    Bool(bool),
    /// The small-integer representation of `int`.
    Int(i64),
    /// The big-integer representation of `int`, used once a value leaves
    /// i64 range. Operations demote back to `Int` when the result fits.
    BigInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<[Object]>),
    List(Rc<RefCell<Vec<Object>>>),
    Dict(Rc<RefCell<Dict>>),
    /// A sequence iterator produced by `GetIter`.
    Iter(Rc<RefCell<SeqIter>>),
    Code(Rc<Code>),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    Cell(Rc<Cell>),
    Type(TypeRef),
    Instance(Rc<Instance>),
}

/// The host representation backing a value.
///
/// Slot tables may carry one handler per host class of a Python type; slot
/// lookup specializes on this discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    NoneType,
    NotImplementedType,
    Ellipsis,
    Bool,
    SmallInt,
    BigInt,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Iter,
    Code,
    Function,
    Native,
    BoundMethod,
    Cell,
    Type,
    Instance,
}

impl HostClass {
    /// The host class of a value.
    ///
    /// # Panics
    ///
    /// Panics on `Undefined`: the marker has no type and must never reach a
    /// slot lookup.
    #[must_use]
    pub fn of(obj: &Object) -> Self {
        match obj {
            Object::Undefined => panic!("cannot take the host class of the empty-slot marker"),
            Object::None => Self::NoneType,
            Object::NotImplemented => Self::NotImplementedType,
            Object::Ellipsis => Self::Ellipsis,
            Object::Bool(_) => Self::Bool,
            Object::Int(_) => Self::SmallInt,
            Object::BigInt(_) => Self::BigInt,
            Object::Float(_) => Self::Float,
            Object::Str(_) => Self::Str,
            Object::Tuple(_) => Self::Tuple,
            Object::List(_) => Self::List,
            Object::Dict(_) => Self::Dict,
            Object::Iter(_) => Self::Iter,
            Object::Code(_) => Self::Code,
            Object::Function(_) => Self::Function,
            Object::Native(_) => Self::Native,
            Object::BoundMethod(_) => Self::BoundMethod,
            Object::Cell(_) => Self::Cell,
            Object::Type(_) => Self::Type,
            Object::Instance(_) => Self::Instance,
        }
    }
}

impl Object {
    /// The Python type of this value.
    ///
    /// # Panics
    ///
    /// Panics on `Undefined`, which has no type by construction.
    #[must_use]
    pub fn class(&self, interp: &Interpreter) -> TypeRef {
        match self {
            Self::Undefined => panic!("cannot take the type of the empty-slot marker"),
            Self::None => interp.types.none.clone(),
            Self::NotImplemented => interp.types.not_implemented.clone(),
            Self::Ellipsis => interp.types.ellipsis.clone(),
            Self::Bool(_) => interp.types.bool_.clone(),
            Self::Int(_) | Self::BigInt(_) => interp.types.int.clone(),
            Self::Float(_) => interp.types.float.clone(),
            Self::Str(_) => interp.types.str_.clone(),
            Self::Tuple(_) => interp.types.tuple.clone(),
            Self::List(_) => interp.types.list.clone(),
            Self::Dict(_) => interp.types.dict.clone(),
            Self::Iter(_) => interp.types.iterator.clone(),
            Self::Code(_) => interp.types.code.clone(),
            Self::Function(_) => interp.types.function.clone(),
            Self::Native(_) => interp.types.builtin_function.clone(),
            Self::BoundMethod(_) => interp.types.method.clone(),
            Self::Cell(_) => interp.types.cell.clone(),
            Self::Type(_) => interp.types.type_.clone(),
            Self::Instance(inst) => inst.class.clone(),
        }
    }

    /// The Python type name, for error messages.
    ///
    /// Unlike [`Object::class`] this needs no interpreter: every builtin
    /// representation has a fixed type name, and instances carry their class.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Undefined => "<empty>".to_owned(),
            Self::None => "NoneType".to_owned(),
            Self::NotImplemented => "NotImplementedType".to_owned(),
            Self::Ellipsis => "ellipsis".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Int(_) | Self::BigInt(_) => "int".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Str(_) => "str".to_owned(),
            Self::Tuple(_) => "tuple".to_owned(),
            Self::List(_) => "list".to_owned(),
            Self::Dict(_) => "dict".to_owned(),
            Self::Iter(_) => "iterator".to_owned(),
            Self::Code(_) => "code".to_owned(),
            Self::Function(_) => "function".to_owned(),
            Self::Native(_) => "builtin_function_or_method".to_owned(),
            Self::BoundMethod(_) => "method".to_owned(),
            Self::Cell(_) => "cell".to_owned(),
            Self::Type(_) => "type".to_owned(),
            Self::Instance(inst) => inst.class.name().to_owned(),
        }
    }

    /// Identity comparison (`is`).
    ///
    /// Singletons compare by variant; `Rc`-backed values compare by pointer.
    /// Small ints and floats compare by value, which matches the latitude
    /// CPython gives itself with interned integers.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None)
            | (Self::NotImplemented, Self::NotImplemented)
            | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::BigInt(a), Self::BigInt(b)) => Rc::ptr_eq(a, b),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Iter(a), Self::Iter(b)) => Rc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(a, b),
            (Self::BoundMethod(a), Self::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Self::Cell(a), Self::Cell(b)) => Rc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether this is the empty-slot marker.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Whether this is the `None` singleton.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// A stable per-object address for `repr` of heap values.
    #[must_use]
    pub(crate) fn address(&self) -> usize {
        match self {
            Self::BigInt(rc) => Rc::as_ptr(rc) as usize,
            Self::Str(rc) => Rc::as_ptr(rc).cast::<u8>() as usize,
            Self::Tuple(rc) => Rc::as_ptr(rc).cast::<u8>() as usize,
            Self::List(rc) => Rc::as_ptr(rc) as usize,
            Self::Dict(rc) => Rc::as_ptr(rc) as usize,
            Self::Iter(rc) => Rc::as_ptr(rc) as usize,
            Self::Code(rc) => Rc::as_ptr(rc) as usize,
            Self::Function(rc) => Rc::as_ptr(rc) as usize,
            Self::Native(rc) => Rc::as_ptr(rc) as usize,
            Self::BoundMethod(rc) => Rc::as_ptr(rc) as usize,
            Self::Cell(rc) => Rc::as_ptr(rc) as usize,
            Self::Type(rc) => Rc::as_ptr(rc) as usize,
            Self::Instance(rc) => Rc::as_ptr(rc) as usize,
            _ => 0,
        }
    }

    /// Extracts a small int, converting `bool` the way Python arithmetic does.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Extracts a float payload.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Extracts string content.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a string object.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Builds a tuple object from a vector of items.
    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(Rc::from(items))
    }

    /// Builds a list object from a vector of items.
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// Wraps a `BigInt`, demoting to the small representation when it fits.
    ///
    /// Keeping values in `Int(i64)` whenever possible is the core of the
    /// two-representation design; all arithmetic funnels results through
    /// here so the small representation stays canonical.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        match num_traits::ToPrimitive::to_i64(&value) {
            Some(small) => Self::Int(small),
            None => Self::BigInt(Rc::new(value)),
        }
    }
}

impl fmt::Display for Object {
    /// A debug-oriented rendering; the Python-visible `repr`/`str` go
    /// through the type's slots.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "<empty>"),
            Self::None => write!(f, "None"),
            Self::NotImplemented => write!(f, "NotImplemented"),
            Self::Ellipsis => write!(f, "Ellipsis"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", crate::types::float::float_repr(*v)),
            Self::Str(s) => write!(f, "{s}"),
            other => write!(f, "<{} object at {:#x}>", other.type_name(), other.address()),
        }
    }
}
