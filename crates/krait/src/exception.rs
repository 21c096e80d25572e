//! Error kinds used by the core.
//!
//! Two worlds of failure flow through evaluation:
//! - Python exceptions (`RunError::Exc`) propagate out of `eval` and can in
//!   principle be caught by a future exception-table pass.
//! - Internal errors (`RunError::Internal`) mean the interpreter itself is
//!   inconsistent; they terminate the current evaluation and are tagged with
//!   the opcode/ip where they surfaced.

use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use strum::{Display, EnumString, IntoStaticStr};

use crate::opcode::Opcode;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types raised by the core.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations. The string representation matches
/// the variant name exactly (e.g. `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Root of the hierarchy; catches everything.
    BaseException,
    /// Primary exception class - matches any ordinary exception.
    Exception,

    // --- ArithmeticError hierarchy ---
    /// Intermediate class for arithmetic errors.
    ArithmeticError,
    /// Subclass of ArithmeticError.
    OverflowError,
    /// Subclass of ArithmeticError.
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    /// Intermediate class for lookup errors.
    LookupError,
    /// Subclass of LookupError.
    IndexError,
    /// Subclass of LookupError.
    KeyError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - local or cell variable accessed before assignment.
    UnboundLocalError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    /// Subclass of RuntimeError - the frame stack exceeded its depth limit.
    RecursionError,

    // --- Standalone exception types ---
    AttributeError,
    StopIteration,
    /// Internal inconsistency that user code can observe (e.g. no locals
    /// mapping where one is required).
    SystemError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Implements the slice of Python's exception hierarchy the core uses:
    /// `LookupError` is the base for `KeyError`/`IndexError`,
    /// `ArithmeticError` for `OverflowError`/`ZeroDivisionError`,
    /// `NameError` for `UnboundLocalError`, and `RuntimeError` for
    /// `RecursionError`.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => true,
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            Self::RuntimeError => matches!(self, Self::RecursionError),
            _ => false,
        }
    }
}

/// A raised Python exception: type plus optional message.
///
/// Exception chaining (`__cause__`/`__context__`) and tracebacks are outside
/// the core; a frame that sees one of these unwinds and re-raises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    etype: ExcType,
    message: Option<String>,
}

impl Exception {
    /// Creates a new exception with the given type and message.
    #[must_use]
    pub fn new(etype: ExcType, message: impl Into<String>) -> Self {
        Self {
            etype,
            message: Some(message.into()),
        }
    }

    /// Creates a new exception with no message (e.g. a bare `StopIteration`).
    #[must_use]
    pub fn bare(etype: ExcType) -> Self {
        Self { etype, message: None }
    }

    /// The exception type, used for `except`-style matching.
    #[must_use]
    pub fn etype(&self) -> ExcType {
        self.etype
    }

    /// The exception message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.etype),
            None => write!(f, "{}", self.etype),
        }
    }
}

/// Runtime error types that can occur during execution.
///
/// Two variants:
/// - `Internal`: bug in the interpreter implementation, or a host-language
///   error that must not reach user code unchanged
/// - `Exc`: Python exception that propagates out of `eval`
#[derive(Debug)]
pub enum RunError {
    /// Internal interpreter error - indicates a bug in krait, not user code.
    Internal(Cow<'static, str>),
    /// Python exception (e.g. ValueError, TypeError).
    Exc(Box<Exception>),
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Exc(exc) => write!(f, "{exc}"),
        }
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a Python exception error with a formatted message.
    pub fn exc(etype: ExcType, msg: impl Into<String>) -> Self {
        Exception::new(etype, msg).into()
    }

    /// Returns true if this error is a catchable exception of `etype`
    /// (subclass matching included).
    #[must_use]
    pub fn is_exception_type(&self, etype: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.etype().is_subclass_of(etype),
            Self::Internal(_) => false,
        }
    }

    /// Returns true if this error is a StopIteration exception.
    ///
    /// `FOR_ITER` consumes StopIteration locally instead of propagating it.
    #[must_use]
    pub fn is_stop_iteration(&self) -> bool {
        match self {
            Self::Exc(exc) => exc.etype() == ExcType::StopIteration,
            Self::Internal(_) => false,
        }
    }

    /// Tags an internal error with the opcode and instruction pointer where
    /// it surfaced. Python exceptions pass through untouched.
    #[must_use]
    pub fn with_loop_context(self, op: Opcode, ip: usize) -> Self {
        match self {
            Self::Internal(msg) => Self::Internal(format!("{msg} (while executing {op} at ip {ip})").into()),
            exc @ Self::Exc(_) => exc,
        }
    }
}

impl ExcType {
    /// `TypeError: unsupported operand type(s) for <op>: 'A' and 'B'`
    #[must_use]
    pub(crate) fn binary_type_error(op_symbol: &str, left: &str, right: &str) -> RunError {
        RunError::exc(
            Self::TypeError,
            format!("unsupported operand type(s) for {op_symbol}: '{left}' and '{right}'"),
        )
    }

    /// `TypeError: bad operand type for unary <op>: 'A'`
    #[must_use]
    pub(crate) fn unary_type_error(op_symbol: &str, operand: &str) -> RunError {
        RunError::exc(
            Self::TypeError,
            format!("bad operand type for unary {op_symbol}: '{operand}'"),
        )
    }

    /// `NameError: name 'x' is not defined`
    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        RunError::exc(Self::NameError, format!("name '{name}' is not defined"))
    }

    /// `UnboundLocalError` for a fast local or cell variable accessed before
    /// assignment.
    #[must_use]
    pub(crate) fn unbound_local(name: &str) -> RunError {
        RunError::exc(
            Self::UnboundLocalError,
            format!("cannot access local variable '{name}' where it is not associated with a value"),
        )
    }

    /// `NameError` for an empty free-variable cell.
    #[must_use]
    pub(crate) fn unbound_free(name: &str) -> RunError {
        RunError::exc(
            Self::NameError,
            format!("free variable '{name}' referenced before assignment in enclosing scope"),
        )
    }

    /// `AttributeError: 'A' object has no attribute 'x'`
    #[must_use]
    pub(crate) fn no_attribute(type_name: &str, attr: &str) -> RunError {
        RunError::exc(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    /// `TypeError: 'A' object is not iterable`
    #[must_use]
    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        RunError::exc(Self::TypeError, format!("'{type_name}' object is not iterable"))
    }

    /// `TypeError: 'A' object is not callable`
    #[must_use]
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        RunError::exc(Self::TypeError, format!("'{type_name}' object is not callable"))
    }

    /// `SystemError` for a missing locals mapping.
    ///
    /// The action is spelled out ("loading" / "storing" / "deleting") so the
    /// message names both what was attempted and which name it involved.
    #[must_use]
    pub(crate) fn no_locals(action: &str, name: &str) -> RunError {
        RunError::exc(Self::SystemError, format!("no locals found when {action} '{name}'"))
    }
}
