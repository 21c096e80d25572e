//! The mutable one-slot container shared by closures.
//!
//! A cell is created by `MakeCell` at function entry (wrapping whatever the
//! slot held, possibly nothing) or inherited through a function's closure
//! array via `CopyFreeVars`. The same cell may be referenced by an enclosing
//! frame and any number of enclosed frames; its slot is only ever mutated
//! through `StoreDeref`/`DeleteDeref` on the owning thread.

use std::cell::RefCell;

use crate::object::Object;

/// A single-slot mutable container with two observable states:
/// holds-value and empty.
#[derive(Debug, Default)]
pub struct Cell {
    value: RefCell<Option<Object>>,
}

impl Cell {
    /// Creates an empty cell.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: Object) -> Self {
        Self {
            value: RefCell::new(Some(value)),
        }
    }

    /// Reads the cell, or `None` when empty.
    #[must_use]
    pub fn get(&self) -> Option<Object> {
        self.value.borrow().clone()
    }

    /// Whether the cell currently holds a value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Stores a value, replacing any previous content.
    pub fn set(&self, value: Object) {
        *self.value.borrow_mut() = Some(value);
    }

    /// Empties the cell, returning the previous content if any.
    pub fn clear(&self) -> Option<Object> {
        self.value.borrow_mut().take()
    }
}
