//! Cell object for closure semantics.
//!
//! A cell holds a single captured variable. Closures share the cell, so a
//! write through one closure is visible to every other holder. An empty cell
//! is an unbound variable.

use crate::trace::{Trace, Tracer};
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;

/// A cell object holding a possibly-unbound captured variable.
#[derive(Default)]
pub struct CellObject {
    value: RefCell<Option<Value>>,
}

impl CellObject {
    /// Create a cell with an initial content.
    #[inline]
    #[must_use]
    pub fn new(value: Option<Value>) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    /// Clone out the content, or `None` when unbound.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    /// Replace the content, returning the previous one.
    ///
    /// The old value is handed back so it is dropped after the borrow ends.
    #[inline]
    pub fn set(&self, value: Option<Value>) -> Option<Value> {
        self.value.replace(value)
    }

    /// Whether the cell holds a value.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.value.borrow().is_some()
    }
}

impl Trace for CellObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.trace_opt(self.value.borrow().as_ref());
    }

    fn clear_refs(&self) {
        drop(self.set(None));
    }
}

impl fmt::Debug for CellObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.value.borrow() {
            Some(v) => write!(f, "<cell: {v:?}>"),
            None => write!(f, "<cell: empty>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::AddressCollector;

    #[test]
    fn test_new_empty_cell_is_unbound() {
        let cell = CellObject::default();
        assert!(!cell.is_bound());
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_set_returns_previous() {
        let cell = CellObject::new(Some(Value::int(1)));
        let old = cell.set(Some(Value::int(2)));
        assert_eq!(old, Some(Value::int(1)));
        assert_eq!(cell.get(), Some(Value::int(2)));
    }

    #[test]
    fn test_clear_refs_unbinds() {
        let cell = CellObject::new(Some(Value::str("x")));
        cell.clear_refs();
        assert!(!cell.is_bound());
    }

    #[test]
    fn test_trace_visits_content() {
        let inner = Value::str("captured");
        let cell = CellObject::new(Some(inner.clone()));
        let mut tracer = AddressCollector::new();
        cell.trace(&mut tracer);
        assert!(tracer.saw(&inner));
    }
}
