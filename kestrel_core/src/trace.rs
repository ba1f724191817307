//! Reference tracing for heap objects.
//!
//! Every heap object that can participate in a reference cycle implements
//! [`Trace`]. The cycle collector calls [`Trace::trace`] to discover the
//! outgoing edges of an object and [`Trace::clear_refs`] to break the cycle
//! once an object is proven unreachable.
//!
//! # Architecture
//!
//! - **Leaf types** (strings, immediates): nothing to visit
//! - **Containers** (`DictObject`, `CellObject`): visit every held value
//! - **Composite types** (functions, frames): visit each field that holds a value
//!
//! Edges are reported as allocation addresses. A [`Tracer`] never receives
//! an owning handle, so tracing cannot change any reference count.

use crate::value::Value;
use std::rc::Rc;

/// Visitor receiving the outgoing edges of a traced object.
pub trait Tracer {
    /// Record an edge to the allocation at `address`.
    fn trace_address(&mut self, address: usize);

    /// Record an edge to a value. Immediates are ignored.
    #[inline]
    fn trace_value(&mut self, value: &Value) {
        if let Some(address) = value.heap_address() {
            self.trace_address(address);
        }
    }

    /// Record an edge to an optional value.
    #[inline]
    fn trace_opt(&mut self, value: Option<&Value>) {
        if let Some(value) = value {
            self.trace_value(value);
        }
    }
}

/// An object whose outgoing references can be enumerated and dropped.
pub trait Trace {
    /// Visit every value this object holds a strong reference to.
    fn trace(&self, tracer: &mut dyn Tracer);

    /// Drop every held reference. Called on unreachable cycle members.
    fn clear_refs(&self) {}
}

/// Stable identity of an `Rc` allocation.
#[inline]
#[must_use]
pub fn address_of<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

/// Tracer that records every edge it is shown.
#[derive(Debug, Default)]
pub struct AddressCollector {
    /// Edges in visit order.
    pub addresses: Vec<usize>,
}

impl AddressCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an edge to `value` was recorded.
    #[must_use]
    pub fn saw(&self, value: &Value) -> bool {
        value
            .heap_address()
            .is_some_and(|a| self.addresses.contains(&a))
    }
}

impl Tracer for AddressCollector {
    #[inline]
    fn trace_address(&mut self, address: usize) {
        self.addresses.push(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellObject;

    #[test]
    fn test_trace_value_skips_immediates() {
        let mut tracer = AddressCollector::new();
        tracer.trace_value(&Value::int(1));
        tracer.trace_value(&Value::none());
        assert!(tracer.addresses.is_empty());
    }

    #[test]
    fn test_trace_value_records_heap_address() {
        let cell = Rc::new(CellObject::new(None));
        let value = Value::cell(Rc::clone(&cell));
        let mut tracer = AddressCollector::new();
        tracer.trace_value(&value);
        assert_eq!(tracer.addresses, vec![address_of(&cell)]);
        assert!(tracer.saw(&value));
    }
}
