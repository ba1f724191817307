//! Heap objects that are not built into [`Value`](crate::Value).

use crate::mapping::Mapping;
use crate::trace::Trace;
use std::any::Any;
use std::rc::Rc;

/// A traceable heap object with a runtime type name.
pub trait Object: Trace + Any {
    /// Runtime type name, as shown in reprs and errors.
    fn type_name(&self) -> &'static str;

    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared handle into `Rc<dyn Any>` for typed downcasting.
    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any>;

    /// The mapping view of this object, if it supports the protocol.
    fn as_mapping(&self) -> Option<&dyn Mapping> {
        None
    }
}
