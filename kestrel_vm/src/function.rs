//! Function objects: code plus the namespaces and closure it runs with.

use kestrel_bytecode::CodeObject;
use kestrel_core::{CellObject, DictObject, Object, Trace, Tracer, address_of};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A callable: the callee descriptor frames are pushed for.
///
/// Created through [`Interpreter::new_function`], which checks the closure
/// against the code's free variables.
///
/// [`Interpreter::new_function`]: crate::interpreter::Interpreter::new_function
pub struct FunctionObject {
    name: Rc<str>,
    code: Rc<CodeObject>,
    globals: Rc<DictObject>,
    builtins: Rc<DictObject>,
    closure: RefCell<Vec<Rc<CellObject>>>,
}

impl FunctionObject {
    pub(crate) fn new(
        code: Rc<CodeObject>,
        globals: Rc<DictObject>,
        builtins: Rc<DictObject>,
        closure: Vec<Rc<CellObject>>,
    ) -> Self {
        Self {
            name: Rc::clone(code.name()),
            code,
            globals,
            builtins,
            closure: RefCell::new(closure),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    #[inline]
    #[must_use]
    pub fn globals(&self) -> &Rc<DictObject> {
        &self.globals
    }

    #[inline]
    #[must_use]
    pub fn builtins(&self) -> &Rc<DictObject> {
        &self.builtins
    }

    /// Cells for the code's free variables, in slot order.
    pub fn closure(&self) -> Vec<Rc<CellObject>> {
        self.closure.borrow().clone()
    }
}

impl Trace for FunctionObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.trace_address(address_of(&self.globals));
        tracer.trace_address(address_of(&self.builtins));
        if let Ok(closure) = self.closure.try_borrow() {
            for cell in closure.iter() {
                tracer.trace_address(address_of(cell));
            }
        }
    }

    fn clear_refs(&self) {
        let closure = std::mem::take(&mut *self.closure.borrow_mut());
        drop(closure);
    }
}

impl Object for FunctionObject {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {} at {:p}>", self.name, self)
    }
}
