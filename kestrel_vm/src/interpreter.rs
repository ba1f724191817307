//! Interpreter-wide state shared by every thread.
//!
//! An [`Interpreter`] owns what outlives any single call chain:
//!
//! - the configuration new threads are created with
//! - the builtins namespace
//! - the frame object pool
//! - the cycle collector every container is registered with
//!
//! Handles are cheap to clone; all clones refer to the same instance.

use crate::config::VmConfig;
use crate::error::{RuntimeError, VmResult};
use crate::facade_pool::FacadePool;
use crate::function::FunctionObject;
use crate::thread::ThreadState;
use kestrel_bytecode::CodeObject;
use kestrel_core::{CellObject, DictObject, Trace, Value};
use kestrel_gc::{CollectStats, CycleCollector};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Name under which globals may carry their own builtins.
pub const BUILTINS_KEY: &str = "__builtins__";

pub(crate) struct InterpreterInner {
    pub(crate) config: VmConfig,
    pub(crate) builtins: Rc<DictObject>,
    pub(crate) pool: RefCell<FacadePool>,
    pub(crate) gc: RefCell<CycleCollector>,
}

impl InterpreterInner {
    /// Register `obj` with the cycle collector.
    ///
    /// Skipped while a collection is running; the object is then simply
    /// not a candidate until it is tracked again.
    pub(crate) fn track<T: Trace + 'static>(&self, obj: &Rc<T>) {
        if let Ok(mut gc) = self.gc.try_borrow_mut() {
            gc.track(obj);
        }
    }
}

/// Handle to an interpreter instance.
#[derive(Clone)]
pub struct Interpreter {
    inner: Rc<InterpreterInner>,
}

impl Interpreter {
    /// Create an interpreter with an empty builtins namespace.
    pub fn new(config: VmConfig) -> Self {
        Self::with_builtins(config, Rc::new(DictObject::new()))
    }

    /// Create an interpreter around an existing builtins namespace.
    pub fn with_builtins(config: VmConfig, builtins: Rc<DictObject>) -> Self {
        let pool = FacadePool::new(&config.frame_pool);
        let inner = Rc::new(InterpreterInner {
            config,
            builtins,
            pool: RefCell::new(pool),
            gc: RefCell::new(CycleCollector::new()),
        });
        inner.track(&inner.builtins);
        Self { inner }
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.inner.config
    }

    #[inline]
    pub fn builtins(&self) -> &Rc<DictObject> {
        &self.inner.builtins
    }

    #[inline]
    pub(crate) fn inner(&self) -> &Rc<InterpreterInner> {
        &self.inner
    }

    /// Create a thread with its own data stack.
    pub fn new_thread(&self) -> ThreadState {
        ThreadState::new(self)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Create an empty namespace registered with the collector.
    pub fn new_dict(&self) -> Rc<DictObject> {
        let dict = Rc::new(DictObject::new());
        self.inner.track(&dict);
        dict
    }

    /// Create a cell registered with the collector.
    pub fn new_cell(&self, value: Option<Value>) -> Rc<CellObject> {
        let cell = Rc::new(CellObject::new(value));
        self.inner.track(&cell);
        cell
    }

    /// Create a function running `code` in `globals`.
    ///
    /// `closure` must hold one cell per free variable of `code`.
    pub fn new_function(
        &self,
        code: Rc<CodeObject>,
        globals: Rc<DictObject>,
        closure: Vec<Rc<CellObject>>,
    ) -> VmResult<Rc<FunctionObject>> {
        if closure.len() != code.nfreevars() {
            return Err(RuntimeError::value_error(format!(
                "{}() requires a closure of length {}, not {}",
                code.name(),
                code.nfreevars(),
                closure.len()
            )));
        }
        let builtins = self.builtins_from_globals(&globals)?;
        let func = Rc::new(FunctionObject::new(code, globals, builtins, closure));
        self.inner.track(&func);
        Ok(func)
    }

    /// The builtins a frame running in `globals` sees.
    ///
    /// A dict stored under `__builtins__` wins; without one the interpreter's
    /// builtins are used.
    pub fn builtins_from_globals(&self, globals: &DictObject) -> VmResult<Rc<DictObject>> {
        match globals.get(BUILTINS_KEY) {
            None => Ok(Rc::clone(&self.inner.builtins)),
            Some(value) => value.as_dict().cloned().ok_or_else(|| {
                RuntimeError::type_error(format!(
                    "{BUILTINS_KEY} must be a dict, not '{}'",
                    value.type_name()
                ))
            }),
        }
    }

    // =========================================================================
    // Garbage Collection
    // =========================================================================

    /// Register `obj` with the cycle collector.
    pub fn track<T: Trace + 'static>(&self, obj: &Rc<T>) {
        self.inner.track(obj);
    }

    /// Run a cycle collection.
    ///
    /// # Panics
    ///
    /// Panics if called while a collection is already running.
    pub fn collect(&self) -> CollectStats {
        let stats = self.inner.gc.borrow_mut().collect();
        debug!(
            "cycle collection: {} examined, {} unreachable, {} pruned",
            stats.examined, stats.unreachable, stats.pruned
        );
        stats
    }

    /// Objects registered with the collector, including dead entries not yet
    /// pruned.
    pub fn tracked_count(&self) -> usize {
        self.inner.gc.borrow().tracked_count()
    }

    // =========================================================================
    // Frame Object Pool
    // =========================================================================

    /// Frame object shells waiting for reuse.
    pub fn free_frame_objects(&self) -> usize {
        self.inner.pool.borrow().num_free()
    }

    /// Drop every pooled shell, returning how many were freed.
    pub fn clear_frame_pool(&self) -> usize {
        self.inner.pool.borrow_mut().clear()
    }

    /// Tear down the frame object pool. Creating a frame object afterwards
    /// panics.
    pub fn finalize(&self) {
        self.inner.pool.borrow_mut().finalize();
    }

    /// Whether two handles refer to the same interpreter.
    #[inline]
    pub fn ptr_eq(&self, other: &Interpreter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.inner.config)
            .field("pool", &*self.inner.pool.borrow())
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::{CodeBuilder, Opcode};

    fn closure_code() -> Rc<CodeObject> {
        let mut b = CodeBuilder::new("inner");
        let x = b.add_free("x");
        b.emit_arg(Opcode::LoadDeref, x);
        b.emit(Opcode::ReturnValue);
        b.set_stacksize(1);
        Rc::new(b.finish())
    }

    #[test]
    fn test_builtins_from_globals_default() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let globals = DictObject::new();
        let builtins = interp.builtins_from_globals(&globals).unwrap();
        assert!(Rc::ptr_eq(&builtins, interp.builtins()));
    }

    #[test]
    fn test_builtins_from_globals_override() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let own = Rc::new(DictObject::from_pairs([("len", Value::int(1))]));
        let globals = DictObject::from_pairs([(BUILTINS_KEY, Value::dict(Rc::clone(&own)))]);
        let builtins = interp.builtins_from_globals(&globals).unwrap();
        assert!(Rc::ptr_eq(&builtins, &own));
    }

    #[test]
    fn test_builtins_from_globals_rejects_non_dict() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let globals = DictObject::from_pairs([(BUILTINS_KEY, Value::int(3))]);
        let err = interp.builtins_from_globals(&globals).unwrap_err();
        assert_eq!(err.exception_type(), "TypeError");
    }

    #[test]
    fn test_new_function_checks_closure() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let code = closure_code();
        let err = interp
            .new_function(Rc::clone(&code), interp.new_dict(), Vec::new())
            .unwrap_err();
        assert_eq!(err.exception_type(), "ValueError");

        let cell = interp.new_cell(Some(Value::int(7)));
        let func = interp.new_function(code, interp.new_dict(), vec![cell]).unwrap();
        assert_eq!(func.name(), "inner");
        assert_eq!(func.closure().len(), 1);
    }

    #[test]
    fn test_new_objects_are_tracked() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let before = interp.tracked_count();
        let _dict = interp.new_dict();
        let _cell = interp.new_cell(None);
        assert_eq!(interp.tracked_count(), before + 2);
    }

    #[test]
    fn test_collect_breaks_dict_cycle() {
        let interp = Interpreter::new(VmConfig::for_testing());
        let a = interp.new_dict();
        let b = interp.new_dict();
        a.insert("b", Value::dict(Rc::clone(&b)));
        b.insert("a", Value::dict(Rc::clone(&a)));
        let weak = Rc::downgrade(&a);
        drop(a);
        drop(b);
        assert!(weak.upgrade().is_some());

        let stats = interp.collect();
        assert_eq!(stats.unreachable, 2);
        assert!(weak.upgrade().is_none());
    }
}
