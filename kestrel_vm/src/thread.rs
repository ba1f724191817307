//! Per-thread state: the data stack, the frame chain and the pending error.
//!
//! Frames are pushed and popped here. Everything that moves a frame's
//! storage happens on the owning thread at a call boundary:
//!
//! ```text
//!  push_frame ──► Local frame on the data stack
//!                    │
//!        take_frame  │  (generator creation)
//!                    ▼
//!               Shared heap frame ──suspend──► off the chain
//!                    ▲                              │
//!                    └────────────resume────────────┘
//!
//!  pop_frame: a frame object referenced elsewhere takes the storage,
//!             otherwise the frame is cleared and its slots reclaimed.
//! ```
//!
//! Closures passed to [`ThreadState::with_frame`] must not call back into
//! the thread or into frame objects; the data stack is borrowed while they
//! run.

use crate::data_stack::{DataStack, FrameEntry};
use crate::error::{RuntimeError, VmResult};
use crate::frame::{FrameCore, FrameId, FrameMut, FrameState, InterpreterFrame, Released};
use crate::frame_object::{FrameLink, FrameObject};
use crate::function::FunctionObject;
use crate::interpreter::Interpreter;
use crate::specialize::warmup_tick;
use kestrel_core::Value;
use log::{debug, trace};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) struct ThreadInner {
    pub(crate) interp: Interpreter,
    pub(crate) stack: RefCell<DataStack>,
    pending_error: RefCell<Option<RuntimeError>>,
}

/// Handle to one thread of execution.
#[derive(Clone)]
pub struct ThreadState {
    inner: Rc<ThreadInner>,
}

/// What happens to a frame's storage when it is popped.
enum Exit {
    /// Shared with a generator; only the chain link goes.
    Unlink,
    /// Nobody else can see the frame. Its frame object, if any, dies with it.
    Clear(Option<Rc<FrameObject>>),
    /// A frame object outlives the call and takes the storage.
    Transfer(Rc<FrameObject>),
}

impl ThreadState {
    pub(crate) fn new(interp: &Interpreter) -> Self {
        let stack = DataStack::new(&interp.config().data_stack);
        Self {
            inner: Rc::new(ThreadInner {
                interp: interp.clone(),
                stack: RefCell::new(stack),
                pending_error: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ThreadInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ThreadInner> {
        Rc::downgrade(&self.inner)
    }

    #[inline]
    pub fn interpreter(&self) -> &Interpreter {
        &self.inner.interp
    }

    /// Number of frames on the chain.
    #[inline]
    pub fn depth(&self) -> usize {
        self.inner.stack.borrow().depth()
    }

    /// The running frame.
    #[inline]
    pub fn current(&self) -> Option<FrameId> {
        self.inner.stack.borrow().current()
    }

    /// Data stack slots held by linked frames.
    #[inline]
    pub fn slots_in_use(&self) -> usize {
        self.inner.stack.borrow().slots_in_use()
    }

    // =========================================================================
    // Push / Pop
    // =========================================================================

    /// Push a frame for a call to `func`.
    ///
    /// The call counts toward the code's warmup and may quicken it. Slots
    /// come from the data stack, or from the heap once the stack limit is
    /// reached. Free-variable slots are seeded from the closure.
    pub fn push_frame(
        &self,
        func: &Rc<FunctionObject>,
        locals: Option<Value>,
    ) -> VmResult<FrameId> {
        let config = self.inner.interp.config();
        let depth = self.depth();
        if depth >= config.max_recursion_depth {
            return Err(RuntimeError::recursion_error(depth));
        }

        let code = Rc::clone(func.code());
        warmup_tick(&code, &config.quicken)?;

        let closure = func.closure();
        let mut stack = self.inner.stack.borrow_mut();
        let storage = stack.allocate(code.frame_size())?;
        let core = FrameCore::new(
            Some(Rc::clone(func)),
            Rc::clone(&code),
            Rc::clone(func.globals()),
            Rc::clone(func.builtins()),
            locals,
            stack.current(),
        );
        let id = stack.push_entry(FrameEntry::Local(InterpreterFrame { core, storage }));
        stack.with_frame(id, |mut frame| frame.init_free_vars(&closure));
        trace!("push frame {} for {}", id, code.name());
        Ok(id)
    }

    /// Pop the running frame.
    ///
    /// A frame object still referenced outside the frame takes ownership of
    /// the storage, copying it off the data stack if needed. Otherwise every
    /// slot is released in order, then the rest of the frame.
    ///
    /// If the copy cannot be allocated the frame is cleared anyway, the frame
    /// object is left without a frame and the allocation error is returned.
    pub fn pop_frame(&self) -> VmResult<()> {
        let mut released = Released::new();
        let mut result = Ok(());

        let mut stack = self.inner.stack.borrow_mut();
        let id = stack.current().expect("pop from an empty frame chain");
        let shared = matches!(stack.entry(id), FrameEntry::Shared(_));
        let exit = if shared {
            Exit::Unlink
        } else {
            match stack.with_frame(id, |frame| frame.core.frame_obj.take()) {
                Some(frame_obj) if Rc::strong_count(&frame_obj) > 1 => {
                    match Self::reserve_copy(&stack, id) {
                        Ok(Some(heap)) => {
                            stack.move_top_to_heap(heap);
                            Exit::Transfer(frame_obj)
                        }
                        Ok(None) => Exit::Transfer(frame_obj),
                        Err(err) => {
                            frame_obj.relink(FrameLink::Detached);
                            result = Err(err);
                            Exit::Clear(Some(frame_obj))
                        }
                    }
                }
                frame_obj => Exit::Clear(frame_obj),
            }
        };

        if let Exit::Clear(_) = exit {
            stack.drain_top(&mut released);
        }
        let entry = stack.pop_entry();
        drop(stack);
        trace!("pop frame {}", id);

        match (exit, entry) {
            (Exit::Unlink, FrameEntry::Shared(frame)) => {
                frame.borrow_mut().core.previous = None;
            }
            (Exit::Transfer(frame_obj), FrameEntry::Local(mut frame)) => {
                let previous = frame.core.previous.take();
                let back = previous.map(|prev| self.materialize(prev));
                debug!(
                    "frame {} of {} outlives its call, storage moved to its frame object",
                    id,
                    frame.core.code.name()
                );
                frame_obj.take_ownership(Rc::new(RefCell::new(frame)), back);
            }
            (Exit::Clear(frame_obj), entry) => {
                if let Some(frame_obj) = &frame_obj {
                    frame_obj.relink(FrameLink::Detached);
                }
                drop(entry);
                drop(frame_obj);
            }
            _ => unreachable!("frame {id} popped with mismatched storage"),
        }
        drop(released);
        result
    }

    /// Heap space for copying the top frame, if it is on the data stack.
    fn reserve_copy(stack: &DataStack, id: FrameId) -> VmResult<Option<Vec<Option<Value>>>> {
        let FrameEntry::Local(frame) = stack.entry(id) else {
            return Ok(None);
        };
        if frame.is_heap() {
            return Ok(None);
        }
        let mut heap = Vec::new();
        heap.try_reserve_exact(frame.core.code.frame_size())?;
        Ok(Some(heap))
    }

    /// Run `f` on a linked frame.
    ///
    /// # Panics
    ///
    /// Panics if `f` calls back into this thread.
    pub fn with_frame<R>(&self, id: FrameId, f: impl FnOnce(FrameMut<'_>) -> R) -> R {
        self.inner.stack.borrow_mut().with_frame(id, f)
    }

    /// Whether a linked frame's slots live outside the data stack.
    pub fn is_heap_frame(&self, id: FrameId) -> bool {
        match self.inner.stack.borrow().entry(id) {
            FrameEntry::Local(frame) => frame.is_heap(),
            FrameEntry::Shared(_) => true,
        }
    }

    // =========================================================================
    // Frame Objects
    // =========================================================================

    /// The frame object of a linked frame, if one was created.
    pub fn frame_object(&self, id: FrameId) -> Option<Rc<FrameObject>> {
        self.with_frame(id, |frame| frame.frame_object().cloned())
    }

    /// The frame object of a linked frame, creating it on first use.
    ///
    /// A pending error survives the call.
    pub fn materialize(&self, id: FrameId) -> Rc<FrameObject> {
        if let Some(frame_obj) = self.frame_object(id) {
            return frame_obj;
        }
        let pending = self.fetch_error();
        let (code, link) = match self.inner.stack.borrow().entry(id) {
            FrameEntry::Local(frame) => (
                Rc::clone(&frame.core.code),
                FrameLink::Stack {
                    thread: self.downgrade(),
                    id,
                },
            ),
            FrameEntry::Shared(frame) => (
                Rc::clone(&frame.borrow().core.code),
                FrameLink::Borrowed(Rc::downgrade(frame)),
            ),
        };
        let frame_obj = FrameObject::new(self.inner.interp.inner(), self.downgrade(), code, link);
        let stored = Rc::clone(&frame_obj);
        self.with_frame(id, move |frame| frame.core.frame_obj = Some(stored));
        self.restore_error(pending);
        frame_obj
    }

    /// The frame object of a heap frame that is off the chain, creating it
    /// on first use.
    pub fn materialize_heap(&self, frame: &Rc<RefCell<InterpreterFrame>>) -> Rc<FrameObject> {
        if let Some(frame_obj) = frame.borrow().core.frame_obj.clone() {
            return frame_obj;
        }
        let pending = self.fetch_error();
        let code = Rc::clone(&frame.borrow().core.code);
        let frame_obj = FrameObject::new(
            self.inner.interp.inner(),
            self.downgrade(),
            code,
            FrameLink::Borrowed(Rc::downgrade(frame)),
        );
        frame.borrow_mut().core.frame_obj = Some(Rc::clone(&frame_obj));
        self.restore_error(pending);
        frame_obj
    }

    // =========================================================================
    // Generator Support
    // =========================================================================

    /// Move the running frame to heap storage shared with the caller.
    ///
    /// The frame stays on the chain under the same id. Used when a generator
    /// or coroutine is created, before its frame is first suspended.
    ///
    /// # Panics
    ///
    /// Panics if the running frame is already shared.
    pub fn take_frame(&self) -> VmResult<Rc<RefCell<InterpreterFrame>>> {
        let (frame, frame_obj) = {
            let mut stack = self.inner.stack.borrow_mut();
            let id = stack.current().expect("no running frame");
            assert!(
                matches!(stack.entry(id), FrameEntry::Local(_)),
                "frame {id} is already shared"
            );
            if let Some(heap) = Self::reserve_copy(&stack, id)? {
                stack.move_top_to_heap(heap);
            }
            let FrameEntry::Local(frame) = stack.pop_entry() else {
                unreachable!("checked above");
            };
            debug!("frame {} of {} promoted to heap storage", id, frame.core.code.name());
            let frame_obj = frame.core.frame_obj.clone();
            let frame = Rc::new(RefCell::new(frame));
            let pushed = stack.push_entry(FrameEntry::Shared(Rc::clone(&frame)));
            debug_assert_eq!(pushed, id);
            (frame, frame_obj)
        };
        if let Some(frame_obj) = frame_obj {
            frame_obj.relink(FrameLink::Borrowed(Rc::downgrade(&frame)));
        }
        Ok(frame)
    }

    /// Unlink the running shared frame at a yield.
    ///
    /// # Panics
    ///
    /// Panics if the running frame is not shared.
    pub fn suspend(&self) {
        let entry = {
            let mut stack = self.inner.stack.borrow_mut();
            let id = stack.current().expect("no running frame");
            assert!(
                matches!(stack.entry(id), FrameEntry::Shared(_)),
                "frame {id} must be taken before it can suspend"
            );
            stack.pop_entry()
        };
        if let FrameEntry::Shared(frame) = entry {
            let mut frame = frame.borrow_mut();
            frame.core.state = FrameState::Suspended;
            frame.core.previous = None;
        }
    }

    /// Link a suspended (or never started) shared frame as the running one.
    ///
    /// # Panics
    ///
    /// Panics if the frame has already run to completion or is running.
    pub fn resume(&self, frame: &Rc<RefCell<InterpreterFrame>>) -> VmResult<FrameId> {
        let depth = self.depth();
        if depth >= self.inner.interp.config().max_recursion_depth {
            return Err(RuntimeError::recursion_error(depth));
        }
        let mut stack = self.inner.stack.borrow_mut();
        {
            let mut inner = frame.borrow_mut();
            assert!(
                inner.core.state.is_runnable(),
                "cannot resume a frame in state {:?}",
                inner.core.state
            );
            inner.core.previous = stack.current();
            inner.core.state = FrameState::Executing;
        }
        let id = stack.push_entry(FrameEntry::Shared(Rc::clone(frame)));
        trace!("resume frame {}", id);
        Ok(id)
    }

    /// Clear a heap frame that is off the chain, as when its generator is
    /// freed.
    ///
    /// A frame object referenced elsewhere takes the frame instead.
    pub fn clear_heap_frame(&self, frame: Rc<RefCell<InterpreterFrame>>) {
        let frame_obj = {
            let mut inner = frame.borrow_mut();
            inner.core.generator = None;
            inner.core.frame_obj.take()
        };
        if let Some(frame_obj) = frame_obj {
            if Rc::strong_count(&frame_obj) > 1 {
                let previous = frame.borrow_mut().core.previous.take();
                let back = previous.map(|prev| self.materialize(prev));
                frame_obj.take_ownership(frame, back);
                return;
            }
            frame_obj.relink(FrameLink::Detached);
        }

        let mut released = Released::new();
        let (func, locals) = {
            let mut inner = frame.borrow_mut();
            inner.as_frame_mut().clear_slots(&mut released);
            (inner.core.func.take(), inner.core.locals.take())
        };
        drop(released);
        drop(func);
        drop(locals);
    }

    // =========================================================================
    // Pending Error
    // =========================================================================

    /// Take the pending error, leaving none.
    pub fn fetch_error(&self) -> Option<RuntimeError> {
        self.inner.pending_error.borrow_mut().take()
    }

    /// Replace the pending error.
    pub fn restore_error(&self, error: Option<RuntimeError>) {
        let old = std::mem::replace(&mut *self.inner.pending_error.borrow_mut(), error);
        drop(old);
    }

    pub fn set_error(&self, error: RuntimeError) {
        self.restore_error(Some(error));
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.inner.pending_error.borrow().is_some()
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("stack", &*self.inner.stack.borrow())
            .field("pending_error", &self.has_error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use kestrel_bytecode::{CodeBuilder, CodeObject, Opcode};

    fn function(interp: &Interpreter, nlocals: usize, stacksize: usize) -> Rc<FunctionObject> {
        let mut b = CodeBuilder::new("f");
        for i in 0..nlocals {
            b.add_local(&format!("v{i}"));
        }
        b.emit_arg(Opcode::LoadConst, 0);
        b.emit(Opcode::ReturnValue);
        b.add_const(Value::none());
        b.set_stacksize(stacksize);
        let code: Rc<CodeObject> = Rc::new(b.finish());
        interp.new_function(code, interp.new_dict(), Vec::new()).unwrap()
    }

    fn setup() -> (Interpreter, ThreadState) {
        let interp = Interpreter::new(VmConfig::for_testing());
        let thread = interp.new_thread();
        (interp, thread)
    }

    #[test]
    fn test_push_links_previous() {
        let (interp, thread) = setup();
        let f = function(&interp, 2, 2);
        let outer = thread.push_frame(&f, None).unwrap();
        let inner = thread.push_frame(&f, None).unwrap();
        assert_eq!(thread.depth(), 2);
        assert_eq!(thread.with_frame(inner, |frame| frame.previous()), Some(outer));
        assert_eq!(thread.slots_in_use(), 8);
        thread.pop_frame().unwrap();
        thread.pop_frame().unwrap();
        assert_eq!(thread.slots_in_use(), 0);
    }

    #[test]
    fn test_new_frame_is_created() {
        let (interp, thread) = setup();
        let f = function(&interp, 3, 1);
        let id = thread.push_frame(&f, None).unwrap();
        thread.with_frame(id, |frame| {
            assert_eq!(frame.state(), FrameState::Created);
            assert_eq!(frame.lasti(), -1);
            assert_eq!(frame.stacktop(), 3);
            assert!(frame.localsplus().iter().all(Option::is_none));
        });
        thread.pop_frame().unwrap();
    }

    #[test]
    fn test_recursion_limit() {
        let (interp, thread) = setup();
        let f = function(&interp, 0, 1);
        for _ in 0..64 {
            thread.push_frame(&f, None).unwrap();
        }
        let err = thread.push_frame(&f, None).unwrap_err();
        assert_eq!(err.exception_type(), "RecursionError");
    }

    #[test]
    fn test_pending_error_slot() {
        let (_interp, thread) = setup();
        assert!(!thread.has_error());
        thread.set_error(RuntimeError::value_error("boom"));
        let err = thread.fetch_error().unwrap();
        assert_eq!(err.exception_type(), "ValueError");
        assert!(!thread.has_error());
    }

    #[test]
    fn test_materialize_preserves_pending_error() {
        let (interp, thread) = setup();
        let f = function(&interp, 1, 1);
        let id = thread.push_frame(&f, None).unwrap();
        thread.set_error(RuntimeError::key_error("k"));
        let frame_obj = thread.materialize(id);
        assert!(thread.fetch_error().unwrap().is_key_error());
        assert!(Rc::ptr_eq(&frame_obj, &thread.materialize(id)));
        drop(frame_obj);
        thread.pop_frame().unwrap();
    }
}
