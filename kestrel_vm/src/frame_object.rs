//! Frame objects: the introspection handle of an interpreter frame.
//!
//! A frame object is created on demand, the first time anything outside the
//! interpreter asks for a frame (tracebacks, debuggers, `sys._getframe`).
//! While the call is running the frame object only points at the frame;
//! if the frame object outlives the call, it takes ownership of the frame's
//! storage so the frame stays inspectable after return.
//!
//! ```text
//!   data stack                    heap
//! ┌──────────────┐          ┌──────────────┐
//! │ frame #3     │◄─Stack───│ FrameObject  │   while running
//! │  frame_obj ──┼─────────►│              │
//! └──────────────┘          └──────────────┘
//!
//!                           ┌──────────────┐       ┌──────────────────┐
//!        after return       │ FrameObject  │─Owned►│ InterpreterFrame │
//!                           │  back ───────┼──►    └──────────────────┘
//!                           └──────────────┘   caller's frame object
//! ```
//!
//! The mutable part of a frame object lives in a pooled [`FacadeShell`] so
//! that shells can be recycled through the interpreter's [`FacadePool`].
//!
//! [`FacadePool`]: crate::facade_pool::FacadePool

use crate::data_stack::alloc_heap_slots;
use crate::error::{JumpError, RuntimeError, VmResult};
use crate::frame::{FrameCore, FrameId, FrameMut, FrameState, InterpreterFrame, Released};
use crate::interpreter::InterpreterInner;
use crate::stack_analysis::plan_jump;
use crate::thread::{ThreadInner, ThreadState};
use kestrel_bytecode::{CodeObject, CodeUnit};
use kestrel_core::{DictObject, Object, Trace, Tracer, Value, address_of};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

// =============================================================================
// Shell
// =============================================================================

/// How a frame object reaches its frame.
#[derive(Clone, Default)]
pub(crate) enum FrameLink {
    /// No frame. Only pooled shells are detached.
    #[default]
    Detached,
    /// A frame linked on a thread's chain.
    Stack {
        thread: Weak<ThreadInner>,
        id: FrameId,
    },
    /// A heap frame owned by someone else, usually a generator.
    Borrowed(Weak<RefCell<InterpreterFrame>>),
    /// A heap frame owned by this frame object.
    Owned(Rc<RefCell<InterpreterFrame>>),
}

/// Mutable state of a frame object.
pub(crate) struct FacadeShell {
    pub(crate) link: FrameLink,
    pub(crate) back: Option<Rc<FrameObject>>,
    pub(crate) trace: Option<Value>,
    /// Line override set by tracing; 0 means none.
    pub(crate) lineno: u32,
    pub(crate) trace_lines: bool,
    pub(crate) trace_opcodes: bool,
    pub(crate) thread: Weak<ThreadInner>,
}

type ShellContents = (FrameLink, Option<Rc<FrameObject>>, Option<Value>);

impl FacadeShell {
    pub(crate) fn new(link: FrameLink, thread: Weak<ThreadInner>) -> Self {
        Self {
            link,
            back: None,
            trace: None,
            lineno: 0,
            trace_lines: true,
            trace_opcodes: false,
            thread,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self.link, FrameLink::Detached) && self.back.is_none() && self.trace.is_none()
    }

    /// Reset to the pooled state, handing back everything it referenced.
    fn take_contents(&mut self) -> ShellContents {
        self.lineno = 0;
        self.trace_lines = true;
        self.trace_opcodes = false;
        self.thread = Weak::new();
        (
            std::mem::take(&mut self.link),
            self.back.take(),
            self.trace.take(),
        )
    }
}

// =============================================================================
// Frame Object
// =============================================================================

/// Garbage-collected handle to an interpreter frame.
pub struct FrameObject {
    code: Rc<CodeObject>,
    shell: RefCell<Option<Box<FacadeShell>>>,
    interp: Weak<InterpreterInner>,
}

impl FrameObject {
    pub(crate) fn new(
        interp: &Rc<InterpreterInner>,
        thread: Weak<ThreadInner>,
        code: Rc<CodeObject>,
        link: FrameLink,
    ) -> Rc<Self> {
        let shell = interp.pool.borrow_mut().alloc(link, thread);
        let frame_obj = Rc::new(Self {
            code,
            shell: RefCell::new(Some(shell)),
            interp: Rc::downgrade(interp),
        });
        interp.track(&frame_obj);
        frame_obj
    }

    /// Create a frame object owning a fresh heap frame.
    ///
    /// Builtins come from `globals["__builtins__"]` when present, otherwise
    /// from the interpreter.
    pub fn new_detached(
        thread: &ThreadState,
        code: Rc<CodeObject>,
        globals: Rc<DictObject>,
        locals: Option<Value>,
    ) -> VmResult<Rc<Self>> {
        let interp = thread.interpreter();
        let builtins = interp.builtins_from_globals(&globals)?;
        let slots = alloc_heap_slots(code.frame_size())?;
        let core = FrameCore::new(None, Rc::clone(&code), globals, builtins, locals, None);
        let frame = Rc::new(RefCell::new(InterpreterFrame::on_heap(core, slots)));
        Ok(Self::new(
            interp.inner(),
            thread.downgrade(),
            code,
            FrameLink::Owned(frame),
        ))
    }

    // =========================================================================
    // Shell Access
    // =========================================================================

    fn shell(&self) -> Ref<'_, FacadeShell> {
        Ref::map(self.shell.borrow(), |shell| {
            shell.as_deref().expect("frame object shell released")
        })
    }

    fn shell_mut(&self) -> RefMut<'_, FacadeShell> {
        RefMut::map(self.shell.borrow_mut(), |shell| {
            shell.as_deref_mut().expect("frame object shell released")
        })
    }

    pub(crate) fn thread(&self) -> Option<ThreadState> {
        self.shell().thread.upgrade().map(ThreadState::from_inner)
    }

    /// Run `f` on the underlying frame, if there still is one.
    pub(crate) fn with_frame<R>(&self, f: impl FnOnce(FrameMut<'_>) -> R) -> Option<R> {
        let link = self.shell().link.clone();
        match link {
            FrameLink::Detached => None,
            FrameLink::Stack { thread, id } => {
                let thread = thread.upgrade()?;
                let mut stack = thread.stack.borrow_mut();
                Some(stack.with_frame(id, f))
            }
            FrameLink::Borrowed(frame) => {
                let frame = frame.upgrade()?;
                let mut frame = frame.borrow_mut();
                Some(f(frame.as_frame_mut()))
            }
            FrameLink::Owned(frame) => {
                let mut frame = frame.borrow_mut();
                Some(f(frame.as_frame_mut()))
            }
        }
    }

    /// Like `with_frame`, but gives up instead of panicking when the frame
    /// is already borrowed.
    fn try_with_frame<R>(&self, f: impl FnOnce(FrameMut<'_>) -> R) -> Option<R> {
        let link = {
            let shell = self.shell.try_borrow().ok()?;
            shell.as_ref()?.link.clone()
        };
        match link {
            FrameLink::Detached => None,
            FrameLink::Stack { thread, id } => {
                let thread = thread.upgrade()?;
                let mut stack = thread.stack.try_borrow_mut().ok()?;
                Some(stack.with_frame(id, f))
            }
            FrameLink::Borrowed(frame) => {
                let frame = frame.upgrade()?;
                let mut frame = frame.try_borrow_mut().ok()?;
                Some(f(frame.as_frame_mut()))
            }
            FrameLink::Owned(frame) => {
                let mut frame = frame.try_borrow_mut().ok()?;
                Some(f(frame.as_frame_mut()))
            }
        }
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Whether this frame object owns its frame's storage.
    #[inline]
    pub fn owns_frame(&self) -> bool {
        matches!(self.shell().link, FrameLink::Owned(_))
    }

    /// Point at a frame that changed location.
    pub(crate) fn relink(&self, link: FrameLink) {
        let old = std::mem::replace(&mut self.shell_mut().link, link);
        drop(old);
    }

    /// Become the sole owner of `frame`, whose call has ended.
    ///
    /// `back` is the caller's frame object, which replaces the frame's raw
    /// link to its caller.
    pub(crate) fn take_ownership(
        self: &Rc<Self>,
        frame: Rc<RefCell<InterpreterFrame>>,
        back: Option<Rc<FrameObject>>,
    ) {
        debug_assert!(frame.borrow().core.frame_obj.is_none());
        debug_assert!(frame.borrow().core.previous.is_none());
        let old = {
            let mut shell = self.shell_mut();
            assert!(
                !matches!(shell.link, FrameLink::Owned(_)),
                "frame object already owns its frame"
            );
            let old_back = std::mem::replace(&mut shell.back, back);
            (std::mem::replace(&mut shell.link, FrameLink::Owned(frame)), old_back)
        };
        drop(old);
        if let Some(interp) = self.interp.upgrade() {
            interp.track(self);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Code being run.
    #[inline]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    /// Execution state; a frame object without a frame reads as cleared.
    pub fn state(&self) -> FrameState {
        self.with_frame(|frame| frame.state())
            .unwrap_or(FrameState::Cleared)
    }

    /// Current line: the tracing override if set, else the line of the last
    /// instruction run, else the first line of the code.
    pub fn lineno(&self) -> Option<u32> {
        let line = self.shell().lineno;
        if line != 0 {
            return Some(line);
        }
        let lasti = self.with_frame(|frame| frame.lasti())?;
        match usize::try_from(lasti) {
            Ok(index) => self.code.addr2line(index),
            Err(_) => Some(self.code.first_lineno()),
        }
    }

    /// Set or clear the line reported while a trace function runs.
    pub fn set_line_override(&self, line: Option<u32>) {
        self.shell_mut().lineno = line.unwrap_or(0);
    }

    /// Byte offset of the last instruction run, or -1.
    pub fn lasti(&self) -> i64 {
        match self.with_frame(|frame| frame.lasti()) {
            Some(lasti) if lasti >= 0 => i64::from(lasti) * std::mem::size_of::<CodeUnit>() as i64,
            _ => -1,
        }
    }

    pub fn globals(&self) -> Option<Rc<DictObject>> {
        self.with_frame(|frame| Rc::clone(frame.globals()))
    }

    pub fn builtins(&self) -> Option<Rc<DictObject>> {
        self.with_frame(|frame| Rc::clone(frame.builtins()))
    }

    /// The locals mapping, refreshed from the fast locals first.
    pub fn locals(&self) -> VmResult<Value> {
        self.fast_to_locals()?;
        self.with_frame(|frame| frame.locals_mapping().cloned())
            .flatten()
            .ok_or_else(|| RuntimeError::runtime_error("frame has no locals"))
    }

    /// Frame object of the caller.
    ///
    /// While the frame is linked on a thread the caller's frame object is
    /// materialized on demand and not cached.
    pub fn back(&self) -> Option<Rc<FrameObject>> {
        if let Some(back) = self.shell().back.clone() {
            return Some(back);
        }
        let previous = self.with_frame(|frame| frame.previous()).flatten()?;
        Some(self.thread()?.materialize(previous))
    }

    /// Installed trace function.
    pub fn trace(&self) -> Option<Value> {
        self.shell().trace.clone()
    }

    /// Install or remove the trace function. `None` values uninstall.
    pub fn set_trace(&self, trace: Option<Value>) {
        let trace = trace.filter(|t| !t.is_none());
        let old = std::mem::replace(&mut self.shell_mut().trace, trace);
        drop(old);
    }

    #[inline]
    pub fn trace_lines(&self) -> bool {
        self.shell().trace_lines
    }

    #[inline]
    pub fn set_trace_lines(&self, on: bool) {
        self.shell_mut().trace_lines = on;
    }

    #[inline]
    pub fn trace_opcodes(&self) -> bool {
        self.shell().trace_opcodes
    }

    #[inline]
    pub fn set_trace_opcodes(&self, on: bool) {
        self.shell_mut().trace_opcodes = on;
    }

    /// Bytes attributable to this frame object.
    pub fn size_of(&self) -> usize {
        let mut size = std::mem::size_of::<Self>() + std::mem::size_of::<FacadeShell>();
        if self.owns_frame() {
            size += (self.code.nlocalsplus() + self.code.stacksize())
                * std::mem::size_of::<Option<Value>>();
        }
        size
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Jump to `new_lineno` from inside a trace function.
    ///
    /// Values on the evaluation stack that the target does not expect are
    /// popped. On failure the frame is untouched.
    pub fn set_lineno(&self, new_lineno: i64) -> VmResult<()> {
        let tracing = self.shell().trace.is_some();
        let (state, lasti) = self
            .with_frame(|frame| (frame.state(), frame.lasti()))
            .unwrap_or((FrameState::Cleared, -1));
        match state {
            FrameState::Created => return Err(JumpError::FromCallEvent.into()),
            FrameState::Returned
            | FrameState::Unwinding
            | FrameState::Raised
            | FrameState::Cleared => return Err(JumpError::NotLineEvent.into()),
            FrameState::Executing | FrameState::Suspended => {
                if !tracing {
                    return Err(JumpError::NotTracing.into());
                }
            }
        }

        let lasti = usize::try_from(lasti).unwrap_or(0);
        let plan = plan_jump(
            &self.code,
            lasti,
            state == FrameState::Suspended,
            new_lineno,
        )?;

        let released = self.with_frame(|mut frame| {
            let mut released = Released::new();
            for _ in 0..plan.pops {
                if let Some(value) = frame.pop() {
                    released.push(value);
                }
            }
            frame.set_lasti(plan.target as i32);
            released
        });
        self.shell_mut().lineno = 0;
        drop(released);
        Ok(())
    }

    /// Drop the frame's locals and stack.
    ///
    /// A generator backed by the frame is closed first.
    pub fn clear(&self) -> VmResult<()> {
        let running = self.with_frame(|frame| (frame.state(), frame.core.generator.clone()));
        if let Some((state, generator)) = running {
            if state.is_executing() {
                return Err(RuntimeError::runtime_error(
                    "cannot clear an executing frame",
                ));
            }
            if let Some(generator) = generator.and_then(|g| g.upgrade()) {
                generator.finalize();
                self.with_frame(|mut frame| frame.set_generator(None));
            }
        }
        self.clear_frame(false);
        Ok(())
    }

    /// Mark the frame cleared, then drop the trace function and every slot.
    fn clear_frame(&self, from_collector: bool) {
        let mut released = Released::new();
        let clear = |mut frame: FrameMut<'_>| frame.clear_slots(&mut released);
        if from_collector {
            self.try_with_frame(clear);
        } else {
            self.with_frame(clear);
        }
        let trace = self
            .shell
            .try_borrow_mut()
            .ok()
            .and_then(|mut shell| shell.as_mut()?.trace.take());
        drop(trace);
        drop(released);
    }
}

// =============================================================================
// Object Protocol
// =============================================================================

impl Trace for FrameObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        let Ok(shell) = self.shell.try_borrow() else {
            return;
        };
        let Some(shell) = shell.as_ref() else {
            return;
        };
        if let Some(back) = &shell.back {
            tracer.trace_address(address_of(back));
        }
        tracer.trace_opt(shell.trace.as_ref());
        if let FrameLink::Owned(frame) = &shell.link {
            if let Ok(frame) = frame.try_borrow() {
                frame.trace(tracer);
            }
        }
    }

    fn clear_refs(&self) {
        self.clear_frame(true);
    }
}

impl Object for FrameObject {
    fn type_name(&self) -> &'static str {
        "frame"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Drop for FrameObject {
    fn drop(&mut self) {
        let Some(mut shell) = self.shell.get_mut().take() else {
            return;
        };
        let contents = shell.take_contents();
        if let Some(interp) = self.interp.upgrade() {
            if let Ok(mut pool) = interp.pool.try_borrow_mut() {
                pool.release(shell);
            }
        }
        // Contents may hold the last reference to other frame objects.
        drop(contents);
    }
}

impl fmt::Display for FrameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.lineno().map_or(-1, i64::from);
        write!(
            f,
            "<frame at {:p}, file '{}', line {}, code {}>",
            self,
            self.code.filename(),
            line,
            self.code.name()
        )
    }
}

impl fmt::Debug for FrameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameObject")
            .field("code", &self.code.name())
            .field("state", &self.state())
            .field("owns_frame", &self.owns_frame())
            .finish()
    }
}
