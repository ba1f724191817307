//! Interpreter frames.
//!
//! An interpreter frame is the activation record of one call: the function
//! and code being run, the namespaces it resolves names in, and one slot
//! array holding locals, cells, free variables and the evaluation stack.
//!
//! ```text
//! slots:  [ locals | cells | free vars | stack ......... ]
//!           0                nlocalsplus   ^stacktop      frame_size
//! ```
//!
//! Most frames live on the per-thread data stack and are reached through a
//! [`FrameId`]. Frames that outlive their call (generators, frames whose
//! frame object escaped) move to heap storage behind an
//! `Rc<RefCell<InterpreterFrame>>`.
//!
//! Access to a frame's contents goes through [`FrameMut`], which pairs the
//! frame header with its slot slice regardless of where the slots live.

use crate::frame_object::FrameObject;
use crate::function::FunctionObject;
use kestrel_bytecode::instruction::full_arg;
use kestrel_bytecode::{CodeObject, Opcode};
use kestrel_core::{DictObject, Tracer, Value, address_of};
use smallvec::SmallVec;
use std::fmt;
use std::rc::{Rc, Weak};

/// Values released by a frame operation, dropped once no frame is borrowed.
pub(crate) type Released = SmallVec<[Value; 16]>;

// =============================================================================
// Frame State
// =============================================================================

/// Execution state of a frame.
///
/// Ordered so that runnable states are negative and completed states
/// positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum FrameState {
    /// Pushed, first instruction not yet run.
    Created = -2,
    /// Paused at a yield.
    Suspended = -1,
    /// Running.
    Executing = 0,
    /// Returned normally.
    Returned = 1,
    /// Propagating an exception.
    Unwinding = 2,
    /// Finished by an exception.
    Raised = 3,
    /// References dropped.
    Cleared = 4,
}

impl FrameState {
    /// Whether the frame can start or resume.
    #[inline]
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        (self as i8) < 0
    }

    /// Whether the frame is running.
    #[inline]
    #[must_use]
    pub const fn is_executing(self) -> bool {
        matches!(self, FrameState::Executing)
    }

    /// Whether the frame has finished, one way or another.
    #[inline]
    #[must_use]
    pub const fn has_completed(self) -> bool {
        (self as i8) > 0
    }
}

// =============================================================================
// Collaborator Hooks
// =============================================================================

/// Suspended-execution object (generator, coroutine) backed by a frame.
pub trait GeneratorHook {
    /// Close the generator. Called when its frame is cleared explicitly.
    fn finalize(&self);
}

/// Position of a frame on its thread's frame chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    /// Depth of the frame, 0 for the outermost.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Frame Header
// =============================================================================

/// Everything in a frame except its slots.
pub struct FrameCore {
    pub(crate) func: Option<Rc<FunctionObject>>,
    pub(crate) code: Rc<CodeObject>,
    pub(crate) globals: Rc<DictObject>,
    pub(crate) builtins: Rc<DictObject>,
    pub(crate) locals: Option<Value>,
    pub(crate) frame_obj: Option<Rc<FrameObject>>,
    pub(crate) generator: Option<Weak<dyn GeneratorHook>>,
    pub(crate) previous: Option<FrameId>,
    pub(crate) lasti: i32,
    pub(crate) stacktop: usize,
    pub(crate) state: FrameState,
    pub(crate) is_entry: bool,
}

impl FrameCore {
    pub(crate) fn new(
        func: Option<Rc<FunctionObject>>,
        code: Rc<CodeObject>,
        globals: Rc<DictObject>,
        builtins: Rc<DictObject>,
        locals: Option<Value>,
        previous: Option<FrameId>,
    ) -> Self {
        let stacktop = code.nlocalsplus();
        Self {
            func,
            code,
            globals,
            builtins,
            locals,
            frame_obj: None,
            generator: None,
            previous,
            lasti: -1,
            stacktop,
            state: FrameState::Created,
            is_entry: false,
        }
    }

    /// Visit every reference the frame holds.
    pub(crate) fn trace(&self, slots: &[Option<Value>], tracer: &mut dyn Tracer) {
        if let Some(frame_obj) = &self.frame_obj {
            tracer.trace_address(address_of(frame_obj));
        }
        if let Some(func) = &self.func {
            tracer.trace_address(address_of(func));
        }
        tracer.trace_address(address_of(&self.globals));
        tracer.trace_address(address_of(&self.builtins));
        tracer.trace_opt(self.locals.as_ref());
        for slot in &slots[..self.stacktop] {
            tracer.trace_opt(slot.as_ref());
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Where a frame's slots live.
pub(crate) enum FrameStorage {
    /// A region of the thread's data stack starting at `base`.
    Stack { base: usize },
    /// An independent allocation.
    Heap(Box<[Option<Value>]>),
}

/// A frame header together with its storage.
pub struct InterpreterFrame {
    pub(crate) core: FrameCore,
    pub(crate) storage: FrameStorage,
}

impl InterpreterFrame {
    pub(crate) fn on_heap(core: FrameCore, slots: Box<[Option<Value>]>) -> Self {
        debug_assert_eq!(slots.len(), core.code.frame_size());
        Self {
            core,
            storage: FrameStorage::Heap(slots),
        }
    }

    /// Whether the slots live in an independent allocation.
    #[inline]
    #[must_use]
    pub fn is_heap(&self) -> bool {
        matches!(self.storage, FrameStorage::Heap(_))
    }

    /// Code being run.
    #[inline]
    #[must_use]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.core.code
    }

    /// Execution state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.core.state
    }

    /// Index of the last instruction run, or -1.
    #[inline]
    #[must_use]
    pub fn lasti(&self) -> i32 {
        self.core.lasti
    }

    /// Mutable view of a heap frame.
    ///
    /// # Panics
    ///
    /// Panics for a frame whose slots are still on a data stack.
    pub fn as_frame_mut(&mut self) -> FrameMut<'_> {
        match &mut self.storage {
            FrameStorage::Heap(slots) => FrameMut::new(&mut self.core, slots),
            FrameStorage::Stack { .. } => panic!("frame slots live on the data stack"),
        }
    }

    pub(crate) fn trace(&self, tracer: &mut dyn Tracer) {
        if let FrameStorage::Heap(slots) = &self.storage {
            self.core.trace(slots, tracer);
        }
    }
}

impl fmt::Debug for InterpreterFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterFrame")
            .field("code", &self.core.code.name())
            .field("state", &self.core.state)
            .field("lasti", &self.core.lasti)
            .field("stacktop", &self.core.stacktop)
            .field("heap", &self.is_heap())
            .finish()
    }
}

// =============================================================================
// Frame Access
// =============================================================================

/// Mutable access to one frame: its header plus its slots.
pub struct FrameMut<'a> {
    pub(crate) core: &'a mut FrameCore,
    pub(crate) slots: &'a mut [Option<Value>],
}

impl<'a> FrameMut<'a> {
    pub(crate) fn new(core: &'a mut FrameCore, slots: &'a mut [Option<Value>]) -> Self {
        debug_assert!(core.stacktop <= slots.len());
        Self { core, slots }
    }

    // =========================================================================
    // Header
    // =========================================================================

    /// Code being run.
    #[inline]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.core.code
    }

    /// Function being run; `None` for frames built without one.
    #[inline]
    pub fn func(&self) -> Option<&Rc<FunctionObject>> {
        self.core.func.as_ref()
    }

    /// Global namespace.
    #[inline]
    pub fn globals(&self) -> &Rc<DictObject> {
        &self.core.globals
    }

    /// Builtin namespace.
    #[inline]
    pub fn builtins(&self) -> &Rc<DictObject> {
        &self.core.builtins
    }

    /// Locals mapping, for frames that have one.
    #[inline]
    pub fn locals_mapping(&self) -> Option<&Value> {
        self.core.locals.as_ref()
    }

    /// Frame object, if one was materialized.
    #[inline]
    pub fn frame_object(&self) -> Option<&Rc<FrameObject>> {
        self.core.frame_obj.as_ref()
    }

    /// Calling frame while the frame is linked on a thread.
    #[inline]
    pub fn previous(&self) -> Option<FrameId> {
        self.core.previous
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.core.state
    }

    #[inline]
    pub fn set_state(&mut self, state: FrameState) {
        self.core.state = state;
    }

    /// Index of the last instruction run, or -1 before the first.
    #[inline]
    pub fn lasti(&self) -> i32 {
        self.core.lasti
    }

    #[inline]
    pub fn set_lasti(&mut self, lasti: i32) {
        debug_assert!(lasti < self.core.code.len() as i32);
        self.core.lasti = lasti;
    }

    #[inline]
    pub fn is_entry(&self) -> bool {
        self.core.is_entry
    }

    #[inline]
    pub fn set_entry(&mut self, is_entry: bool) {
        self.core.is_entry = is_entry;
    }

    /// Attach or detach the generator this frame backs.
    pub fn set_generator(&mut self, generator: Option<Weak<dyn GeneratorHook>>) {
        self.core.generator = generator;
    }

    // =========================================================================
    // Locals
    // =========================================================================

    /// Value of locals-plus slot `i`.
    #[inline]
    pub fn local(&self, i: usize) -> Option<&Value> {
        debug_assert!(i < self.core.code.nlocalsplus());
        self.slots[i].as_ref()
    }

    /// Replace locals-plus slot `i`, returning the previous value.
    #[inline]
    pub fn set_local(&mut self, i: usize, value: Option<Value>) -> Option<Value> {
        debug_assert!(i < self.core.code.nlocalsplus());
        std::mem::replace(&mut self.slots[i], value)
    }

    /// Locals, cells and free variables.
    #[inline]
    pub fn localsplus(&self) -> &[Option<Value>] {
        &self.slots[..self.core.code.nlocalsplus()]
    }

    // =========================================================================
    // Evaluation Stack
    // =========================================================================

    /// Offset of the next free stack slot, counted from slot 0.
    #[inline]
    pub fn stacktop(&self) -> usize {
        self.core.stacktop
    }

    /// Number of values on the evaluation stack. Zero once cleared.
    #[inline]
    pub fn stack_depth(&self) -> usize {
        self.core.stacktop.saturating_sub(self.core.code.nlocalsplus())
    }

    /// The evaluation stack, bottom first.
    #[inline]
    pub fn stack(&self) -> &[Option<Value>] {
        let top = self.core.stacktop;
        &self.slots[self.core.code.nlocalsplus().min(top)..top]
    }

    /// Push a value. Capacity was checked by whoever produced the code.
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.push_slot(Some(value));
    }

    /// Push an empty slot, as `LoadMethod` does for unbound calls.
    #[inline]
    pub fn push_null(&mut self) {
        self.push_slot(None);
    }

    #[inline]
    fn push_slot(&mut self, value: Option<Value>) {
        let top = self.core.stacktop;
        debug_assert!(top < self.slots.len(), "evaluation stack overflow");
        self.slots[top] = value;
        self.core.stacktop = top + 1;
    }

    /// Pop the top slot. A cleared frame has nothing to pop.
    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        if self.core.stacktop <= self.core.code.nlocalsplus() {
            debug_assert!(
                self.core.state == FrameState::Cleared,
                "evaluation stack underflow"
            );
            return None;
        }
        self.core.stacktop -= 1;
        self.slots[self.core.stacktop].take()
    }

    /// The top of the stack.
    #[inline]
    pub fn peek(&self) -> Option<&Value> {
        if self.core.stacktop > self.core.code.nlocalsplus() {
            self.slots[self.core.stacktop - 1].as_ref()
        } else {
            None
        }
    }

    // =========================================================================
    // Introspection Support
    // =========================================================================

    /// Whether an instruction with this opcode and argument ran before the
    /// current instruction.
    ///
    /// Scans the code as compiled, which is enough for straight-line
    /// prologues such as `MAKE_CELL`.
    pub fn op_already_ran(&self, opcode: Opcode, oparg: usize) -> bool {
        let code = self.core.code.instructions();
        let end = usize::try_from(self.core.lasti).unwrap_or(0).min(code.len());
        (0..end).any(|i| {
            code[i].opcode() == Some(opcode) && full_arg(code, i) as usize == oparg
        })
    }

    /// Visit every reference the frame holds.
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        self.core.trace(self.slots, tracer);
    }

    /// Move out every value below `stacktop`.
    pub(crate) fn drain_slots(&mut self, out: &mut Released) {
        for slot in &mut self.slots[..self.core.stacktop] {
            if let Some(value) = slot.take() {
                out.push(value);
            }
        }
    }

    /// Mark the frame cleared, then release its slots.
    ///
    /// The state is set first so that anything reachable from a released
    /// value sees a dead frame.
    pub(crate) fn clear_slots(&mut self, out: &mut Released) {
        self.core.state = FrameState::Cleared;
        self.drain_slots(out);
        self.core.stacktop = 0;
    }

    /// Seed free-variable slots from a closure.
    pub(crate) fn init_free_vars(&mut self, closure: &[Rc<kestrel_core::CellObject>]) {
        let nlocalsplus = self.core.code.nlocalsplus();
        let first_free = nlocalsplus - self.core.code.nfreevars();
        for (slot, cell) in self.slots[first_free..nlocalsplus].iter_mut().zip(closure) {
            *slot = Some(Value::cell(Rc::clone(cell)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::CodeBuilder;
    use kestrel_core::AddressCollector;

    fn core_for(code: CodeObject) -> (FrameCore, Box<[Option<Value>]>) {
        let code = Rc::new(code);
        let slots = vec![None; code.frame_size()].into_boxed_slice();
        let globals = Rc::new(DictObject::new());
        let builtins = Rc::new(DictObject::new());
        (FrameCore::new(None, code, globals, builtins, None, None), slots)
    }

    fn two_locals() -> CodeObject {
        let mut b = CodeBuilder::new("f");
        b.add_local("a");
        b.add_local("b");
        b.set_stacksize(4);
        b.emit(Opcode::Nop);
        b.finish()
    }

    #[test]
    fn test_state_ordering() {
        assert!(FrameState::Created.is_runnable());
        assert!(FrameState::Suspended.is_runnable());
        assert!(FrameState::Executing.is_executing());
        assert!(!FrameState::Executing.has_completed());
        for state in [
            FrameState::Returned,
            FrameState::Unwinding,
            FrameState::Raised,
            FrameState::Cleared,
        ] {
            assert!(state.has_completed());
            assert!(!state.is_runnable());
        }
    }

    #[test]
    fn test_new_frame_defaults() {
        let (core, _) = core_for(two_locals());
        assert_eq!(core.lasti, -1);
        assert_eq!(core.stacktop, 2);
        assert_eq!(core.state, FrameState::Created);
        assert!(!core.is_entry);
        assert!(core.frame_obj.is_none());
    }

    #[test]
    fn test_push_pop() {
        let (mut core, mut slots) = core_for(two_locals());
        let mut frame = FrameMut::new(&mut core, &mut slots);
        frame.push(Value::int(1));
        frame.push(Value::str("b"));
        assert_eq!(frame.stack_depth(), 2);
        assert_eq!(frame.peek(), Some(&Value::str("b")));
        assert_eq!(frame.pop(), Some(Value::str("b")));
        assert_eq!(frame.stacktop(), 3);
        assert_eq!(frame.stack(), &[Some(Value::int(1))]);
    }

    #[test]
    fn test_null_slots() {
        let (mut core, mut slots) = core_for(two_locals());
        let mut frame = FrameMut::new(&mut core, &mut slots);
        frame.push_null();
        assert_eq!(frame.stack_depth(), 1);
        assert!(frame.peek().is_none());
        assert!(frame.pop().is_none());
    }

    #[test]
    fn test_clear_marks_state_first() {
        let (mut core, mut slots) = core_for(two_locals());
        let mut frame = FrameMut::new(&mut core, &mut slots);
        frame.set_local(0, Some(Value::int(5)));
        frame.push(Value::int(6));
        let mut released = Released::new();
        frame.clear_slots(&mut released);
        assert_eq!(frame.state(), FrameState::Cleared);
        assert_eq!(frame.stacktop(), 0);
        assert_eq!(released.len(), 2);
    }

    #[test]
    fn test_cleared_frame_has_empty_stack() {
        let (mut core, mut slots) = core_for(two_locals());
        let mut frame = FrameMut::new(&mut core, &mut slots);
        let mut released = Released::new();
        frame.clear_slots(&mut released);
        assert_eq!(frame.stack_depth(), 0);
        assert!(frame.stack().is_empty());
        assert!(frame.peek().is_none());
        assert!(frame.pop().is_none());
        assert_eq!(frame.stacktop(), 0);
    }

    #[test]
    fn test_trace_visits_namespaces_and_slots() {
        let (mut core, mut slots) = core_for(two_locals());
        let globals = Value::dict(Rc::clone(&core.globals));
        let mut frame = FrameMut::new(&mut core, &mut slots);
        let held = Value::str("held");
        frame.set_local(1, Some(held.clone()));
        let mut tracer = AddressCollector::new();
        frame.trace(&mut tracer);
        assert!(tracer.saw(&globals));
        assert!(tracer.saw(&held));
    }

    #[test]
    fn test_op_already_ran() {
        let mut b = CodeBuilder::new("f");
        let x = b.add_cell("x");
        b.emit_arg(Opcode::MakeCell, x);
        b.emit(Opcode::Nop);
        b.emit(Opcode::Nop);
        let (mut core, mut slots) = core_for(b.finish());
        let mut frame = FrameMut::new(&mut core, &mut slots);
        assert!(!frame.op_already_ran(Opcode::MakeCell, 0));
        frame.set_lasti(0);
        assert!(!frame.op_already_ran(Opcode::MakeCell, 0));
        frame.set_lasti(2);
        assert!(frame.op_already_ran(Opcode::MakeCell, 0));
        assert!(!frame.op_already_ran(Opcode::MakeCell, 1));
    }
}
