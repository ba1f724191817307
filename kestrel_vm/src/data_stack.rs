//! Per-thread data stack.
//!
//! Frame slots are bump-allocated from one contiguous vector and released in
//! LIFO order. Frames that would push the stack past its limit get an
//! independent heap allocation instead, so deep recursion degrades to
//! ordinary allocation rather than failing.
//!
//! The frame chain itself is the `frames` vector: a [`FrameId`] is an index
//! into it and the top entry is the running frame.

use crate::config::DataStackConfig;
use crate::error::VmResult;
use crate::frame::{FrameId, FrameMut, FrameStorage, InterpreterFrame, Released};
use kestrel_core::Value;
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// A linked frame: owned by the stack, or shared with a generator.
pub(crate) enum FrameEntry {
    Local(InterpreterFrame),
    Shared(Rc<RefCell<InterpreterFrame>>),
}

/// Slot arena plus the chain of linked frames.
pub struct DataStack {
    slots: Vec<Option<Value>>,
    top: usize,
    limit: usize,
    frames: Vec<FrameEntry>,
}

impl DataStack {
    /// Create a data stack with the configured sizing.
    pub fn new(config: &DataStackConfig) -> Self {
        let initial = config.initial_slots.min(config.limit_slots);
        Self {
            slots: vec![None; initial],
            top: 0,
            limit: config.limit_slots,
            frames: Vec::new(),
        }
    }

    /// Number of linked frames.
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Slots currently handed out to frames.
    #[inline]
    pub fn slots_in_use(&self) -> usize {
        self.top
    }

    /// The running frame.
    #[inline]
    pub fn current(&self) -> Option<FrameId> {
        self.frames.len().checked_sub(1).map(FrameId)
    }

    /// Reserve slots for a frame of `size` slots.
    pub(crate) fn allocate(&mut self, size: usize) -> VmResult<FrameStorage> {
        let end = self.top + size;
        if end > self.limit {
            debug!(
                "data stack limit reached at {} slots, heap allocating {} slots",
                self.top, size
            );
            return Ok(FrameStorage::Heap(alloc_heap_slots(size)?));
        }
        if end > self.slots.len() {
            let grow = (end - self.slots.len())
                .max(self.slots.len())
                .min(self.limit - self.slots.len());
            self.slots.try_reserve(grow)?;
            self.slots.resize(self.slots.len() + grow, None);
        }
        let base = self.top;
        debug_assert!(self.slots[base..end].iter().all(Option::is_none));
        self.top = end;
        Ok(FrameStorage::Stack { base })
    }

    /// Link a frame as the new top.
    pub(crate) fn push_entry(&mut self, entry: FrameEntry) -> FrameId {
        self.frames.push(entry);
        FrameId(self.frames.len() - 1)
    }

    /// Unlink the top frame. Stack slots must already be drained.
    pub(crate) fn pop_entry(&mut self) -> FrameEntry {
        let entry = self.frames.pop().expect("pop from an empty frame chain");
        if let FrameEntry::Local(InterpreterFrame {
            storage: FrameStorage::Stack { base },
            ..
        }) = &entry
        {
            self.release(*base);
        }
        entry
    }

    pub(crate) fn entry(&self, id: FrameId) -> &FrameEntry {
        &self.frames[id.0]
    }

    fn release(&mut self, base: usize) {
        debug_assert!(base <= self.top);
        debug_assert!(self.slots[base..self.top].iter().all(Option::is_none));
        self.top = base;
    }

    /// Run `f` on a linked frame.
    pub(crate) fn with_frame<R>(&mut self, id: FrameId, f: impl FnOnce(FrameMut<'_>) -> R) -> R {
        let Self { slots, frames, .. } = self;
        match &mut frames[id.0] {
            FrameEntry::Local(frame) => match &mut frame.storage {
                FrameStorage::Stack { base } => {
                    let end = *base + frame.core.code.frame_size();
                    f(FrameMut::new(&mut frame.core, &mut slots[*base..end]))
                }
                FrameStorage::Heap(heap) => f(FrameMut::new(&mut frame.core, heap)),
            },
            FrameEntry::Shared(shared) => f(shared.borrow_mut().as_frame_mut()),
        }
    }

    /// Move the top frame's slots into `heap`, leaving the stack region empty.
    ///
    /// `heap` must have capacity for the whole frame.
    pub(crate) fn move_top_to_heap(&mut self, mut heap: Vec<Option<Value>>) {
        let Self { slots, frames, .. } = self;
        let Some(FrameEntry::Local(frame)) = frames.last_mut() else {
            panic!("top frame is not stack allocated");
        };
        let FrameStorage::Stack { base } = frame.storage else {
            return;
        };
        let size = frame.core.code.frame_size();
        debug_assert!(heap.capacity() >= size);
        heap.extend(slots[base..base + size].iter_mut().map(Option::take));
        frame.storage = FrameStorage::Heap(heap.into_boxed_slice());
        self.release(base);
    }

    /// Drain the live slots of the top frame.
    pub(crate) fn drain_top(&mut self, out: &mut Released) {
        let id = self.current().expect("no running frame");
        self.with_frame(id, |mut frame| frame.drain_slots(out));
    }
}

impl std::fmt::Debug for DataStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStack")
            .field("top", &self.top)
            .field("capacity", &self.slots.len())
            .field("limit", &self.limit)
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// Allocate an empty slot array for a heap frame.
pub(crate) fn alloc_heap_slots(size: usize) -> VmResult<Box<[Option<Value>]>> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(size)?;
    slots.resize(size, None);
    Ok(slots.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DataStack {
        DataStack::new(&DataStackConfig {
            initial_slots: 4,
            limit_slots: 16,
        })
    }

    #[test]
    fn test_allocate_bumps_top() {
        let mut stack = small();
        let a = stack.allocate(3).unwrap();
        let b = stack.allocate(5).unwrap();
        assert!(matches!(a, FrameStorage::Stack { base: 0 }));
        assert!(matches!(b, FrameStorage::Stack { base: 3 }));
        assert_eq!(stack.slots_in_use(), 8);
    }

    #[test]
    fn test_allocate_past_limit_uses_heap() {
        let mut stack = small();
        stack.allocate(12).unwrap();
        match stack.allocate(8).unwrap() {
            FrameStorage::Heap(slots) => assert_eq!(slots.len(), 8),
            FrameStorage::Stack { .. } => panic!("expected heap storage"),
        }
        assert_eq!(stack.slots_in_use(), 12);
    }

    #[test]
    fn test_allocate_exactly_to_limit() {
        let mut stack = small();
        assert!(matches!(
            stack.allocate(16).unwrap(),
            FrameStorage::Stack { base: 0 }
        ));
    }

    #[test]
    fn test_heap_slots_are_empty() {
        let slots = alloc_heap_slots(6).unwrap();
        assert_eq!(slots.len(), 6);
        assert!(slots.iter().all(Option::is_none));
    }

    #[test]
    fn test_empty_stack() {
        let stack = small();
        assert_eq!(stack.depth(), 0);
        assert!(stack.current().is_none());
    }
}
