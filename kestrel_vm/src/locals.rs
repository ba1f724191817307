//! Synchronization between fast locals and a frame's locals mapping.
//!
//! Optimized code keeps its variables in slots. Introspection (`locals()`,
//! debuggers editing variables) works on a mapping instead, so the two are
//! copied back and forth on request:
//!
//! - fast → mapping writes every bound variable under its name and deletes
//!   the names of unbound ones
//! - mapping → fast reads each name back, writing through cells for
//!   captured variables
//!
//! Free variables of unoptimized code (class bodies) are never copied, so
//! enclosing-scope variables do not leak into the class namespace.
//!
//! Mapping calls happen with no frame borrowed: values are snapshotted out
//! of the frame first, or looked up before being written back.

use crate::error::{RuntimeError, VmResult};
use crate::frame::{FrameMut, FrameState, Released};
use crate::frame_object::FrameObject;
use kestrel_bytecode::{LocalKind, Opcode};
use kestrel_core::{DictObject, Mapping, Value};
use smallvec::SmallVec;
use std::rc::Rc;

type Snapshot = SmallVec<[(Rc<str>, Option<Value>); 8]>;

impl FrameMut<'_> {
    /// Whether slot `i` takes part in synchronization.
    fn syncs_slot(&self, i: usize) -> bool {
        let code = &self.core.code;
        !(code.local_kind(i).contains(LocalKind::FREE) && !code.is_optimized())
    }

    /// The cell behind slot `i`, if the slot currently holds one that is in
    /// use as a cell.
    fn live_cell(&self, i: usize) -> Option<Rc<kestrel_core::CellObject>> {
        let kind = self.core.code.local_kind(i);
        let value = self.slots[i].as_ref();
        if kind == LocalKind::FREE {
            debug_assert!(value.is_some_and(Value::is_cell));
            return value.and_then(Value::as_cell).cloned();
        }
        if kind.contains(LocalKind::CELL) {
            let cell = value.and_then(Value::as_cell)?;
            if self.op_already_ran(Opcode::MakeCell, i) {
                return Some(Rc::clone(cell));
            }
        }
        None
    }

    /// Name and current value of every synchronized slot.
    fn snapshot_locals(&self) -> Snapshot {
        let code = &self.core.code;
        let cleared = self.core.state == FrameState::Cleared;
        let mut snapshot = Snapshot::new();
        for i in 0..code.nlocalsplus() {
            if !self.syncs_slot(i) {
                continue;
            }
            let name = Rc::clone(&code.localsplus_names()[i]);
            let value = if cleared {
                debug_assert!(self.slots[i].is_none());
                None
            } else if code.local_kind(i).contains(LocalKind::FREE) {
                self.slots[i].as_ref().and_then(Value::as_cell).and_then(|c| c.get())
            } else {
                match self.live_cell(i) {
                    Some(cell) => cell.get(),
                    None => self.slots[i].clone(),
                }
            };
            snapshot.push((name, value));
        }
        snapshot
    }

    /// Write looked-up values back into their slots or cells.
    fn apply_locals(&mut self, values: Vec<(usize, Option<Value>)>, out: &mut Released) {
        for (i, value) in values {
            let old = match self.live_cell(i) {
                Some(cell) => cell.set(value),
                None => self.set_local(i, value),
            };
            if let Some(old) = old {
                out.push(old);
            }
        }
    }
}

fn as_mapping(locals: &Value) -> VmResult<&dyn Mapping> {
    locals.as_mapping().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "frame locals must be a mapping, not '{}'",
            locals.type_name()
        ))
    })
}

impl FrameObject {
    /// Copy fast locals into the locals mapping, creating a dict if the
    /// frame has none.
    ///
    /// Deleting a name the mapping lacks is fine; any other mapping error
    /// is returned.
    pub fn fast_to_locals(&self) -> VmResult<()> {
        let Some((snapshot, locals)) = self.with_frame(|frame| {
            (frame.snapshot_locals(), frame.locals_mapping().cloned())
        }) else {
            return Ok(());
        };
        let locals = match locals {
            Some(locals) => locals,
            None => {
                let dict = match self.thread() {
                    Some(thread) => thread.interpreter().new_dict(),
                    None => Rc::new(DictObject::new()),
                };
                let locals = Value::dict(dict);
                let fresh = locals.clone();
                self.with_frame(move |frame| frame.core.locals = Some(fresh));
                locals
            }
        };

        let mapping = as_mapping(&locals)?;
        for (name, value) in snapshot {
            match value {
                Some(value) => mapping.set_item(&name, value)?,
                None => match mapping.del_item(&name) {
                    Ok(()) => {}
                    Err(err) if err.is_key_error() => {}
                    Err(err) => return Err(err.into()),
                },
            }
        }
        Ok(())
    }

    /// Copy the locals mapping back into fast locals.
    ///
    /// Names missing from the mapping leave their slot alone, or unbind it
    /// when `clear` is set. A pending error on the thread survives the call.
    pub fn locals_to_fast(&self, clear: bool) {
        let Some((state, names, locals)) = self.with_frame(|frame| {
            let code = frame.code();
            let names: Vec<(usize, Rc<str>)> = (0..code.nlocalsplus())
                .filter(|&i| frame.syncs_slot(i))
                .map(|i| (i, Rc::clone(&code.localsplus_names()[i])))
                .collect();
            (frame.state(), names, frame.locals_mapping().cloned())
        }) else {
            return;
        };
        let Some(locals) = locals else {
            return;
        };
        if state == FrameState::Cleared {
            return;
        }
        let Some(mapping) = locals.as_mapping() else {
            return;
        };

        let thread = self.thread();
        let pending = thread.as_ref().and_then(|t| t.fetch_error());

        let values: Vec<(usize, Option<Value>)> = names
            .into_iter()
            .filter_map(|(i, name)| match mapping.get_item(&name) {
                Ok(value) => Some((i, Some(value))),
                Err(_) if clear => Some((i, None)),
                Err(_) => None,
            })
            .collect();

        let mut released = Released::new();
        self.with_frame(|mut frame| frame.apply_locals(values, &mut released));
        drop(released);

        if let Some(thread) = thread {
            thread.restore_error(pending);
        }
    }
}
