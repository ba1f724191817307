//! Code objects.
//!
//! A `CodeObject` is the immutable product of compilation plus two pieces of
//! mutable runtime state: the warmup counter and the lazily built quickened
//! buffer. Once the quickened buffer is installed it is the executable form
//! of the code; the original units stay available for analysis.
//!
//! # Locals Layout
//!
//! The "locals plus" array of a frame holds, in order, plain locals (with
//! arguments first), cell variables, then free variables. Each slot has a
//! [`LocalKind`]; a local captured by an inner function is `LOCAL | CELL`.

use crate::instruction::CodeUnit;
use crate::quickened::{QUICKENING_WARMUP_COLDEST, QuickenedCode};
use bitflags::bitflags;
use kestrel_core::Value;
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// Code object flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CodeFlags: u32 {
        /// Locals live in fast slots, not a namespace mapping.
        const OPTIMIZED = 0x0001;
        /// A fresh locals namespace is created per call.
        const NEWLOCALS = 0x0002;
        /// Takes `*args`.
        const VARARGS = 0x0004;
        /// Takes `**kwargs`.
        const VARKEYWORDS = 0x0008;
        /// Nested function.
        const NESTED = 0x0010;
        /// Generator function.
        const GENERATOR = 0x0020;
        /// Coroutine function.
        const COROUTINE = 0x0080;
        /// Async generator function.
        const ASYNC_GENERATOR = 0x0200;
    }
}

bitflags! {
    /// Kind of a locals-plus slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LocalKind: u8 {
        /// An argument or local variable.
        const LOCAL = 0x20;
        /// Captured by an inner scope; holds a cell once `MAKE_CELL` ran.
        const CELL = 0x40;
        /// Captured from an enclosing scope; always holds a cell.
        const FREE = 0x80;
    }
}

/// A half-open range of instruction indices attributed to one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    /// First instruction index.
    pub start: u32,
    /// One past the last instruction index.
    pub end: u32,
    /// Source line.
    pub line: u32,
}

/// Compiled code.
pub struct CodeObject {
    pub(crate) name: Rc<str>,
    pub(crate) filename: Rc<str>,
    pub(crate) first_lineno: u32,
    pub(crate) code: Box<[CodeUnit]>,
    pub(crate) consts: Box<[Value]>,
    pub(crate) names: Box<[Rc<str>]>,
    pub(crate) localsplus_names: Box<[Rc<str>]>,
    pub(crate) localsplus_kinds: Box<[LocalKind]>,
    pub(crate) flags: CodeFlags,
    pub(crate) stacksize: usize,
    pub(crate) line_table: Box<[LineTableEntry]>,
    pub(crate) warmup: Cell<i32>,
    pub(crate) quickened: OnceCell<QuickenedCode>,
}

impl CodeObject {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Function name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Source file name.
    #[inline]
    #[must_use]
    pub fn filename(&self) -> &Rc<str> {
        &self.filename
    }

    /// Line of the definition.
    #[inline]
    #[must_use]
    pub fn first_lineno(&self) -> u32 {
        self.first_lineno
    }

    /// Code flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// Whether locals live in fast slots.
    #[inline]
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.flags.contains(CodeFlags::OPTIMIZED)
    }

    // =========================================================================
    // Instructions & Pools
    // =========================================================================

    /// The instructions as compiled.
    #[inline]
    #[must_use]
    pub fn instructions(&self) -> &[CodeUnit] {
        &self.code
    }

    /// Number of code units.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether there are no code units.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The executable instruction at `index`: quickened if installed.
    #[inline]
    #[must_use]
    pub fn instruction(&self, index: usize) -> CodeUnit {
        match self.quickened.get() {
            Some(q) => q.instruction(index),
            None => self.code[index],
        }
    }

    /// Constant pool.
    #[inline]
    #[must_use]
    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    /// Global and attribute names.
    #[inline]
    #[must_use]
    pub fn names(&self) -> &[Rc<str>] {
        &self.names
    }

    /// Declared maximum evaluation stack depth.
    #[inline]
    #[must_use]
    pub fn stacksize(&self) -> usize {
        self.stacksize
    }

    // =========================================================================
    // Locals Plus
    // =========================================================================

    /// Names of locals, cells and free variables, in slot order.
    #[inline]
    #[must_use]
    pub fn localsplus_names(&self) -> &[Rc<str>] {
        &self.localsplus_names
    }

    /// Kinds of locals-plus slots.
    #[inline]
    #[must_use]
    pub fn localsplus_kinds(&self) -> &[LocalKind] {
        &self.localsplus_kinds
    }

    /// Kind of slot `i`.
    #[inline]
    #[must_use]
    pub fn local_kind(&self, i: usize) -> LocalKind {
        self.localsplus_kinds[i]
    }

    /// Number of locals-plus slots.
    #[inline]
    #[must_use]
    pub fn nlocalsplus(&self) -> usize {
        self.localsplus_kinds.len()
    }

    /// Number of free-variable slots.
    #[must_use]
    pub fn nfreevars(&self) -> usize {
        self.localsplus_kinds
            .iter()
            .filter(|k| k.contains(LocalKind::FREE))
            .count()
    }

    /// Number of cell slots, captured arguments included.
    #[must_use]
    pub fn ncellvars(&self) -> usize {
        self.localsplus_kinds
            .iter()
            .filter(|k| k.contains(LocalKind::CELL))
            .count()
    }

    /// Slots a frame for this code needs: locals plus the evaluation stack.
    #[inline]
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.nlocalsplus() + self.stacksize
    }

    // =========================================================================
    // Line Table
    // =========================================================================

    /// Address ranges with their source lines.
    #[inline]
    #[must_use]
    pub fn line_table(&self) -> &[LineTableEntry] {
        &self.line_table
    }

    /// Source line of the instruction at `index`.
    #[must_use]
    pub fn addr2line(&self, index: usize) -> Option<u32> {
        let index = u32::try_from(index).ok()?;
        self.line_table
            .iter()
            .find(|e| e.start <= index && index < e.end)
            .map(|e| e.line)
    }

    /// For each instruction, the line that starts there.
    #[must_use]
    pub fn line_starts(&self) -> Vec<Option<u32>> {
        let mut starts = vec![None; self.code.len()];
        for entry in self.line_table.iter() {
            if let Some(slot) = starts.get_mut(entry.start as usize) {
                *slot = Some(entry.line);
            }
        }
        starts
    }

    // =========================================================================
    // Warmup & Quickening
    // =========================================================================

    /// Current warmup counter.
    #[inline]
    #[must_use]
    pub fn warmup(&self) -> i32 {
        self.warmup.get()
    }

    /// Count one execution.
    #[inline]
    pub fn increment_warmup(&self) {
        self.warmup.set(self.warmup.get() + 1);
    }

    /// Whether the counter has reached the quickening point.
    #[inline]
    #[must_use]
    pub fn is_warmed_up(&self) -> bool {
        self.warmup.get() == 0
    }

    /// Exclude this code object from quickening for good.
    #[inline]
    pub fn mark_coldest(&self) {
        self.warmup.set(QUICKENING_WARMUP_COLDEST);
    }

    /// Whether quickening has been ruled out.
    #[inline]
    #[must_use]
    pub fn is_coldest(&self) -> bool {
        self.warmup.get() == QUICKENING_WARMUP_COLDEST
    }

    /// The quickened buffer, once built.
    #[inline]
    #[must_use]
    pub fn quickened(&self) -> Option<&QuickenedCode> {
        self.quickened.get()
    }

    /// Whether the quickened buffer is installed.
    #[inline]
    #[must_use]
    pub fn is_quickened(&self) -> bool {
        self.quickened.get().is_some()
    }

    /// Install the quickened buffer. Returns it back if one is already set.
    pub fn install_quickened(&self, quickened: QuickenedCode) -> Result<(), QuickenedCode> {
        debug_assert_eq!(quickened.len(), self.code.len());
        self.quickened.set(quickened)
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeObject")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("first_lineno", &self.first_lineno)
            .field("len", &self.code.len())
            .field("nlocalsplus", &self.nlocalsplus())
            .field("stacksize", &self.stacksize)
            .field("quickened", &self.is_quickened())
            .finish()
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {}, file \"{}\", line {}>",
            self.name, self.filename, self.first_lineno
        )
    }
}
