//! Builder for code objects.
//!
//! Stands in for the compiler: tests and tools describe a function as a
//! sequence of opcodes, labels and line changes, and [`CodeBuilder::finish`]
//! lays it out into code units with `EXTENDED_ARG` prefixes, resolves jump
//! targets and builds the line table.
//!
//! # Example
//! ```
//! use kestrel_bytecode::{CodeBuilder, Opcode};
//!
//! let mut b = CodeBuilder::new("count");
//! let it = b.add_local("it");
//! let top = b.create_label();
//! let done = b.create_label();
//! b.emit_arg(Opcode::LoadFast, it);
//! b.emit(Opcode::GetIter);
//! b.bind_label(top);
//! b.emit_jump(Opcode::ForIter, done);
//! b.emit(Opcode::PopTop);
//! b.emit_jump(Opcode::JumpAbsolute, top);
//! b.bind_label(done);
//! b.emit_arg(Opcode::LoadConst, 0);
//! b.emit(Opcode::ReturnValue);
//! let code = b.finish();
//! assert_eq!(code.len(), 7);
//! ```

use crate::code_object::{CodeFlags, CodeObject, LineTableEntry, LocalKind};
use crate::instruction::{CodeUnit, encode, units_for_arg};
use crate::opcode::{JumpKind, Opcode};
use crate::quickened::QUICKENING_WARMUP_DELAY;
use kestrel_core::Value;
use rustc_hash::FxHashMap;
use std::cell::{Cell, OnceCell};
use std::rc::Rc;

/// A label for jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Clone, Copy)]
enum PendingArg {
    Imm(u32),
    Label(Label),
}

#[derive(Debug, Clone, Copy)]
struct PendingInstr {
    opcode: Opcode,
    arg: PendingArg,
    line: u32,
}

/// Builder for constructing code objects.
pub struct CodeBuilder {
    name: Rc<str>,
    filename: Rc<str>,
    first_lineno: u32,
    current_line: u32,

    instructions: Vec<PendingInstr>,

    consts: Vec<Value>,
    names: Vec<Rc<str>>,
    name_map: FxHashMap<Rc<str>, u32>,

    localsplus: Vec<(Rc<str>, LocalKind)>,

    flags: CodeFlags,
    stacksize: Option<usize>,
    warmup_delay: i32,

    next_label: u32,
    labels: FxHashMap<Label, usize>,
}

impl CodeBuilder {
    /// Create a builder for a function named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            filename: Rc::from("<unknown>"),
            first_lineno: 1,
            current_line: 1,
            instructions: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            name_map: FxHashMap::default(),
            localsplus: Vec::new(),
            flags: CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS,
            stacksize: None,
            warmup_delay: QUICKENING_WARMUP_DELAY,
            next_label: 0,
            labels: FxHashMap::default(),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set the filename.
    pub fn set_filename(&mut self, filename: &str) {
        self.filename = Rc::from(filename);
    }

    /// Set the first line number. Also becomes the current line.
    pub fn set_first_lineno(&mut self, line: u32) {
        self.first_lineno = line;
        self.current_line = line;
    }

    /// Set the line for subsequent instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Replace the code flags.
    pub fn set_flags(&mut self, flags: CodeFlags) {
        self.flags = flags;
    }

    /// Add code flags.
    pub fn add_flags(&mut self, flags: CodeFlags) {
        self.flags |= flags;
    }

    /// Declare the maximum stack depth instead of estimating it.
    pub fn set_stacksize(&mut self, stacksize: usize) {
        self.stacksize = Some(stacksize);
    }

    /// Number of calls before the code becomes eligible for quickening.
    pub fn set_warmup_delay(&mut self, delay: i32) {
        self.warmup_delay = delay;
    }

    // =========================================================================
    // Pools & Locals
    // =========================================================================

    /// Append a constant and return its index.
    pub fn add_const(&mut self, value: Value) -> u32 {
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    /// Intern a name and return its index.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.name_map.get(name) {
            return idx;
        }
        let name: Rc<str> = Rc::from(name);
        let idx = self.names.len() as u32;
        self.names.push(Rc::clone(&name));
        self.name_map.insert(name, idx);
        idx
    }

    fn add_localsplus(&mut self, name: &str, kind: LocalKind) -> u32 {
        debug_assert!(
            kind.contains(LocalKind::FREE)
                || !self.localsplus.iter().any(|(_, k)| k.contains(LocalKind::FREE)),
            "free variables must come last"
        );
        self.localsplus.push((Rc::from(name), kind));
        (self.localsplus.len() - 1) as u32
    }

    /// Declare a plain local and return its slot.
    pub fn add_local(&mut self, name: &str) -> u32 {
        self.add_localsplus(name, LocalKind::LOCAL)
    }

    /// Declare a cell variable that is not also an argument.
    pub fn add_cell(&mut self, name: &str) -> u32 {
        self.add_localsplus(name, LocalKind::CELL)
    }

    /// Declare a free variable. Free variables must be declared last.
    pub fn add_free(&mut self, name: &str) -> u32 {
        self.add_localsplus(name, LocalKind::FREE)
    }

    /// Mark an existing local as captured by an inner scope.
    pub fn mark_cell(&mut self, slot: u32) {
        self.localsplus[slot as usize].1 |= LocalKind::CELL;
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create an unbound label.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the next emitted instruction.
    pub fn bind_label(&mut self, label: Label) {
        self.labels.insert(label, self.instructions.len());
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit an instruction without argument.
    pub fn emit(&mut self, opcode: Opcode) {
        self.emit_arg(opcode, 0);
    }

    /// Emit an instruction with an argument of any width.
    pub fn emit_arg(&mut self, opcode: Opcode, arg: u32) {
        self.instructions.push(PendingInstr {
            opcode,
            arg: PendingArg::Imm(arg),
            line: self.current_line,
        });
    }

    /// Emit a jump to `label`.
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) {
        debug_assert!(opcode.jump_kind().is_some(), "{opcode} is not a jump");
        self.instructions.push(PendingInstr {
            opcode,
            arg: PendingArg::Label(label),
            line: self.current_line,
        });
    }

    /// Number of instructions emitted so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether nothing has been emitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    fn resolve(&self, k: usize, positions: &[usize], sizes: &[usize]) -> u32 {
        let instr = &self.instructions[k];
        match instr.arg {
            PendingArg::Imm(arg) => arg,
            PendingArg::Label(label) => {
                let target = *self.labels.get(&label).expect("unbound label");
                let target_pos = positions[target];
                match instr.opcode.jump_kind() {
                    Some(JumpKind::Relative) => {
                        let next = positions[k] + sizes[k];
                        assert!(target_pos >= next, "relative jump must go forward");
                        (target_pos - next) as u32
                    }
                    _ => target_pos as u32,
                }
            }
        }
    }

    fn estimate_stacksize(&self) -> usize {
        let mut depth: i64 = 0;
        let mut max: i64 = 0;
        for instr in &self.instructions {
            let arg = match instr.arg {
                PendingArg::Imm(arg) => arg,
                PendingArg::Label(_) => 0,
            };
            depth += i64::from(instr.opcode.stack_effect(arg));
            depth = depth.max(0);
            max = max.max(depth);
        }
        max as usize
    }

    /// Lay out the instructions and produce the code object.
    pub fn finish(self) -> CodeObject {
        let n = self.instructions.len();

        // Jump arguments depend on positions, which depend on prefix counts.
        // Sizes only grow, so this settles.
        let mut sizes = vec![1usize; n];
        let mut positions = vec![0usize; n + 1];
        loop {
            for k in 0..n {
                positions[k + 1] = positions[k] + sizes[k];
            }
            let mut changed = false;
            for k in 0..n {
                let need = units_for_arg(self.resolve(k, &positions, &sizes));
                if need > sizes[k] {
                    sizes[k] = need;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut code: Vec<CodeUnit> = Vec::with_capacity(positions[n]);
        let mut line_table: Vec<LineTableEntry> = Vec::new();
        for k in 0..n {
            let instr = self.instructions[k];
            let arg = self.resolve(k, &positions, &sizes);
            let start = code.len();
            encode(instr.opcode, arg, &mut code);
            // Pad with prefixes when a jump needed fewer units than reserved.
            while code.len() - start < sizes[k] {
                code.insert(start, CodeUnit::new(Opcode::ExtendedArg, 0));
            }
            let (start, end) = (start as u32, code.len() as u32);
            match line_table.last_mut() {
                Some(last) if last.line == instr.line && last.end == start => last.end = end,
                _ => line_table.push(LineTableEntry {
                    start,
                    end,
                    line: instr.line,
                }),
            }
        }

        let stacksize = self
            .stacksize
            .unwrap_or_else(|| self.estimate_stacksize());
        let (localsplus_names, localsplus_kinds): (Vec<_>, Vec<_>) =
            self.localsplus.into_iter().unzip();

        CodeObject {
            name: self.name,
            filename: self.filename,
            first_lineno: self.first_lineno,
            code: code.into_boxed_slice(),
            consts: self.consts.into_boxed_slice(),
            names: self.names.into_boxed_slice(),
            localsplus_names: localsplus_names.into_boxed_slice(),
            localsplus_kinds: localsplus_kinds.into_boxed_slice(),
            flags: self.flags,
            stacksize,
            line_table: line_table.into_boxed_slice(),
            warmup: Cell::new(-self.warmup_delay),
            quickened: OnceCell::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::full_arg;

    #[test]
    fn test_straight_line_layout() {
        let mut b = CodeBuilder::new("f");
        let c = b.add_const(Value::int(1));
        b.emit_arg(Opcode::LoadConst, c);
        b.emit(Opcode::ReturnValue);
        let code = b.finish();
        assert_eq!(code.len(), 2);
        assert_eq!(code.instructions()[0], CodeUnit::new(Opcode::LoadConst, 0));
        assert_eq!(code.stacksize(), 1);
    }

    #[test]
    fn test_wide_argument_gets_prefix() {
        let mut b = CodeBuilder::new("f");
        b.emit_arg(Opcode::LoadConst, 300);
        let code = b.finish();
        assert_eq!(code.len(), 2);
        assert!(code.instructions()[0].is_extended_arg());
        assert_eq!(full_arg(code.instructions(), 1), 300);
    }

    #[test]
    fn test_backward_absolute_jump() {
        let mut b = CodeBuilder::new("f");
        let top = b.create_label();
        b.bind_label(top);
        b.emit(Opcode::Nop);
        b.emit_jump(Opcode::JumpAbsolute, top);
        let code = b.finish();
        assert_eq!(code.instructions()[1], CodeUnit::new(Opcode::JumpAbsolute, 0));
    }

    #[test]
    fn test_forward_relative_jump() {
        let mut b = CodeBuilder::new("f");
        let end = b.create_label();
        b.emit_jump(Opcode::JumpForward, end);
        b.emit(Opcode::Nop);
        b.emit(Opcode::Nop);
        b.bind_label(end);
        b.emit(Opcode::ReturnValue);
        let code = b.finish();
        // Target 3, next instruction 1.
        assert_eq!(code.instructions()[0].arg(), 2);
    }

    #[test]
    fn test_far_jump_target_is_widened() {
        let mut b = CodeBuilder::new("f");
        let end = b.create_label();
        b.emit_jump(Opcode::JumpAbsolute, end);
        for _ in 0..300 {
            b.emit(Opcode::Nop);
        }
        b.bind_label(end);
        b.emit(Opcode::ReturnValue);
        let code = b.finish();
        assert!(code.instructions()[0].is_extended_arg());
        let target = full_arg(code.instructions(), 1) as usize;
        assert_eq!(code.instructions()[target].opcode(), Some(Opcode::ReturnValue));
    }

    #[test]
    fn test_line_table_ranges() {
        let mut b = CodeBuilder::new("f");
        b.set_first_lineno(10);
        b.emit(Opcode::Nop);
        b.emit(Opcode::Nop);
        b.set_line(11);
        b.emit_arg(Opcode::LoadConst, 0);
        b.emit(Opcode::ReturnValue);
        let code = b.finish();
        assert_eq!(
            code.line_table(),
            &[
                LineTableEntry { start: 0, end: 2, line: 10 },
                LineTableEntry { start: 2, end: 4, line: 11 },
            ]
        );
        assert_eq!(code.addr2line(3), Some(11));
        assert_eq!(code.addr2line(9), None);
        assert_eq!(code.line_starts(), vec![Some(10), None, Some(11), None]);
    }

    #[test]
    fn test_locals_layout() {
        let mut b = CodeBuilder::new("f");
        let x = b.add_local("x");
        b.add_cell("y");
        b.add_free("z");
        b.mark_cell(x);
        let code = b.finish();
        assert_eq!(code.nlocalsplus(), 3);
        assert_eq!(code.local_kind(0), LocalKind::LOCAL | LocalKind::CELL);
        assert_eq!(code.ncellvars(), 2);
        assert_eq!(code.nfreevars(), 1);
        assert!(code.is_optimized());
    }

    #[test]
    fn test_names_are_interned() {
        let mut b = CodeBuilder::new("f");
        assert_eq!(b.add_name("print"), 0);
        assert_eq!(b.add_name("len"), 1);
        assert_eq!(b.add_name("print"), 0);
    }

    #[test]
    fn test_warmup_starts_negative() {
        let code = CodeBuilder::new("f").finish();
        assert_eq!(code.warmup(), -QUICKENING_WARMUP_DELAY);
        for _ in 0..QUICKENING_WARMUP_DELAY {
            assert!(!code.is_warmed_up());
            code.increment_warmup();
        }
        assert!(code.is_warmed_up());
    }
}
