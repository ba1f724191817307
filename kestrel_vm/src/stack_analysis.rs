//! Static model of the evaluation stack, for line jumps.
//!
//! Setting a frame's line from a debugger is only sound when the target
//! instruction expects no more on the stack than is already there, and
//! expects the right kind of thing in each slot: jumping into a `for` body
//! without its iterator, or into an `except` block without exception state,
//! would crash the interpreter.
//!
//! Each instruction offset gets a [`StackShape`]: a stack of 2-bit kind tags
//! packed into an `i64`, top of stack in the low bits.
//!
//! ```text
//! [Object, Iterator, Object]  =  0b11_01_11  =  0x37
//!                                   ▲     ▲
//!                               bottom   top
//! ```
//!
//! Two negative values are sentinels: `UNINITIALIZED` for offsets no
//! straight-line path reaches (exception handlers, dead code) and
//! `OVERFLOWED` for stacks deeper than the encoding holds.

use crate::error::JumpError;
use kestrel_bytecode::{CodeObject, Opcode, full_arg};
use std::fmt;

const BITS_PER_BLOCK: u32 = 2;
const MAX_STACK_ENTRIES: u32 = 63 / BITS_PER_BLOCK;
const WILL_OVERFLOW: u64 = 1 << ((MAX_STACK_ENTRIES - 1) * BITS_PER_BLOCK);

/// Kind of value in a modelled stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// The iterator of a running `for` loop.
    Iterator = 1,
    /// Exception state pushed on handler entry.
    Except = 2,
    /// Any other value.
    Object = 3,
}

/// Packed sequence of stack slot kinds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackShape(i64);

impl StackShape {
    /// An empty stack.
    pub const EMPTY: Self = Self(0);
    /// Offset not reached by straight-line flow.
    pub const UNINITIALIZED: Self = Self(-2);
    /// Stack too deep to encode.
    pub const OVERFLOWED: Self = Self(-1);

    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether this is a real shape rather than a sentinel.
    #[inline]
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    #[must_use]
    pub const fn push(self, kind: Kind) -> Self {
        if self.0 as u64 >= WILL_OVERFLOW {
            Self::OVERFLOWED
        } else {
            Self((self.0 << BITS_PER_BLOCK) | kind as i64)
        }
    }

    /// Drop the top slot. Sentinels stay negative.
    #[inline]
    #[must_use]
    pub const fn pop(self) -> Self {
        Self(self.0 >> BITS_PER_BLOCK)
    }

    /// Kind of the top slot; `None` for an empty stack.
    #[inline]
    #[must_use]
    pub const fn top(self) -> Option<Kind> {
        match self.0 & ((1 << BITS_PER_BLOCK) - 1) {
            1 => Some(Kind::Iterator),
            2 => Some(Kind::Except),
            3 => Some(Kind::Object),
            _ => None,
        }
    }

    /// Number of slots, for real shapes.
    #[must_use]
    pub fn depth(self) -> Option<usize> {
        if !self.is_known() {
            return None;
        }
        let bits = 64 - self.0.leading_zeros();
        Some(bits.div_ceil(BITS_PER_BLOCK) as usize)
    }

    /// Slot kinds, bottom first.
    #[must_use]
    pub fn kinds(self) -> Vec<Kind> {
        let mut kinds = Vec::new();
        let mut shape = self;
        while shape.is_known() {
            match shape.top() {
                Some(kind) => kinds.push(kind),
                None => break,
            }
            shape = shape.pop();
        }
        kinds.reverse();
        kinds
    }
}

impl fmt::Debug for StackShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNINITIALIZED => f.write_str("Uninitialized"),
            Self::OVERFLOWED => f.write_str("Overflowed"),
            shape => f.debug_list().entries(shape.kinds()).finish(),
        }
    }
}

// =============================================================================
// Dataflow
// =============================================================================

fn record(stacks: &mut [StackShape], target: usize, shape: StackShape) {
    debug_assert!(target + 1 < stacks.len(), "jump target {target} out of range");
    if let Some(slot) = stacks.get_mut(target) {
        debug_assert!(
            *slot == StackShape::UNINITIALIZED || *slot == shape,
            "divergent stack shapes at offset {target}: {slot:?} and {shape:?}"
        );
        *slot = shape;
    }
}

fn needs_revisit(stacks: &[StackShape], target: usize, from: usize) -> bool {
    target < from && stacks.get(target) == Some(&StackShape::UNINITIALIZED)
}

/// Stack shape before every instruction, plus one past the end.
///
/// Iterates to a fixed point; shapes reaching one offset along different
/// paths must agree.
pub fn mark_stacks(code: &CodeObject) -> Vec<StackShape> {
    let code = code.instructions();
    let len = code.len();
    let mut stacks = vec![StackShape::UNINITIALIZED; len + 1];
    stacks[0] = StackShape::EMPTY;

    let mut todo = true;
    while todo {
        todo = false;
        for i in 0..len {
            let mut next = stacks[i];
            if next == StackShape::UNINITIALIZED {
                continue;
            }
            let Some(opcode) = code[i].opcode() else {
                stacks[i + 1] = next;
                continue;
            };
            match opcode {
                Opcode::JumpIfFalseOrPop
                | Opcode::JumpIfTrueOrPop
                | Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
                | Opcode::JumpIfNotExcMatch => {
                    let j = full_arg(code, i) as usize;
                    todo |= needs_revisit(&stacks, j, i);
                    let target = match opcode {
                        Opcode::JumpIfNotExcMatch => {
                            next = next.pop().pop();
                            next
                        }
                        Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                            let target = next;
                            next = next.pop();
                            target
                        }
                        _ => {
                            next = next.pop();
                            next
                        }
                    };
                    record(&mut stacks, j, target);
                    stacks[i + 1] = next;
                }
                Opcode::JumpAbsolute => {
                    let j = full_arg(code, i) as usize;
                    todo |= needs_revisit(&stacks, j, i);
                    record(&mut stacks, j, next);
                }
                Opcode::JumpForward => {
                    let j = full_arg(code, i) as usize + i + 1;
                    record(&mut stacks, j, next);
                }
                Opcode::PopExcept | Opcode::EndAsyncFor => {
                    stacks[i + 1] = next.pop().pop().pop();
                }
                Opcode::GetIter | Opcode::GetAiter => {
                    stacks[i + 1] = next.pop().push(Kind::Iterator);
                }
                Opcode::ForIter => {
                    let exhausted = next.pop();
                    stacks[i + 1] = next.push(Kind::Object);
                    let j = full_arg(code, i) as usize + i + 1;
                    record(&mut stacks, j, exhausted);
                }
                Opcode::PushExcInfo => {
                    stacks[i + 1] = next
                        .push(Kind::Except)
                        .push(Kind::Except)
                        .push(Kind::Except);
                }
                Opcode::ReturnValue
                | Opcode::RaiseVarargs
                | Opcode::Reraise
                | Opcode::PopExceptAndReraise => {}
                Opcode::GenStart => {
                    stacks[i + 1] = next;
                }
                _ => {
                    let delta = opcode.stack_effect(full_arg(code, i));
                    for _ in delta..0 {
                        next = next.pop();
                    }
                    for _ in 0..delta {
                        next = next.push(Kind::Object);
                    }
                    stacks[i + 1] = next;
                }
            }
        }
    }
    stacks
}

// =============================================================================
// Compatibility
// =============================================================================

fn compatible_kind(from: Option<Kind>, to: Option<Kind>) -> bool {
    match to {
        None => false,
        Some(Kind::Object) => true,
        Some(_) => from == to,
    }
}

/// Whether a frame whose stack has shape `from` can continue at an
/// instruction expecting `to` after popping its excess slots.
pub fn compatible_stack(from: StackShape, to: StackShape) -> bool {
    if !from.is_known() || !to.is_known() {
        return false;
    }
    let (mut from, mut to) = (from, to);
    while from > to {
        from = from.pop();
    }
    while from != StackShape::EMPTY {
        if !compatible_kind(from.top(), to.top()) {
            return false;
        }
        from = from.pop();
        to = to.pop();
    }
    to == StackShape::EMPTY
}

/// Why no stack can reach an instruction expecting `to`.
pub fn explain_incompatible_stack(to: StackShape) -> JumpError {
    debug_assert!(to != StackShape::EMPTY);
    match to {
        StackShape::OVERFLOWED => JumpError::StackTooDeep,
        StackShape::UNINITIALIZED => JumpError::IntoExceptionHandler,
        _ => match to.top() {
            Some(Kind::Except) => JumpError::IntoExceptBlock,
            Some(Kind::Iterator) => JumpError::IntoForLoop,
            Some(Kind::Object) | None => JumpError::DifferingStackDepth,
        },
    }
}

// =============================================================================
// Line Jumps
// =============================================================================

/// For each instruction, the line that starts there.
pub fn marklines(code: &CodeObject) -> Vec<Option<u32>> {
    code.line_starts()
}

/// Smallest line in `lines` at or after `line`.
pub fn first_line_not_before(lines: &[Option<u32>], line: i64) -> Option<u32> {
    lines
        .iter()
        .flatten()
        .copied()
        .filter(|&l| i64::from(l) >= line)
        .min()
}

/// A validated line jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPlan {
    /// Instruction to continue from.
    pub target: usize,
    /// Values to pop off the evaluation stack first.
    pub pops: usize,
}

/// Plan a jump of a frame stopped at `lasti` to `new_lineno`.
///
/// Among the instructions starting the target line whose stack is
/// compatible, the one keeping the deepest stack wins; ties go to the
/// lowest offset. A suspended frame already had its yielded value popped.
pub fn plan_jump(
    code: &CodeObject,
    lasti: usize,
    suspended: bool,
    new_lineno: i64,
) -> Result<JumpPlan, JumpError> {
    if i32::try_from(new_lineno).is_err() {
        return Err(JumpError::LinenoOutOfRange);
    }
    if new_lineno < i64::from(code.first_lineno()) {
        return Err(JumpError::BeforeCodeBlock(new_lineno));
    }
    let lines = marklines(code);
    let line = first_line_not_before(&lines, new_lineno)
        .ok_or(JumpError::AfterCodeBlock(new_lineno))?;

    let stacks = mark_stacks(code);
    let start = stacks[lasti.min(code.len())];
    let mut best_depth = 0;
    let mut best_addr = None;
    let mut reason = JumpError::NoBytecodeForLine;
    let mut explained = false;
    for (i, _) in lines.iter().enumerate().filter(|(_, l)| **l == Some(line)) {
        let target = stacks[i];
        if compatible_stack(start, target) {
            let depth = target.depth().unwrap_or(0);
            if best_addr.is_none() || depth > best_depth {
                best_depth = depth;
                best_addr = Some(i);
            }
        } else if best_addr.is_none() && !explained {
            if start == StackShape::OVERFLOWED {
                reason = JumpError::StackTooDeep;
            } else if start == StackShape::UNINITIALIZED {
                reason = JumpError::FromExceptionHandler;
            } else {
                reason = explain_incompatible_stack(target);
                explained = true;
            }
        }
    }
    let target = best_addr.ok_or(reason)?;

    let start = if suspended { start.pop() } else { start };
    let pops = start.depth().unwrap_or(0).saturating_sub(best_depth);
    Ok(JumpPlan { target, pops })
}
