//! Code unit encoding.
//!
//! ```text
//! ┌─────────────────┬─────────────────┐
//! │   oparg (8 bit) │  opcode (8 bit) │
//! └─────────────────┴─────────────────┘
//!  high byte          low byte
//! ```
//!
//! An argument wider than 8 bits is spread over up to three `EXTENDED_ARG`
//! prefixes. [`full_arg`] reassembles it from the effective instruction.

use crate::opcode::Opcode;
use std::fmt;

/// One 16-bit instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CodeUnit(u16);

impl CodeUnit {
    /// Pack an opcode and its 8-bit argument.
    #[inline]
    #[must_use]
    pub const fn new(opcode: Opcode, arg: u8) -> Self {
        CodeUnit((opcode as u16) | ((arg as u16) << 8))
    }

    /// Reinterpret a raw word.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        CodeUnit(raw)
    }

    /// The raw word.
    #[inline(always)]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The opcode byte.
    #[inline(always)]
    #[must_use]
    pub const fn opcode_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// The decoded opcode, if the byte names one.
    #[inline]
    #[must_use]
    pub const fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode_byte())
    }

    /// The 8-bit argument.
    #[inline(always)]
    #[must_use]
    pub const fn arg(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Whether this unit is an `EXTENDED_ARG` prefix.
    #[inline]
    #[must_use]
    pub const fn is_extended_arg(self) -> bool {
        self.opcode_byte() == Opcode::ExtendedArg as u8
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "{} {}", op, self.arg()),
            None => write!(f, "<0x{:02x}> {}", self.opcode_byte(), self.arg()),
        }
    }
}

/// Reassemble the full argument of the instruction at `index` by folding in
/// up to three preceding `EXTENDED_ARG` prefixes.
#[must_use]
pub fn full_arg(code: &[CodeUnit], index: usize) -> u32 {
    let mut oparg = u32::from(code[index].arg());
    let mut shift = 8;
    let mut i = index;
    while shift <= 24 && i >= 1 && code[i - 1].is_extended_arg() {
        i -= 1;
        oparg |= u32::from(code[i].arg()) << shift;
        shift += 8;
    }
    oparg
}

/// Number of code units needed to encode `arg`, prefixes included.
#[inline]
#[must_use]
pub const fn units_for_arg(arg: u32) -> usize {
    if arg > 0x00FF_FFFF {
        4
    } else if arg > 0xFFFF {
        3
    } else if arg > 0xFF {
        2
    } else {
        1
    }
}

/// Encode `opcode` with `arg`, emitting `EXTENDED_ARG` prefixes as needed.
pub fn encode(opcode: Opcode, arg: u32, out: &mut Vec<CodeUnit>) {
    let units = units_for_arg(arg);
    for k in (1..units).rev() {
        out.push(CodeUnit::new(Opcode::ExtendedArg, (arg >> (8 * k)) as u8));
    }
    out.push(CodeUnit::new(opcode, arg as u8));
}
