//! # Kestrel Bytecode
//!
//! The executable form of Kestrel functions.
//!
//! - **Opcodes**: [`Opcode`] with stack effects and jump encodings
//! - **Code Units**: 16-bit [`CodeUnit`]s and `EXTENDED_ARG` folding
//! - **Code Objects**: [`CodeObject`] with its line table and locals layout
//! - **Quickening Layout**: [`QuickenedCode`], the shared cache/instruction buffer
//! - **Construction**: [`CodeBuilder`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod code_object;
pub mod instruction;
pub mod opcode;
pub mod quickened;

pub use builder::{CodeBuilder, Label};
pub use code_object::{CodeFlags, CodeObject, LineTableEntry, LocalKind};
pub use instruction::{CodeUnit, full_arg};
pub use opcode::{HAVE_ARGUMENT, JumpKind, Opcode};
pub use quickened::{
    AdaptiveEntry, AttrCache, CallCache, LoadGlobalCache, QuickenedCode, SpecializedCacheEntry,
};
