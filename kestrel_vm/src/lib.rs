//! Frames, frame objects and bytecode quickening for the Kestrel VM.
//!
//! This crate holds the call-frame layer between compiled code and the
//! instruction loop:
//!
//! - **Data stack**: per-thread bump allocation of frame slots, with heap
//!   fallback past a configured limit
//! - **Frame objects**: lazily created, collector-tracked handles that keep
//!   a frame inspectable after its call returns
//! - **Quickening**: one-time rewrite of warmed-up code into adaptive
//!   instructions with inline caches
//! - **Stack analysis**: per-offset stack shapes used to validate debugger
//!   line jumps
//! - **Locals sync**: copying between fast locals and a locals mapping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   Interpreter                    │
//! │  builtins · frame object pool · cycle collector  │
//! ├──────────────────────────────────────────────────┤
//! │  ThreadState                                     │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────────────┐   │
//! │  │ frame 0 │← │ frame 1 │← │ frame N (curr)  │   │
//! │  └─────────┘  └─────────┘  └───────┬─────────┘   │
//! │        data stack slots            │ materialize │
//! │                                    ▼             │
//! │                             ┌──────────────┐     │
//! │                             │ FrameObject  │     │
//! │                             └──────────────┘     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use kestrel_bytecode::{CodeBuilder, Opcode};
//! use kestrel_core::Value;
//! use kestrel_vm::{Interpreter, VmConfig};
//! use std::rc::Rc;
//!
//! let mut b = CodeBuilder::new("answer");
//! let c = b.add_const(Value::int(42));
//! b.emit_arg(Opcode::LoadConst, c);
//! b.emit(Opcode::ReturnValue);
//! b.set_stacksize(1);
//!
//! let interp = Interpreter::new(VmConfig::default());
//! let thread = interp.new_thread();
//! let func = interp
//!     .new_function(Rc::new(b.finish()), interp.new_dict(), Vec::new())
//!     .unwrap();
//!
//! let id = thread.push_frame(&func, None).unwrap();
//! thread.with_frame(id, |mut frame| frame.push(Value::int(42)));
//! let frame_obj = thread.materialize(id);
//! thread.pop_frame().unwrap();
//!
//! // The frame object outlived the call and now owns the frame.
//! assert!(frame_obj.owns_frame());
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

// Core modules
pub mod config;
pub mod error;
pub mod frame;

// Frame storage and handles
pub mod data_stack;
pub mod facade_pool;
pub mod frame_object;
pub mod function;
pub mod interpreter;
pub mod thread;

// Code analysis and rewriting
pub mod locals;
pub mod specialize;
pub mod stack_analysis;

// Re-exports
pub use config::{DataStackConfig, FramePoolConfig, QuickenConfig, VmConfig};
pub use error::{JumpError, RuntimeError, RuntimeErrorKind, VmResult};
pub use frame::{FrameId, FrameMut, FrameState, GeneratorHook, InterpreterFrame};
pub use frame_object::FrameObject;
pub use function::FunctionObject;
pub use interpreter::Interpreter;
pub use specialize::{quicken, quickened_count, warmup_tick};
pub use stack_analysis::{JumpPlan, StackShape, mark_stacks, plan_jump};
pub use thread::ThreadState;
