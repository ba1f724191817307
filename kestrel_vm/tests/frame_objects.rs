//! Integration tests for frame objects.
//!
//! Exercises materialization, line jumps requested by a trace function,
//! detached frames, pool teardown and cycle collection of frame objects.

use kestrel_bytecode::{CodeBuilder, CodeObject, Opcode};
use kestrel_core::{DictObject, Object, Value};
use kestrel_vm::{
    FrameId, FrameObject, FrameState, Interpreter, JumpError, ThreadState, VmConfig,
};
use std::rc::Rc;

// =============================================================================
// Test Helpers
// =============================================================================

fn setup() -> (Interpreter, ThreadState) {
    let interp = Interpreter::new(VmConfig::for_testing());
    let thread = interp.new_thread();
    (interp, thread)
}

/// ```text
/// 1  for x in it:        0 LOAD_FAST it, 1 GET_ITER, 2 FOR_ITER
/// 2      y = x           3 STORE_FAST y
/// 3      y               4 LOAD_FAST y, 5 POP_TOP, 6 JUMP_ABSOLUTE 2
/// 4  return None         7 LOAD_CONST, 8 RETURN_VALUE
/// ```
fn for_loop() -> CodeObject {
    let mut b = CodeBuilder::new("loop");
    b.set_filename("loop.py");
    let it = b.add_local("it");
    let y = b.add_local("y");
    let none = b.add_const(Value::none());
    let top = b.create_label();
    let done = b.create_label();
    b.emit_arg(Opcode::LoadFast, it);
    b.emit(Opcode::GetIter);
    b.bind_label(top);
    b.emit_jump(Opcode::ForIter, done);
    b.set_line(2);
    b.emit_arg(Opcode::StoreFast, y);
    b.set_line(3);
    b.emit_arg(Opcode::LoadFast, y);
    b.emit(Opcode::PopTop);
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind_label(done);
    b.set_line(4);
    b.emit_arg(Opcode::LoadConst, none);
    b.emit(Opcode::ReturnValue);
    b.set_stacksize(2);
    b.finish()
}

/// Push a `for_loop` frame stopped at `lasti` with `stack` on its stack,
/// and install a trace function on its frame object.
fn traced_loop(
    interp: &Interpreter,
    thread: &ThreadState,
    lasti: i32,
    stack: &[Value],
) -> (FrameId, Rc<FrameObject>) {
    traced(interp, thread, for_loop(), lasti, stack)
}

fn traced(
    interp: &Interpreter,
    thread: &ThreadState,
    code: CodeObject,
    lasti: i32,
    stack: &[Value],
) -> (FrameId, Rc<FrameObject>) {
    let f = interp
        .new_function(Rc::new(code), interp.new_dict(), Vec::new())
        .unwrap();
    let id = thread.push_frame(&f, None).unwrap();
    thread.with_frame(id, |mut frame| {
        frame.set_state(FrameState::Executing);
        frame.set_lasti(lasti);
        for value in stack {
            frame.push(value.clone());
        }
    });
    let frame_obj = thread.materialize(id);
    frame_obj.set_trace(Some(Value::str("tracer")));
    (id, frame_obj)
}

// =============================================================================
// Materialization
// =============================================================================

#[test]
fn test_materialize_is_idempotent() {
    let (interp, thread) = setup();
    let (id, first) = traced_loop(&interp, &thread, 0, &[]);
    let second = thread.materialize(id);
    assert!(Rc::ptr_eq(&first, &second));
    assert!(Rc::ptr_eq(&thread.frame_object(id).unwrap(), &first));
}

#[test]
fn test_introspection() {
    let (interp, thread) = setup();
    let (id, frame_obj) = traced_loop(&interp, &thread, 4, &[Value::str("iter")]);
    assert_eq!(frame_obj.code().name().as_ref(), "loop");
    assert_eq!(frame_obj.lasti(), 8);
    assert_eq!(frame_obj.lineno(), Some(3));
    assert!(frame_obj.back().is_none());
    assert!(Rc::ptr_eq(
        &frame_obj.globals().unwrap(),
        &thread.with_frame(id, |frame| Rc::clone(frame.globals()))
    ));
    assert!(Rc::ptr_eq(&frame_obj.builtins().unwrap(), interp.builtins()));
    assert!(frame_obj.trace_lines());
    assert!(!frame_obj.trace_opcodes());

    let shown = frame_obj.to_string();
    assert!(shown.starts_with("<frame at 0x"));
    assert!(shown.ends_with(", file 'loop.py', line 3, code loop>"));
}

#[test]
fn test_line_override() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 0, &[]);
    assert_eq!(frame_obj.lineno(), Some(1));
    frame_obj.set_line_override(Some(9));
    assert_eq!(frame_obj.lineno(), Some(9));
    frame_obj.set_line_override(None);
    assert_eq!(frame_obj.lineno(), Some(1));
}

#[test]
fn test_lasti_before_first_instruction() {
    let (interp, thread) = setup();
    let f = interp
        .new_function(Rc::new(for_loop()), interp.new_dict(), Vec::new())
        .unwrap();
    let id = thread.push_frame(&f, None).unwrap();
    let frame_obj = thread.materialize(id);
    assert_eq!(frame_obj.lasti(), -1);
    assert_eq!(frame_obj.lineno(), Some(1));
    assert_eq!(frame_obj.state(), FrameState::Created);
}

#[test]
fn test_size_of_counts_owned_frame() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 0, &[]);
    let linked = frame_obj.size_of();
    thread.pop_frame().unwrap();
    assert!(frame_obj.owns_frame());
    assert_eq!(
        frame_obj.size_of() - linked,
        4 * std::mem::size_of::<Option<Value>>()
    );
}

// =============================================================================
// Line Jumps
// =============================================================================

#[test]
fn test_jump_into_for_loop_body_rejected() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 7, &[]);
    let err = frame_obj.set_lineno(3).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::IntoForLoop));
    assert_eq!(
        err.to_string(),
        "ValueError: can't jump into the body of a for loop"
    );
    assert_eq!(frame_obj.lasti(), 14);
}

#[test]
fn test_jump_out_of_loop_pops_iterator() {
    let (interp, thread) = setup();
    let iterator = Value::str("iter");
    let (id, frame_obj) = traced_loop(&interp, &thread, 4, &[iterator.clone()]);
    frame_obj.set_lineno(4).unwrap();
    assert_eq!(frame_obj.lasti(), 14);
    assert_eq!(frame_obj.lineno(), Some(4));
    thread.with_frame(id, |frame| assert_eq!(frame.stack_depth(), 0));
}

#[test]
fn test_jump_within_loop_keeps_iterator() {
    let (interp, thread) = setup();
    let (id, frame_obj) = traced_loop(&interp, &thread, 6, &[Value::str("iter")]);
    frame_obj.set_lineno(3).unwrap();
    assert_eq!(frame_obj.lasti(), 8);
    thread.with_frame(id, |frame| assert_eq!(frame.stack_depth(), 1));
}

#[test]
fn test_jump_to_differing_depth_rejected() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 4, &[Value::str("iter")]);
    let err = frame_obj.set_lineno(2).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::DifferingStackDepth));
    assert_eq!(frame_obj.lasti(), 8);
}

#[test]
fn test_jump_outside_code_block() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 7, &[]);
    assert_eq!(
        frame_obj.set_lineno(0).unwrap_err().as_jump_error(),
        Some(JumpError::BeforeCodeBlock(0))
    );
    assert_eq!(
        frame_obj.set_lineno(5).unwrap_err().as_jump_error(),
        Some(JumpError::AfterCodeBlock(5))
    );
    assert_eq!(
        frame_obj.set_lineno(i64::from(i32::MAX) + 1).unwrap_err().as_jump_error(),
        Some(JumpError::LinenoOutOfRange)
    );
}

#[test]
fn test_jump_requires_tracing_line_event() {
    let (interp, thread) = setup();
    let (id, frame_obj) = traced_loop(&interp, &thread, 7, &[]);

    frame_obj.set_trace(None);
    let err = frame_obj.set_lineno(4).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::NotTracing));

    frame_obj.set_trace(Some(Value::str("tracer")));
    thread.with_frame(id, |mut frame| frame.set_state(FrameState::Created));
    let err = frame_obj.set_lineno(4).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::FromCallEvent));

    thread.with_frame(id, |mut frame| frame.set_state(FrameState::Returned));
    let err = frame_obj.set_lineno(4).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::NotLineEvent));
}

#[test]
fn test_jump_clears_line_override() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced_loop(&interp, &thread, 7, &[]);
    frame_obj.set_line_override(Some(4));
    frame_obj.set_lineno(1).unwrap();
    assert_eq!(frame_obj.lasti(), 0);
    assert_eq!(frame_obj.lineno(), Some(1));
}

/// ```text
/// 1  0 LOAD_CONST, 1 RETURN_VALUE
/// 2  2 PUSH_EXC_INFO, 3 POP_EXCEPT_AND_RERAISE
/// ```
fn unreached_handler() -> CodeObject {
    let mut b = CodeBuilder::new("handler");
    let none = b.add_const(Value::none());
    b.emit_arg(Opcode::LoadConst, none);
    b.emit(Opcode::ReturnValue);
    b.set_line(2);
    b.emit(Opcode::PushExcInfo);
    b.emit(Opcode::PopExceptAndReraise);
    b.finish()
}

#[test]
fn test_jump_into_except_block_rejected() {
    let (interp, thread) = setup();
    let mut b = CodeBuilder::new("except");
    let none = b.add_const(Value::none());
    b.emit_arg(Opcode::LoadConst, none);
    b.emit(Opcode::PushExcInfo);
    b.set_line(2);
    b.emit(Opcode::PopExcept);
    b.emit(Opcode::ReturnValue);
    let (_, frame_obj) = traced(&interp, &thread, b.finish(), 0, &[]);

    let err = frame_obj.set_lineno(2).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::IntoExceptBlock));
    assert_eq!(
        err.to_string(),
        "ValueError: can't jump into an 'except' block as there's no exception"
    );
    assert_eq!(frame_obj.lasti(), 0);
}

#[test]
fn test_jump_into_exception_handler_rejected() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced(&interp, &thread, unreached_handler(), 0, &[]);
    let err = frame_obj.set_lineno(2).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::IntoExceptionHandler));
    assert_eq!(frame_obj.lasti(), 0);
}

#[test]
fn test_jump_from_exception_handler_rejected() {
    let (interp, thread) = setup();
    let (_, frame_obj) = traced(&interp, &thread, unreached_handler(), 2, &[]);
    let err = frame_obj.set_lineno(1).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::FromExceptionHandler));
    assert_eq!(frame_obj.lasti(), 4);
}

#[test]
fn test_jump_from_too_deep_stack_rejected() {
    let (interp, thread) = setup();
    let mut b = CodeBuilder::new("deep");
    let none = b.add_const(Value::none());
    for _ in 0..32 {
        b.emit_arg(Opcode::LoadConst, none);
    }
    b.set_line(2);
    b.emit(Opcode::ReturnValue);
    let (_, frame_obj) = traced(&interp, &thread, b.finish(), 32, &[]);

    let err = frame_obj.set_lineno(1).unwrap_err();
    assert_eq!(err.as_jump_error(), Some(JumpError::StackTooDeep));
    assert_eq!(err.to_string(), "ValueError: stack is too deep to analyze");
    assert_eq!(frame_obj.lasti(), 64);
}

// =============================================================================
// Detached Frames
// =============================================================================

#[test]
fn test_new_detached_uses_globals_builtins() {
    let (interp, thread) = setup();
    let own = Rc::new(DictObject::from_pairs([("len", Value::int(0))]));
    let globals = interp.new_dict();
    globals.insert("__builtins__", Value::dict(Rc::clone(&own)));
    let locals = Value::dict(interp.new_dict());

    let frame_obj =
        FrameObject::new_detached(&thread, Rc::new(for_loop()), globals, Some(locals.clone()))
            .unwrap();
    assert!(frame_obj.owns_frame());
    assert_eq!(frame_obj.state(), FrameState::Created);
    assert!(Rc::ptr_eq(&frame_obj.builtins().unwrap(), &own));
    assert!(frame_obj.locals().unwrap().is(&locals));
    assert!(frame_obj.back().is_none());
}

#[test]
fn test_new_detached_rejects_bad_builtins() {
    let (interp, thread) = setup();
    let globals = interp.new_dict();
    globals.insert("__builtins__", Value::str("nope"));
    let err = FrameObject::new_detached(&thread, Rc::new(for_loop()), globals, None).unwrap_err();
    assert_eq!(err.exception_type(), "TypeError");
}

// =============================================================================
// Pool and Collector
// =============================================================================

#[test]
fn test_pool_is_bounded() {
    let (interp, thread) = setup();
    let f = interp
        .new_function(Rc::new(for_loop()), interp.new_dict(), Vec::new())
        .unwrap();
    let ids: Vec<FrameId> = (0..6).map(|_| thread.push_frame(&f, None).unwrap()).collect();
    for id in ids {
        thread.materialize(id);
    }
    for _ in 0..6 {
        thread.pop_frame().unwrap();
    }
    assert_eq!(interp.free_frame_objects(), 4);
    assert_eq!(interp.clear_frame_pool(), 4);
    assert_eq!(interp.free_frame_objects(), 0);
}

#[test]
#[should_panic(expected = "frame object allocated after interpreter teardown")]
fn test_materialize_after_finalize_panics() {
    let (interp, thread) = setup();
    let f = interp
        .new_function(Rc::new(for_loop()), interp.new_dict(), Vec::new())
        .unwrap();
    let id = thread.push_frame(&f, None).unwrap();
    interp.finalize();
    thread.materialize(id);
}

#[test]
fn test_collector_frees_frame_object_cycle() {
    let (interp, thread) = setup();
    let f = interp
        .new_function(Rc::new(for_loop()), interp.new_dict(), Vec::new())
        .unwrap();
    let id = thread.push_frame(&f, None).unwrap();
    let holder = interp.new_dict();
    thread.with_frame(id, |mut frame| {
        frame.set_local(0, Some(Value::dict(Rc::clone(&holder))));
        frame.set_state(FrameState::Returned);
    });
    let frame_obj = thread.materialize(id);
    holder.insert("frame", Value::object(Rc::clone(&frame_obj) as Rc<dyn Object>));
    thread.pop_frame().unwrap();
    assert!(frame_obj.owns_frame());

    let weak = Rc::downgrade(&frame_obj);
    drop(frame_obj);
    drop(holder);
    assert!(weak.upgrade().is_some());

    let stats = interp.collect();
    assert!(stats.unreachable >= 2);
    assert!(weak.upgrade().is_none());
}
