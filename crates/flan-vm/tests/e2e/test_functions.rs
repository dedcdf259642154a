use super::helpers::*;
use flan_vm::opcode::Op;

/// A function body that adds its two arguments (locals 1 and 2) and
/// returns.
fn adder_body() -> Vec<u8> {
    ImageBuilder::new()
        .op(Op::GetLocal)
        .u16(1)
        .op(Op::GetLocal)
        .u16(2)
        .fallible(Op::Add, 0)
        .op(Op::RetFn)
        .body()
}

#[test]
fn test_call_and_return() {
    // add(3, 4); the caller collapses callable + args with NipN.
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("add", 2, &adder_body())
        .op(Op::Load3)
        .op(Op::Load4)
        .fallible(Op::CallFn, 0)
        .u8(2)
        .op(Op::NipN)
        .u8(3)
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[7]);
    assert!(vm.frames.is_empty());
    assert_eq!(vm.stack.frame_base(), 0);
}

#[test]
fn test_call_leaves_exactly_one_value() {
    // Pre-call height 1 (a sentinel); post-cleanup height must be 2.
    let image = ImageBuilder::new()
        .op(Op::LoadNeg1)
        .op(Op::Load)
        .function_record("add", 2, &adder_body())
        .op(Op::Load1)
        .op(Op::Load2)
        .fallible(Op::CallFn, 0)
        .u8(2)
        .op(Op::NipN)
        .u8(3)
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[-1, 3]);
}

#[test]
fn test_callee_sees_callable_as_local_zero() {
    let body = ImageBuilder::new()
        .op(Op::GetLocal)
        .u16(0)
        .op(Op::RetFn)
        .body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("self_peek", 0, &body)
        .fallible(Op::CallFn, 0)
        .u8(0)
        .op(Op::NipN)
        .u8(1)
        .halt()
        .build();
    let vm = run_image(&image);
    assert_top_displays(&vm, "<function self_peek>");
}

#[test]
fn test_nested_calls_restore_frames() {
    // outer(x) = inner(x) + 10, inner(x) = x + 1
    let inner_body = ImageBuilder::new()
        .op(Op::GetLocal)
        .u16(1)
        .op(Op::Load1)
        .fallible(Op::Add, 0)
        .op(Op::RetFn)
        .body();
    let outer_body = ImageBuilder::new()
        .fallible(Op::GetGlobal, 0)
        .short_str("inner")
        .op(Op::GetLocal)
        .u16(1)
        .fallible(Op::CallFn, 0)
        .u8(1)
        .op(Op::NipN)
        .u8(2)
        .load_int(10)
        .fallible(Op::Add, 0)
        .op(Op::RetFn)
        .body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("inner", 1, &inner_body)
        .fallible(Op::DefGlobal, 0)
        .short_str("inner")
        .op(Op::Load)
        .function_record("outer", 1, &outer_body)
        .op(Op::Load5)
        .fallible(Op::CallFn, 0)
        .u8(1)
        .op(Op::NipN)
        .u8(2)
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[16]);
}

#[test]
fn test_set_local_writes_through_the_window() {
    let body = ImageBuilder::new()
        .op(Op::Load5)
        .op(Op::SetLocal)
        .u16(1)
        .op(Op::Pop)
        .op(Op::GetLocal)
        .u16(1)
        .op(Op::RetFn)
        .body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("clobber", 1, &body)
        .op(Op::Load1)
        .fallible(Op::CallFn, 0)
        .u8(1)
        .op(Op::NipN)
        .u8(2)
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[5]);
}

#[test]
fn test_arity_mismatch_is_fatal() {
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("add", 2, &adder_body())
        .op(Op::Load3)
        .fallible(Op::CallFn, 0)
        .u8(1)
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(
        err.to_string(),
        "<function add> expects 2 arguments but got 1"
    );
}

#[test]
fn test_calling_a_non_function_is_fatal() {
    let image = ImageBuilder::new()
        .op(Op::Load5)
        .fallible(Op::CallFn, 0)
        .u8(0)
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Cannot call 5");
}

#[test]
fn test_unbounded_recursion_overflows_the_frame_array() {
    // loop() = loop(); no Halt is ever reached.
    let body = ImageBuilder::new()
        .fallible(Op::GetGlobal, 0)
        .short_str("loop")
        .fallible(Op::CallFn, 0)
        .u8(0)
        .op(Op::RetFn)
        .body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("loop", 0, &body)
        .op(Op::Dup)
        .fallible(Op::DefGlobal, 0)
        .short_str("loop")
        .fallible(Op::CallFn, 0)
        .u8(0)
        .halt()
        .build();
    let (vm, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Call stack overflow");
    assert_eq!(vm.frames.len(), flan_vm::frame::CALL_FRAMES_MAX);
    // The trace names the recursive frame at every level.
    let rendered = vm.render_error(&err);
    assert!(rendered.contains("in <function loop>"), "{rendered}");
}

#[test]
fn test_trace_names_survive_local_zero_overwrite() {
    // The callee overwrites its own slot 0, then faults; the trace must
    // still name the original function.
    let body = ImageBuilder::new()
        .op(Op::Load5)
        .op(Op::SetLocal)
        .u16(0)
        .op(Op::Load0)
        .fallible(Op::Div, 0)
        .op(Op::RetFn)
        .body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("clobberer", 0, &body)
        .fallible(Op::CallFn, 0)
        .u8(0)
        .halt()
        .build();
    let (vm, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Cannot divide by zero");
    let rendered = vm.render_error(&err);
    assert!(rendered.contains("in <function clobberer>"), "{rendered}");
}

#[test]
fn test_running_off_a_function_body_is_fatal() {
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("empty", 0, &[])
        .fallible(Op::CallFn, 0)
        .u8(0)
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Execution ran past the end of the code");
}

#[test]
fn test_executing_endfn_is_fatal() {
    let body = ImageBuilder::new().op(Op::EndFn).body();
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("bad", 0, &body)
        .fallible(Op::CallFn, 0)
        .u8(0)
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Reached a function terminator at runtime");
}

#[test]
fn test_unnamed_function_renders_with_address() {
    let image = ImageBuilder::new()
        .op(Op::Load)
        .function_record("", 0, &[])
        .halt()
        .build();
    let vm = run_image(&image);
    let top = *vm.stack.values().last().unwrap();
    assert!(top.display(&vm.gc).starts_with("<function @0x"));
}
