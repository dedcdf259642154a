use super::helpers::*;
use flan_vm::opcode::Op;

#[test]
fn test_define_and_read_global() {
    let image = ImageBuilder::new()
        .op(Op::Load5)
        .fallible(Op::DefGlobal, 0)
        .short_str("x")
        .fallible(Op::GetGlobal, 0)
        .short_str("x")
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[5]);
}

#[test]
fn test_set_global_reassigns() {
    let image = ImageBuilder::new()
        .op(Op::Load1)
        .fallible(Op::DefGlobal, 0)
        .short_str("x")
        .op(Op::Load2)
        .fallible(Op::SetGlobal, 0)
        .short_str("x")
        .fallible(Op::GetGlobal, 0)
        .short_str("x")
        .halt()
        .build();
    let vm = run_image(&image);
    assert_stack_ints(&vm, &[2]);
}

#[test]
fn test_redefining_a_global_is_fatal() {
    let image = ImageBuilder::new()
        .op(Op::Load1)
        .fallible(Op::DefGlobal, 0)
        .short_str("x")
        .op(Op::Load2)
        .fallible(Op::DefGlobal, 0)
        .short_str("x")
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Global variable 'x' is already defined");
}

#[test]
fn test_reading_an_undefined_global_is_fatal() {
    let image = ImageBuilder::new()
        .fallible(Op::GetGlobal, 0)
        .short_str("nope")
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Global variable 'nope' is not defined");
}

#[test]
fn test_assigning_an_undefined_global_is_fatal() {
    let image = ImageBuilder::new()
        .op(Op::Load1)
        .fallible(Op::SetGlobal, 0)
        .short_str("nope")
        .halt()
        .build();
    let (_, err) = run_image_err(&image);
    assert_eq!(err.to_string(), "Global variable 'nope' is not defined");
}

#[test]
fn test_global_object_survives_collection() {
    // A string reachable only through a global must survive a forced
    // nursery collection.
    let image = ImageBuilder::new()
        .load_str("kept")
        .fallible(Op::DefGlobal, 0)
        .short_str("g")
        .halt()
        .build();
    let mut vm = flan_vm::vm::Vm::load(&image).unwrap();
    vm.gc = flan_core::gc::Heap::with_thresholds(1, u64::MAX);
    vm.run().unwrap();

    // The next allocation's threshold check collects; the global keeps its
    // object alive.
    vm.alloc_string("trigger".to_string());
    let g = vm.globals.get("g").copied().unwrap();
    assert!(vm.gc.is_live(g.as_obj().unwrap()));
    assert_eq!(g.display(&vm.gc), "kept");
}
