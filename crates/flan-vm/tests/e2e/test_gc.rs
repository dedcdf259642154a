use super::helpers::*;
use flan_core::gc::{Generation, Heap};
use flan_core::object::HeapObject;
use flan_vm::opcode::Op;
use flan_vm::vm::Vm;

fn str_size() -> u64 {
    HeapObject::Str(String::new()).byte_size()
}

/// Load a VM with a tiny nursery so a handful of allocations forces
/// collections.
fn load_with_small_heap(image: &[u8], nursery_objects: u64) -> Vm {
    let mut vm = Vm::load(image).unwrap();
    vm.gc = Heap::with_thresholds(str_size() * nursery_objects, u64::MAX);
    vm
}

#[test]
fn test_unrooted_allocations_are_collected_during_execution() {
    // Push 8 strings, discard every other one as it arrives. With a
    // 4-object nursery the garbage cannot pile up.
    let mut b = ImageBuilder::new();
    for i in 0..8 {
        b = b.load_str(&format!("s{i}"));
        if i % 2 == 1 {
            b = b.op(Op::Pop);
        }
    }
    let image = b.halt().build();
    let mut vm = load_with_small_heap(&image, 4);
    vm.run().unwrap();

    assert_eq!(vm.stack.len(), 4);
    // Everything still reachable is alive and accounted for.
    for v in vm.stack.values() {
        assert!(vm.gc.is_live(v.as_obj().unwrap()));
    }
    assert!(vm.gc.live_objects() <= 8);
}

#[test]
fn test_survivors_move_to_the_retirement_home() {
    // Root one string, then churn enough garbage to force several nursery
    // collections.
    let mut b = ImageBuilder::new().load_str("old-timer");
    for i in 0..12 {
        b = b.load_str(&format!("junk{i}")).op(Op::Pop);
    }
    let image = b.halt().build();
    let mut vm = load_with_small_heap(&image, 3);
    vm.run().unwrap();

    let survivor = vm.stack.values()[0].as_obj().unwrap();
    assert!(vm.gc.is_live(survivor));
    assert_eq!(vm.gc.generation_of(survivor), Some(Generation::Retirement));
    assert_eq!(vm.stack.values()[0].display(&vm.gc), "old-timer");
}

#[test]
fn test_operands_survive_the_concat_allocation() {
    // String concatenation allocates while its two operands are already
    // popped; a collection inside that allocation must not corrupt the
    // result even with the tightest possible nursery.
    let image = ImageBuilder::new()
        .load_str("foo")
        .load_str("bar")
        .fallible(Op::Add, 0)
        .halt()
        .build();
    let mut vm = load_with_small_heap(&image, 1);
    vm.run().unwrap();
    assert_top_displays(&vm, "foobar");
}

#[test]
fn test_container_children_survive_init_collections() {
    // Build a list of fresh strings with a one-object nursery: the
    // children sit on the stack while the list allocation collects.
    let image = ImageBuilder::new()
        .load_str("a")
        .load_str("b")
        .load_str("c")
        .op(Op::InitList)
        .u32(3)
        .halt()
        .build();
    let mut vm = load_with_small_heap(&image, 1);
    vm.run().unwrap();
    assert_top_displays(&vm, "[a, b, c]");
}

#[test]
fn test_accounted_bytes_track_live_objects() {
    let mut b = ImageBuilder::new();
    for i in 0..6 {
        b = b.load_str(&format!("s{i}"));
    }
    let image = b.halt().build();
    let mut vm = load_with_small_heap(&image, 2);
    vm.run().unwrap();

    assert_eq!(
        vm.gc.nursery_bytes() + vm.gc.retirement_bytes(),
        vm.gc.live_objects() as u64 * str_size()
    );
}
